//! Query options
//!
//! User-supplied query fragments arrive as text ([`RawQuery`]), are parsed and
//! validated into [`QueryOptions`], and are normalized into the
//! [`QueryRequest`] a connection executes.

use crate::document::{parse_document, parse_value};
use crate::{MongozError, Result};
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// Query fragments as typed by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawQuery {
    pub filter: String,
    pub projection: String,
    pub sort: String,
    pub limit: String,
    pub pipeline: String,
}

impl RawQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, text: impl Into<String>) -> Self {
        self.filter = text.into();
        self
    }

    pub fn projection(mut self, text: impl Into<String>) -> Self {
        self.projection = text.into();
        self
    }

    pub fn sort(mut self, text: impl Into<String>) -> Self {
        self.sort = text.into();
        self
    }

    pub fn limit(mut self, text: impl Into<String>) -> Self {
        self.limit = text.into();
        self
    }

    pub fn pipeline(mut self, text: impl Into<String>) -> Self {
        self.pipeline = text.into();
        self
    }
}

/// Validated query options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: Option<Document>,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<u64>,
    /// Ordered stages; a non-empty pipeline supersedes every other option
    pub pipeline: Vec<Document>,
}

/// Parameters of a find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    /// `None` means unbounded
    pub limit: Option<i64>,
}

/// What a connection runs for a set of [`QueryOptions`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    Find(FindRequest),
    Aggregate { pipeline: Vec<Document> },
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate raw fragments.
    ///
    /// Blank fragments are absent. Errors name the offending fragment.
    pub fn parse(raw: &RawQuery) -> Result<Self> {
        Ok(Self {
            filter: parse_fragment("filter", &raw.filter)?,
            projection: parse_fragment("projection", &raw.projection)?,
            sort: parse_fragment("sort", &raw.sort)?,
            limit: parse_limit(&raw.limit)?,
            pipeline: parse_pipeline(&raw.pipeline)?,
        })
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Vec<Document>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn is_aggregate(&self) -> bool {
        !self.pipeline.is_empty()
    }

    /// Normalize into the request to execute
    pub fn request(&self) -> QueryRequest {
        if self.is_aggregate() {
            return QueryRequest::Aggregate {
                pipeline: self.pipeline.clone(),
            };
        }
        QueryRequest::Find(FindRequest {
            filter: self.filter.clone().unwrap_or_default(),
            projection: self.projection.clone(),
            sort: self.sort.clone(),
            limit: self
                .limit
                .filter(|limit| *limit > 0)
                .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX)),
        })
    }
}

impl TryFrom<&RawQuery> for QueryOptions {
    type Error = MongozError;

    fn try_from(raw: &RawQuery) -> Result<Self> {
        QueryOptions::parse(raw)
    }
}

fn parse_fragment(field: &str, text: &str) -> Result<Option<Document>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    parse_document(text)
        .map(Some)
        .map_err(|e| MongozError::validation(field, e.to_string()))
}

fn parse_limit(text: &str) -> Result<Option<u64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<u64>().map(Some).map_err(|_| {
        MongozError::validation(
            "limit",
            format!("'{}' is not a non-negative integer", text),
        )
    })
}

fn parse_pipeline(text: &str) -> Result<Vec<Document>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value = parse_value(text).map_err(|e| MongozError::validation("pipeline", e.to_string()))?;
    let stages = match value {
        Bson::Array(items) => items,
        single @ Bson::Document(_) => vec![single],
        other => {
            return Err(MongozError::validation(
                "pipeline",
                format!(
                    "expected an array of stages, found {:?}",
                    other.element_type()
                ),
            ));
        }
    };

    stages
        .into_iter()
        .enumerate()
        .map(|(i, stage)| match stage {
            Bson::Document(doc) if !doc.is_empty() => Ok(doc),
            Bson::Document(_) => Err(MongozError::validation(
                "pipeline",
                format!("stage {} is an empty document", i),
            )),
            other => Err(MongozError::validation(
                "pipeline",
                format!(
                    "stage {} must be a document, found {:?}",
                    i,
                    other.element_type()
                ),
            )),
        })
        .collect()
}
