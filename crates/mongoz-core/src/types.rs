//! Core types for mongoz

use crate::{DocumentTree, MongozError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A collection inside a database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub database: String,
    pub name: String,
}

impl CollectionRef {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Parses `database.collection`; the collection part may itself contain dots
impl FromStr for CollectionRef {
    type Err = MongozError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('.') {
            Some((database, name)) if !database.is_empty() && !name.is_empty() => {
                Ok(Self::new(database, name))
            }
            _ => Err(MongozError::validation(
                "collection",
                format!("'{}' should be 'database.collection'", s.trim()),
            )),
        }
    }
}

/// Documents returned by one query execution
#[derive(Debug, Clone)]
pub struct CollectionResult {
    /// Unique execution ID
    pub id: Uuid,
    /// Documents in the order the store yielded them
    pub documents: Vec<DocumentTree>,
    /// Total document count (if known)
    pub total_count: Option<u64>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl CollectionResult {
    pub fn new(documents: Vec<DocumentTree>, execution_time_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            total_count: Some(documents.len() as u64),
            documents,
            execution_time_ms,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn has_documents(&self) -> bool {
        !self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A database and the collections visible in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub collections: Vec<String>,
}

/// Databases visible under a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub databases: Vec<DatabaseInfo>,
}

impl ServerInfo {
    pub fn database(&self, name: &str) -> Option<&DatabaseInfo> {
        self.databases.iter().find(|db| db.name == name)
    }

    /// Every collection, as references
    pub fn collections(&self) -> impl Iterator<Item = CollectionRef> + '_ {
        self.databases.iter().flat_map(|db| {
            db.collections
                .iter()
                .map(move |name| CollectionRef::new(&db.name, name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_ref_parse() {
        let coll: CollectionRef = "test.dummy.archive".parse().unwrap();

        assert_eq!(coll, CollectionRef::new("test", "dummy.archive"));
        assert_eq!(coll.to_string(), "test.dummy.archive");
    }

    #[test]
    fn test_collection_ref_requires_both_parts() {
        assert!("test".parse::<CollectionRef>().is_err());
        assert!(".dummy".parse::<CollectionRef>().is_err());
        assert!("test.".parse::<CollectionRef>().is_err());
    }

    #[test]
    fn test_server_info_collections() {
        let info = ServerInfo {
            databases: vec![
                DatabaseInfo {
                    name: "a".to_string(),
                    collections: vec!["x".to_string(), "y".to_string()],
                },
                DatabaseInfo {
                    name: "b".to_string(),
                    collections: vec![],
                },
            ],
        };

        let all: Vec<String> = info.collections().map(|c| c.to_string()).collect();
        assert_eq!(all, vec!["a.x", "a.y"]);
        assert!(info.database("b").is_some());
    }
}
