//! Editable document trees
//!
//! A [`DocumentTree`] is a top-level object whose fields are [`Node`]s. Every
//! node is addressed by a [`NodePath`] and all edits go through paths, so the
//! tree stays exclusively owned and acyclic. Trees convert losslessly to and
//! from BSON documents and to and from the shell text form.

mod convert;
mod parser;
mod serialize;

use crate::{MongozError, ParseError, Result};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;

pub(crate) use parser::{parse_document, parse_value};

/// Name of the document identifier field
pub const ID_FIELD: &str = "_id";

/// A value in a document tree
#[derive(Debug, Clone)]
pub enum Node {
    Object(IndexMap<String, Node>),
    Array(Vec<Node>),
    String(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Boolean(bool),
    Null,
    /// UTC instant with millisecond precision
    DateTime(bson::DateTime),
    Binary { subtype: u8, bytes: Vec<u8> },
    ObjectId(ObjectId),
    /// Any other BSON value, kept opaque
    Other(Bson),
}

/// Variant tag of a [`Node`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Object,
    Array,
    String,
    Int32,
    Int64,
    Double,
    Boolean,
    Null,
    DateTime,
    Binary,
    ObjectId,
    Other,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::Array => "array",
            NodeKind::String => "string",
            NodeKind::Int32 => "int32",
            NodeKind::Int64 => "int64",
            NodeKind::Double => "double",
            NodeKind::Boolean => "boolean",
            NodeKind::Null => "null",
            NodeKind::DateTime => "date",
            NodeKind::Binary => "binary",
            NodeKind::ObjectId => "objectId",
            NodeKind::Other => "other",
        }
    }

    /// Fresh value of this kind, used when an editor changes a node's type.
    ///
    /// `Other` has no default.
    pub fn default_node(&self) -> Option<Node> {
        let node = match self {
            NodeKind::Object => Node::Object(IndexMap::new()),
            NodeKind::Array => Node::Array(Vec::new()),
            NodeKind::String => Node::String(String::new()),
            NodeKind::Int32 => Node::Int32(0),
            NodeKind::Int64 => Node::Int64(0),
            NodeKind::Double => Node::Double(0.0),
            NodeKind::Boolean => Node::Boolean(false),
            NodeKind::Null => Node::Null,
            NodeKind::DateTime => Node::DateTime(bson::DateTime::now()),
            NodeKind::Binary => Node::Binary {
                subtype: 0,
                bytes: Vec::new(),
            },
            NodeKind::ObjectId => Node::ObjectId(ObjectId::new()),
            NodeKind::Other => return None,
        };
        Some(node)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Object(_) => NodeKind::Object,
            Node::Array(_) => NodeKind::Array,
            Node::String(_) => NodeKind::String,
            Node::Int32(_) => NodeKind::Int32,
            Node::Int64(_) => NodeKind::Int64,
            Node::Double(_) => NodeKind::Double,
            Node::Boolean(_) => NodeKind::Boolean,
            Node::Null => NodeKind::Null,
            Node::DateTime(_) => NodeKind::DateTime,
            Node::Binary { .. } => NodeKind::Binary,
            Node::ObjectId(_) => NodeKind::ObjectId,
            Node::Other(_) => NodeKind::Other,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Node::Object(_) | Node::Array(_))
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_container()
    }

    /// Parse a single value in the shell text form
    pub fn parse(text: &str) -> Result<Node> {
        Ok(Node::from(parse_value(text)?))
    }

    /// Compact text form
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        serialize::write_compact(self, &mut out);
        out
    }

    /// Child addressed by `segment`; an index on an object names a digit key
    pub fn child(&self, segment: &PathSegment) -> Option<&Node> {
        match (self, segment) {
            (Node::Object(fields), segment) => fields.get(&*segment.as_key()),
            (Node::Array(items), PathSegment::Index(index)) => items.get(*index),
            _ => None,
        }
    }

    fn child_mut(&mut self, segment: &PathSegment) -> Option<&mut Node> {
        match (self, segment) {
            (Node::Object(fields), segment) => fields.get_mut(&*segment.as_key()),
            (Node::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
            _ => None,
        }
    }

    /// One-line label for tree views.
    ///
    /// Strings are shown raw, dates as `MM/dd/yy hh:mm:ss AM UTC`.
    pub fn display_value(&self) -> String {
        match self {
            Node::Object(fields) => format!("{{ {} fields }}", fields.len()),
            Node::Array(items) => format!("[ {} elements ]", items.len()),
            Node::String(s) => s.clone(),
            Node::Int32(n) => n.to_string(),
            Node::Int64(n) => n.to_string(),
            Node::Double(_) | Node::Null | Node::Boolean(_) | Node::Other(_) => self.to_text(),
            Node::DateTime(dt) => format_utc_date(*dt),
            Node::Binary { subtype, bytes } => {
                format!("BinData({}, {} bytes)", subtype, bytes.len())
            }
            Node::ObjectId(oid) => oid.to_hex(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Object(a), Node::Object(b)) => fields_eq(a, b),
            (Node::Array(a), Node::Array(b)) => a == b,
            (Node::String(a), Node::String(b)) => a == b,
            (Node::Int32(a), Node::Int32(b)) => a == b,
            (Node::Int64(a), Node::Int64(b)) => a == b,
            (Node::Double(a), Node::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Node::Boolean(a), Node::Boolean(b)) => a == b,
            (Node::Null, Node::Null) => true,
            (Node::DateTime(a), Node::DateTime(b)) => a == b,
            (
                Node::Binary {
                    subtype: sa,
                    bytes: ba,
                },
                Node::Binary {
                    subtype: sb,
                    bytes: bb,
                },
            ) => sa == sb && ba == bb,
            (Node::ObjectId(a), Node::ObjectId(b)) => a == b,
            (Node::Other(a), Node::Other(b)) => a == b,
            _ => false,
        }
    }
}

// Field order is significant for documents.
fn fields_eq(a: &IndexMap<String, Node>, b: &IndexMap<String, Node>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && va == vb)
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Format a date the way result views show it, e.g. `12/31/14 11:00:00 PM UTC`
pub fn format_utc_date(date: bson::DateTime) -> String {
    match DateTime::<Utc>::from_timestamp_millis(date.timestamp_millis()) {
        Some(instant) => instant.format("%m/%d/%y %I:%M:%S %p UTC").to_string(),
        None => format!("new Date({})", date.timestamp_millis()),
    }
}

/// One step of a [`NodePath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    /// The segment as an object key
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            PathSegment::Key(key) => Cow::Borrowed(key),
            PathSegment::Index(index) => Cow::Owned(index.to_string()),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Address of a node inside a [`DocumentTree`]; the empty path is the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    /// Parse a dotted path such as `address.lines.0`.
    ///
    /// Numeric segments index into arrays and name digit keys on objects.
    /// A segment with a leading zero is always a key.
    pub fn parse_dotted(text: &str) -> Self {
        let segments = text
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| match s.parse::<usize>() {
                Ok(index) if index.to_string() == s => PathSegment::Index(index),
                _ => PathSegment::Key(s.to_string()),
            })
            .collect();
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path to the parent and the last segment, `None` for the root
    pub fn split_last(&self) -> Option<(NodePath, &PathSegment)> {
        let (last, parent) = self.0.split_last()?;
        Some((NodePath(parent.to_vec()), last))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

enum Container<'t> {
    Object(&'t mut IndexMap<String, Node>),
    Array(&'t mut Vec<Node>),
}

/// A top-level document
#[derive(Debug, Clone, Default)]
pub struct DocumentTree {
    fields: IndexMap<String, Node>,
}

impl PartialEq for DocumentTree {
    fn eq(&self, other: &Self) -> bool {
        fields_eq(&self.fields, &other.fields)
    }
}

impl DocumentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: IndexMap<String, Node>) -> Self {
        Self { fields }
    }

    /// Parse the shell text form; the value must be an object
    pub fn parse(text: &str) -> Result<DocumentTree> {
        match Node::parse(text)? {
            Node::Object(fields) => Ok(Self { fields }),
            other => Err(ParseError::new(
                format!("expected a document, found {}", other.kind()),
                0,
            )
            .into()),
        }
    }

    /// Canonical single-line text form
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        serialize::write_object_compact(&self.fields, &mut out);
        out
    }

    /// Indented text form, same grammar as [`DocumentTree::serialize`]
    pub fn serialize_pretty(&self) -> String {
        let mut out = String::new();
        serialize::write_object_pretty(&self.fields, 0, &mut out);
        out
    }

    pub fn fields(&self) -> &IndexMap<String, Node> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of the top-level `_id` field
    pub fn id(&self) -> Option<&Node> {
        self.fields.get(ID_FIELD)
    }

    /// `_id` as a native BSON value, for point operations
    pub fn id_bson(&self) -> Option<Bson> {
        self.id().cloned().map(Bson::from)
    }

    pub fn to_document(&self) -> Document {
        Document::from(self.clone())
    }

    pub fn get(&self, path: &NodePath) -> Option<&Node> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.fields.get(&*first.as_key())?;
        for segment in rest {
            node = node.child(segment)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, path: &NodePath) -> Result<&mut Node> {
        let Some((first, rest)) = path.segments().split_first() else {
            return Err(MongozError::InvalidPath(
                "the document root is not a value".to_string(),
            ));
        };
        let mut node = self
            .fields
            .get_mut(&*first.as_key())
            .ok_or_else(|| MongozError::InvalidPath(format!("no node at '{}'", path)))?;
        for segment in rest {
            node = node
                .child_mut(segment)
                .ok_or_else(|| MongozError::InvalidPath(format!("no node at '{}'", path)))?;
        }
        Ok(node)
    }

    fn container_mut(&mut self, path: &NodePath) -> Result<Container<'_>> {
        if path.is_root() {
            return Ok(Container::Object(&mut self.fields));
        }
        match self.node_mut(path)? {
            Node::Object(fields) => Ok(Container::Object(fields)),
            Node::Array(items) => Ok(Container::Array(items)),
            other => Err(MongozError::InvalidPath(format!(
                "'{}' is a {}, not a container",
                path,
                other.kind()
            ))),
        }
    }

    fn object_mut(&mut self, path: &NodePath) -> Result<&mut IndexMap<String, Node>> {
        match self.container_mut(path)? {
            Container::Object(fields) => Ok(fields),
            Container::Array(_) => Err(MongozError::InvalidPath(format!(
                "'{}' is an array, not an object",
                path
            ))),
        }
    }

    fn array_mut(&mut self, path: &NodePath) -> Result<&mut Vec<Node>> {
        match self.container_mut(path)? {
            Container::Array(items) => Ok(items),
            Container::Object(_) => Err(MongozError::InvalidPath(format!(
                "'{}' is an object, not an array",
                path
            ))),
        }
    }

    /// Replace a scalar value; a different scalar variant re-tags the node
    pub fn set_scalar(&mut self, path: &NodePath, value: Node) -> Result<()> {
        if value.is_container() {
            return Err(MongozError::validation(
                "value",
                format!("a {} is not a scalar value", value.kind()),
            ));
        }
        let node = self.node_mut(path)?;
        if node.is_container() {
            return Err(MongozError::InvalidPath(format!(
                "'{}' is a {}, not a scalar",
                path,
                node.kind()
            )));
        }
        *node = value;
        Ok(())
    }

    /// Add a new field to the object at `path`
    pub fn insert_key(&mut self, path: &NodePath, key: &str, value: Node) -> Result<()> {
        if key.is_empty() {
            return Err(MongozError::validation("key", "field name cannot be empty"));
        }
        let fields = self.object_mut(path)?;
        if fields.contains_key(key) {
            return Err(MongozError::validation(
                "key",
                format!("Key '{}' is already used", key),
            ));
        }
        fields.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove a field from the object at `path`, returning its value
    pub fn remove_key(&mut self, path: &NodePath, key: &str) -> Result<Node> {
        if path.is_root() && key == ID_FIELD {
            return Err(MongozError::validation(
                ID_FIELD,
                "the document identifier cannot be removed",
            ));
        }
        self.object_mut(path)?
            .shift_remove(key)
            .ok_or_else(|| MongozError::InvalidPath(format!("no field '{}' at '{}'", key, path)))
    }

    /// Rename a field in place, keeping its position
    pub fn rename_key(&mut self, path: &NodePath, from: &str, to: &str) -> Result<()> {
        if path.is_root() && from == ID_FIELD {
            return Err(MongozError::validation(
                ID_FIELD,
                "the document identifier cannot be renamed",
            ));
        }
        if to.is_empty() {
            return Err(MongozError::validation("key", "field name cannot be empty"));
        }
        let fields = self.object_mut(path)?;
        if from == to {
            return if fields.contains_key(from) {
                Ok(())
            } else {
                Err(MongozError::InvalidPath(format!(
                    "no field '{}' at '{}'",
                    from, path
                )))
            };
        }
        if fields.contains_key(to) {
            return Err(MongozError::validation(
                "key",
                format!("Key '{}' is already used", to),
            ));
        }
        let (index, _, value) = fields
            .shift_remove_full(from)
            .ok_or_else(|| MongozError::InvalidPath(format!("no field '{}' at '{}'", from, path)))?;
        fields.shift_insert(index, to.to_string(), value);
        Ok(())
    }

    /// Insert an element into the array at `path`; `index == len` appends
    pub fn insert_element(&mut self, path: &NodePath, index: usize, value: Node) -> Result<()> {
        let items = self.array_mut(path)?;
        if index > items.len() {
            return Err(MongozError::InvalidPath(format!(
                "index {} is out of bounds for '{}' of length {}",
                index,
                path,
                items.len()
            )));
        }
        items.insert(index, value);
        Ok(())
    }

    /// Remove an element from the array at `path`, returning it
    pub fn remove_element(&mut self, path: &NodePath, index: usize) -> Result<Node> {
        let items = self.array_mut(path)?;
        if index >= items.len() {
            return Err(MongozError::InvalidPath(format!(
                "index {} is out of bounds for '{}' of length {}",
                index,
                path,
                items.len()
            )));
        }
        Ok(items.remove(index))
    }

    /// Replace the node at `path` with the default value of `kind`
    pub fn change_type(&mut self, path: &NodePath, kind: NodeKind) -> Result<()> {
        let replacement = kind.default_node().ok_or_else(|| {
            MongozError::validation("kind", format!("cannot create a value of kind {}", kind))
        })?;
        *self.node_mut(path)? = replacement;
        Ok(())
    }
}

impl fmt::Display for DocumentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
