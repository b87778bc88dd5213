//! Conversions between document trees and BSON

use super::{DocumentTree, Node};
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use indexmap::IndexMap;

impl From<Bson> for Node {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Document(doc) => Node::Object(fields_from_document(doc)),
            Bson::Array(items) => Node::Array(items.into_iter().map(Node::from).collect()),
            Bson::String(s) => Node::String(s),
            Bson::Int32(n) => Node::Int32(n),
            Bson::Int64(n) => Node::Int64(n),
            Bson::Double(n) => Node::Double(n),
            Bson::Boolean(b) => Node::Boolean(b),
            Bson::Null => Node::Null,
            Bson::DateTime(dt) => Node::DateTime(dt),
            Bson::Binary(Binary { subtype, bytes }) => Node::Binary {
                subtype: u8::from(subtype),
                bytes,
            },
            Bson::ObjectId(oid) => Node::ObjectId(oid),
            other => Node::Other(other),
        }
    }
}

impl From<Node> for Bson {
    fn from(node: Node) -> Self {
        match node {
            Node::Object(fields) => Bson::Document(document_from_fields(fields)),
            Node::Array(items) => Bson::Array(items.into_iter().map(Bson::from).collect()),
            Node::String(s) => Bson::String(s),
            Node::Int32(n) => Bson::Int32(n),
            Node::Int64(n) => Bson::Int64(n),
            Node::Double(n) => Bson::Double(n),
            Node::Boolean(b) => Bson::Boolean(b),
            Node::Null => Bson::Null,
            Node::DateTime(dt) => Bson::DateTime(dt),
            Node::Binary { subtype, bytes } => Bson::Binary(Binary {
                subtype: BinarySubtype::from(subtype),
                bytes,
            }),
            Node::ObjectId(oid) => Bson::ObjectId(oid),
            Node::Other(value) => value,
        }
    }
}

impl From<Document> for DocumentTree {
    fn from(doc: Document) -> Self {
        DocumentTree::from_fields(fields_from_document(doc))
    }
}

impl From<DocumentTree> for Document {
    fn from(tree: DocumentTree) -> Self {
        document_from_fields(tree.fields)
    }
}

fn fields_from_document(doc: Document) -> IndexMap<String, Node> {
    doc.into_iter()
        .map(|(key, value)| (key, Node::from(value)))
        .collect()
}

fn document_from_fields(fields: IndexMap<String, Node>) -> Document {
    fields
        .into_iter()
        .map(|(key, node)| (key, Bson::from(node)))
        .collect()
}
