//! Text form of document trees
//!
//! The output is accepted by the parser in `parser.rs` and parses back to an
//! equal tree.

use super::Node;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use indexmap::IndexMap;
use std::fmt::Write as _;

const INDENT: &str = "  ";

pub(super) fn write_compact(node: &Node, out: &mut String) {
    match node {
        Node::Object(fields) => write_object_compact(fields, out),
        Node::Array(items) => {
            if items.is_empty() {
                out.push_str("[ ]");
                return;
            }
            out.push_str("[ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_compact(item, out);
            }
            out.push_str(" ]");
        }
        scalar => write_scalar(scalar, out),
    }
}

pub(super) fn write_object_compact(fields: &IndexMap<String, Node>, out: &mut String) {
    if fields.is_empty() {
        out.push_str("{ }");
        return;
    }
    out.push_str("{ ");
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_string(key, out);
        out.push_str(" : ");
        write_compact(value, out);
    }
    out.push_str(" }");
}

pub(super) fn write_object_pretty(fields: &IndexMap<String, Node>, depth: usize, out: &mut String) {
    if fields.is_empty() {
        out.push_str("{ }");
        return;
    }
    out.push_str("{\n");
    for (i, (key, value)) in fields.iter().enumerate() {
        push_indent(depth + 1, out);
        write_string(key, out);
        out.push_str(" : ");
        write_pretty(value, depth + 1, out);
        if i + 1 < fields.len() {
            out.push(',');
        }
        out.push('\n');
    }
    push_indent(depth, out);
    out.push('}');
}

fn write_pretty(node: &Node, depth: usize, out: &mut String) {
    match node {
        Node::Object(fields) => write_object_pretty(fields, depth, out),
        Node::Array(items) if items.is_empty() => out.push_str("[ ]"),
        Node::Array(items) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                push_indent(depth + 1, out);
                write_pretty(item, depth + 1, out);
                if i + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(depth, out);
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_string(value: &str, out: &mut String) {
    match serde_json::to_string(value) {
        Ok(quoted) => out.push_str(&quoted),
        // serializing a str cannot fail
        Err(_) => {
            let _ = write!(out, "{:?}", value);
        }
    }
}

fn write_double(value: f64, out: &mut String) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value.is_infinite() {
        out.push_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        // Debug keeps the shortest round-trip digits and always a '.' or exponent
        let _ = write!(out, "{:?}", value);
    }
}

fn write_scalar(node: &Node, out: &mut String) {
    match node {
        Node::String(s) => write_string(s, out),
        Node::Int32(n) => {
            let _ = write!(out, "{}", n);
        }
        Node::Int64(n) => {
            let _ = write!(out, "NumberLong({})", n);
        }
        Node::Double(n) => write_double(*n, out),
        Node::Boolean(b) => {
            let _ = write!(out, "{}", b);
        }
        Node::Null => out.push_str("null"),
        Node::DateTime(dt) => {
            let millis = dt.timestamp_millis();
            match DateTime::<Utc>::from_timestamp_millis(millis)
                .filter(|instant| (0..=9999).contains(&instant.year()))
            {
                Some(instant) => {
                    let _ = write!(
                        out,
                        "ISODate(\"{}\")",
                        instant.to_rfc3339_opts(SecondsFormat::Millis, true)
                    );
                }
                None => {
                    let _ = write!(out, "new Date({})", millis);
                }
            }
        }
        Node::Binary { subtype, bytes } => {
            let _ = write!(out, "BinData({}, \"{}\")", subtype, BASE64.encode(bytes));
        }
        Node::ObjectId(oid) => {
            let _ = write!(out, "ObjectId(\"{}\")", oid.to_hex());
        }
        Node::Other(value) => {
            out.push_str(&value.clone().into_canonical_extjson().to_string());
        }
        Node::Object(_) | Node::Array(_) => write_compact(node, out),
    }
}
