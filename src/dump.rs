//! Dump decoded value trees as indented text or JSON.

use crate::document::Ufwb;
use crate::error::DecodeError;
use crate::format::format;
use crate::input::ByteSource;
use crate::model::Element;
use crate::value::{Payload, Value};
use serde_json::{json, Map};

/// Name shown for a value; padding has no authored name.
fn display_name<'a>(ufwb: &'a Ufwb, value: &Value) -> &'a str {
    match ufwb.element(value.element) {
        Element::Padding(_) => "<padding>",
        e if e.name().is_empty() => "<unnamed>",
        e => e.name(),
    }
}

/// One line per value: `name [offset+length] = text`, children indented.
pub fn dump_tree(ufwb: &Ufwb, value: &Value, source: &mut dyn ByteSource) -> Result<String, DecodeError> {
    let mut lines = Vec::new();
    dump_into(ufwb, value, source, 0, &mut lines)?;
    Ok(lines.join("\n"))
}

fn dump_into(
    ufwb: &Ufwb,
    value: &Value,
    source: &mut dyn ByteSource,
    indent: usize,
    lines: &mut Vec<String>,
) -> Result<(), DecodeError> {
    let pad = "  ".repeat(indent);
    let place = match value.bits {
        Some(b) => format!("{}.{}+{}b", value.offset, b.first, b.count),
        None => format!("{}+{}", value.offset, value.length),
    };
    let text = format(ufwb, value, source)?;
    if text.is_empty() {
        lines.push(format!("{}{} [{}]", pad, display_name(ufwb, value), place));
    } else {
        lines.push(format!("{}{} [{}] = {}", pad, display_name(ufwb, value), place, text));
    }
    for child in &value.children {
        dump_into(ufwb, child, source, indent + 1, lines)?;
    }
    Ok(())
}

/// JSON rendering keyed by element name; payloads keep their native types.
pub fn to_json(ufwb: &Ufwb, value: &Value) -> serde_json::Value {
    let mut obj = Map::new();
    obj.insert("name".into(), json!(display_name(ufwb, value)));
    obj.insert("kind".into(), json!(ufwb.element(value.element).kind().as_str()));
    obj.insert("offset".into(), json!(value.offset));
    obj.insert("length".into(), json!(value.length));
    if let Some(b) = value.bits {
        obj.insert("bits".into(), json!({ "first": b.first, "count": b.count }));
    }
    let payload = match &value.payload {
        Payload::None => None,
        Payload::Int(v) => Some(json!(v)),
        Payload::UInt(v) | Payload::Offset(v) => Some(json!(v)),
        Payload::Float(v) => Some(json!(v)),
        Payload::Text(s) | Payload::Custom(s) => Some(json!(s)),
        Payload::Bytes(b) => Some(json!(hex::encode(b))),
    };
    if let Some(p) = payload {
        obj.insert("value".into(), p);
    }
    if !value.children.is_empty() {
        let children: Vec<_> = value.children.iter().map(|c| to_json(ufwb, c)).collect();
        obj.insert("children".into(), serde_json::Value::Array(children));
    }
    serde_json::Value::Object(obj)
}
