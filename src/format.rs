//! One-line rendering of decoded values.

use crate::document::Ufwb;
use crate::error::DecodeError;
use crate::input::ByteSource;
use crate::model::{Display, Element, Number};
use crate::value::{Payload, Value};

/// Bytes shown before a binary or padding preview is cut short.
const PREVIEW: usize = 16;

/// Render `value` for display. Padding carries no bytes of its own, so its
/// preview is read back from `source`.
pub fn format(ufwb: &Ufwb, value: &Value, source: &mut dyn ByteSource) -> Result<String, DecodeError> {
    let element = ufwb.element(value.element);
    let text = match (&value.payload, element) {
        (Payload::None, Element::Padding(_)) => {
            let want = (value.length as usize).min(PREVIEW);
            let mut buf = vec![0u8; want];
            let got = source.read_full_at(value.offset, &mut buf)?;
            buf.truncate(got);
            preview(&buf, value.length as usize)
        }
        (Payload::None, Element::Structure(_) | Element::StructRef(_) | Element::GrammarRef(_)) => {
            format!("{} fields, {} bytes", value.children.len(), value.length)
        }
        (Payload::None, _) => String::new(),
        (Payload::Int(_) | Payload::UInt(_), Element::Number(n)) => {
            let number = integer(value, ufwb.display(value.element));
            match value.int_readings() {
                Some((raw, signed)) => match label(n, raw, signed) {
                    Some(name) => format!("{} ({})", name, number),
                    None => number,
                },
                None => number,
            }
        }
        (Payload::Int(_) | Payload::UInt(_) | Payload::Offset(_), _) => {
            integer(value, ufwb.display(value.element))
        }
        (Payload::Float(v), Element::Number(n)) => match n.values.iter().find(|f| f.value.matches_float(*v)) {
            Some(f) if !f.name.is_empty() => format!("{} ({})", f.name, v),
            _ => v.to_string(),
        },
        (Payload::Float(v), _) => v.to_string(),
        (Payload::Text(s), Element::String(e)) => match e.values.iter().find(|f| &f.value == s) {
            Some(f) if !f.name.is_empty() => format!("{} ({:?})", f.name, s),
            _ => format!("{:?}", s),
        },
        (Payload::Text(s), _) => format!("{:?}", s),
        (Payload::Bytes(b), Element::Binary(e)) => match e.values.iter().find(|f| &f.value == b) {
            Some(f) if !f.name.is_empty() => format!("{} ({})", f.name, preview(b, b.len())),
            _ => preview(b, b.len()),
        },
        (Payload::Bytes(b), _) => preview(b, b.len()),
        (Payload::Custom(s), _) => s.clone(),
    };
    Ok(text)
}

fn preview(bytes: &[u8], total: usize) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW)];
    if total > shown.len() {
        format!("{}...", hex::encode(shown))
    } else {
        hex::encode(shown)
    }
}

fn integer(value: &Value, display: Display) -> String {
    let (raw, signed) = match value.payload {
        Payload::Int(v) => (v.unsigned_abs(), v < 0),
        Payload::UInt(v) | Payload::Offset(v) => (v, false),
        _ => return String::new(),
    };
    let sign = if signed { "-" } else { "" };
    match display {
        Display::Dec => format!("{}{}", sign, raw),
        Display::Hex => format!("{}0x{:X}", sign, raw),
        Display::Binary => format!("{}0b{:b}", sign, raw),
    }
}

/// Name of the first fixed value or mask value the field matches.
fn label(n: &Number, raw: u64, signed: i64) -> Option<String> {
    if let Some(f) = n.values.iter().find(|f| f.value.matches_int(raw, signed)) {
        if !f.name.is_empty() {
            return Some(f.name.clone());
        }
    }
    let names: Vec<&str> = n
        .masks
        .iter()
        .flat_map(|m| {
            let masked = raw & m.value;
            m.values
                .iter()
                .filter(move |f| f.value.matches_int(masked, masked as i64))
                .map(|f| f.name.as_str())
        })
        .filter(|name| !name.is_empty())
        .collect();
    (!names.is_empty()).then(|| names.join(" | "))
}
