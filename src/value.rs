//! Decoded values: an offset-accurate tree mirroring the grammar.

use crate::document::Ufwb;
use crate::model::ElementIdx;
use serde::Serialize;

/// One decoded instance of an element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Value {
    pub element: ElementIdx,
    /// Byte offset in the source.
    pub offset: u64,
    /// Bytes covered, including a partially used last byte.
    pub length: u64,
    /// Set when the value does not start and end on byte boundaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<BitSpan>,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Value>,
}

/// Bit-level placement of a value inside its bytes. Bit 0 is the MSB of the
/// byte at the value's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitSpan {
    pub first: u8,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    /// Structures, scripts and padding.
    None,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Pointer value of an Offset field, not followed.
    Offset(u64),
    /// Display text produced by a script.
    Custom(String),
}

impl Value {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.payload {
            Payload::Int(x) => Some(*x),
            Payload::UInt(x) => i64::try_from(*x).ok(),
            Payload::Offset(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.payload {
            Payload::UInt(x) | Payload::Offset(x) => Some(*x),
            Payload::Int(x) => u64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.payload {
            Payload::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(s) | Payload::Custom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Integer payload as (zero-extended, sign-extended) readings of its bits.
    pub(crate) fn int_readings(&self) -> Option<(u64, i64)> {
        let width = self
            .bits
            .map_or(self.length * 8, |b| u64::from(b.count));
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        match self.payload {
            Payload::Int(v) => Some((v as u64 & mask, v)),
            Payload::UInt(v) | Payload::Offset(v) => {
                let signed = if width == 0 || width >= 64 {
                    v as i64
                } else {
                    let shift = 64 - width;
                    ((v << shift) as i64) >> shift
                };
                Some((v, signed))
            }
            _ => None,
        }
    }

    /// Last child decoded under `name`.
    pub fn child<'a>(&'a self, ufwb: &Ufwb, name: &str) -> Option<&'a Value> {
        self.children
            .iter()
            .rev()
            .find(|c| ufwb.element(c.element).name() == name)
    }

    /// Every instance decoded under `name`, in order.
    pub fn children_named<'a>(&'a self, ufwb: &'a Ufwb, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.children
            .iter()
            .filter(move |c| ufwb.element(c.element).name() == name)
    }
}
