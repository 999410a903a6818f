//! Decode engine: walks a validated grammar over a byte source.
//!
//! The cursor is kept in bits so bit-unit Numbers can pack inside bytes; every
//! other element requires byte alignment. Each Structure instance opens a
//! scope frame holding the values decoded so far, which length and repeat
//! formulas read from (innermost frame first, last instance of a name wins).
//!
//! A successful read leaves the cursor at `offset + length` of the returned
//! value. A failed read leaves it where the element started. Nesting deeper
//! than [`MAX_DEPTH`] reads fails with `TooDeep`.

use crate::document::Ufwb;
use crate::error::{DecodeError, DecodeErrorKind};
use crate::eval::{Evaluator, FormulaEvaluator, Scope};
use crate::expr::Expression;
use crate::input::ByteSource;
use crate::model::{
    Binary, Custom, Element, ElementIdx, Endian, GrammarRef, Number, NumberType, Order, StringElement,
    StringType, StructRef, Structure,
};
use crate::script::{CustomRead, NoScripts, ScriptEngine};
use crate::value::{BitSpan, Payload, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;

/// Largest single read issued to the byte source.
const CHUNK: u64 = 64 * 1024;
/// Window used when scanning for a string terminator.
const SCAN: usize = 256;
/// Deepest element nesting a decode follows. Recursive grammars end here.
pub const MAX_DEPTH: usize = 128;

static FORMULAS: FormulaEvaluator = FormulaEvaluator;
static NO_SCRIPTS: NoScripts = NoScripts;

/// Values decoded so far in one Structure instance.
#[derive(Default)]
struct Frame {
    values: Vec<Value>,
    latest: HashMap<String, usize>,
}

impl Frame {
    fn push(&mut self, name: &str, value: Value) {
        if !name.is_empty() {
            self.latest.insert(name.to_string(), self.values.len());
        }
        self.values.push(value);
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.latest.get(name).map(|&i| &self.values[i])
    }
}

struct FrameScope<'s> {
    ufwb: &'s Ufwb,
    frames: &'s [Frame],
}

impl Scope for FrameScope<'_> {
    fn lookup(&self, path: &str) -> Option<i64> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut value = self.frames.iter().rev().find_map(|f| f.get(first))?;
        for part in parts {
            value = value.child(self.ufwb, part)?;
        }
        value.as_i64()
    }
}

/// Where the structure being read ends.
enum Extent {
    /// Length formula not evaluable yet.
    Pending,
    /// No length: the structure ends after its last child.
    Open,
    /// End, in bits.
    Fixed(u64),
}

/// One decode over one byte source. Cheap to create; holds no shared state.
pub struct Decoder<'a, S> {
    ufwb: &'a Ufwb,
    source: S,
    /// Cursor, in bits.
    pos: u64,
    /// End of the innermost fixed-length Structure, in bits.
    limit: Option<u64>,
    frames: Vec<Frame>,
    depth: usize,
    evaluator: &'a dyn Evaluator,
    scripts: &'a dyn ScriptEngine,
}

/// Decode the grammar's start structure from the beginning of `data`.
pub fn decode(ufwb: &Ufwb, data: &[u8]) -> Result<Value, DecodeError> {
    Decoder::new(ufwb, data).decode()
}

impl<'a, S: ByteSource> Decoder<'a, S> {
    pub fn new(ufwb: &'a Ufwb, source: S) -> Self {
        Decoder {
            ufwb,
            source,
            pos: 0,
            limit: None,
            frames: Vec::new(),
            depth: 0,
            evaluator: &FORMULAS,
            scripts: &NO_SCRIPTS,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_script_engine(mut self, engine: &'a dyn ScriptEngine) -> Self {
        self.scripts = engine;
        self
    }

    /// Cursor position in bytes (rounded down inside a bit field).
    pub fn offset(&self) -> u64 {
        self.pos / 8
    }

    pub fn bit_offset(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, offset: u64) -> Result<(), DecodeError> {
        self.pos = offset
            .checked_mul(8)
            .ok_or_else(|| malformed("offset", format!("{} is out of range", offset)))?;
        Ok(())
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Decode the grammar's start structure at the cursor.
    pub fn decode(&mut self) -> Result<Value, DecodeError> {
        let start = self.ufwb.start().ok_or_else(|| {
            DecodeError::new(DecodeErrorKind::DanglingReference { attribute: "start" })
        })?;
        self.read(start)
    }

    /// Read one instance of `idx` at the cursor.
    pub fn read(&mut self, idx: ElementIdx) -> Result<Value, DecodeError> {
        let ufwb = self.ufwb;
        let element = ufwb.element(idx);
        let start = self.pos;
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::new(DecodeErrorKind::TooDeep(MAX_DEPTH)).within(element.name()));
        }
        self.depth += 1;
        let result = match element {
            Element::Structure(s) => self.read_structure(idx, idx, s),
            Element::Number(n) => self.read_number(idx, n),
            Element::String(s) => self.read_string(idx, s),
            Element::Binary(b) => self.read_binary(idx, b),
            Element::Offset(_) => self.read_offset(idx),
            Element::StructRef(r) => self.read_struct_ref(idx, r),
            Element::GrammarRef(g) => self.read_grammar_ref(idx, g),
            Element::Custom(c) => self.read_custom(idx, c),
            Element::Script(_) => Ok(self.leaf(idx, start, Payload::None)),
            Element::Padding(_) => Err(DecodeError::new(DecodeErrorKind::Unsupported(
                "padding is never read directly".to_string(),
            ))),
        };
        self.depth -= 1;
        match result {
            Ok(value) => {
                tracing::trace!(
                    element = element.name(),
                    offset = value.offset,
                    length = value.length,
                    "read"
                );
                Ok(value)
            }
            Err(e) => {
                self.pos = start;
                Err(e.within(element.name()))
            }
        }
    }

    fn read_structure(&mut self, label: ElementIdx, idx: ElementIdx, s: &Structure) -> Result<Value, DecodeError> {
        if self.ufwb.order(idx) == Order::Variable {
            return Err(DecodeError::new(DecodeErrorKind::Unsupported(
                "variable order structures".to_string(),
            )));
        }
        self.ensure_aligned()?;
        let start = self.pos;
        let outer = self.limit;
        self.frames.push(Frame::default());
        let mut extent = Extent::Pending;
        let result = self.read_children(idx, s, start, outer, &mut extent);
        let frame = self.frames.pop().unwrap_or_default();
        self.limit = outer;
        let mut children = frame.values;

        let result = match (result, extent) {
            (Ok(()), Extent::Fixed(end)) => self.finish_fixed(end, &mut children),
            (Ok(()), _) => self.ensure_aligned(),
            (Err(e), _) => Err(e),
        };
        let mut value = Value {
            element: label,
            offset: start / 8,
            length: (self.pos.saturating_sub(start) + 7) / 8,
            bits: None,
            payload: Payload::None,
            children,
        };
        match result {
            Ok(()) => Ok(value),
            Err(mut e) => {
                if let Some(partial) = e.partial.take() {
                    value.length = value.length.max(partial.end().saturating_sub(value.offset));
                    value.children.push(*partial);
                }
                Err(e.with_partial(value))
            }
        }
    }

    /// Settle a structure's end once its length formula can be evaluated.
    /// Formulas naming the structure's own fields stay pending until those
    /// fields are read.
    fn settle(
        &mut self,
        idx: ElementIdx,
        start: u64,
        outer: Option<u64>,
        extent: &mut Extent,
        last: bool,
    ) -> Result<(), DecodeError> {
        if !matches!(extent, Extent::Pending) {
            return Ok(());
        }
        let len = match self.structure_extent(idx) {
            Ok(Some(len)) => len,
            Ok(None) => {
                *extent = Extent::Open;
                return Ok(());
            }
            Err(e) if !last && e.is_unknown_name() => return Ok(()),
            Err(e) => return Err(e),
        };
        let end = start
            .checked_add(len)
            .ok_or_else(|| malformed("length", "too large"))?;
        if end < self.pos {
            return Err(DecodeError::new(DecodeErrorKind::Overrun {
                offset: start / 8,
                needed: (self.pos - start + 7) / 8,
                available: len / 8,
            }));
        }
        self.limit = Some(outer.map_or(end, |l| l.min(end)));
        *extent = Extent::Fixed(end);
        Ok(())
    }

    fn read_children(
        &mut self,
        idx: ElementIdx,
        s: &Structure,
        start: u64,
        outer: Option<u64>,
        extent: &mut Extent,
    ) -> Result<(), DecodeError> {
        let ufwb = self.ufwb;
        self.settle(idx, start, outer, extent, false)?;
        for &child in &s.elements {
            if self.exhausted() {
                tracing::debug!(offset = self.pos / 8, "structure length reached");
                break;
            }
            let min = self.eval(&ufwb.repeat_min(child))?.max(0) as u64;
            let max = match self.eval(&ufwb.repeat_max(child))? {
                n if n < 0 => None,
                n => Some(n as u64),
            };
            let mut count = 0u64;
            while max.map_or(true, |m| count < m) {
                if self.exhausted() {
                    break;
                }
                let before = self.pos;
                match self.read(child) {
                    Ok(value) => {
                        let empty = self.pos == before;
                        let name = ufwb.element(value.element).name();
                        if let Some(frame) = self.frames.last_mut() {
                            frame.push(name, value);
                        }
                        count += 1;
                        self.settle(idx, start, outer, extent, false)?;
                        // Zero-length instances never advance the cursor.
                        if empty {
                            if count < min {
                                tracing::debug!(
                                    element = ufwb.element(child).name(),
                                    count,
                                    min,
                                    "zero-length instance ends repetition"
                                );
                            }
                            break;
                        }
                    }
                    Err(e) if count >= min && e.ends_repetition() => {
                        tracing::debug!(
                            element = ufwb.element(child).name(),
                            count,
                            reason = %e.kind,
                            "optional repetition ended"
                        );
                        self.pos = before;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.settle(idx, start, outer, extent, true)
    }

    /// Check the declared extent exists and cover any unread tail with padding.
    fn finish_fixed(&mut self, end: u64, children: &mut Vec<Value>) -> Result<(), DecodeError> {
        let offset = self.pos / 8;
        let needed = (end.saturating_sub(self.pos) + 7) / 8;
        if let Some(limit) = self.limit {
            if end > limit {
                return Err(DecodeError::new(DecodeErrorKind::Overrun {
                    offset,
                    needed,
                    available: limit.saturating_sub(self.pos) / 8,
                }));
            }
        }
        match self.source.size() {
            Some(size) if end > size.saturating_mul(8) => {
                return Err(DecodeError::new(DecodeErrorKind::EndOfInput {
                    offset,
                    needed,
                    available: size.saturating_sub(offset),
                }));
            }
            Some(_) => {}
            // Unknown size: the declared last byte has to be readable.
            None if end > align_up(self.pos) => {
                let last = end / 8 - 1;
                let mut byte = [0u8; 1];
                if self.source.read_full_at(last, &mut byte)? == 0 {
                    return Err(DecodeError::new(DecodeErrorKind::EndOfInput {
                        offset: last,
                        needed: 1,
                        available: 0,
                    }));
                }
            }
            None => {}
        }
        let gap = align_up(self.pos);
        if gap < end {
            tracing::debug!(offset = gap / 8, length = (end - gap) / 8, "padding");
            children.push(Value {
                element: self.ufwb.padding(),
                offset: gap / 8,
                length: (end - gap) / 8,
                bits: None,
                payload: Payload::None,
                children: Vec::new(),
            });
        }
        self.pos = end;
        Ok(())
    }

    fn read_number(&mut self, idx: ElementIdx, n: &Number) -> Result<Value, DecodeError> {
        let start = self.pos;
        let bits = self.length_bits(idx)?.ok_or_else(|| malformed("length", "missing"))?;
        let endian = self.endian(idx)?;
        let payload = match self.ufwb.number_type(idx) {
            NumberType::Integer => {
                let raw = self.read_uint(idx, bits, endian)?;
                if self.ufwb.signed(idx) {
                    Payload::Int(sign_extend(raw, bits))
                } else {
                    Payload::UInt(raw)
                }
            }
            NumberType::Float => {
                if bits != 32 && bits != 64 {
                    return Err(malformed("float", format!("{} bits", bits)));
                }
                let bytes = self.take(idx, bits / 8)?;
                let v = match (bits, endian) {
                    (32, Endian::Big) => BigEndian::read_f32(&bytes) as f64,
                    (32, _) => LittleEndian::read_f32(&bytes) as f64,
                    (_, Endian::Big) => BigEndian::read_f64(&bytes),
                    _ => LittleEndian::read_f64(&bytes),
                };
                Payload::Float(v)
            }
        };
        let value = self.leaf(idx, start, payload);
        if self.ufwb.must_match(idx) && !number_matches(n, &value) {
            return Err(must_match(&value));
        }
        Ok(value)
    }

    fn read_string(&mut self, idx: ElementIdx, s: &StringElement) -> Result<Value, DecodeError> {
        self.ensure_aligned()?;
        let start = self.pos;
        let encoding = self.ufwb.encoding(idx);
        let (width, big) = text_unit(&encoding);
        let bytes = match self.ufwb.string_type(idx) {
            StringType::FixedLength => {
                let len = self.length_bytes(idx)?.ok_or_else(|| malformed("length", "missing"))?;
                let mut bytes = self.take(idx, len)?;
                let cut = bytes
                    .chunks(width)
                    .position(|c| c.iter().all(|&b| b == 0))
                    .map(|i| i * width);
                if let Some(cut) = cut {
                    bytes.truncate(cut);
                }
                bytes
            }
            StringType::Pascal => {
                let prefix_len = self.length_bytes(idx)?.ok_or_else(|| malformed("length", "missing"))?;
                if !(1..=8).contains(&prefix_len) {
                    return Err(malformed("pascal prefix", format!("{} bytes", prefix_len)));
                }
                let endian = self.endian(idx)?;
                let prefix = self.take(idx, prefix_len)?;
                let len = bytes_to_u64(&prefix, endian);
                self.take(idx, len)?
            }
            StringType::ZeroTerminated => {
                let max = self.length_bytes(idx)?;
                self.take_terminated(&terminator(0, width, big), max)?
            }
            StringType::DelimiterTerminated => {
                let max = self.length_bytes(idx)?;
                self.take_terminated(&terminator(s.delimiter.unwrap_or(0), width, big), max)?
            }
        };
        let text = decode_text(&bytes, &encoding).map_err(DecodeError::new)?;
        let value = self.leaf(idx, start, Payload::Text(text));
        if self.ufwb.must_match(idx)
            && !s.values.is_empty()
            && !s.values.iter().any(|f| Some(f.value.as_str()) == value.as_str())
        {
            return Err(must_match(&value));
        }
        Ok(value)
    }

    fn read_binary(&mut self, idx: ElementIdx, b: &Binary) -> Result<Value, DecodeError> {
        let start = self.pos;
        let len = self.length_bytes(idx)?.ok_or_else(|| malformed("length", "missing"))?;
        let bytes = self.take(idx, len)?;
        let value = self.leaf(idx, start, Payload::Bytes(bytes));
        if self.ufwb.must_match(idx)
            && !b.values.is_empty()
            && !b.values.iter().any(|f| Some(f.value.as_slice()) == value.as_bytes())
        {
            return Err(must_match(&value));
        }
        Ok(value)
    }

    fn read_offset(&mut self, idx: ElementIdx) -> Result<Value, DecodeError> {
        let start = self.pos;
        let bits = self.length_bits(idx)?.ok_or_else(|| malformed("length", "missing"))?;
        let endian = self.endian(idx)?;
        let raw = self.read_uint(idx, bits, endian)?;
        Ok(self.leaf(idx, start, Payload::Offset(raw)))
    }

    fn read_struct_ref(&mut self, idx: ElementIdx, r: &StructRef) -> Result<Value, DecodeError> {
        if r.disabled == Some(true) {
            return Ok(self.leaf(idx, self.pos, Payload::None));
        }
        let ufwb = self.ufwb;
        let target = r
            .structure
            .as_ref()
            .and_then(|l| l.target)
            .ok_or(DecodeErrorKind::DanglingReference { attribute: "structure" })?;
        match ufwb.element(target) {
            Element::Structure(s) => self.read_structure(idx, target, s),
            _ => Err(DecodeErrorKind::DanglingReference { attribute: "structure" }.into()),
        }
    }

    fn read_grammar_ref(&mut self, idx: ElementIdx, g: &GrammarRef) -> Result<Value, DecodeError> {
        if g.disabled == Some(true) {
            return Ok(self.leaf(idx, self.pos, Payload::None));
        }
        let ufwb = self.ufwb;
        g.grammar
            .as_ref()
            .and_then(|l| l.target)
            .ok_or(DecodeErrorKind::DanglingReference { attribute: "grammar" })?;
        let start = ufwb
            .start()
            .ok_or(DecodeErrorKind::DanglingReference { attribute: "start" })?;
        match ufwb.element(start) {
            Element::Structure(s) => self.read_structure(idx, start, s),
            _ => Err(DecodeErrorKind::DanglingReference { attribute: "start" }.into()),
        }
    }

    fn read_custom(&mut self, idx: ElementIdx, c: &Custom) -> Result<Value, DecodeError> {
        self.ensure_aligned()?;
        let ufwb = self.ufwb;
        let engine = self.scripts;
        let start = self.pos;
        let offset = start / 8;
        let script = c
            .script
            .as_ref()
            .and_then(|l| l.target)
            .ok_or(DecodeErrorKind::DanglingReference { attribute: "script" })?;
        let length_hint = self.length_bytes(idx)?;
        let out = engine.run_custom(CustomRead {
            script: ufwb.script(script),
            element: ufwb.element(idx).name(),
            offset,
            length_hint,
            source: &mut self.source,
        })?;
        let end = offset
            .checked_add(out.length)
            .ok_or_else(|| malformed("custom length", out.length.to_string()))?;
        if let Some(limit) = self.limit {
            if end.saturating_mul(8) > limit {
                return Err(DecodeError::new(DecodeErrorKind::Overrun {
                    offset,
                    needed: out.length,
                    available: limit.saturating_sub(start) / 8,
                }));
            }
        }
        if let Some(size) = self.source.size() {
            if end > size {
                return Err(DecodeError::new(DecodeErrorKind::EndOfInput {
                    offset,
                    needed: out.length,
                    available: size.saturating_sub(offset),
                }));
            }
        }
        self.pos = end * 8;
        Ok(self.leaf(idx, start, Payload::Custom(out.display)))
    }

    fn eval(&self, expr: &Expression) -> Result<i64, DecodeError> {
        if let Expression::Const(v) = expr {
            return Ok(*v);
        }
        let scope = FrameScope {
            ufwb: self.ufwb,
            frames: &self.frames,
        };
        self.evaluator.evaluate(expr, &scope).map_err(|source| {
            DecodeErrorKind::Expression {
                expr: expr.clone(),
                source,
            }
            .into()
        })
    }

    fn to_bits(&self, idx: ElementIdx, n: i64) -> Result<u64, DecodeError> {
        let n = u64::try_from(n).map_err(|_| malformed("length", format!("negative length {}", n)))?;
        n.checked_mul(self.ufwb.length_unit(idx).bits())
            .ok_or_else(|| malformed("length", "too large"))
    }

    fn length_bits(&self, idx: ElementIdx) -> Result<Option<u64>, DecodeError> {
        match self.ufwb.length(idx) {
            Some(expr) => {
                let n = self.eval(&expr)?;
                self.to_bits(idx, n).map(Some)
            }
            None => Ok(None),
        }
    }

    fn length_bytes(&self, idx: ElementIdx) -> Result<Option<u64>, DecodeError> {
        match self.length_bits(idx)? {
            Some(bits) if bits % 8 != 0 => Err(malformed("length", format!("{} bits is not whole bytes", bits))),
            bits => Ok(bits.map(|b| b / 8)),
        }
    }

    /// Evaluated `length + lengthoffset`, in bits.
    fn structure_extent(&self, idx: ElementIdx) -> Result<Option<u64>, DecodeError> {
        let Some(length) = self.ufwb.length(idx) else {
            return Ok(None);
        };
        let mut n = self.eval(&length)?;
        if let Some(extra) = self.ufwb.length_offset(idx) {
            n = n
                .checked_add(self.eval(&extra)?)
                .ok_or_else(|| malformed("length", "too large"))?;
        }
        let bits = self.to_bits(idx, n)?;
        if bits % 8 != 0 {
            return Err(malformed("length", format!("{} bits is not whole bytes", bits)));
        }
        Ok(Some(bits))
    }

    fn endian(&self, idx: ElementIdx) -> Result<Endian, DecodeError> {
        match self.ufwb.endian(idx) {
            Endian::Dynamic => Err(DecodeError::new(DecodeErrorKind::Unsupported(
                "dynamic endianness".to_string(),
            ))),
            e => Ok(e),
        }
    }

    fn exhausted(&self) -> bool {
        self.limit.map_or(false, |l| self.pos >= l)
    }

    fn ensure_aligned(&self) -> Result<(), DecodeError> {
        if self.pos % 8 == 0 {
            Ok(())
        } else {
            Err(DecodeError::new(DecodeErrorKind::Misaligned(self.pos)))
        }
    }

    fn leaf(&self, idx: ElementIdx, start: u64, payload: Payload) -> Value {
        let first = start / 8;
        let end = (self.pos + 7) / 8;
        let bits = (start % 8 != 0 || self.pos % 8 != 0).then(|| BitSpan {
            first: (start % 8) as u8,
            count: (self.pos - start) as u32,
        });
        Value {
            element: idx,
            offset: first,
            length: end - first,
            bits,
            payload,
            children: Vec::new(),
        }
    }

    /// Read exactly `len` bytes at the cursor.
    fn take(&mut self, idx: ElementIdx, len: u64) -> Result<Vec<u8>, DecodeError> {
        self.ensure_aligned()?;
        let offset = self.pos / 8;
        if let Some(limit) = self.limit {
            let room = limit.saturating_sub(self.pos) / 8;
            if len > room {
                return Err(DecodeError::new(DecodeErrorKind::Overrun {
                    offset,
                    needed: len,
                    available: room,
                }));
            }
        }
        let mut buf = Vec::new();
        while (buf.len() as u64) < len {
            let want = (len - buf.len() as u64).min(CHUNK) as usize;
            let at = buf.len();
            buf.resize(at + want, 0);
            let got = self.source.read_full_at(offset + at as u64, &mut buf[at..])?;
            buf.truncate(at + got);
            if got < want {
                break;
            }
        }
        let available = buf.len() as u64;
        if available < len {
            let err = DecodeError::new(DecodeErrorKind::EndOfInput {
                offset,
                needed: len,
                available,
            });
            if available == 0 {
                return Err(err);
            }
            return Err(err.with_partial(Value {
                element: idx,
                offset,
                length: available,
                bits: None,
                payload: Payload::Bytes(buf),
                children: Vec::new(),
            }));
        }
        self.pos += len * 8;
        Ok(buf)
    }

    /// Read `count` bits MSB first.
    fn take_bits(&mut self, count: u64) -> Result<u64, DecodeError> {
        let start = self.pos;
        let end = start + count;
        let first = start / 8;
        let needed = (end + 7) / 8 - first;
        if let Some(limit) = self.limit {
            if end > limit {
                return Err(DecodeError::new(DecodeErrorKind::Overrun {
                    offset: first,
                    needed,
                    available: limit.saturating_sub(start) / 8,
                }));
            }
        }
        let mut buf = vec![0u8; needed as usize];
        let got = self.source.read_full_at(first, &mut buf)? as u64;
        if got < needed {
            return Err(DecodeError::new(DecodeErrorKind::EndOfInput {
                offset: first,
                needed,
                available: got,
            }));
        }
        let mut out = 0u64;
        for bit in start..end {
            let byte = buf[(bit / 8 - first) as usize];
            out = (out << 1) | u64::from((byte >> (7 - bit % 8)) & 1);
        }
        self.pos = end;
        Ok(out)
    }

    fn read_uint(&mut self, idx: ElementIdx, bits: u64, endian: Endian) -> Result<u64, DecodeError> {
        if bits == 0 || bits > 64 {
            return Err(malformed("integer", format!("{} bits", bits)));
        }
        if self.pos % 8 == 0 && bits % 8 == 0 {
            let bytes = self.take(idx, bits / 8)?;
            Ok(bytes_to_u64(&bytes, endian))
        } else {
            self.take_bits(bits)
        }
    }

    /// Scan for `term` (one code unit), consuming it. Without one, the string
    /// runs to `max`, the enclosing structure's end, or the end of input.
    fn take_terminated(&mut self, term: &[u8], max: Option<u64>) -> Result<Vec<u8>, DecodeError> {
        let offset = self.pos / 8;
        let unit = term.len();
        let room = self.limit.map(|l| l.saturating_sub(self.pos) / 8);
        let cap = match (max, room) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let mut text = Vec::new();
        let mut window = [0u8; SCAN];
        let mut scanned = 0u64;
        let consumed = loop {
            let want = match cap {
                Some(c) => (c - scanned).min(SCAN as u64) as usize,
                None => SCAN,
            };
            if want < unit {
                break scanned;
            }
            let got = self.source.read_full_at(offset + scanned, &mut window[..want])?;
            let usable = got - got % unit;
            if let Some(i) = window[..usable].chunks(unit).position(|c| c == term) {
                let end = i * unit;
                text.extend_from_slice(&window[..end]);
                break scanned + (end + unit) as u64;
            }
            text.extend_from_slice(&window[..usable]);
            scanned += usable as u64;
            if got < want {
                break scanned;
            }
        };
        if consumed == 0 && max != Some(0) {
            let kind = if room == Some(0) {
                DecodeErrorKind::Overrun {
                    offset,
                    needed: unit as u64,
                    available: 0,
                }
            } else {
                DecodeErrorKind::EndOfInput {
                    offset,
                    needed: unit as u64,
                    available: 0,
                }
            };
            return Err(DecodeError::new(kind));
        }
        self.pos += consumed * 8;
        Ok(text)
    }
}

fn malformed(what: &'static str, detail: impl Into<String>) -> DecodeError {
    DecodeError::new(DecodeErrorKind::Malformed {
        what,
        detail: detail.into(),
    })
}

fn must_match(value: &Value) -> DecodeError {
    let shown = match &value.payload {
        Payload::Int(v) => v.to_string(),
        Payload::UInt(v) | Payload::Offset(v) => v.to_string(),
        Payload::Float(v) => v.to_string(),
        Payload::Text(s) => format!("{:?}", s),
        Payload::Bytes(b) => hex::encode(b),
        Payload::Custom(s) => s.clone(),
        Payload::None => String::new(),
    };
    DecodeError::new(DecodeErrorKind::MustMatch { value: shown }).with_partial(value.clone())
}

fn number_matches(n: &Number, value: &Value) -> bool {
    if n.values.is_empty() && n.masks.is_empty() {
        return true;
    }
    if let Some(v) = value.as_f64() {
        return n.values.iter().any(|f| f.value.matches_float(v));
    }
    let Some((raw, signed)) = value.int_readings() else {
        return false;
    };
    n.values.iter().any(|f| f.value.matches_int(raw, signed))
        || n.masks.iter().any(|m| {
            let masked = raw & m.value;
            m.values.iter().any(|f| f.value.matches_int(masked, masked as i64))
        })
}

fn sign_extend(raw: u64, bits: u64) -> i64 {
    if bits >= 64 {
        raw as i64
    } else {
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    }
}

fn align_up(bits: u64) -> u64 {
    (bits + 7) / 8 * 8
}

/// Unsigned integer from 1 to 8 bytes.
fn bytes_to_u64(buf: &[u8], endian: Endian) -> u64 {
    match endian {
        Endian::Big => BigEndian::read_uint(buf, buf.len()),
        Endian::Little | Endian::Dynamic => LittleEndian::read_uint(buf, buf.len()),
    }
}

fn normalize(encoding: &str) -> String {
    encoding.trim().to_ascii_uppercase().replace('_', "-")
}

/// Code unit width and byte order of an encoding.
fn text_unit(encoding: &str) -> (usize, bool) {
    match normalize(encoding).as_str() {
        "UTF-16LE" => (2, false),
        "UTF-16" | "UTF-16BE" => (2, true),
        _ => (1, false),
    }
}

fn terminator(delimiter: u8, width: usize, big: bool) -> Vec<u8> {
    match (width, big) {
        (2, true) => vec![0, delimiter],
        (2, false) => vec![delimiter, 0],
        _ => vec![delimiter],
    }
}

fn decode_text(bytes: &[u8], encoding: &str) -> Result<String, DecodeErrorKind> {
    let malformed = |detail: String| DecodeErrorKind::Malformed {
        what: "string",
        detail,
    };
    match normalize(encoding).as_str() {
        "UTF-8" | "UTF8" => String::from_utf8(bytes.to_vec()).map_err(|e| malformed(e.to_string())),
        "US-ASCII" | "ASCII" | "ANSI-X3.4-1968" => {
            if bytes.is_ascii() {
                Ok(bytes.iter().map(|&b| b as char).collect())
            } else {
                Err(malformed("non-ASCII byte".to_string()))
            }
        }
        "ISO-8859-1" | "LATIN1" | "LATIN-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        "UTF-16" | "UTF-16BE" | "UTF-16LE" => {
            if bytes.len() % 2 != 0 {
                return Err(malformed("odd number of bytes in UTF-16".to_string()));
            }
            let big = text_unit(encoding).1;
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| if big { BigEndian::read_u16(c) } else { LittleEndian::read_u16(c) })
                .collect();
            String::from_utf16(&units).map_err(|e| malformed(e.to_string()))
        }
        _ => Err(DecodeErrorKind::Unsupported(format!("encoding {}", encoding))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0b100, 3), -4);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn uint_bytes_follow_endianness() {
        assert_eq!(bytes_to_u64(&[0x01, 0x02, 0x03], Endian::Big), 0x010203);
        assert_eq!(bytes_to_u64(&[0x01, 0x02, 0x03], Endian::Little), 0x030201);
    }

    #[test]
    fn text_decoding() {
        assert_eq!(decode_text(b"hi", "UTF-8").unwrap(), "hi");
        assert_eq!(decode_text(&[0xE9], "ISO-8859-1").unwrap(), "\u{e9}");
        assert_eq!(decode_text(&[b'h', 0, b'i', 0], "UTF-16LE").unwrap(), "hi");
        assert_eq!(decode_text(&[0, b'h', 0, b'i'], "utf_16be").unwrap(), "hi");
        assert!(matches!(
            decode_text(&[0xFF], "UTF-8"),
            Err(DecodeErrorKind::Malformed { .. })
        ));
        assert!(matches!(
            decode_text(&[0x80], "US-ASCII"),
            Err(DecodeErrorKind::Malformed { .. })
        ));
        assert!(matches!(
            decode_text(b"x", "EBCDIC"),
            Err(DecodeErrorKind::Unsupported(_))
        ));
    }
}
