//! Raw schema records -> element model.
//!
//! A 1:1 conversion. Attribute strings are interpreted here; anything that
//! does not parse is reported and left unset. References are stored as
//! written and resolved later by [`Ufwb::update`].

use crate::document::Ufwb;
use crate::error::{Errors, SchemaError};
use crate::expr::{parse_int, Expression};
use crate::model::{
    Arena, Binary, Colour, Colours, Custom, Display, Element, ElementId, ElementIdx, ElementKind,
    ElementLabel, Endian, FixedBinary, FixedString, FixedValue, Grammar, GrammarRef, LengthUnit,
    Link, Mask, Number, NumberLiteral, NumberType, Offset, Order, Reference, Repeats, Script,
    ScriptElement, ScriptIdx, StringElement, StringType, StructRef, Structure,
};
use crate::raw::{RawCommon, RawElement, RawFixedValue, RawGrammar, RawScript, RawUfwb};

const YES_NO: &[(&str, bool)] = &[("yes", true), ("no", false), ("true", true), ("false", false)];
const ENDIANS: &[(&str, Endian)] = &[
    ("big", Endian::Big),
    ("little", Endian::Little),
    ("dynamic", Endian::Dynamic),
];
const DISPLAYS: &[(&str, Display)] = &[
    ("dec", Display::Dec),
    ("hex", Display::Hex),
    ("binary", Display::Binary),
];
const LENGTH_UNITS: &[(&str, LengthUnit)] = &[("bit", LengthUnit::Bit), ("byte", LengthUnit::Byte)];
const ORDERS: &[(&str, Order)] = &[("fixed", Order::Fixed), ("variable", Order::Variable)];
const NUMBER_TYPES: &[(&str, NumberType)] =
    &[("integer", NumberType::Integer), ("float", NumberType::Float)];
const STRING_TYPES: &[(&str, StringType)] = &[
    ("zero-terminated", StringType::ZeroTerminated),
    ("fixed-length", StringType::FixedLength),
    ("pascal", StringType::Pascal),
    ("delimiter-terminated", StringType::DelimiterTerminated),
];

/// Convert raw records into an un-updated document plus the problems found.
pub fn transform(raw: RawUfwb) -> (Ufwb, Errors) {
    let mut builder = Builder::default();
    let grammar = builder.grammar(raw.grammar);
    let Builder {
        arena,
        scripts,
        errs,
    } = builder;
    (Ufwb::new(raw.version, grammar, arena, scripts), errs)
}

impl Ufwb {
    /// Transform and update in one go. The document is usable for decoding
    /// only if the returned errors are empty.
    pub fn from_raw(raw: RawUfwb) -> (Ufwb, Errors) {
        let (mut ufwb, mut errs) = transform(raw);
        errs.append(ufwb.update());
        (ufwb, errs)
    }
}

#[derive(Default)]
struct Builder {
    arena: Arena,
    scripts: Vec<Script>,
    errs: Errors,
}

/// Attribute parsing for one element, labelled for diagnostics.
struct Attrs<'a> {
    label: ElementLabel,
    errs: &'a mut Errors,
}

impl Attrs<'_> {
    fn invalid(&mut self, attribute: &'static str, value: &str) {
        self.errs.push(SchemaError::InvalidValue {
            element: self.label.clone(),
            attribute,
            value: value.to_string(),
        });
    }

    fn pick<T: Copy>(&mut self, attribute: &'static str, s: &str, table: &[(&str, T)]) -> Option<T> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match table.iter().find(|(key, _)| key.eq_ignore_ascii_case(s)) {
            Some((_, v)) => Some(*v),
            None => {
                self.invalid(attribute, s);
                None
            }
        }
    }

    fn yes_no(&mut self, attribute: &'static str, s: &str) -> Option<bool> {
        self.pick(attribute, s, YES_NO)
    }

    fn colour(&mut self, attribute: &'static str, s: &str) -> Option<Colour> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match hex::decode(s) {
            Ok(b) if b.len() == 3 => Some(Colour(
                (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32,
            )),
            _ => {
                self.invalid(attribute, s);
                None
            }
        }
    }

    fn colours(&mut self, common: &RawCommon) -> Colours {
        Colours {
            fill: self.colour("fillcolor", &common.fillcolor),
            stroke: self.colour("strokecolor", &common.strokecolor),
        }
    }

    fn delimiter(&mut self, s: &str) -> Option<u8> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        match u8::from_str_radix(digits, 16) {
            Ok(b) => Some(b),
            Err(_) => {
                self.invalid("delimiter", s);
                None
            }
        }
    }

    fn number_literal(&mut self, s: &str) -> Option<NumberLiteral> {
        let s = s.trim();
        if let Some(v) = parse_int(s) {
            return Some(NumberLiteral::Int(v));
        }
        // Unsigned values above i64::MAX are kept bit-for-bit.
        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
        let unsigned = match hex {
            Some(h) => u64::from_str_radix(h, 16).ok(),
            None => s.parse::<u64>().ok(),
        };
        if let Some(v) = unsigned {
            return Some(NumberLiteral::Int(v as i64));
        }
        match s.parse::<f64>() {
            Ok(v) => Some(NumberLiteral::Float(v)),
            Err(_) => {
                self.invalid("value", s);
                None
            }
        }
    }

    fn fixed_values(&mut self, raw: Vec<RawFixedValue>) -> Vec<FixedValue> {
        raw.into_iter()
            .filter_map(|v| {
                let value = self.number_literal(&v.value)?;
                Some(FixedValue {
                    name: v.name,
                    value,
                    description: v.description,
                })
            })
            .collect()
    }

    fn binary_values(&mut self, raw: Vec<RawFixedValue>) -> Vec<FixedBinary> {
        raw.into_iter()
            .filter_map(|v| {
                let text: String = v.value.split_whitespace().collect();
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(&text);
                match hex::decode(digits) {
                    Ok(value) => Some(FixedBinary {
                        name: v.name,
                        value,
                        description: v.description,
                    }),
                    Err(_) => {
                        self.invalid("value", &v.value);
                        None
                    }
                }
            })
            .collect()
    }
}

fn ident(common: &RawCommon) -> ElementId {
    ElementId {
        id: common.id,
        name: common.name.clone(),
        description: common.description.clone(),
    }
}

fn repeats(common: &RawCommon) -> Repeats {
    Repeats {
        min: Expression::parse(&common.repeatmin),
        max: Expression::parse(&common.repeatmax),
    }
}

fn link<T>(s: &str) -> Option<Link<T>> {
    Reference::parse(s).map(Link::new)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn label(kind: ElementKind, common: &RawCommon) -> ElementLabel {
    ElementLabel {
        kind,
        id: common.id,
        name: common.name.clone(),
    }
}

impl Builder {
    fn attrs(&mut self, label: ElementLabel) -> Attrs<'_> {
        Attrs {
            label,
            errs: &mut self.errs,
        }
    }

    fn script(&mut self, raw: RawScript, fallback_name: &str) -> ScriptIdx {
        let (language, text) = match raw.source {
            Some(src) if !src.text.is_empty() || !src.language.is_empty() => (
                non_empty(&src.language).or_else(|| non_empty(&raw.language)),
                if src.text.is_empty() { raw.text } else { src.text },
            ),
            _ => (non_empty(&raw.language), raw.text),
        };
        let name = if raw.name.trim().is_empty() {
            fallback_name.to_string()
        } else {
            raw.name
        };
        self.scripts.push(Script {
            name,
            script_type: non_empty(&raw.script_type),
            language,
            text,
        });
        ScriptIdx(self.scripts.len() - 1)
    }

    fn grammar(&mut self, raw: RawGrammar) -> Grammar {
        let label = ElementLabel {
            kind: ElementKind::Grammar,
            id: raw.id,
            name: raw.name.clone(),
        };
        let complete = self.attrs(label).yes_no("complete", &raw.complete);
        let scripts: Vec<ScriptIdx> = raw
            .scripts
            .into_iter()
            .map(|s| self.script(s, ""))
            .collect();
        let elements: Vec<ElementIdx> = raw.elements.into_iter().map(|e| self.element(e)).collect();
        Grammar {
            ident: ElementId {
                id: raw.id,
                name: raw.name,
                description: raw.description,
            },
            author: raw.author,
            ext: raw.ext,
            email: raw.email,
            complete,
            uti: raw.uti,
            start: link(&raw.start),
            elements,
            scripts,
        }
    }

    fn element(&mut self, raw: RawElement) -> ElementIdx {
        let element = match raw {
            RawElement::Structure(s) => {
                let elements: Vec<ElementIdx> =
                    s.elements.into_iter().map(|e| self.element(e)).collect();
                let mut a = self.attrs(label(ElementKind::Structure, &s.common));
                Element::Structure(Structure {
                    ident: ident(&s.common),
                    repeats: repeats(&s.common),
                    colours: a.colours(&s.common),
                    length: Expression::parse(&s.length),
                    length_unit: a.pick("lengthunit", &s.lengthunit, LENGTH_UNITS),
                    length_offset: Expression::parse(&s.lengthoffset),
                    endian: a.pick("endian", &s.endian, ENDIANS),
                    signed: a.yes_no("signed", &s.signed),
                    encoding: non_empty(&s.encoding),
                    order: a.pick("order", &s.order, ORDERS),
                    display: a.pick("display", &s.display, DISPLAYS),
                    derives: link(&s.common.derives),
                    parent: None,
                    elements,
                })
            }
            RawElement::Number(n) => {
                let mut a = self.attrs(label(ElementKind::Number, &n.common));
                let masks = n
                    .masks
                    .into_iter()
                    .filter_map(|m| {
                        let value = match a.number_literal(&m.value)? {
                            NumberLiteral::Int(v) => v as u64,
                            NumberLiteral::Float(_) => {
                                a.invalid("mask", &m.value);
                                return None;
                            }
                        };
                        Some(Mask {
                            name: m.name,
                            value,
                            description: m.description,
                            values: a.fixed_values(m.values),
                        })
                    })
                    .collect();
                Element::Number(Number {
                    ident: ident(&n.common),
                    repeats: repeats(&n.common),
                    colours: a.colours(&n.common),
                    number_type: a.pick("type", &n.number_type, NUMBER_TYPES),
                    length: Expression::parse(&n.length),
                    length_unit: a.pick("lengthunit", &n.lengthunit, LENGTH_UNITS),
                    endian: a.pick("endian", &n.endian, ENDIANS),
                    signed: a.yes_no("signed", &n.signed),
                    display: a.pick("display", &n.display, DISPLAYS),
                    must_match: a.yes_no("mustmatch", &n.mustmatch),
                    values: a.fixed_values(n.values),
                    masks,
                    derives: link(&n.common.derives),
                    parent: None,
                })
            }
            RawElement::String(s) => {
                let mut a = self.attrs(label(ElementKind::String, &s.common));
                Element::String(StringElement {
                    ident: ident(&s.common),
                    repeats: repeats(&s.common),
                    colours: a.colours(&s.common),
                    string_type: a.pick("type", &s.string_type, STRING_TYPES),
                    length: Expression::parse(&s.length),
                    length_unit: a.pick("lengthunit", &s.lengthunit, LENGTH_UNITS),
                    encoding: non_empty(&s.encoding),
                    delimiter: a.delimiter(&s.delimiter),
                    must_match: a.yes_no("mustmatch", &s.mustmatch),
                    values: s
                        .values
                        .into_iter()
                        .map(|v| FixedString {
                            name: v.name,
                            value: v.value,
                            description: v.description,
                        })
                        .collect(),
                    derives: link(&s.common.derives),
                    parent: None,
                })
            }
            RawElement::Binary(b) => {
                let mut a = self.attrs(label(ElementKind::Binary, &b.common));
                Element::Binary(Binary {
                    ident: ident(&b.common),
                    repeats: repeats(&b.common),
                    colours: a.colours(&b.common),
                    length: Expression::parse(&b.length),
                    length_unit: a.pick("lengthunit", &b.lengthunit, LENGTH_UNITS),
                    must_match: a.yes_no("mustmatch", &b.mustmatch),
                    values: a.binary_values(b.values),
                    derives: link(&b.common.derives),
                    parent: None,
                })
            }
            RawElement::Offset(o) => {
                let mut a = self.attrs(label(ElementKind::Offset, &o.common));
                Element::Offset(Offset {
                    ident: ident(&o.common),
                    repeats: repeats(&o.common),
                    colours: a.colours(&o.common),
                    length: Expression::parse(&o.length),
                    length_unit: a.pick("lengthunit", &o.lengthunit, LENGTH_UNITS),
                    endian: a.pick("endian", &o.endian, ENDIANS),
                    display: a.pick("display", &o.display, DISPLAYS),
                    relative_to: link(&o.relative_to),
                    references: link(&o.references),
                    referenced_size: link(&o.referenced_size),
                    follow_null_reference: a.yes_no("follow_null_reference", &o.follow_null_reference),
                    additional: Expression::parse(&o.additional),
                    derives: link(&o.common.derives),
                    parent: None,
                })
            }
            RawElement::StructRef(r) => {
                let mut a = self.attrs(label(ElementKind::StructRef, &r.common));
                Element::StructRef(StructRef {
                    ident: ident(&r.common),
                    repeats: repeats(&r.common),
                    colours: a.colours(&r.common),
                    disabled: a.yes_no("disabled", &r.disabled),
                    structure: link(&r.structure),
                    derives: link(&r.common.derives),
                    parent: None,
                })
            }
            RawElement::GrammarRef(g) => {
                let mut a = self.attrs(label(ElementKind::GrammarRef, &g.common));
                Element::GrammarRef(GrammarRef {
                    ident: ident(&g.common),
                    repeats: repeats(&g.common),
                    uti: non_empty(&g.uti),
                    filename: non_empty(&g.filename),
                    disabled: a.yes_no("disabled", &g.disabled),
                    grammar: link(&g.grammar),
                    derives: link(&g.common.derives),
                    parent: None,
                })
            }
            RawElement::Custom(c) => {
                let mut a = self.attrs(label(ElementKind::Custom, &c.common));
                Element::Custom(Custom {
                    ident: ident(&c.common),
                    colours: a.colours(&c.common),
                    length: Expression::parse(&c.length),
                    length_unit: a.pick("lengthunit", &c.lengthunit, LENGTH_UNITS),
                    // Scripts are only ever named.
                    script: non_empty(&c.script).map(|n| Link::new(Reference::Name(n))),
                    derives: link(&c.common.derives),
                    parent: None,
                })
            }
            RawElement::Script(s) => {
                let script = self.script(s.script, &s.common.name);
                Element::Script(ScriptElement {
                    ident: ident(&s.common),
                    repeats: repeats(&s.common),
                    script: Some(script),
                    derives: link(&s.common.derives),
                    parent: None,
                })
            }
        };
        self.arena.push(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawNumber, RawString, RawStructure};

    fn common(id: u32, name: &str) -> RawCommon {
        RawCommon {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn with_elements(elements: Vec<RawElement>) -> RawUfwb {
        RawUfwb {
            version: "1.0".into(),
            grammar: RawGrammar {
                name: "g".into(),
                start: "id:1".into(),
                elements: vec![RawElement::Structure(RawStructure {
                    common: common(1, "root"),
                    elements,
                    ..Default::default()
                })],
                ..Default::default()
            },
        }
    }

    #[test]
    fn enumerated_values_are_checked() {
        let raw = with_elements(vec![RawElement::Number(RawNumber {
            common: RawCommon {
                fillcolor: "00FF7F".into(),
                strokecolor: "green".into(),
                ..common(2, "n")
            },
            length: "4".into(),
            endian: "middle".into(),
            display: "hex".into(),
            signed: "maybe".into(),
            ..Default::default()
        })]);
        let (ufwb, errs) = transform(raw);
        let attrs: Vec<&str> = errs
            .iter()
            .map(|e| match e {
                SchemaError::InvalidValue { attribute, .. } => *attribute,
                other => panic!("unexpected {other}"),
            })
            .collect();
        assert_eq!(attrs, vec!["strokecolor", "endian", "signed"]);

        let n = ufwb
            .elements()
            .iter()
            .find_map(|(_, e)| match e {
                Element::Number(n) => Some(n.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(n.endian, None);
        assert_eq!(n.display, Some(Display::Hex));
        assert_eq!(n.colours.fill, Some(Colour(0x00FF7F)));
        assert_eq!(n.length, Some(Expression::Const(4)));
    }

    #[test]
    fn fixed_values_parse_numbers_and_hex() {
        let raw = with_elements(vec![
            RawElement::Number(RawNumber {
                common: common(2, "magic"),
                length: "8".into(),
                values: vec![
                    RawFixedValue {
                        name: "max".into(),
                        value: "0xFFFFFFFFFFFFFFFF".into(),
                        ..Default::default()
                    },
                    RawFixedValue {
                        name: "pi".into(),
                        value: "3.5".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            RawElement::Binary(crate::raw::RawBinary {
                common: common(3, "sig"),
                length: "2".into(),
                values: vec![
                    RawFixedValue {
                        name: "ok".into(),
                        value: "0xCAFE".into(),
                        ..Default::default()
                    },
                    RawFixedValue {
                        name: "bad".into(),
                        value: "xyz".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
        ]);
        let (ufwb, errs) = transform(raw);
        assert_eq!(errs.len(), 1);
        let mut numbers = None;
        let mut binaries = None;
        for (_, e) in ufwb.elements().iter() {
            match e {
                Element::Number(n) => numbers = Some(n.values.clone()),
                Element::Binary(b) => binaries = Some(b.values.clone()),
                _ => {}
            }
        }
        let numbers = numbers.unwrap();
        assert!(numbers[0].value.matches_int(u64::MAX, -1));
        assert_eq!(numbers[1].value, NumberLiteral::Float(3.5));
        let binaries = binaries.unwrap();
        assert_eq!(binaries.len(), 1);
        assert_eq!(binaries[0].value, vec![0xCA, 0xFE]);
    }

    #[test]
    fn script_source_overrides_language() {
        let raw = RawUfwb {
            grammar: RawGrammar {
                scripts: vec![RawScript {
                    name: "decode".into(),
                    language: "Lua".into(),
                    source: Some(crate::raw::RawScriptSource {
                        language: "Python".into(),
                        text: "print(1)".into(),
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let (ufwb, _) = transform(raw);
        let script = &ufwb.scripts()[0];
        assert_eq!(script.language.as_deref(), Some("Python"));
        assert_eq!(script.text, "print(1)");
    }

    #[test]
    fn string_attributes() {
        let raw = with_elements(vec![RawElement::String(RawString {
            common: common(2, "line"),
            string_type: "delimiter-terminated".into(),
            delimiter: "0A".into(),
            encoding: "ISO-8859-1".into(),
            ..Default::default()
        })]);
        let (ufwb, errs) = transform(raw);
        assert!(errs.is_empty(), "{errs}");
        let s = ufwb
            .elements()
            .iter()
            .find_map(|(_, e)| match e {
                Element::String(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(s.string_type, Some(StringType::DelimiterTerminated));
        assert_eq!(s.delimiter, Some(b'\n'));
        assert_eq!(s.encoding.as_deref(), Some("ISO-8859-1"));
    }
}
