//! Element model: the closed set of grammar node kinds.
//!
//! Elements live in an [`Arena`] owned by the document and refer to each other
//! by [`ElementIdx`]. `parent` and resolved `derives`/reference targets are
//! non-owning indices filled in by the update pass.

use crate::expr::Expression;
use serde::Serialize;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Index of an [`Element`] in its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ElementIdx(pub(crate) usize);

impl ElementIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a [`Script`] in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ScriptIdx(pub(crate) usize);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementId {
    /// Document-unique id; 0 when the author gave none.
    pub id: u32,
    pub name: String,
    pub description: String,
}

impl ElementId {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        ElementId {
            id,
            name: name.into(),
            description: String::new(),
        }
    }
}

/// `repeatmin` / `repeatmax`. Unset bounds default to 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repeats {
    pub min: Option<Expression>,
    pub max: Option<Expression>,
}

impl Repeats {
    pub fn new(min: Expression, max: Expression) -> Self {
        Repeats {
            min: Some(min),
            max: Some(max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endian {
    Big,
    Little,
    /// Decided by a script at decode time.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Display {
    Binary,
    Dec,
    Hex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LengthUnit {
    Bit,
    Byte,
}

impl LengthUnit {
    /// Bits per unit.
    pub fn bits(self) -> u64 {
        match self {
            LengthUnit::Bit => 1,
            LengthUnit::Byte => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Order {
    Fixed,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberType {
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StringType {
    ZeroTerminated,
    FixedLength,
    /// Length-prefixed; the element's `length` is the prefix width.
    Pascal,
    DelimiterTerminated,
}

/// `RRGGBB` colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Colour(pub u32);

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Colours {
    pub fill: Option<Colour>,
    pub stroke: Option<Colour>,
}

/// Authored reference to another element or script: `id:<n>` or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Id(u32),
    Name(String),
}

impl Reference {
    pub fn parse(s: &str) -> Option<Reference> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(id) = s.strip_prefix("id:").and_then(|n| n.trim().parse().ok()) {
            return Some(Reference::Id(id));
        }
        Some(Reference::Name(s.to_string()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Id(id) => write!(f, "id:{}", id),
            Reference::Name(n) => f.write_str(n),
        }
    }
}

/// A reference plus its target once resolved by the update pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link<T> {
    pub reference: Reference,
    pub target: Option<T>,
}

impl<T> Link<T> {
    pub fn new(reference: Reference) -> Self {
        Link {
            reference,
            target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Int(i64),
    Float(f64),
}

impl NumberLiteral {
    /// Compare against an integer field read both as unsigned `raw` and as
    /// sign-extended `signed`. Literals above `i64::MAX` are stored wrapped.
    pub fn matches_int(&self, raw: u64, signed: i64) -> bool {
        match self {
            NumberLiteral::Int(x) => *x == signed || *x as u64 == raw,
            NumberLiteral::Float(x) => *x == signed as f64,
        }
    }

    pub fn matches_float(&self, v: f64) -> bool {
        match self {
            NumberLiteral::Float(x) => *x == v,
            NumberLiteral::Int(x) => *x as f64 == v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedValue {
    pub name: String,
    pub value: NumberLiteral,
    pub description: String,
}

/// Named bit mask: a raw value matches when `raw & value` equals one of `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub name: String,
    pub value: u64,
    pub description: String,
    pub values: Vec<FixedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedString {
    pub name: String,
    pub value: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBinary {
    pub name: String,
    pub value: Vec<u8>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub script_type: Option<String>,
    pub language: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structure {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub colours: Colours,
    pub length: Option<Expression>,
    pub length_unit: Option<LengthUnit>,
    /// Added to the evaluated `length`.
    pub length_offset: Option<Expression>,
    pub endian: Option<Endian>,
    pub signed: Option<bool>,
    pub encoding: Option<String>,
    pub order: Option<Order>,
    pub display: Option<Display>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
    /// Declaration order is decode order.
    pub elements: Vec<ElementIdx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Number {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub colours: Colours,
    pub number_type: Option<NumberType>,
    pub length: Option<Expression>,
    pub length_unit: Option<LengthUnit>,
    pub endian: Option<Endian>,
    pub signed: Option<bool>,
    pub display: Option<Display>,
    pub must_match: Option<bool>,
    pub values: Vec<FixedValue>,
    pub masks: Vec<Mask>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringElement {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub colours: Colours,
    pub string_type: Option<StringType>,
    pub length: Option<Expression>,
    pub length_unit: Option<LengthUnit>,
    pub encoding: Option<String>,
    pub delimiter: Option<u8>,
    pub must_match: Option<bool>,
    pub values: Vec<FixedString>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binary {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub colours: Colours,
    pub length: Option<Expression>,
    pub length_unit: Option<LengthUnit>,
    pub must_match: Option<bool>,
    pub values: Vec<FixedBinary>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Offset {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub colours: Colours,
    pub length: Option<Expression>,
    pub length_unit: Option<LengthUnit>,
    pub endian: Option<Endian>,
    pub display: Option<Display>,
    pub relative_to: Option<Link<ElementIdx>>,
    pub references: Option<Link<ElementIdx>>,
    pub referenced_size: Option<Link<ElementIdx>>,
    pub follow_null_reference: Option<bool>,
    pub additional: Option<Expression>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructRef {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub colours: Colours,
    pub disabled: Option<bool>,
    pub structure: Option<Link<ElementIdx>>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

/// Reference to a whole grammar. Only the document's own grammar can be a
/// target, so the resolved link carries no index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrammarRef {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub uti: Option<String>,
    pub filename: Option<String>,
    pub disabled: Option<bool>,
    pub grammar: Option<Link<()>>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

/// Field decoded by a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Custom {
    pub ident: ElementId,
    pub colours: Colours,
    /// Passed to the script as a hint.
    pub length: Option<Expression>,
    pub length_unit: Option<LengthUnit>,
    pub script: Option<Link<ScriptIdx>>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

/// A script placed among a structure's elements. Zero length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptElement {
    pub ident: ElementId,
    pub repeats: Repeats,
    pub script: Option<ScriptIdx>,
    pub derives: Option<Link<ElementIdx>>,
    pub parent: Option<ElementIdx>,
}

/// Bytes not covered by any declared field. Never authored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Padding {
    pub ident: ElementId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Structure(Structure),
    Number(Number),
    String(StringElement),
    Binary(Binary),
    Offset(Offset),
    StructRef(StructRef),
    GrammarRef(GrammarRef),
    Custom(Custom),
    Script(ScriptElement),
    Padding(Padding),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKind {
    Grammar,
    Structure,
    Number,
    String,
    Binary,
    Offset,
    StructRef,
    GrammarRef,
    Custom,
    Script,
    Padding,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Grammar => "Grammar",
            ElementKind::Structure => "Structure",
            ElementKind::Number => "Number",
            ElementKind::String => "String",
            ElementKind::Binary => "Binary",
            ElementKind::Offset => "Offset",
            ElementKind::StructRef => "StructRef",
            ElementKind::GrammarRef => "GrammarRef",
            ElementKind::Custom => "Custom",
            ElementKind::Script => "Script",
            ElementKind::Padding => "Padding",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind, id and name of an element, for diagnostics: `Number<03 size>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementLabel {
    pub kind: ElementKind,
    pub id: u32,
    pub name: String,
}

impl fmt::Display for ElementLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{:02} {}>", self.kind, self.id, self.name)
    }
}

static ZERO_LENGTH: Expression = Expression::Const(0);

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Structure(_) => ElementKind::Structure,
            Element::Number(_) => ElementKind::Number,
            Element::String(_) => ElementKind::String,
            Element::Binary(_) => ElementKind::Binary,
            Element::Offset(_) => ElementKind::Offset,
            Element::StructRef(_) => ElementKind::StructRef,
            Element::GrammarRef(_) => ElementKind::GrammarRef,
            Element::Custom(_) => ElementKind::Custom,
            Element::Script(_) => ElementKind::Script,
            Element::Padding(_) => ElementKind::Padding,
        }
    }

    pub fn ident(&self) -> &ElementId {
        match self {
            Element::Structure(e) => &e.ident,
            Element::Number(e) => &e.ident,
            Element::String(e) => &e.ident,
            Element::Binary(e) => &e.ident,
            Element::Offset(e) => &e.ident,
            Element::StructRef(e) => &e.ident,
            Element::GrammarRef(e) => &e.ident,
            Element::Custom(e) => &e.ident,
            Element::Script(e) => &e.ident,
            Element::Padding(e) => &e.ident,
        }
    }

    pub fn name(&self) -> &str {
        &self.ident().name
    }

    pub fn label(&self) -> ElementLabel {
        let ident = self.ident();
        ElementLabel {
            kind: self.kind(),
            id: ident.id,
            name: ident.name.clone(),
        }
    }

    /// The element's own `length`, not following `derives` or references.
    pub fn length(&self) -> Option<&Expression> {
        match self {
            Element::Structure(e) => e.length.as_ref(),
            Element::Number(e) => e.length.as_ref(),
            Element::String(e) => e.length.as_ref(),
            Element::Binary(e) => e.length.as_ref(),
            Element::Offset(e) => e.length.as_ref(),
            Element::Custom(e) => e.length.as_ref(),
            Element::Script(_) => Some(&ZERO_LENGTH),
            Element::StructRef(_) | Element::GrammarRef(_) | Element::Padding(_) => None,
        }
    }

    pub fn length_unit(&self) -> Option<LengthUnit> {
        match self {
            Element::Structure(e) => e.length_unit,
            Element::Number(e) => e.length_unit,
            Element::String(e) => e.length_unit,
            Element::Binary(e) => e.length_unit,
            Element::Offset(e) => e.length_unit,
            Element::Custom(e) => e.length_unit,
            Element::StructRef(_)
            | Element::GrammarRef(_)
            | Element::Script(_)
            | Element::Padding(_) => None,
        }
    }

    /// Authored repeat bounds; `None` for kinds fixed at exactly one instance.
    pub fn repeats(&self) -> Option<&Repeats> {
        match self {
            Element::Structure(e) => Some(&e.repeats),
            Element::Number(e) => Some(&e.repeats),
            Element::String(e) => Some(&e.repeats),
            Element::Binary(e) => Some(&e.repeats),
            Element::Offset(e) => Some(&e.repeats),
            Element::StructRef(e) => Some(&e.repeats),
            Element::GrammarRef(e) => Some(&e.repeats),
            Element::Script(e) => Some(&e.repeats),
            Element::Custom(_) | Element::Padding(_) => None,
        }
    }

    pub fn derives(&self) -> Option<&Link<ElementIdx>> {
        match self {
            Element::Structure(e) => e.derives.as_ref(),
            Element::Number(e) => e.derives.as_ref(),
            Element::String(e) => e.derives.as_ref(),
            Element::Binary(e) => e.derives.as_ref(),
            Element::Offset(e) => e.derives.as_ref(),
            Element::StructRef(e) => e.derives.as_ref(),
            Element::GrammarRef(e) => e.derives.as_ref(),
            Element::Custom(e) => e.derives.as_ref(),
            Element::Script(e) => e.derives.as_ref(),
            Element::Padding(_) => None,
        }
    }

    pub(crate) fn derives_mut(&mut self) -> Option<&mut Link<ElementIdx>> {
        match self {
            Element::Structure(e) => e.derives.as_mut(),
            Element::Number(e) => e.derives.as_mut(),
            Element::String(e) => e.derives.as_mut(),
            Element::Binary(e) => e.derives.as_mut(),
            Element::Offset(e) => e.derives.as_mut(),
            Element::StructRef(e) => e.derives.as_mut(),
            Element::GrammarRef(e) => e.derives.as_mut(),
            Element::Custom(e) => e.derives.as_mut(),
            Element::Script(e) => e.derives.as_mut(),
            Element::Padding(_) => None,
        }
    }

    /// Resolved `derives` base, if any.
    pub fn base(&self) -> Option<ElementIdx> {
        self.derives().and_then(|link| link.target)
    }

    pub fn parent(&self) -> Option<ElementIdx> {
        match self {
            Element::Structure(e) => e.parent,
            Element::Number(e) => e.parent,
            Element::String(e) => e.parent,
            Element::Binary(e) => e.parent,
            Element::Offset(e) => e.parent,
            Element::StructRef(e) => e.parent,
            Element::GrammarRef(e) => e.parent,
            Element::Custom(e) => e.parent,
            Element::Script(e) => e.parent,
            Element::Padding(_) => None,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ElementIdx>) {
        match self {
            Element::Structure(e) => e.parent = parent,
            Element::Number(e) => e.parent = parent,
            Element::String(e) => e.parent = parent,
            Element::Binary(e) => e.parent = parent,
            Element::Offset(e) => e.parent = parent,
            Element::StructRef(e) => e.parent = parent,
            Element::GrammarRef(e) => e.parent = parent,
            Element::Custom(e) => e.parent = parent,
            Element::Script(e) => e.parent = parent,
            Element::Padding(_) => {}
        }
    }

    /// Child elements in decode order (Structures only).
    pub fn children(&self) -> &[ElementIdx] {
        match self {
            Element::Structure(s) => &s.elements,
            _ => &[],
        }
    }

    pub fn must_match(&self) -> Option<bool> {
        match self {
            Element::Number(e) => e.must_match,
            Element::String(e) => e.must_match,
            Element::Binary(e) => e.must_match,
            _ => None,
        }
    }

    pub fn signed(&self) -> Option<bool> {
        match self {
            Element::Structure(e) => e.signed,
            Element::Number(e) => e.signed,
            _ => None,
        }
    }

    pub fn endian(&self) -> Option<Endian> {
        match self {
            Element::Structure(e) => e.endian,
            Element::Number(e) => e.endian,
            Element::Offset(e) => e.endian,
            _ => None,
        }
    }

    pub fn display(&self) -> Option<Display> {
        match self {
            Element::Structure(e) => e.display,
            Element::Number(e) => e.display,
            Element::Offset(e) => e.display,
            _ => None,
        }
    }

    pub fn encoding(&self) -> Option<&str> {
        match self {
            Element::Structure(e) => e.encoding.as_deref(),
            Element::String(e) => e.encoding.as_deref(),
            _ => None,
        }
    }

    pub fn order(&self) -> Option<Order> {
        match self {
            Element::Structure(e) => e.order,
            _ => None,
        }
    }

    pub fn colours(&self) -> Option<&Colours> {
        match self {
            Element::Structure(e) => Some(&e.colours),
            Element::Number(e) => Some(&e.colours),
            Element::String(e) => Some(&e.colours),
            Element::Binary(e) => Some(&e.colours),
            Element::Offset(e) => Some(&e.colours),
            Element::StructRef(e) => Some(&e.colours),
            Element::Custom(e) => Some(&e.colours),
            Element::GrammarRef(_) | Element::Script(_) | Element::Padding(_) => None,
        }
    }
}

/// Flat storage for every element of a document.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    elements: Vec<Element>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: Element) -> ElementIdx {
        self.elements.push(element);
        ElementIdx(self.elements.len() - 1)
    }

    pub fn get(&self, idx: ElementIdx) -> Option<&Element> {
        self.elements.get(idx.0)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementIdx, &Element)> {
        self.elements
            .iter()
            .enumerate()
            .map(|(i, e)| (ElementIdx(i), e))
    }
}

impl Index<ElementIdx> for Arena {
    type Output = Element;

    fn index(&self, idx: ElementIdx) -> &Element {
        &self.elements[idx.0]
    }
}

impl IndexMut<ElementIdx> for Arena {
    fn index_mut(&mut self, idx: ElementIdx) -> &mut Element {
        &mut self.elements[idx.0]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grammar {
    pub ident: ElementId,
    pub author: String,
    pub ext: String,
    pub email: String,
    pub complete: Option<bool>,
    pub uti: String,
    pub start: Option<Link<ElementIdx>>,
    pub elements: Vec<ElementIdx>,
    pub scripts: Vec<ScriptIdx>,
}

impl Grammar {
    pub fn label(&self) -> ElementLabel {
        ElementLabel {
            kind: ElementKind::Grammar,
            id: self.ident.id,
            name: self.ident.name.clone(),
        }
    }
}
