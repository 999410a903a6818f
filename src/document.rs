//! The document: one grammar, its elements and scripts, plus lookup maps.
//!
//! Attribute getters here apply the fallback chains. Display-type attributes
//! (`signed`, `endian`, `display`, `encoding`, `lengthunit`, `order`) go
//! own -> derives -> parent -> default, where an element with a derives base
//! takes whatever the base resolves to and never consults its own parent.
//! Shape attributes (`length`, repeats, `mustmatch`, number and string type)
//! go own -> derives -> default.

use crate::expr::Expression;
use crate::model::{
    Arena, Display, Element, ElementIdx, ElementLabel, Endian, Grammar, LengthUnit, NumberType,
    Order, Padding, Reference, Script, ScriptIdx, StringType,
};
use std::collections::HashMap;

pub const DEFAULT_ENCODING: &str = "UTF-8";

/// Longest derives/parent chain followed before giving up. Chains mixing the
/// two relations can loop even when each relation alone is acyclic.
const MAX_CHAIN: usize = 256;

#[derive(Debug, Clone)]
pub struct Ufwb {
    pub version: String,
    pub grammar: Grammar,
    pub(crate) arena: Arena,
    pub(crate) scripts: Vec<Script>,
    pub(crate) ids: HashMap<u32, ElementIdx>,
    pub(crate) names: HashMap<String, ElementIdx>,
    pub(crate) script_names: HashMap<String, ScriptIdx>,
    pub(crate) padding: ElementIdx,
}

impl Ufwb {
    /// Wrap a grammar and its storage. Call [`Ufwb::update`] before decoding.
    pub fn new(version: impl Into<String>, grammar: Grammar, mut arena: Arena, scripts: Vec<Script>) -> Self {
        let padding = arena.push(Element::Padding(Padding::default()));
        Ufwb {
            version: version.into(),
            grammar,
            arena,
            scripts,
            ids: HashMap::new(),
            names: HashMap::new(),
            script_names: HashMap::new(),
            padding,
        }
    }

    pub fn element(&self, idx: ElementIdx) -> &Element {
        &self.arena[idx]
    }

    pub fn elements(&self) -> &Arena {
        &self.arena
    }

    pub fn label(&self, idx: ElementIdx) -> ElementLabel {
        self.arena[idx].label()
    }

    pub fn script(&self, idx: ScriptIdx) -> &Script {
        &self.scripts[idx.0]
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn script_by_name(&self, name: &str) -> Option<ScriptIdx> {
        self.script_names.get(name).copied()
    }

    pub fn by_id(&self, id: u32) -> Option<ElementIdx> {
        self.ids.get(&id).copied()
    }

    /// Top-level elements win over nested ones of the same name.
    pub fn by_name(&self, name: &str) -> Option<ElementIdx> {
        self.grammar
            .elements
            .iter()
            .copied()
            .find(|&idx| self.arena[idx].name() == name)
            .or_else(|| self.names.get(name).copied())
    }

    pub fn resolve(&self, reference: &Reference) -> Option<ElementIdx> {
        match reference {
            Reference::Id(id) => self.by_id(*id),
            Reference::Name(name) => self.by_name(name),
        }
    }

    /// The resolved start structure.
    pub fn start(&self) -> Option<ElementIdx> {
        self.grammar.start.as_ref().and_then(|link| link.target)
    }

    /// The synthetic element every padding value points at.
    pub fn padding(&self) -> ElementIdx {
        self.padding
    }

    /// Find a child of `structure` by name, searching its derives base after
    /// its own children.
    pub fn element_by_name(&self, structure: ElementIdx, name: &str) -> Option<ElementIdx> {
        let mut current = Some(structure);
        for _ in 0..MAX_CHAIN {
            let idx = current?;
            let element = &self.arena[idx];
            if let Some(found) = element
                .children()
                .iter()
                .copied()
                .find(|&c| self.arena[c].name() == name)
            {
                return Some(found);
            }
            current = element.base();
        }
        None
    }

    fn inherited<T>(&self, idx: ElementIdx, get: &dyn Fn(&Element) -> Option<T>) -> Option<T> {
        self.chain(idx, get, true, MAX_CHAIN)
    }

    fn derived<T>(&self, idx: ElementIdx, get: &dyn Fn(&Element) -> Option<T>) -> Option<T> {
        self.chain(idx, get, false, MAX_CHAIN)
    }

    fn chain<T>(
        &self,
        idx: ElementIdx,
        get: &dyn Fn(&Element) -> Option<T>,
        via_parent: bool,
        budget: usize,
    ) -> Option<T> {
        if budget == 0 {
            return None;
        }
        let element = &self.arena[idx];
        if let Some(v) = get(element) {
            return Some(v);
        }
        // A derived element answers with its base's chain, never its own parent.
        if let Some(base) = element.base() {
            return self.chain(base, get, via_parent, budget - 1);
        }
        if via_parent {
            if let Some(parent) = element.parent() {
                return self.chain(parent, get, via_parent, budget - 1);
            }
        }
        None
    }

    pub fn signed(&self, idx: ElementIdx) -> bool {
        self.inherited(idx, &|e| e.signed()).unwrap_or(true)
    }

    pub fn endian(&self, idx: ElementIdx) -> Endian {
        self.inherited(idx, &|e| e.endian()).unwrap_or(Endian::Little)
    }

    pub fn display(&self, idx: ElementIdx) -> Display {
        self.inherited(idx, &|e| e.display()).unwrap_or(Display::Dec)
    }

    pub fn encoding(&self, idx: ElementIdx) -> String {
        self.inherited(idx, &|e| e.encoding().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string())
    }

    pub fn length_unit(&self, idx: ElementIdx) -> LengthUnit {
        self.inherited(idx, &|e| e.length_unit())
            .unwrap_or(LengthUnit::Byte)
    }

    pub fn order(&self, idx: ElementIdx) -> Order {
        self.inherited(idx, &|e| e.order()).unwrap_or(Order::Fixed)
    }

    pub fn must_match(&self, idx: ElementIdx) -> bool {
        self.derived(idx, &|e| e.must_match()).unwrap_or(true)
    }

    pub fn number_type(&self, idx: ElementIdx) -> NumberType {
        self.derived(idx, &|e| match e {
            Element::Number(n) => n.number_type,
            _ => None,
        })
        .unwrap_or(NumberType::Integer)
    }

    pub fn string_type(&self, idx: ElementIdx) -> StringType {
        self.derived(idx, &|e| match e {
            Element::String(s) => s.string_type,
            _ => None,
        })
        .unwrap_or(StringType::ZeroTerminated)
    }

    /// Declared length. StructRef and GrammarRef answer with their target's.
    pub fn length(&self, idx: ElementIdx) -> Option<Expression> {
        match &self.arena[idx] {
            Element::StructRef(r) => {
                let target = r.structure.as_ref()?.target?;
                self.derived(target, &|e| e.length().cloned())
            }
            Element::GrammarRef(_) => self.length(self.start()?),
            _ => self.derived(idx, &|e| e.length().cloned()),
        }
    }

    pub fn length_offset(&self, idx: ElementIdx) -> Option<Expression> {
        self.derived(idx, &|e| match e {
            Element::Structure(s) => s.length_offset.clone(),
            _ => None,
        })
    }

    pub fn repeat_min(&self, idx: ElementIdx) -> Expression {
        self.derived(idx, &|e| e.repeats().and_then(|r| r.min.clone()))
            .unwrap_or(Expression::Const(1))
    }

    pub fn repeat_max(&self, idx: ElementIdx) -> Expression {
        self.derived(idx, &|e| e.repeats().and_then(|r| r.max.clone()))
            .unwrap_or(Expression::Const(1))
    }
}
