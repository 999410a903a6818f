//! Post-load pass: register, inherit, resolve and validate.
//!
//! Runs once over a freshly built document. Every problem found goes into the
//! returned [`Errors`]; the pass always runs to the end so a grammar author
//! sees all diagnostics at once.

use crate::document::Ufwb;
use crate::error::{Errors, SchemaError};
use crate::extend::extend;
use crate::model::{
    Element, ElementIdx, ElementKind, ElementLabel, Link, NumberType, Reference, ScriptIdx,
    StringType,
};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// How deep `check_recursion` looks into nested and referenced Structures.
const MAX_NESTING: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

impl Ufwb {
    /// Resolve and validate the document in place.
    pub fn update(&mut self) -> Errors {
        let mut errs = Errors::new();
        let order = self.register(&mut errs);
        tracing::debug!(
            elements = order.len(),
            ids = self.ids.len(),
            scripts = self.script_names.len(),
            "registered grammar"
        );
        self.inherit(&order, &mut errs);
        self.resolve_links(&order, &mut errs);
        for &idx in &order {
            self.validate(idx, &mut errs);
        }
        self.validate_grammar(&mut errs);
        self.check_recursion(&order, &mut errs);
        errs
    }

    /// Walk the tree from the grammar's top-level elements, setting parent
    /// links and filling the lookup maps. Returns elements in pre-order.
    fn register(&mut self, errs: &mut Errors) -> Vec<ElementIdx> {
        self.ids.clear();
        self.names.clear();
        self.script_names.clear();

        for i in 0..self.grammar.scripts.len() {
            let idx = self.grammar.scripts[i];
            self.register_script(idx, errs);
        }

        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<(ElementIdx, Option<ElementIdx>)> =
            self.grammar.elements.iter().rev().map(|&i| (i, None)).collect();
        while let Some((idx, parent)) = stack.pop() {
            if !seen.insert(idx) {
                // Shared child indices would make the tree a graph.
                continue;
            }
            order.push(idx);
            self.arena[idx].set_parent(parent);
            let ident = self.arena[idx].ident().clone();
            if ident.id != 0 {
                match self.ids.entry(ident.id) {
                    Entry::Occupied(first) => errs.push(SchemaError::DuplicateId {
                        id: ident.id,
                        first: self.arena[*first.get()].label(),
                        second: self.arena[idx].label(),
                    }),
                    Entry::Vacant(slot) => {
                        slot.insert(idx);
                    }
                }
            }
            if !ident.name.is_empty() {
                self.names.entry(ident.name).or_insert(idx);
            }
            let inline_script = match &self.arena[idx] {
                Element::Script(s) => s.script,
                _ => None,
            };
            if let Some(script) = inline_script {
                self.register_script(script, errs);
            }
            for &child in self.arena[idx].children().iter().rev() {
                stack.push((child, Some(idx)));
            }
        }
        order
    }

    fn register_script(&mut self, idx: ScriptIdx, errs: &mut Errors) {
        let name = self.scripts[idx.0].name.clone();
        if name.is_empty() {
            return;
        }
        match self.script_names.entry(name) {
            Entry::Occupied(e) => {
                if *e.get() != idx {
                    errs.push(SchemaError::DuplicateScript { name: e.key().clone() });
                }
            }
            Entry::Vacant(e) => {
                e.insert(idx);
            }
        }
    }

    /// Resolve `derives` links and merge every element with its base, bases
    /// first. Cyclic chains are reported and cut.
    fn inherit(&mut self, order: &[ElementIdx], errs: &mut Errors) {
        for &idx in order {
            let Some(reference) = self.arena[idx].derives().map(|l| l.reference.clone()) else {
                continue;
            };
            let target = self.resolve(&reference);
            if target.is_none() {
                errs.push(SchemaError::DanglingReference {
                    element: self.label(idx),
                    attribute: "derives",
                    reference: reference.to_string(),
                });
            }
            if let Some(link) = self.arena[idx].derives_mut() {
                link.target = target;
            }
        }

        let mut marks = HashMap::new();
        let mut merges = Vec::new();
        for &idx in order {
            self.order_derives(idx, &mut marks, &mut merges, errs);
        }

        for idx in merges {
            let Some(base) = self.arena[idx].base() else {
                continue;
            };
            match extend(&mut self.arena, idx, base) {
                Ok(()) => tracing::trace!(
                    element = %self.arena[idx].label(),
                    base = %self.arena[base].label(),
                    "derived"
                ),
                Err(e) => {
                    errs.push(e);
                    self.unlink_base(idx);
                }
            }
        }
    }

    fn order_derives(
        &mut self,
        idx: ElementIdx,
        marks: &mut HashMap<ElementIdx, Mark>,
        merges: &mut Vec<ElementIdx>,
        errs: &mut Errors,
    ) {
        if marks.contains_key(&idx) {
            return;
        }
        // A child's own base takes precedence over what its parent's base
        // would give it by name.
        let children = self.arena[idx].children().to_vec();
        for child in children {
            self.order_derives(child, marks, merges, errs);
        }
        if marks.contains_key(&idx) {
            return;
        }
        marks.insert(idx, Mark::Active);
        if let Some(base) = self.arena[idx].base() {
            if base == idx || marks.get(&base) == Some(&Mark::Active) {
                errs.push(SchemaError::DerivesCycle {
                    element: self.label(idx),
                });
                self.unlink_base(idx);
            } else {
                self.order_derives(base, marks, merges, errs);
                merges.push(idx);
            }
        }
        marks.insert(idx, Mark::Done);
    }

    fn unlink_base(&mut self, idx: ElementIdx) {
        if let Some(link) = self.arena[idx].derives_mut() {
            link.target = None;
        }
    }

    /// Look up an element reference, checking the target's kind.
    fn resolve_kind(
        &self,
        owner: ElementLabel,
        attribute: &'static str,
        reference: &Reference,
        expected: Option<ElementKind>,
        errs: &mut Errors,
    ) -> Option<ElementIdx> {
        let Some(target) = self.resolve(reference) else {
            errs.push(SchemaError::DanglingReference {
                element: owner,
                attribute,
                reference: reference.to_string(),
            });
            return None;
        };
        match expected {
            Some(kind) if self.arena[target].kind() != kind => {
                errs.push(SchemaError::WrongTarget {
                    element: owner,
                    attribute,
                    target: self.label(target),
                    expected: kind,
                });
                None
            }
            _ => Some(target),
        }
    }

    fn resolve_link(
        &self,
        owner: ElementIdx,
        attribute: &'static str,
        link: Option<&Link<ElementIdx>>,
        expected: Option<ElementKind>,
        errs: &mut Errors,
    ) -> Option<ElementIdx> {
        let link = link?;
        self.resolve_kind(self.label(owner), attribute, &link.reference, expected, errs)
    }

    /// Resolve StructRef, GrammarRef, Custom and Offset links.
    fn resolve_links(&mut self, order: &[ElementIdx], errs: &mut Errors) {
        for &idx in order {
            match &self.arena[idx] {
                Element::StructRef(r) => {
                    if r.structure.is_none() {
                        errs.push(SchemaError::MissingAttribute {
                            element: self.label(idx),
                            attribute: "structure",
                        });
                        continue;
                    }
                    let target = self.resolve_link(
                        idx,
                        "structure",
                        r.structure.as_ref(),
                        Some(ElementKind::Structure),
                        errs,
                    );
                    if let Element::StructRef(r) = &mut self.arena[idx] {
                        if let Some(link) = r.structure.as_mut() {
                            link.target = target;
                        }
                    }
                }
                Element::GrammarRef(g) => {
                    let resolved = self.resolve_grammar_ref(idx, g.grammar.as_ref(), g.uti.as_deref(), errs);
                    if let Element::GrammarRef(g) = &mut self.arena[idx] {
                        match g.grammar.as_mut() {
                            Some(link) => link.target = resolved,
                            None if resolved.is_some() => {
                                let mut link = Link::new(Reference::Name(self.grammar.ident.name.clone()));
                                link.target = resolved;
                                g.grammar = Some(link);
                            }
                            None => {}
                        }
                    }
                }
                Element::Custom(c) => {
                    let Some(link) = c.script.as_ref() else {
                        errs.push(SchemaError::MissingAttribute {
                            element: self.label(idx),
                            attribute: "script",
                        });
                        continue;
                    };
                    let target = match &link.reference {
                        Reference::Name(name) => self.script_by_name(name),
                        Reference::Id(_) => None,
                    };
                    if target.is_none() {
                        errs.push(SchemaError::DanglingReference {
                            element: self.label(idx),
                            attribute: "script",
                            reference: link.reference.to_string(),
                        });
                    }
                    if let Element::Custom(c) = &mut self.arena[idx] {
                        if let Some(link) = c.script.as_mut() {
                            link.target = target;
                        }
                    }
                }
                Element::Offset(o) => {
                    let relative_to = self.resolve_link(idx, "relative_to", o.relative_to.as_ref(), None, errs);
                    let references = self.resolve_link(
                        idx,
                        "references",
                        o.references.as_ref(),
                        Some(ElementKind::Structure),
                        errs,
                    );
                    let referenced_size =
                        self.resolve_link(idx, "referenced_size", o.referenced_size.as_ref(), None, errs);
                    if let Element::Offset(o) = &mut self.arena[idx] {
                        for (link, target) in [
                            (o.relative_to.as_mut(), relative_to),
                            (o.references.as_mut(), references),
                            (o.referenced_size.as_mut(), referenced_size),
                        ] {
                            if let Some(link) = link {
                                link.target = target;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// The only grammar a document can reach is its own: match by id, name,
    /// or, with no reference at all, by uti.
    fn resolve_grammar_ref(
        &self,
        idx: ElementIdx,
        link: Option<&Link<()>>,
        uti: Option<&str>,
        errs: &mut Errors,
    ) -> Option<()> {
        let own = &self.grammar.ident;
        let matched = match link.map(|l| &l.reference) {
            Some(Reference::Id(id)) => *id != 0 && *id == own.id,
            Some(Reference::Name(name)) => *name == own.name,
            None => match uti {
                Some(uti) => !uti.is_empty() && uti == self.grammar.uti,
                None => {
                    errs.push(SchemaError::MissingAttribute {
                        element: self.label(idx),
                        attribute: "grammar",
                    });
                    return None;
                }
            },
        };
        if matched {
            return Some(());
        }
        let reference = match link {
            Some(l) => l.reference.to_string(),
            None => format!("uti {}", uti.unwrap_or_default()),
        };
        errs.push(SchemaError::DanglingReference {
            element: self.label(idx),
            attribute: "grammar",
            reference,
        });
        None
    }

    /// Per-element checks on the merged attributes.
    fn validate(&self, idx: ElementIdx, errs: &mut Errors) {
        let element = &self.arena[idx];
        let label = || element.label();

        if element.repeats().is_some() {
            let min = self.repeat_min(idx).as_const();
            let max = self.repeat_max(idx).as_const();
            match (min, max) {
                (Some(lo), _) if lo < 0 => errs.push(SchemaError::InvalidRepeats {
                    element: label(),
                    min: lo,
                    max: max.unwrap_or(-1),
                }),
                (Some(lo), Some(hi)) if hi < -1 || (hi >= 0 && lo > hi) => {
                    errs.push(SchemaError::InvalidRepeats {
                        element: label(),
                        min: lo,
                        max: hi,
                    })
                }
                _ => {}
            }
        }

        let length = self.length(idx);
        if let Some(n) = length.as_ref().and_then(|l| l.as_const()) {
            if n < 0 {
                errs.push(SchemaError::InvalidLength {
                    element: label(),
                    length: n,
                    reason: "must not be negative",
                });
                return;
            }
        }
        let bits = length
            .as_ref()
            .and_then(|l| l.as_const())
            .map(|n| n.saturating_mul(self.length_unit(idx).bits() as i64));

        match element {
            Element::Number(_) => {
                if length.is_none() {
                    errs.push(SchemaError::MissingAttribute {
                        element: label(),
                        attribute: "length",
                    });
                    return;
                }
                match (self.number_type(idx), bits) {
                    (NumberType::Integer, Some(b)) if !(1..=64).contains(&b) => {
                        errs.push(SchemaError::InvalidLength {
                            element: label(),
                            length: b,
                            reason: "integers are 1 to 64 bits",
                        })
                    }
                    (NumberType::Float, Some(b)) if b != 32 && b != 64 => {
                        errs.push(SchemaError::InvalidLength {
                            element: label(),
                            length: b,
                            reason: "floats are 32 or 64 bits",
                        })
                    }
                    _ => {}
                }
            }
            Element::String(_) => match self.string_type(idx) {
                StringType::FixedLength if length.is_none() => {
                    errs.push(SchemaError::MissingAttribute {
                        element: label(),
                        attribute: "length",
                    })
                }
                StringType::Pascal => match bits {
                    None if length.is_none() => errs.push(SchemaError::MissingAttribute {
                        element: label(),
                        attribute: "length",
                    }),
                    Some(b) if b % 8 != 0 || !(8..=64).contains(&b) => {
                        errs.push(SchemaError::InvalidLength {
                            element: label(),
                            length: b,
                            reason: "pascal length prefix is 1 to 8 bytes",
                        })
                    }
                    _ => {}
                },
                _ => {}
            },
            Element::Binary(_) | Element::Offset(_) if length.is_none() => {
                errs.push(SchemaError::MissingAttribute {
                    element: label(),
                    attribute: "length",
                })
            }
            Element::Offset(_) => {
                if let Some(b) = bits {
                    if !(1..=64).contains(&b) {
                        errs.push(SchemaError::InvalidLength {
                            element: label(),
                            length: b,
                            reason: "offsets are 1 to 64 bits",
                        })
                    }
                }
            }
            _ => {}
        }
    }

    fn validate_grammar(&mut self, errs: &mut Errors) {
        let label = self.grammar.label();
        let Some(reference) = self.grammar.start.as_ref().map(|l| l.reference.clone()) else {
            errs.push(SchemaError::MissingAttribute {
                element: label,
                attribute: "start",
            });
            return;
        };
        let target = self.resolve_kind(label, "start", &reference, Some(ElementKind::Structure), errs);
        if let Some(link) = self.grammar.start.as_mut() {
            link.target = target;
        }
    }

    /// Report Structures that can reach themselves through references before
    /// any field consumes input. Decoding one would never advance.
    fn check_recursion(&self, order: &[ElementIdx], errs: &mut Errors) {
        let mut edges = HashMap::new();
        for &idx in order {
            if let Element::Structure(_) = &self.arena[idx] {
                let mut targets = Vec::new();
                self.leading_refs(idx, &mut targets, MAX_NESTING);
                edges.insert(idx, targets);
            }
        }
        let mut marks = HashMap::new();
        for &idx in order {
            if edges.contains_key(&idx) {
                self.visit_refs(idx, &edges, &mut marks, errs);
            }
        }
    }

    fn visit_refs(
        &self,
        idx: ElementIdx,
        edges: &HashMap<ElementIdx, Vec<ElementIdx>>,
        marks: &mut HashMap<ElementIdx, Mark>,
        errs: &mut Errors,
    ) {
        if marks.contains_key(&idx) {
            return;
        }
        marks.insert(idx, Mark::Active);
        for &target in edges.get(&idx).map(Vec::as_slice).unwrap_or_default() {
            match marks.get(&target) {
                Some(Mark::Active) => errs.push(SchemaError::EmptyRecursion {
                    element: self.label(target),
                }),
                Some(Mark::Done) => {}
                None => self.visit_refs(target, edges, marks, errs),
            }
        }
        marks.insert(idx, Mark::Done);
    }

    /// Structures a decode of `structure` can enter before consuming input.
    fn leading_refs(&self, structure: ElementIdx, out: &mut Vec<ElementIdx>, budget: usize) {
        if budget == 0 {
            return;
        }
        for &child in self.arena[structure].children() {
            if self.repeat_max(child).as_const() == Some(0) {
                continue;
            }
            match &self.arena[child] {
                Element::StructRef(r) if r.disabled != Some(true) => {
                    if let Some(target) = r.structure.as_ref().and_then(|l| l.target) {
                        out.push(target);
                    }
                }
                Element::GrammarRef(g) if g.disabled != Some(true) => {
                    let resolved = g.grammar.as_ref().and_then(|l| l.target).is_some();
                    if let Some(start) = self.start().filter(|_| resolved) {
                        out.push(start);
                    }
                }
                Element::Structure(_) => self.leading_refs(child, out, budget - 1),
                _ => {}
            }
            if self.consumes(child, budget - 1) {
                break;
            }
        }
    }

    /// Whether every decode of `idx` advances the cursor.
    fn consumes(&self, idx: ElementIdx, budget: usize) -> bool {
        if budget == 0 || !matches!(self.repeat_min(idx).as_const(), Some(n) if n >= 1) {
            return false;
        }
        let fixed = self.length(idx).and_then(|l| l.as_const());
        match &self.arena[idx] {
            Element::Number(_) | Element::Offset(_) | Element::Binary(_) => fixed.map_or(false, |n| n > 0),
            Element::String(_) => match self.string_type(idx) {
                StringType::FixedLength => fixed.map_or(false, |n| n > 0),
                StringType::Pascal => true,
                _ => fixed != Some(0),
            },
            Element::Structure(_) => {
                fixed.map_or(false, |n| n > 0)
                    || self.arena[idx].children().iter().any(|&c| self.consumes(c, budget - 1))
            }
            Element::StructRef(r) if r.disabled != Some(true) => {
                let Some(target) = r.structure.as_ref().and_then(|l| l.target) else {
                    return false;
                };
                fixed.map_or(false, |n| n > 0)
                    || self.arena[target].children().iter().any(|&c| self.consumes(c, budget - 1))
            }
            _ => false,
        }
    }
}
