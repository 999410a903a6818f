//! `derives` inheritance: fill an element's unset attributes from a base.
//!
//! Set attributes are never overwritten. Structures match children by name and
//! extend them recursively; children only the base has are not added. The
//! whole pair is checked before anything is written, so a mismatch anywhere
//! leaves `dst` untouched.

use crate::model::{
    Arena, Binary, Colours, Custom, Element, ElementIdx, ElementId, ElementLabel, GrammarRef,
    Link, Number, Offset, Padding, Repeats, ScriptElement, StringElement, StructRef, Structure,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("cannot extend {dst} from {src}: {} and {} are different types", .dst.kind, .src.kind)]
    TypeMismatch { dst: ElementLabel, src: ElementLabel },
}

/// Extend `dst` with `src`'s attributes wherever `dst` leaves them unset.
pub fn extend(arena: &mut Arena, dst: ElementIdx, src: ElementIdx) -> Result<(), MergeError> {
    if dst == src {
        return Ok(());
    }
    check(arena, dst, src)?;
    apply(arena, dst, src);
    Ok(())
}

fn check(arena: &Arena, dst: ElementIdx, src: ElementIdx) -> Result<(), MergeError> {
    let (d, s) = (&arena[dst], &arena[src]);
    if d.kind() != s.kind() {
        return Err(MergeError::TypeMismatch {
            dst: d.label(),
            src: s.label(),
        });
    }
    for (dc, sc) in matched_children(arena, dst, src) {
        check(arena, dc, sc)?;
    }
    Ok(())
}

fn apply(arena: &mut Arena, dst: ElementIdx, src: ElementIdx) {
    if dst == src {
        return;
    }
    let base = arena[src].clone();
    let pairs = matched_children(arena, dst, src);
    arena[dst].fill_from(&base);
    for (dc, sc) in pairs {
        apply(arena, dc, sc);
    }
}

/// Pairs of (dst child, src child) sharing a non-empty name.
fn matched_children(arena: &Arena, dst: ElementIdx, src: ElementIdx) -> Vec<(ElementIdx, ElementIdx)> {
    let base_children = arena[src].children();
    arena[dst]
        .children()
        .iter()
        .filter_map(|&dc| {
            let name = arena[dc].name();
            if name.is_empty() {
                return None;
            }
            base_children
                .iter()
                .find(|&&sc| arena[sc].name() == name)
                .map(|&sc| (dc, sc))
        })
        .collect()
}

fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if dst.is_none() {
        dst.clone_from(src);
    }
}

fn fill_vec<T: Clone>(dst: &mut Vec<T>, src: &[T]) {
    if dst.is_empty() {
        dst.extend_from_slice(src);
    }
}

/// Per-type attribute merge.
trait Derive {
    fn fill_from(&mut self, base: &Self);
}

impl Derive for ElementId {
    fn fill_from(&mut self, base: &Self) {
        if self.description.is_empty() {
            self.description.clone_from(&base.description);
        }
    }
}

impl Derive for Repeats {
    fn fill_from(&mut self, base: &Self) {
        fill(&mut self.min, &base.min);
        fill(&mut self.max, &base.max);
    }
}

impl Derive for Colours {
    fn fill_from(&mut self, base: &Self) {
        fill(&mut self.fill, &base.fill);
        fill(&mut self.stroke, &base.stroke);
    }
}

impl Derive for Structure {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        self.colours.fill_from(&base.colours);
        fill(&mut self.length, &base.length);
        fill(&mut self.length_unit, &base.length_unit);
        fill(&mut self.length_offset, &base.length_offset);
        fill(&mut self.endian, &base.endian);
        fill(&mut self.signed, &base.signed);
        fill(&mut self.encoding, &base.encoding);
        fill(&mut self.order, &base.order);
        fill(&mut self.display, &base.display);
    }
}

impl Derive for Number {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        self.colours.fill_from(&base.colours);
        fill(&mut self.number_type, &base.number_type);
        fill(&mut self.length, &base.length);
        fill(&mut self.length_unit, &base.length_unit);
        fill(&mut self.endian, &base.endian);
        fill(&mut self.signed, &base.signed);
        fill(&mut self.display, &base.display);
        fill(&mut self.must_match, &base.must_match);
        fill_vec(&mut self.values, &base.values);
        fill_vec(&mut self.masks, &base.masks);
    }
}

impl Derive for StringElement {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        self.colours.fill_from(&base.colours);
        fill(&mut self.string_type, &base.string_type);
        fill(&mut self.length, &base.length);
        fill(&mut self.length_unit, &base.length_unit);
        fill(&mut self.encoding, &base.encoding);
        fill(&mut self.delimiter, &base.delimiter);
        fill(&mut self.must_match, &base.must_match);
        fill_vec(&mut self.values, &base.values);
    }
}

impl Derive for Binary {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        self.colours.fill_from(&base.colours);
        fill(&mut self.length, &base.length);
        fill(&mut self.length_unit, &base.length_unit);
        fill(&mut self.must_match, &base.must_match);
        fill_vec(&mut self.values, &base.values);
    }
}

impl Derive for Offset {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        self.colours.fill_from(&base.colours);
        fill(&mut self.length, &base.length);
        fill(&mut self.length_unit, &base.length_unit);
        fill(&mut self.endian, &base.endian);
        fill(&mut self.display, &base.display);
        fill(&mut self.follow_null_reference, &base.follow_null_reference);
        fill(&mut self.additional, &base.additional);
        // Targets are resolved later from the copied references.
        fill_link(&mut self.relative_to, &base.relative_to);
        fill_link(&mut self.references, &base.references);
        fill_link(&mut self.referenced_size, &base.referenced_size);
    }
}

impl Derive for StructRef {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        self.colours.fill_from(&base.colours);
        fill(&mut self.disabled, &base.disabled);
        fill_link(&mut self.structure, &base.structure);
    }
}

impl Derive for GrammarRef {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        fill(&mut self.uti, &base.uti);
        fill(&mut self.filename, &base.filename);
        fill(&mut self.disabled, &base.disabled);
        fill_link(&mut self.grammar, &base.grammar);
    }
}

impl Derive for Custom {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.colours.fill_from(&base.colours);
        fill(&mut self.length, &base.length);
        fill(&mut self.length_unit, &base.length_unit);
        fill_link(&mut self.script, &base.script);
    }
}

impl Derive for ScriptElement {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
        self.repeats.fill_from(&base.repeats);
        fill(&mut self.script, &base.script);
    }
}

impl Derive for Padding {
    fn fill_from(&mut self, base: &Self) {
        self.ident.fill_from(&base.ident);
    }
}

fn fill_link<T>(dst: &mut Option<Link<T>>, src: &Option<Link<T>>) {
    if dst.is_none() {
        if let Some(link) = src {
            *dst = Some(Link::new(link.reference.clone()));
        }
    }
}

impl Element {
    /// Same-kind merge; elements of different kinds are left alone.
    fn fill_from(&mut self, base: &Element) {
        match (self, base) {
            (Element::Structure(d), Element::Structure(s)) => d.fill_from(s),
            (Element::Number(d), Element::Number(s)) => d.fill_from(s),
            (Element::String(d), Element::String(s)) => d.fill_from(s),
            (Element::Binary(d), Element::Binary(s)) => d.fill_from(s),
            (Element::Offset(d), Element::Offset(s)) => d.fill_from(s),
            (Element::StructRef(d), Element::StructRef(s)) => d.fill_from(s),
            (Element::GrammarRef(d), Element::GrammarRef(s)) => d.fill_from(s),
            (Element::Custom(d), Element::Custom(s)) => d.fill_from(s),
            (Element::Script(d), Element::Script(s)) => d.fill_from(s),
            (Element::Padding(d), Element::Padding(s)) => d.fill_from(s),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;
    use crate::model::{Endian, LengthUnit, StringType};

    fn structure(arena: &mut Arena, id: u32, name: &str, children: Vec<ElementIdx>) -> ElementIdx {
        arena.push(Element::Structure(Structure {
            ident: ElementId::new(id, name),
            elements: children,
            ..Default::default()
        }))
    }

    fn number(arena: &mut Arena, id: u32, name: &str, length: Option<i64>) -> ElementIdx {
        arena.push(Element::Number(Number {
            ident: ElementId::new(id, name),
            length: length.map(Expression::Const),
            ..Default::default()
        }))
    }

    #[test]
    fn different_types_are_rejected() {
        let mut arena = Arena::new();
        let s = structure(&mut arena, 1, "s", vec![]);
        let n = number(&mut arena, 2, "n", Some(4));
        let err = extend(&mut arena, s, n).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Structure") && text.contains("Number"), "{}", text);
        let MergeError::TypeMismatch { dst, src } = err;
        assert_eq!(dst.name, "s");
        assert_eq!(src.kind, crate::model::ElementKind::Number);
    }

    #[test]
    fn fills_unset_attributes_and_matching_children() {
        let mut arena = Arena::new();
        let src_n1 = arena.push(Element::Number(Number {
            ident: ElementId::new(11, "number"),
            number_type: Some(crate::model::NumberType::Integer),
            length: Some(Expression::Const(4)),
            ..Default::default()
        }));
        let src_n3 = number(&mut arena, 12, "number3", Some(8));
        let src = arena.push(Element::Structure(Structure {
            ident: ElementId {
                id: 10,
                name: "base".into(),
                description: "better description".into(),
            },
            endian: Some(Endian::Little),
            elements: vec![src_n1, src_n3],
            ..Default::default()
        }));
        let dst_n1 = number(&mut arena, 21, "number", None);
        let dst_n2 = number(&mut arena, 22, "number2", None);
        let dst = structure(&mut arena, 20, "derived", vec![dst_n1, dst_n2]);

        extend(&mut arena, dst, src).unwrap();

        let Element::Structure(d) = &arena[dst] else { panic!("not a structure") };
        assert_eq!(d.ident.description, "better description");
        assert_eq!(d.ident.id, 20);
        assert_eq!(d.ident.name, "derived");
        assert_eq!(d.endian, Some(Endian::Little));
        assert_eq!(d.elements, vec![dst_n1, dst_n2]);

        let Element::Number(n1) = &arena[dst_n1] else { panic!("not a number") };
        assert_eq!(n1.length, Some(Expression::Const(4)));
        assert_eq!(n1.number_type, Some(crate::model::NumberType::Integer));
        assert_eq!(n1.ident.id, 21);

        let Element::Number(n2) = &arena[dst_n2] else { panic!("not a number") };
        assert_eq!(n2.length, None);
    }

    #[test]
    fn set_attributes_win_and_merge_is_idempotent() {
        let mut arena = Arena::new();
        let src = arena.push(Element::String(StringElement {
            ident: ElementId::new(1, "base"),
            string_type: Some(StringType::FixedLength),
            length: Some(Expression::Const(8)),
            length_unit: Some(LengthUnit::Byte),
            encoding: Some("UTF-16LE".into()),
            ..Default::default()
        }));
        let dst = arena.push(Element::String(StringElement {
            ident: ElementId::new(2, "name"),
            length: Some(Expression::Const(16)),
            ..Default::default()
        }));

        extend(&mut arena, dst, src).unwrap();
        let once = arena[dst].clone();
        extend(&mut arena, dst, src).unwrap();
        assert_eq!(arena[dst], once);

        let Element::String(s) = &arena[dst] else { panic!("not a string") };
        assert_eq!(s.length, Some(Expression::Const(16)));
        assert_eq!(s.string_type, Some(StringType::FixedLength));
        assert_eq!(s.encoding.as_deref(), Some("UTF-16LE"));
    }

    #[test]
    fn nested_mismatch_leaves_dst_untouched() {
        let mut arena = Arena::new();
        let src_child = arena.push(Element::String(StringElement {
            ident: ElementId::new(2, "x"),
            ..Default::default()
        }));
        let src = arena.push(Element::Structure(Structure {
            ident: ElementId::new(1, "base"),
            endian: Some(Endian::Big),
            elements: vec![src_child],
            ..Default::default()
        }));
        let dst_child = number(&mut arena, 4, "x", None);
        let dst = structure(&mut arena, 3, "derived", vec![dst_child]);
        let before = (arena[dst].clone(), arena[dst_child].clone());

        let err = extend(&mut arena, dst, src).unwrap_err();
        let MergeError::TypeMismatch { dst: d, src: s } = err;
        assert_eq!(d.name, "x");
        assert_eq!(s.kind, crate::model::ElementKind::String);
        assert_eq!((arena[dst].clone(), arena[dst_child].clone()), before);
    }

    #[test]
    fn self_extend_is_a_no_op() {
        let mut arena = Arena::new();
        let n = number(&mut arena, 1, "n", Some(2));
        let before = arena[n].clone();
        extend(&mut arena, n, n).unwrap();
        assert_eq!(arena[n], before);
    }
}
