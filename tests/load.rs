//! Integration tests: JSON loading, the update pass, fallback chains and
//! aggregated diagnostics.

use std::io::Write;
use ufwb::model::{Display, Endian, LengthUnit, NumberType, StringType};
use ufwb::{load_file, load_str, Element, ElementKind, Expression, LoadError, RawUfwb, SchemaError, Ufwb};

const SIMPLE: &str = r#"
{ "version": "1.0",
  "grammar": { "id": 100, "name": "simple", "start": "file", "uti": "org.example.simple",
    "elements": [
      { "structure": { "id": 1, "name": "file", "endian": "big", "display": "hex",
        "elements": [
          { "number": { "id": 2, "name": "magic", "length": "4", "signed": "no" } },
          { "number": { "id": 3, "name": "flags", "length": "3", "lengthunit": "bit", "endian": "little" } },
          { "string": { "id": 4, "name": "title", "encoding": "ISO-8859-1" } },
          { "structref": { "id": 5, "name": "body", "structure": "id:6" } }
        ] } },
      { "structure": { "id": 6, "name": "chunk", "length": "size", "lengthoffset": "4",
        "elements": [
          { "number": { "id": 7, "name": "size", "length": "4" } }
        ] } }
    ] } }
"#;

fn load(json: &str) -> (Ufwb, Vec<SchemaError>) {
    let raw: RawUfwb = serde_json::from_str(json).expect("json");
    let (ufwb, errs) = Ufwb::from_raw(raw);
    (ufwb, errs.into_vec())
}

fn idx(ufwb: &Ufwb, name: &str) -> ufwb::ElementIdx {
    ufwb.by_name(name).expect(name)
}

#[test]
fn test_load_simple_grammar() {
    let ufwb = load_str(SIMPLE).expect("load");
    assert_eq!(ufwb.version, "1.0");
    assert_eq!(ufwb.grammar.ident.name, "simple");
    let start = ufwb.start().expect("start");
    assert_eq!(ufwb.element(start).name(), "file");
    assert_eq!(ufwb.element(start).kind(), ElementKind::Structure);
    assert_eq!(ufwb.by_id(6), Some(idx(&ufwb, "chunk")));
    // Parents are set by the update pass.
    assert_eq!(ufwb.element(idx(&ufwb, "magic")).parent(), Some(start));
}

#[test]
fn test_display_attributes_fall_back_to_parent_then_default() {
    let ufwb = load_str(SIMPLE).expect("load");
    let magic = idx(&ufwb, "magic");
    let flags = idx(&ufwb, "flags");
    let title = idx(&ufwb, "title");
    let size = idx(&ufwb, "size");

    assert_eq!(ufwb.endian(magic), Endian::Big);
    assert_eq!(ufwb.endian(flags), Endian::Little);
    assert_eq!(ufwb.display(magic), Display::Hex);
    assert!(!ufwb.signed(magic));
    assert!(ufwb.signed(flags));
    assert_eq!(ufwb.length_unit(flags), LengthUnit::Bit);
    assert_eq!(ufwb.length_unit(magic), LengthUnit::Byte);
    assert_eq!(ufwb.encoding(title), "ISO-8859-1");
    assert_eq!(ufwb.encoding(magic), "UTF-8");
    assert_eq!(ufwb.string_type(title), StringType::ZeroTerminated);
    assert_eq!(ufwb.number_type(magic), NumberType::Integer);
    // `chunk` is top level, so nothing above it sets the byte order.
    assert_eq!(ufwb.endian(size), Endian::Little);
    assert_eq!(ufwb.display(size), Display::Dec);
}

#[test]
fn test_shape_attributes_do_not_come_from_parent() {
    let ufwb = load_str(SIMPLE).expect("load");
    let magic = idx(&ufwb, "magic");
    let chunk = idx(&ufwb, "chunk");
    let body = idx(&ufwb, "body");
    assert_eq!(ufwb.length(magic), Some(Expression::Const(4)));
    assert_eq!(ufwb.length(idx(&ufwb, "file")), None);
    assert_eq!(ufwb.length(chunk), Some(Expression::Formula("size".into())));
    assert_eq!(ufwb.length_offset(chunk), Some(Expression::Const(4)));
    // StructRef answers with its target's length.
    assert_eq!(ufwb.length(body), ufwb.length(chunk));
    assert_eq!(ufwb.repeat_min(magic), Expression::Const(1));
    assert_eq!(ufwb.repeat_max(magic), Expression::Const(1));
    assert!(ufwb.must_match(magic));
}

#[test]
fn test_derives_fills_unset_attributes() {
    let json = r#"
    { "grammar": { "name": "g", "start": "file", "elements": [
        { "number": { "id": 1, "name": "u16be", "length": "2", "endian": "big", "signed": "no",
          "values": [ { "name": "one", "value": "1" } ] } },
        { "structure": { "id": 2, "name": "file", "endian": "little", "elements": [
            { "number": { "id": 3, "name": "count", "derives": "u16be" } },
            { "number": { "id": 4, "name": "wide", "derives": "id:1", "length": "4" } }
        ] } }
    ] } }"#;
    let ufwb = load_str(json).expect("load");
    let count = idx(&ufwb, "count");
    let wide = idx(&ufwb, "wide");
    assert_eq!(ufwb.element(count).base(), Some(idx(&ufwb, "u16be")));
    assert_eq!(ufwb.length(count), Some(Expression::Const(2)));
    assert_eq!(ufwb.endian(count), Endian::Big);
    assert!(!ufwb.signed(count));
    match ufwb.element(count) {
        Element::Number(n) => assert_eq!(n.values.len(), 1),
        other => panic!("expected a number, got {:?}", other.kind()),
    }
    assert_eq!(ufwb.length(wide), Some(Expression::Const(4)));
}

#[test]
fn test_derived_element_ignores_its_own_parent() {
    let json = r#"
    { "grammar": { "name": "g", "start": "f", "elements": [
        { "number": { "id": 1, "name": "base", "length": "1" } },
        { "structure": { "id": 2, "name": "f", "signed": "no", "endian": "big", "elements": [
            { "number": { "id": 3, "name": "x", "derives": "base" } },
            { "number": { "id": 4, "name": "y", "length": "1" } }
        ] } }
    ] } }"#;
    let ufwb = load_str(json).expect("load");
    let x = idx(&ufwb, "x");
    let y = idx(&ufwb, "y");
    // The base is top level and unset, so its default wins over `f`.
    assert!(ufwb.signed(x));
    assert_eq!(ufwb.endian(x), Endian::Little);
    assert!(!ufwb.signed(y));
    assert_eq!(ufwb.endian(y), Endian::Big);
}

#[test]
fn test_element_by_name_searches_base_after_own_children() {
    let json = r#"
    { "grammar": { "name": "g", "start": "ext", "elements": [
        { "structure": { "id": 1, "name": "base", "elements": [
            { "number": { "id": 2, "name": "a", "length": "1" } },
            { "number": { "id": 3, "name": "b", "length": "1" } }
        ] } },
        { "structure": { "id": 4, "name": "ext", "derives": "base", "elements": [
            { "number": { "id": 5, "name": "b", "length": "2" } }
        ] } }
    ] } }"#;
    let ufwb = load_str(json).expect("load");
    let ext = idx(&ufwb, "ext");
    assert_eq!(ufwb.element_by_name(ext, "b"), ufwb.by_id(5));
    assert_eq!(ufwb.element_by_name(ext, "a"), ufwb.by_id(2));
    assert_eq!(ufwb.element_by_name(ext, "zzz"), None);
    // Base-only children are not copied in.
    assert_eq!(ufwb.element(ext).children().len(), 1);
}

#[test]
fn test_errors_are_aggregated_in_pass_order() {
    let json = r#"
    { "grammar": { "name": "g", "start": "file", "elements": [
        { "structure": { "id": 1, "name": "file", "elements": [
            { "number": { "id": 2, "name": "a", "length": "1", "endian": "middle" } },
            { "structref": { "id": 3, "name": "r", "structure": "nowhere" } },
            { "number": { "id": 2, "name": "dup", "length": "1" } }
        ] } },
        { "structure": { "id": 10, "name": "x", "derives": "y" } },
        { "structure": { "id": 11, "name": "y", "derives": "x" } }
    ] } }"#;
    let (_, errs) = load(json);
    assert_eq!(errs.len(), 4, "{:?}", errs);
    assert!(matches!(&errs[0], SchemaError::InvalidValue { attribute: "endian", value, .. } if value == "middle"));
    assert!(matches!(&errs[1], SchemaError::DuplicateId { id: 2, .. }));
    assert!(matches!(&errs[2], SchemaError::DerivesCycle { .. }));
    assert!(matches!(
        &errs[3],
        SchemaError::DanglingReference { attribute: "structure", reference, .. } if reference == "nowhere"
    ));

    match load_str(json) {
        Err(LoadError::Invalid(errs)) => assert_eq!(errs.len(), 4),
        other => panic!("expected invalid grammar, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_derives_type_mismatch_is_reported() {
    let json = r#"
    { "grammar": { "name": "g", "start": "file", "elements": [
        { "string": { "id": 1, "name": "text" } },
        { "structure": { "id": 2, "name": "file", "elements": [
            { "number": { "id": 3, "name": "n", "length": "1", "derives": "text" } }
        ] } }
    ] } }"#;
    let (ufwb, errs) = load(json);
    assert_eq!(errs.len(), 1, "{:?}", errs);
    assert!(matches!(&errs[0], SchemaError::Merge(_)));
    assert_eq!(ufwb.element(idx(&ufwb, "n")).base(), None);
}

#[test]
fn test_start_must_name_a_structure() {
    let missing = r#"{ "grammar": { "name": "g", "elements": [ { "structure": { "id": 1, "name": "s" } } ] } }"#;
    let (_, errs) = load(missing);
    assert!(matches!(&errs[..], [SchemaError::MissingAttribute { attribute: "start", .. }]));

    let wrong = r#"{ "grammar": { "name": "g", "start": "id:1",
        "elements": [ { "number": { "id": 1, "name": "n", "length": "1" } } ] } }"#;
    let (ufwb, errs) = load(wrong);
    assert!(matches!(
        &errs[..],
        [SchemaError::WrongTarget { attribute: "start", expected: ElementKind::Structure, .. }]
    ));
    assert_eq!(ufwb.start(), None);
}

#[test]
fn test_length_and_repeat_checks() {
    let json = r#"
    { "grammar": { "name": "g", "start": "file", "elements": [
        { "structure": { "id": 1, "name": "file", "elements": [
            { "number": { "id": 2, "name": "nolen" } },
            { "number": { "id": 3, "name": "huge", "length": "9" } },
            { "number": { "id": 4, "name": "half", "type": "float", "length": "2" } },
            { "string": { "id": 5, "name": "fixed", "type": "fixed-length" } },
            { "binary": { "id": 6, "name": "blob", "repeatmin": "3", "repeatmax": "2", "length": "1" } },
            { "binary": { "id": 7, "name": "many", "repeatmin": "0", "repeatmax": "unlimited", "length": "1" } },
            { "string": { "id": 8, "name": "p", "type": "pascal", "length": "3", "lengthunit": "bit" } }
        ] } }
    ] } }"#;
    let (_, errs) = load(json);
    assert_eq!(errs.len(), 6, "{:?}", errs);
    assert!(matches!(&errs[0], SchemaError::MissingAttribute { attribute: "length", .. }));
    assert!(matches!(&errs[1], SchemaError::InvalidLength { length: 72, .. }));
    assert!(matches!(&errs[2], SchemaError::InvalidLength { length: 16, .. }));
    assert!(matches!(&errs[3], SchemaError::MissingAttribute { attribute: "length", .. }));
    assert!(matches!(&errs[4], SchemaError::InvalidRepeats { min: 3, max: 2, .. }));
    assert!(matches!(&errs[5], SchemaError::InvalidLength { length: 3, .. }));
}

#[test]
fn test_scripts_and_grammar_refs_resolve() {
    let json = r#"
    { "grammar": { "id": 9, "name": "g", "uti": "org.example.g", "start": "file",
      "scripts": [ { "name": "crc", "language": "Lua", "text": "return 4" } ],
      "elements": [
        { "structure": { "id": 1, "name": "file", "elements": [
            { "custom": { "id": 2, "name": "sum", "script": "crc" } },
            { "script": { "id": 3, "name": "inline", "script": { "source": { "language": "Python", "text": "pass" } } } },
            { "grammarref": { "id": 4, "name": "self", "grammar": "id:9", "disabled": "yes" } },
            { "grammarref": { "id": 5, "name": "by_uti", "uti": "org.example.g", "disabled": "yes" } }
        ] } }
    ] } }"#;
    let ufwb = load_str(json).expect("load");
    let crc = ufwb.script_by_name("crc").expect("crc");
    match ufwb.element(idx(&ufwb, "sum")) {
        Element::Custom(c) => assert_eq!(c.script.as_ref().and_then(|l| l.target), Some(crc)),
        other => panic!("expected custom, got {:?}", other.kind()),
    }
    // Inline scripts are registered under their element's name.
    let inline = ufwb.script_by_name("inline").expect("inline");
    assert_eq!(ufwb.script(inline).language.as_deref(), Some("Python"));
    match ufwb.element(idx(&ufwb, "by_uti")) {
        Element::GrammarRef(g) => assert!(g.grammar.as_ref().and_then(|l| l.target).is_some()),
        other => panic!("expected grammar ref, got {:?}", other.kind()),
    }
}

#[test]
fn test_unresolved_scripts_and_duplicates() {
    let json = r#"
    { "grammar": { "name": "g", "start": "file",
      "scripts": [ { "name": "crc", "text": "a" }, { "name": "crc", "text": "b" } ],
      "elements": [
        { "structure": { "id": 1, "name": "file", "elements": [
            { "custom": { "id": 2, "name": "sum", "script": "nope" } },
            { "grammarref": { "id": 3, "name": "other", "grammar": "elsewhere" } }
        ] } }
    ] } }"#;
    let (_, errs) = load(json);
    assert_eq!(errs.len(), 3, "{:?}", errs);
    assert!(matches!(&errs[0], SchemaError::DuplicateScript { name } if name == "crc"));
    assert!(matches!(&errs[1], SchemaError::DanglingReference { attribute: "script", .. }));
    assert!(matches!(&errs[2], SchemaError::DanglingReference { attribute: "grammar", .. }));
}

#[test]
fn test_references_that_loop_without_input_are_reported() {
    let json = r#"
    { "grammar": { "name": "g", "start": "a", "elements": [
        { "structure": { "id": 1, "name": "a", "elements": [
            { "structref": { "id": 2, "name": "to_b", "structure": "b" } } ] } },
        { "structure": { "id": 3, "name": "b", "elements": [
            { "binary": { "id": 4, "name": "nothing", "length": "0" } },
            { "structure": { "id": 5, "name": "inner", "elements": [
                { "structref": { "id": 6, "name": "to_a", "structure": "a", "repeatmin": "0" } } ] } } ] } }
    ] } }"#;
    let (_, errs) = load(json);
    assert_eq!(errs.len(), 1, "{:?}", errs);
    assert!(matches!(&errs[0], SchemaError::EmptyRecursion { element } if element.name == "a"));

    let own = r#"{ "grammar": { "name": "g", "start": "s", "elements": [
        { "structure": { "id": 1, "name": "s", "elements": [
            { "structref": { "id": 2, "name": "again", "structure": "s" } } ] } } ] } }"#;
    let (_, errs) = load(own);
    assert!(matches!(&errs[..], [SchemaError::EmptyRecursion { .. }]), "{:?}", errs);
}

#[test]
fn test_recursion_after_a_field_is_allowed() {
    let json = r#"{ "grammar": { "name": "g", "start": "node", "elements": [
        { "structure": { "id": 1, "name": "node", "elements": [
            { "number": { "id": 2, "name": "n", "length": "1" } },
            { "structref": { "id": 3, "name": "next", "structure": "node", "repeatmin": "0", "repeatmax": "1" } },
            { "structref": { "id": 4, "name": "off", "structure": "node", "disabled": "yes" } } ] } } ] } }"#;
    let (_, errs) = load(json);
    assert!(errs.is_empty(), "{:?}", errs);
}

#[test]
fn test_load_file_and_load_errors() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(SIMPLE.as_bytes()).expect("write");
    let ufwb = load_file(file.path()).expect("load_file");
    assert!(ufwb.start().is_some());

    let dir = tempfile::tempdir().expect("tempdir");
    assert!(matches!(load_file(dir.path().join("missing.json")), Err(LoadError::Io(_))));
    assert!(matches!(load_str("{ not json"), Err(LoadError::Json(_))));
}

#[test]
fn test_errors_display_one_per_line() {
    let json = r#"{ "grammar": { "name": "g", "start": "nope", "elements": [
        { "number": { "id": 1, "name": "n", "length": "1", "display": "octal" } } ] } }"#;
    match load_str(json) {
        Err(LoadError::Invalid(errs)) => {
            let text = errs.to_string();
            assert_eq!(text.lines().count(), errs.len());
            assert!(text.contains("Number<01 n>"), "{}", text);
        }
        other => panic!("expected invalid grammar, got {:?}", other.map(|_| ())),
    }
}
