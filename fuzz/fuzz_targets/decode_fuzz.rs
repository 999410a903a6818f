//! Decode fuzz target: the first byte picks a grammar, the rest is decoded.
//! Decoding must not panic; it returns a value tree or a decode error.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const GRAMMARS: &[&str] = &[
    r#"{ "grammar": { "name": "g", "start": "file", "elements": [
        { "structure": { "name": "file", "endian": "big", "elements": [
            { "number": { "name": "len", "length": "1", "signed": "no" } },
            { "structure": { "name": "body", "length": "len", "elements": [
                { "number": { "name": "bits", "length": "3", "lengthunit": "bit" } },
                { "number": { "name": "rest", "length": "5", "lengthunit": "bit" } },
                { "string": { "name": "s", "type": "pascal", "length": "1" } },
                { "string": { "name": "w", "encoding": "UTF-16LE" } } ] } },
            { "binary": { "name": "tail", "length": "len % 7", "repeatmax": "unlimited" } } ] } } ] } }"#,
    r#"{ "grammar": { "name": "g", "start": "file", "elements": [
        { "structure": { "name": "file", "elements": [
            { "number": { "name": "n", "length": "2", "signed": "no" } },
            { "structref": { "name": "item", "structure": "item", "repeatmin": "0", "repeatmax": "n" } } ] } },
        { "structure": { "name": "item", "length": "4", "elements": [
            { "number": { "name": "tag", "length": "1", "values": [ { "value": "1" }, { "value": "2" } ] } },
            { "string": { "name": "d", "type": "delimiter-terminated", "delimiter": "3B" } } ] } } ] } }"#,
];

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Some((&pick, input)) = data.split_first() else {
        return;
    };
    let grammar = GRAMMARS[pick as usize % GRAMMARS.len()];
    let Ok(ufwb) = ufwb::load_str(grammar) else {
        return;
    };
    let _ = ufwb::decode(&ufwb, input);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
