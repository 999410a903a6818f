//! Benchmark: load a record-file grammar, then decode a synthetic file of
//! length-prefixed records from a slice and from a `Read + Seek` stream.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;
use ufwb::{decode, load_str, Decoder, SeekSource, Ufwb};

const RECORDS: &str = r#"
{ "version": "1.0",
  "grammar": { "name": "records", "start": "file",
    "elements": [
      { "structure": { "id": 1, "name": "file", "endian": "big", "elements": [
          { "binary": { "id": 2, "name": "magic", "length": "4", "values": [ { "value": "52454353" } ] } },
          { "number": { "id": 3, "name": "count", "length": "4", "signed": "no" } },
          { "structref": { "id": 4, "name": "records", "structure": "record",
                           "repeatmin": "count", "repeatmax": "count" } } ] } },
      { "structure": { "id": 10, "name": "record", "elements": [
          { "number": { "id": 11, "name": "kind", "length": "1", "values": [
              { "name": "text", "value": "1" }, { "name": "blob", "value": "2" } ] } },
          { "number": { "id": 12, "name": "size", "length": "2", "signed": "no" } },
          { "number": { "id": 13, "name": "flags", "length": "3", "lengthunit": "bit" } },
          { "number": { "id": 14, "name": "level", "length": "5", "lengthunit": "bit" } },
          { "string": { "id": 15, "name": "label" } },
          { "binary": { "id": 16, "name": "payload", "length": "size" } } ] } }
    ] } }
"#;

fn synthetic_file(records: u32) -> Vec<u8> {
    let mut out = b"RECS".to_vec();
    out.extend_from_slice(&records.to_be_bytes());
    for i in 0..records {
        let size = (i % 64) as u16 + 1;
        out.push(1 + (i % 2) as u8);
        out.extend_from_slice(&size.to_be_bytes());
        out.push(0b101_00011);
        out.extend_from_slice(format!("record-{}", i).as_bytes());
        out.push(0);
        out.extend(std::iter::repeat((i & 0xFF) as u8).take(size as usize));
    }
    out
}

fn bench_decode(c: &mut Criterion) {
    let ufwb: Ufwb = load_str(RECORDS).expect("load grammar");
    let data = synthetic_file(10_000);
    let root = decode(&ufwb, &data).expect("warm-up decode");
    eprintln!(
        "decode: {} values, {} bytes (one warm-up pass)",
        root.children.len(),
        data.len()
    );

    c.bench_function("load_records_grammar", |b| {
        b.iter(|| load_str(black_box(RECORDS)).expect("load"))
    });

    c.bench_function("decode_records_slice", |b| {
        b.iter(|| decode(&ufwb, black_box(&data)).expect("decode"))
    });

    c.bench_function("decode_records_stream", |b| {
        b.iter(|| {
            let source = SeekSource::new(Cursor::new(black_box(&data[..]))).expect("source");
            Decoder::new(&ufwb, source).decode().expect("decode")
        })
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
