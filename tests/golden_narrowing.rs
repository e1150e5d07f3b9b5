//! Golden narrowing vectors
//!
//! Each vector is checked twice: directly against the narrowing grammar, and
//! end to end by loading it from text and narrowing the entry in a
//! dictionary.

use dictstore::narrow::narrow;
use dictstore::{Dictionary, Kind, LoadOptions, linefmt};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NarrowingVector {
    kind: String,
    input: String,
    text: String,
    issue: Option<String>,
    comment: String,
}

fn load_vectors() -> serde_json::Result<Vec<NarrowingVector>> {
    let json_data = include_str!("../testdata/narrowing-vectors.json");
    serde_json::from_str(json_data)
}

fn parse_kind(name: &str) -> Kind {
    match name {
        "string" => Kind::String,
        "bool" => Kind::Bool,
        "int32" => Kind::Int32,
        "int64" => Kind::Int64,
        "double" => Kind::Double,
        "tristate" => Kind::TriState,
        other => panic!("unknown kind in vector file: {}", other),
    }
}

#[test]
fn test_golden_vectors_direct() {
    let vectors = load_vectors().expect("failed to load narrowing vectors");
    assert!(!vectors.is_empty());

    let mut failed = 0;
    for (i, vector) in vectors.iter().enumerate() {
        let narrowed = narrow(vector.input.clone(), parse_kind(&vector.kind));
        let text = narrowed.value.to_text();
        let issue = narrowed.issue.map(|i| i.message_id().to_string());

        if text != vector.text || issue != vector.issue {
            eprintln!("Vector {}: FAILED ({})", i, vector.comment);
            eprintln!("  Expected: {:?} {:?}", vector.text, vector.issue);
            eprintln!("  Actual:   {:?} {:?}", text, issue);
            failed += 1;
        }
    }
    assert_eq!(failed, 0, "{} narrowing vectors failed", failed);
}

#[test]
fn test_golden_vectors_through_dictionary() {
    let vectors = load_vectors().expect("failed to load narrowing vectors");

    for (i, vector) in vectors.iter().enumerate() {
        let mut line = b"v = \"".to_vec();
        line.extend_from_slice(&linefmt::escape_value(vector.input.as_bytes()));
        line.extend_from_slice(b"\"\n");

        let mut dict = Dictionary::new();
        dict.load_from_buffer(&line, LoadOptions::default())
            .unwrap_or_else(|e| panic!("vector {} did not load: {}", i, e));
        dict.narrow("v", parse_kind(&vector.kind)).unwrap();

        assert_eq!(
            dict.get_as_string("v").as_deref(),
            Some(vector.text.as_str()),
            "vector {} ({})",
            i,
            vector.comment
        );
        match &vector.issue {
            Some(id) => assert!(
                dict.diagnostics().contains(id),
                "vector {} ({}) should report {}",
                i,
                vector.comment,
                id
            ),
            None => assert!(
                dict.diagnostics().is_empty(),
                "vector {} ({}) reported {:?}",
                i,
                vector.comment,
                dict.diagnostics().iter().collect::<Vec<_>>()
            ),
        }
    }
}
