use crate::examples::{expr, json};
use crate::Code;
use serde_json::Value as SerdeValue;

#[test]
fn json_parsing_test() {
    let mut parser = json::parser().unwrap();
    let text = br#"{"name": "lang", "tags": [1, 2.5, true], "nested": {"x": null}}"#;

    // The grammar and serde_json must agree on what a valid document is.
    serde_json::from_slice::<SerdeValue>(text).unwrap();

    let tree = parser.parse(text).unwrap();
    let code = Code::new(text);
    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("Json"));
    assert_eq!(tree.span(root), (0, text.len()));
    assert!(tree.find_named("Object").is_some());
    assert!(tree.find_named("Array").is_some());
    assert!(tree.diagnostics().is_empty());

    let number = tree.find_named("Number").unwrap();
    assert_eq!(tree.text(&code, number), "1");
}

#[test]
fn json_recovery_test() {
    let mut parser = json::parser().unwrap();
    parser
        .set_label_messages(&[("mval", "expected a value for the member")])
        .unwrap();
    let text = br#"{"a": !!, "b": 2}"#;

    // serde_json rejects the document outright; the recovering parser keeps
    // going and reports the broken range instead.
    assert!(serde_json::from_slice::<SerdeValue>(text).is_err());

    let (tree, diagnostics) = parser.parse_with_diagnostics(text);
    let tree = tree.unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].label, "mval");
    assert_eq!(diagnostics[0].message, "expected a value for the member");
    assert_eq!(diagnostics[0].start, 6);
    assert_eq!(diagnostics[0].end, 8);

    // The healthy member after the broken one still made it into the tree.
    let code = Code::new(text);
    let number = tree.find_named("Number").unwrap();
    assert_eq!(tree.text(&code, number), "2");
}

#[test]
fn json_rejects_garbage_test() {
    let mut parser = json::parser().unwrap();
    assert!(parser.parse(b"").is_err());
    assert!(parser.parse(b"[1, 2] trailing").is_err());
}

#[test]
fn json_grammar_text_test() {
    let parser = json::parser().unwrap();
    let text = parser.grammar();
    assert!(text.contains("Json <- "));
    assert!(text.contains("^mval"));
}

#[test]
fn expression_parsing_test() {
    let mut parser = expr::parser().unwrap();
    let text = b"1 + 2 * (x - 3)";
    let tree = parser.parse(text).unwrap();
    let code = Code::new(text);

    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("Expr"));
    assert_eq!(tree.span(root), (0, text.len()));

    assert!(tree.find_named("Sum").is_some());
    assert!(tree.find_named("Product").is_some());
    let op = tree.find_named("op").unwrap();
    assert_eq!(tree.text(&code, op), "+");
    let ident = tree.find_named("Ident").unwrap();
    assert_eq!(tree.text(&code, ident), "x");
}

#[test]
fn expression_rejects_partial_test() {
    let mut parser = expr::parser().unwrap();
    assert!(parser.parse(b"1 +").is_err());
    assert!(parser.parse(b"(1").is_err());
}

#[test]
fn expression_production_entry_test() {
    let mut parser = expr::parser().unwrap();
    let tree = parser.parse_production("Number", b"42").unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("Number"));
    assert_eq!(tree.span(root), (0, 2));
}
