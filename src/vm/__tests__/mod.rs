use crate::ast::{ClassItem, Definition, Expression, Grammar};
use crate::compiler::{compile, Config};
use crate::encoder::encode;
use crate::tree::{NodeId, Tree, TreeNode};
use crate::vm::VirtualMachine;
use crate::Code;
use std::rc::Rc;

fn machine_for(grammar: &Grammar, config: Config) -> (VirtualMachine, usize) {
    let program = compile(grammar, config).unwrap();
    let bytecode = Rc::new(encode(&program).unwrap());
    let entry = bytecode
        .rule_address(&grammar.definitions[0].name)
        .unwrap();
    (VirtualMachine::new(bytecode), entry)
}

fn no_inline() -> Config {
    Config {
        captures: true,
        inlining: false,
        inline_threshold: 64,
    }
}

/// Collect the names of all named nodes reachable from the root, pre-order.
fn named_nodes(tree: &Tree) -> Vec<String> {
    fn walk(tree: &Tree, id: NodeId, found: &mut Vec<String>) {
        if let TreeNode::Named { .. } = tree.get(id) {
            found.push(tree.name_of(id).unwrap().to_string());
        }
        for child in tree.children_of(id) {
            walk(tree, child, found);
        }
    }
    let mut found = Vec::new();
    if let Some(root) = tree.root() {
        walk(tree, root, &mut found);
    }
    found
}

#[test]
fn sequence_scenario_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::sequence(vec![Expression::literal("a"), Expression::literal("b")]),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("ab");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 2);

    let tree = outcome.tree.unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("S"));
    assert_eq!(tree.span(root), (0, 2));
    let child = tree.children_of(root)[0];
    assert!(matches!(tree.get(child), TreeNode::String { .. }));
    assert_eq!(tree.text(&code, child), "ab");
}

#[test]
fn ordered_choice_scenario_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::choice(Expression::literal("a"), Expression::literal("b")),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("b");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 1);
    // The first alternative failed at offset zero, which stays the furthest
    // failure position of the whole match.
    assert_eq!(machine.ffp(), 0);

    let tree = outcome.tree.unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("S"));
    assert_eq!(tree.span(root), (0, 1));
}

#[test]
fn star_scenario_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::zero_or_more(Expression::literal("a")),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("aaaa");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 4);
    let tree = outcome.tree.unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.span(root), (0, 4));
    assert_eq!(tree.text(&code, tree.children_of(root)[0]), "aaaa");
}

#[test]
fn charset_span_scenario_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::zero_or_more(Expression::class(vec![
            ClassItem::Rune('a'),
            ClassItem::Rune('b'),
        ])),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("abba!");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 4);
}

#[test]
fn recovery_scenario_test() {
    let grammar = Grammar::new(vec![
        Definition::new(
            "S",
            Expression::sequence(vec![
                Expression::literal("a"),
                Expression::labeled(Expression::literal("b"), "eb"),
            ]),
        ),
        Definition::new("eb", Expression::any()),
    ]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("ac");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 2);

    let tree = outcome.tree.unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("S"));
    let error = tree.children_of(root)[0];
    assert!(matches!(tree.get(error), TreeNode::Error { .. }));
    assert_eq!(tree.name_of(error), Some("eb"));
    let skipped = tree.children_of(error)[0];
    assert_eq!(tree.span(skipped), (1, 2));
    assert_eq!(tree.text(&code, skipped), "c");

    let diagnostics = tree.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].label, "eb");
}

#[test]
fn recovery_message_test() {
    let grammar = Grammar::new(vec![
        Definition::new(
            "S",
            Expression::sequence(vec![
                Expression::literal("a"),
                Expression::labeled(Expression::literal("b"), "eb"),
            ]),
        ),
        Definition::new("eb", Expression::any()),
    ]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    machine
        .set_label_messages(&[("eb", "expected 'b' after 'a'")])
        .unwrap();
    let code = Code::from("ac");
    let outcome = machine.match_input(&code, entry);
    let tree = outcome.tree.unwrap();
    let diagnostics = tree.diagnostics();
    assert_eq!(diagnostics[0].message, "expected 'b' after 'a'");
}

#[test]
fn unknown_label_message_test() {
    let grammar = Grammar::new(vec![Definition::new("S", Expression::literal("a"))]);
    let (mut machine, _) = machine_for(&grammar, Config::default());
    assert!(machine.set_label_messages(&[("ghost", "nope")]).is_err());
}

#[test]
fn recursion_scenario_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::choice(
            Expression::sequence(vec![
                Expression::literal("("),
                Expression::identifier("S"),
                Expression::literal(")"),
            ]),
            Expression::literal("x"),
        ),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("((x))");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 5);

    let tree = outcome.tree.unwrap();
    let mut id = tree.root().unwrap();
    let mut spans = Vec::new();
    loop {
        match tree.get(id) {
            TreeNode::Named { child, .. } => {
                assert_eq!(tree.name_of(id), Some("S"));
                spans.push(tree.span(id));
                id = *child;
            }
            TreeNode::String { .. } => break,
            other => panic!("unexpected node {:?}", other),
        }
    }
    assert_eq!(spans, vec![(0, 5), (1, 4), (2, 3)]);
    assert_eq!(tree.text(&code, id), "x");
}

#[test]
fn node_span_containment_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::choice(
            Expression::sequence(vec![
                Expression::literal("("),
                Expression::identifier("S"),
                Expression::literal(")"),
            ]),
            Expression::one_or_more(Expression::class(vec![ClassItem::Range('a', 'z')])),
        ),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("((abc))");
    let outcome = machine.match_input(&code, entry);
    let tree = outcome.tree.unwrap();

    fn check(tree: &Tree, id: NodeId) {
        let (start, end) = tree.span(id);
        assert!(start <= end);
        for child in tree.children_of(id) {
            let (child_start, child_end) = tree.span(child);
            assert!(start <= child_start && child_end <= end);
            check(tree, child);
        }
    }
    check(&tree, tree.root().unwrap());
}

#[test]
fn negative_predicate_scenario_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::sequence(vec![
            Expression::not_predicate(Expression::literal("a")),
            Expression::any(),
        ]),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("b");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 1);
    let tree = outcome.tree.unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.name_of(root), Some("S"));
    assert_eq!(tree.span(root), (0, 1));

    // The guarded rune itself must be rejected.
    let rejected = machine.match_input(&Code::from("a"), entry);
    assert!(rejected.error.is_some());
}

#[test]
fn predicate_capture_transparency_test() {
    let grammar = Grammar::new(vec![
        Definition::new(
            "S",
            Expression::sequence(vec![
                Expression::and_predicate(Expression::identifier("A")),
                Expression::literal("ab"),
            ]),
        ),
        Definition::new("A", Expression::literal("a")),
    ]);
    let (mut machine, entry) = machine_for(&grammar, no_inline());
    let code = Code::from("ab");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 2);

    // Captures made while probing inside the predicate never surface.
    let tree = outcome.tree.unwrap();
    assert_eq!(named_nodes(&tree), vec!["S"]);
    assert!(tree.find_named("A").is_none());
}

#[test]
fn backtrack_discards_captures_test() {
    let grammar = Grammar::new(vec![
        Definition::new(
            "S",
            Expression::choice(
                Expression::sequence(vec![
                    Expression::identifier("A"),
                    Expression::literal("!"),
                ]),
                Expression::sequence(vec![
                    Expression::identifier("A"),
                    Expression::literal("?"),
                ]),
            ),
        ),
        Definition::new(
            "A",
            Expression::one_or_more(Expression::class(vec![ClassItem::Range('a', 'z')])),
        ),
    ]);
    let (mut machine, entry) = machine_for(&grammar, no_inline());
    let code = Code::from("ab?");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 3);

    // The first alternative parsed `A` and failed on "!"; its capture must
    // not leak into the surviving branch.
    let tree = outcome.tree.unwrap();
    assert_eq!(named_nodes(&tree), vec!["S", "A"]);
}

#[test]
fn inlining_equivalence_test() {
    let grammar = Grammar::new(vec![
        Definition::new("A", Expression::identifier("B")),
        Definition::new(
            "B",
            Expression::sequence(vec![
                Expression::literal("x"),
                Expression::labeled(Expression::literal("y"), "e"),
            ]),
        ),
    ]);

    let (mut inlined, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("xy");
    let outcome = inlined.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 2);
    let tree = outcome.tree.unwrap();
    // Inlined rules leave no named wrapper behind.
    assert_eq!(named_nodes(&tree), vec!["A"]);
    assert_eq!(tree.span(tree.root().unwrap()), (0, 2));

    let (mut plain, entry) = machine_for(&grammar, no_inline());
    let outcome = plain.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 2);
    let tree = outcome.tree.unwrap();
    assert_eq!(named_nodes(&tree), vec!["A", "B"]);
    assert_eq!(tree.span(tree.root().unwrap()), (0, 2));
}

#[test]
fn unrecovered_throw_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::labeled(Expression::literal("a"), "lab"),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let outcome = machine.match_input(&Code::from("b"), entry);
    let error = outcome.error.unwrap();
    assert_eq!(error.label, "lab");
    assert!(error.message.contains("Unexpected input for 'lab'."));
    assert!(outcome.tree.is_none());
}

#[test]
fn bound_message_on_throw_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::labeled(Expression::literal("a"), "lab"),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    machine
        .set_label_messages(&[("lab", "expected an a")])
        .unwrap();
    let outcome = machine.match_input(&Code::from("b"), entry);
    let error = outcome.error.unwrap();
    assert!(error.message.starts_with("expected an a"));
}

#[test]
fn throw_degrades_in_predicate_test() {
    let grammar = Grammar::new(vec![
        Definition::new(
            "S",
            Expression::sequence(vec![
                Expression::not_predicate(Expression::labeled(
                    Expression::literal("a"),
                    "boom",
                )),
                Expression::literal("b"),
            ]),
        ),
        Definition::new("boom", Expression::literal("z")),
    ]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let outcome = machine.match_input(&Code::from("b"), entry);
    // The throw happened inside the predicate, so neither an abort nor the
    // recovery rule is observable.
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 1);
    assert!(outcome.tree.unwrap().errors().is_empty());
}

#[test]
fn expected_set_message_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::choice(
            Expression::literal("a"),
            Expression::class(vec![ClassItem::Rune('x'), ClassItem::Rune('y')]),
        ),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let outcome = machine.match_input(&Code::from("z"), entry);
    let error = outcome.error.unwrap();
    assert!(error.label.is_empty());
    assert!(error
        .message
        .starts_with("Expected 'a', 'x', 'y' but got 'z'."));
}

#[test]
fn show_fails_disabled_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::choice(
            Expression::literal("a"),
            Expression::class(vec![ClassItem::Rune('x'), ClassItem::Rune('y')]),
        ),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    machine.set_show_fails(false);
    let outcome = machine.match_input(&Code::from("z"), entry);
    assert!(outcome.error.unwrap().message.starts_with("Unexpected 'z'."));
}

#[test]
fn unexpected_eof_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::sequence(vec![Expression::literal("a"), Expression::literal("b")]),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let outcome = machine.match_input(&Code::from("a"), entry);
    let error = outcome.error.unwrap();
    assert!(error.message.starts_with("Expected 'b' but got end of file."));
    assert_eq!(error.start, 1);
}

#[test]
fn furthest_failure_survives_success_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::choice(
            Expression::sequence(vec![Expression::literal("a"), Expression::literal("b")]),
            Expression::literal("a"),
        ),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let outcome = machine.match_input(&Code::from("ax"), entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 1);
    assert_eq!(machine.ffp(), 1);
}

#[test]
fn unicode_rune_test() {
    let grammar = Grammar::new(vec![Definition::new("S", Expression::literal("π€𝄞"))]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let code = Code::from("π€𝄞");
    let outcome = machine.match_input(&code, entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 9);
    let tree = outcome.tree.unwrap();
    assert_eq!(tree.span(tree.root().unwrap()), (0, 9));
}

#[test]
fn machine_reuse_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::one_or_more(Expression::literal("a")),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    let first = machine.match_input(&Code::from("aaa"), entry);
    assert_eq!(first.cursor, 3);
    let second = machine.match_input(&Code::from("aa"), entry);
    assert_eq!(second.cursor, 2);
    assert!(second.error.is_none());
    let tree = second.tree.unwrap();
    assert_eq!(tree.span(tree.root().unwrap()), (0, 2));
}

#[test]
fn disabled_captures_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::sequence(vec![Expression::literal("a"), Expression::literal("b")]),
    )]);
    let (mut machine, entry) = machine_for(
        &grammar,
        Config {
            captures: false,
            inlining: true,
            inline_threshold: 64,
        },
    );
    let outcome = machine.match_input(&Code::from("ab"), entry);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor, 2);
    // Without captures the match succeeds but produces no nodes.
    assert!(outcome.tree.unwrap().root().is_none());
}

#[test]
fn optional_and_lex_test() {
    let grammar = Grammar::new(vec![Definition::new(
        "S",
        Expression::sequence(vec![
            Expression::optional(Expression::literal("-")),
            Expression::lex(Expression::one_or_more(Expression::class(vec![
                ClassItem::Range('0', '9'),
            ]))),
        ]),
    )]);
    let (mut machine, entry) = machine_for(&grammar, Config::default());
    assert_eq!(machine.match_input(&Code::from("-12"), entry).cursor, 3);
    assert_eq!(machine.match_input(&Code::from("7"), entry).cursor, 1);
}
