//! A JSON grammar with error recovery on member values.
//!
//! The value position of an object member carries the `mval` label, and the
//! `mval` rule skips ahead to the next delimiter. A document with one broken
//! member therefore still parses; the broken range shows up as an error node
//! and a diagnostic.

use crate::ast::{ClassItem, Definition, Expression, Grammar};
use crate::compiler::Config;
use crate::{GrammarError, PegParser};

pub fn grammar() -> Grammar {
    let ws = || Expression::identifier("S");
    let value = || Expression::identifier("Value");

    let json = Expression::sequence(vec![
        ws(),
        value(),
        Expression::not_predicate(Expression::any()),
    ]);

    let value_body = Expression::sequence(vec![
        Expression::alternatives(vec![
            Expression::identifier("Object"),
            Expression::identifier("Array"),
            Expression::identifier("String"),
            Expression::identifier("Number"),
            Expression::identifier("Constant"),
        ]),
        ws(),
    ]);

    let member = Expression::sequence(vec![
        Expression::identifier("String"),
        ws(),
        Expression::literal(":"),
        ws(),
        Expression::labeled(value(), "mval"),
    ]);

    let members = Expression::optional(Expression::sequence(vec![
        Expression::identifier("Member"),
        Expression::zero_or_more(Expression::sequence(vec![
            Expression::literal(","),
            ws(),
            Expression::identifier("Member"),
        ])),
    ]));
    let object = Expression::sequence(vec![
        Expression::literal("{"),
        ws(),
        members,
        Expression::literal("}"),
    ]);

    let elements = Expression::optional(Expression::sequence(vec![
        value(),
        Expression::zero_or_more(Expression::sequence(vec![
            Expression::literal(","),
            ws(),
            value(),
        ])),
    ]));
    let array = Expression::sequence(vec![
        Expression::literal("["),
        ws(),
        elements,
        Expression::literal("]"),
    ]);

    let string_char = Expression::choice(
        Expression::sequence(vec![Expression::literal("\\"), Expression::any()]),
        Expression::sequence(vec![
            Expression::not_predicate(Expression::class(vec![
                ClassItem::Rune('"'),
                ClassItem::Rune('\\'),
            ])),
            Expression::any(),
        ]),
    );
    let string = Expression::sequence(vec![
        Expression::literal("\""),
        Expression::zero_or_more(string_char),
        Expression::literal("\""),
    ]);

    let digits =
        || Expression::one_or_more(Expression::class(vec![ClassItem::Range('0', '9')]));
    let number = Expression::sequence(vec![
        Expression::optional(Expression::literal("-")),
        digits(),
        Expression::optional(Expression::sequence(vec![
            Expression::literal("."),
            digits(),
        ])),
        Expression::optional(Expression::sequence(vec![
            Expression::class(vec![ClassItem::Rune('e'), ClassItem::Rune('E')]),
            Expression::optional(Expression::class(vec![
                ClassItem::Rune('+'),
                ClassItem::Rune('-'),
            ])),
            digits(),
        ])),
    ]);

    let constant = Expression::alternatives(vec![
        Expression::literal("true"),
        Expression::literal("false"),
        Expression::literal("null"),
    ]);

    let spacing = Expression::zero_or_more(Expression::class(vec![
        ClassItem::Rune(' '),
        ClassItem::Rune('\t'),
        ClassItem::Rune('\r'),
        ClassItem::Rune('\n'),
    ]));

    // Recovery for a broken member value: swallow everything up to the next
    // delimiter so the enclosing object can continue.
    let skip = Expression::zero_or_more(Expression::sequence(vec![
        Expression::not_predicate(Expression::class(vec![
            ClassItem::Rune(','),
            ClassItem::Rune('}'),
            ClassItem::Rune(']'),
        ])),
        Expression::any(),
    ]));

    Grammar::new(vec![
        Definition::new("Json", json),
        Definition::new("Value", value_body),
        Definition::new("Object", object),
        Definition::new("Member", member),
        Definition::new("Array", array),
        Definition::new("String", string),
        Definition::new("Number", number),
        Definition::new("Constant", constant),
        Definition::new("S", spacing),
        Definition::new("mval", skip),
    ])
}

pub fn parser() -> Result<PegParser, GrammarError> {
    // A low inline bound keeps the whitespace rule inline while every value
    // rule keeps its named wrapper in the tree.
    PegParser::with_config(
        grammar(),
        Config {
            captures: true,
            inlining: true,
            inline_threshold: 4,
        },
    )
}
