//! An arithmetic expression grammar with explicit operator captures.

use crate::ast::{ClassItem, Definition, Expression, Grammar};
use crate::compiler::Config;
use crate::{GrammarError, PegParser};

pub fn grammar() -> Grammar {
    let ws = || Expression::identifier("S");

    let expr = Expression::sequence(vec![
        ws(),
        Expression::identifier("Sum"),
        Expression::not_predicate(Expression::any()),
    ]);

    let sum = Expression::sequence(vec![
        Expression::identifier("Product"),
        Expression::zero_or_more(Expression::sequence(vec![
            Expression::capture(
                "op",
                Expression::class(vec![ClassItem::Rune('+'), ClassItem::Rune('-')]),
            ),
            ws(),
            Expression::identifier("Product"),
        ])),
    ]);

    let product = Expression::sequence(vec![
        Expression::identifier("Value"),
        Expression::zero_or_more(Expression::sequence(vec![
            Expression::capture(
                "op",
                Expression::class(vec![ClassItem::Rune('*'), ClassItem::Rune('/')]),
            ),
            ws(),
            Expression::identifier("Value"),
        ])),
    ]);

    let value = Expression::alternatives(vec![
        Expression::sequence(vec![Expression::identifier("Number"), ws()]),
        Expression::sequence(vec![
            Expression::literal("("),
            ws(),
            Expression::identifier("Sum"),
            Expression::literal(")"),
            ws(),
        ]),
        Expression::sequence(vec![Expression::identifier("Ident"), ws()]),
    ]);

    let number = Expression::one_or_more(Expression::class(vec![ClassItem::Range('0', '9')]));

    let ident = Expression::sequence(vec![
        Expression::class(vec![
            ClassItem::Range('a', 'z'),
            ClassItem::Range('A', 'Z'),
            ClassItem::Rune('_'),
        ]),
        Expression::zero_or_more(Expression::class(vec![
            ClassItem::Range('a', 'z'),
            ClassItem::Range('A', 'Z'),
            ClassItem::Range('0', '9'),
            ClassItem::Rune('_'),
        ])),
    ]);

    let spacing = Expression::zero_or_more(Expression::class(vec![
        ClassItem::Rune(' '),
        ClassItem::Rune('\t'),
    ]));

    Grammar::new(vec![
        Definition::new("Expr", expr),
        Definition::new("Sum", sum),
        Definition::new("Product", product),
        Definition::new("Value", value),
        Definition::new("Number", number),
        Definition::new("Ident", ident),
        Definition::new("S", spacing),
    ])
}

pub fn parser() -> Result<PegParser, GrammarError> {
    PegParser::with_config(
        grammar(),
        Config {
            captures: true,
            inlining: true,
            inline_threshold: 4,
        },
    )
}
