//! The normalized grammar AST consumed by the [compiler](crate::compiler).
//!
//! The front end that parses PEG notation, injects the builtin rules and the
//! automatic whitespace handling is a separate concern; by the time a
//! [Grammar] reaches the compiler it is expected to be fully normalized.
//! Import nodes may still be present, but the compiler rejects them: import
//! resolution has to happen before compilation.

use crate::CharSet;
use std::fmt::{Display, Formatter};

/// A complete grammar: an ordered list of rule definitions.
///
/// The first definition is the entry point of the compiled program.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub definitions: Vec<Definition>,
    pub imports: Vec<Import>,
}

/// A single rule `Name <- expression`.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub expression: Expression,
}

/// An unresolved `@import` statement.
#[derive(Debug, Clone)]
pub struct Import {
    pub path: String,
    pub names: Vec<String>,
}

/// One item of a character class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassItem {
    Rune(char),
    Range(char, char),
}

/// A parsing expression.
#[derive(Debug, Clone)]
pub enum Expression {
    Sequence(Vec<Expression>),
    Choice(Box<Expression>, Box<Expression>),
    Optional(Box<Expression>),
    ZeroOrMore(Box<Expression>),
    OneOrMore(Box<Expression>),
    And(Box<Expression>),
    Not(Box<Expression>),
    /// Lexification wrapper: the wrapped expression is syntactic, so the front
    /// end never injects spacing inside it. The compiler treats it as
    /// transparent.
    Lex(Box<Expression>),
    /// `e^label`: when `e` fails, throw `label` instead of backtracking.
    Labeled(Box<Expression>, String),
    /// An explicit capture around an expression; an empty name produces an
    /// anonymous capture.
    Capture(String, Box<Expression>),
    Identifier(String),
    Literal(String),
    Class(Vec<ClassItem>),
    Range(char, char),
    Charset(CharSet),
    Any,
}

impl Grammar {
    pub fn new(definitions: Vec<Definition>) -> Self {
        Self {
            definitions,
            imports: Vec::new(),
        }
    }

    pub fn with_imports(definitions: Vec<Definition>, imports: Vec<Import>) -> Self {
        Self {
            definitions,
            imports,
        }
    }
}

impl Definition {
    pub fn new(name: &str, expression: Expression) -> Self {
        Self {
            name: name.to_string(),
            expression,
        }
    }
}

impl Expression {
    pub fn sequence(items: Vec<Expression>) -> Self {
        Expression::Sequence(items)
    }
    pub fn choice(left: Expression, right: Expression) -> Self {
        Expression::Choice(Box::new(left), Box::new(right))
    }
    /// Fold a list of alternatives into the binary [Choice](Expression::Choice)
    /// form, right associative.
    pub fn alternatives(mut items: Vec<Expression>) -> Self {
        match items.len() {
            0 => Expression::Sequence(Vec::new()),
            1 => items.remove(0),
            _ => {
                let mut expression = items.pop().unwrap();
                while let Some(previous) = items.pop() {
                    expression = Expression::choice(previous, expression);
                }
                expression
            }
        }
    }
    pub fn optional(inner: Expression) -> Self {
        Expression::Optional(Box::new(inner))
    }
    pub fn zero_or_more(inner: Expression) -> Self {
        Expression::ZeroOrMore(Box::new(inner))
    }
    pub fn one_or_more(inner: Expression) -> Self {
        Expression::OneOrMore(Box::new(inner))
    }
    pub fn and_predicate(inner: Expression) -> Self {
        Expression::And(Box::new(inner))
    }
    pub fn not_predicate(inner: Expression) -> Self {
        Expression::Not(Box::new(inner))
    }
    pub fn lex(inner: Expression) -> Self {
        Expression::Lex(Box::new(inner))
    }
    pub fn labeled(inner: Expression, label: &str) -> Self {
        Expression::Labeled(Box::new(inner), label.to_string())
    }
    pub fn capture(name: &str, inner: Expression) -> Self {
        Expression::Capture(name.to_string(), Box::new(inner))
    }
    pub fn identifier(name: &str) -> Self {
        Expression::Identifier(name.to_string())
    }
    pub fn literal(value: &str) -> Self {
        Expression::Literal(value.to_string())
    }
    pub fn class(items: Vec<ClassItem>) -> Self {
        Expression::Class(items)
    }
    pub fn range(low: char, high: char) -> Self {
        Expression::Range(low, high)
    }
    pub fn charset(set: CharSet) -> Self {
        Expression::Charset(set)
    }
    pub fn any() -> Self {
        Expression::Any
    }

    // Precedence used for printing: 0 choice, 1 sequence, 2 prefix/suffix,
    // 3 primary.
    fn precedence(&self) -> u8 {
        match self {
            Expression::Choice(_, _) => 0,
            Expression::Sequence(_) => 1,
            Expression::Optional(_)
            | Expression::ZeroOrMore(_)
            | Expression::OneOrMore(_)
            | Expression::And(_)
            | Expression::Not(_)
            | Expression::Labeled(_, _) => 2,
            _ => 3,
        }
    }

    fn fmt_child(&self, f: &mut Formatter<'_>, parent: u8) -> std::fmt::Result {
        if self.precedence() < parent {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl Display for ClassItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassItem::Rune(c) => write!(f, "{}", c.escape_default()),
            ClassItem::Range(a, b) => {
                write!(f, "{}-{}", a.escape_default(), b.escape_default())
            }
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Sequence(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, " ")?;
                    }
                    item.fmt_child(f, 2)?;
                }
                Ok(())
            }
            Expression::Choice(left, right) => {
                left.fmt_child(f, 1)?;
                write!(f, " / ")?;
                right.fmt_child(f, 0)
            }
            Expression::Optional(e) => {
                e.fmt_child(f, 3)?;
                write!(f, "?")
            }
            Expression::ZeroOrMore(e) => {
                e.fmt_child(f, 3)?;
                write!(f, "*")
            }
            Expression::OneOrMore(e) => {
                e.fmt_child(f, 3)?;
                write!(f, "+")
            }
            Expression::And(e) => {
                write!(f, "&")?;
                e.fmt_child(f, 3)
            }
            Expression::Not(e) => {
                write!(f, "!")?;
                e.fmt_child(f, 3)
            }
            Expression::Lex(e) => {
                write!(f, "#")?;
                e.fmt_child(f, 3)
            }
            Expression::Labeled(e, label) => {
                e.fmt_child(f, 3)?;
                write!(f, "^{}", label)
            }
            Expression::Capture(name, e) => write!(f, "${}({})", name, e),
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::Literal(value) => write!(f, "{:?}", value),
            Expression::Class(items) => {
                write!(f, "[")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expression::Range(a, b) => {
                write!(f, "[{}-{}]", a.escape_default(), b.escape_default())
            }
            Expression::Charset(set) => write!(f, "{:?}", set),
            Expression::Any => write!(f, "."),
        }
    }
}

impl Display for Definition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <- {}", self.name, self.expression)
    }
}

impl Display for Grammar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for import in &self.imports {
            writeln!(f, "@import {:?} ({})", import.path, import.names.join(", "))?;
        }
        for definition in &self.definitions {
            writeln!(f, "{}", definition)?;
        }
        Ok(())
    }
}
