//! Language parsing tool (lang_peg) is a library to compile Parsing Expression
//! Grammars ([PEG](ast::Grammar)) into a compact bytecode which is executed by a
//! parsing virtual machine to produce a syntax [Tree](tree::Tree) with source
//! spans for every captured fragment.
//!
//! # Overview
//! Hand written recursive descent parsers report good error messages but are
//! costly to develop and maintain, while classic generated parsers stop at the
//! first syntax error.
//! This library takes a third route: a grammar is expressed as a PEG, compiled
//! once into a linear instruction stream, and matched by a small stack based
//! virtual machine.
//! A production can be annotated with a failure label, and a label can be bound
//! to a recovery rule; when the labeled point fails the machine transfers
//! control to the recovery rule and keeps parsing, so a single pass yields both
//! a partial syntax tree and a list of diagnostics.
//!
//! # Design
//!
//! The pipeline is `Grammar → compile → Program → encode → Bytecode →
//! VirtualMachine`.
//! The [compiler](compiler::compile) is a visitor over the normalized grammar
//! AST. It resolves forward references by backpatching, interns strings and
//! character sets, and applies a handful of peephole optimizations: repetition
//! of a character set becomes a single `Span` instruction, negative predicates
//! use `FailTwice`, star loops use `PartialCommit`, small non-recursive rules
//! are inlined, and captures whose byte length is known at compile time skip
//! the runtime capture bookkeeping entirely.
//! The [encoder](encoder::encode) turns the instruction list into a packed byte
//! stream with little-endian operands and absolute jump targets.
//! The [machine](vm::VirtualMachine) keeps one cursor over the UTF-8 input and
//! one unified frame stack for backtrack points, call returns and capture
//! scopes; captured nodes live in a single arena so that discarding a doomed
//! branch is one truncation.
//!
//! # Example
//!
//! Following is a small arithmetic sum grammar implemented with lang_peg.
//! ```
//! use lang_peg::ast::{ClassItem, Definition, Expression, Grammar};
//! use lang_peg::compiler::Config;
//! use lang_peg::PegParser;
//!
//! // Sum   <- Digit ("+" Digit)*
//! // Digit <- [0-9]+
//! let sum = Expression::sequence(vec![
//!     Expression::identifier("Digit"),
//!     Expression::zero_or_more(Expression::sequence(vec![
//!         Expression::literal("+"),
//!         Expression::identifier("Digit"),
//!     ])),
//! ]);
//! let digit = Expression::one_or_more(Expression::class(vec![ClassItem::Range('0', '9')]));
//!
//! let grammar = Grammar::new(vec![
//!     Definition::new("Sum", sum),
//!     Definition::new("Digit", digit),
//! ]);
//!
//! // Inlining is disabled so that `Digit` keeps its named wrapper.
//! let config = Config {
//!     inlining: false,
//!     ..Config::default()
//! };
//! let mut parser = PegParser::with_config(grammar, config).unwrap();
//! let tree = parser.parse(b"1+2+3").unwrap();
//! tree.print().unwrap();
//! /*
//! Sum # 0-5
//! ├─ Digit # 0-1
//! ├─ Digit # 2-3
//! └─ Digit # 4-5
//!  */
//! ```
//!
//! # License
//! [lang_peg](crate) is provided under the MIT license.

pub mod ast;
pub mod bytecode;
mod charset;
mod code;
pub mod compiler;
pub mod encoder;
mod error;
pub mod examples;
mod impl_default;
mod logger;
pub mod oracle;
mod parsing;
mod position;
pub mod program;
mod stack;
pub mod tree;
pub mod vm;

use once_cell::unsync::OnceCell;
use std::rc::Rc;

use crate::ast::Grammar;
use crate::bytecode::Bytecode;
use crate::tree::Tree;
use crate::vm::VirtualMachine;

/// A 32-byte bitset over the byte values `0..=255`.
///
/// Character classes made of ASCII values are compiled into a [CharSet] and
/// matched with a single table lookup; repetition of a set is matched by one
/// greedy `Span` instruction.
/// Characters outside the ASCII range never enter a set and are matched by the
/// dedicated character and range instructions instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharSet {
    bits: [u64; 4],
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
/// The line and column information at a code point.
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A wrapper for the input text to be parsed with lines information.
pub struct Code<'c> {
    pub value: &'c [u8],
    line_breaks: OnceCell<Vec<usize>>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// A enum structure to assign multiple level debugging to the parsing machine.
pub enum Log<T> {
    None,
    Default(T),
    Success(T),
    Result(T),
    Verbose(T),
}

#[derive(Debug)]
/// An error returned due to failed validation or translation of a grammar.
///
/// Compilation rejects grammars that reference productions which do not exist,
/// grammars that still carry unresolved imports, and programs whose encoded
/// form exceeds the 16-bit address space of the bytecode.
pub struct GrammarError {
    message: String,
    what: String,
}

#[derive(Debug, Clone)]
/// An error returned when the machine failed to parse the input because of a
/// language syntax error.
///
/// A recovered labeled failure is reported through an error node inside the
/// [Tree](tree::Tree); a [ParsingError] is surfaced for a labeled failure
/// without a recovery rule, or when every alternative of the grammar has been
/// exhausted.
pub struct ParsingError {
    /// Name of the failed label, empty for a plain match failure.
    pub label: String,
    pub message: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// An item of the expected-set collected at the furthest failure position,
/// used to build "Expected .. but got .." messages.
pub enum Expected {
    Rune(char),
    Range(char, char),
}

/// The result of one [match](vm::VirtualMachine::match_input) over an input.
///
/// A successful match carries the syntax tree and the final cursor. A failed
/// match carries the diagnostic, together with the partial tree when at least
/// one capture scope had been committed before the failure.
#[derive(Debug)]
pub struct MatchOutcome {
    pub tree: Option<Tree>,
    pub cursor: usize,
    pub error: Option<ParsingError>,
}

/// A parser structure bundling a compiled grammar with a reusable parsing
/// machine.
///
/// The [PegParser] compiles and encodes the grammar once; every call to
/// [parse](PegParser::parse) resets and reuses the same machine, so the
/// underlying stack and tree storage is allocated only once.
pub struct PegParser {
    grammar: Grammar,
    bytecode: Rc<Bytecode>,
    machine: VirtualMachine,
    entry: usize,
    grammar_text: OnceCell<String>,
}
