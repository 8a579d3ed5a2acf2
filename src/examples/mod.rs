//! Worked grammars built with the [ast](crate::ast) constructors.
//!
//! The [json] grammar shows labeled failures with a recovery rule, so a
//! malformed document still produces a tree plus diagnostics; the [expr]
//! grammar shows recursive rules and explicit captures. Both handle spacing
//! with an ordinary rule that the compiler inlines away.

pub mod expr;
pub mod json;

#[cfg(test)]
mod __tests__;
