use crate::{Expected, GrammarError, ParsingError};
use std::fmt::{Display, Formatter, Write};

impl GrammarError {
    pub fn new(what: String, message: String) -> Self {
        Self { message, what }
    }

    pub fn what(&self) -> &str {
        &self.what
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for GrammarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GrammarError: {}-{}", self.what, self.message)
    }
}

impl ParsingError {
    pub fn new(label: String, message: String, start: usize, end: usize) -> Self {
        Self {
            label,
            message,
            start,
            end,
        }
    }
}

impl Display for ParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SyntaxError: {}", self.message)
    }
}

impl Display for Expected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Rune(c) => write!(f, "'{}'", c.escape_default()),
            Expected::Range(a, b) => {
                write!(f, "'{}-{}'", a.escape_default(), b.escape_default())
            }
        }
    }
}

/// Build the human readable message for an exhausted match.
///
/// `found` is the rune sitting at the furthest failure position, or [None]
/// when the failure happened at the end of the input.
pub(crate) fn format_failure(expected: &[Expected], found: Option<char>) -> String {
    let mut message = String::new();
    if expected.is_empty() {
        match found {
            Some(rune) => write!(message, "Unexpected '{}'.", rune.escape_default()),
            None => write!(message, "Unexpected end of file."),
        }
        .unwrap();
        return message;
    }
    message.push_str("Expected ");
    for (index, item) in expected.iter().enumerate() {
        if index > 0 {
            message.push_str(", ");
        }
        write!(message, "{}", item).unwrap();
    }
    match found {
        Some(rune) => write!(message, " but got '{}'.", rune.escape_default()),
        None => write!(message, " but got end of file."),
    }
    .unwrap();
    message
}
