//! The labeled instruction sequence produced by the [compiler](crate::compiler).
//!
//! A [Program] is the symbolic form of a parser: jump targets are still label
//! tokens and strings/charsets are referenced by table index. The
//! [encoder](crate::encoder) resolves the labels into absolute byte offsets
//! and packs everything into a [Bytecode](crate::bytecode::Bytecode).

use crate::CharSet;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// A token referencing a position in the instruction list.
///
/// Labels occupy a slot in the instruction list but emit no bytes; they exist
/// only to be referenced by the control-flow instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) usize);

impl LabelId {
    /// Placeholder for a forward reference that has not been patched yet.
    pub(crate) const OPEN: LabelId = LabelId(usize::MAX);

    pub fn index(self) -> usize {
        self.0
    }
}

/// One instruction in symbolic form, one case per opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Zero-sized placeholder referenced by the jumping instructions.
    Label(LabelId),
    Halt,
    Any,
    Char(char),
    Range(char, char),
    Set(usize),
    Span(usize),
    Fail,
    FailTwice,
    Choice(LabelId),
    ChoicePred(LabelId),
    Commit(LabelId),
    BackCommit(LabelId),
    PartialCommit(LabelId),
    /// Call target plus a precedence operand reserved for bounded left
    /// recursion; the machine requires it to be zero.
    Call(LabelId, u8),
    Return,
    Jump(LabelId),
    Throw(usize),
    CapBegin(usize),
    CapEnd,
    CapTerm(u16),
    CapNonTerm(usize, u16),
    CapTermBeginOffset,
    CapNonTermBeginOffset(usize),
    CapEndOffset,
    CapCommit(LabelId),
    CapBackCommit(LabelId),
    CapPartialCommit(LabelId),
    CapReturn,
}

impl Instruction {
    /// Number of bytes this instruction occupies once encoded.
    ///
    /// Characters above `0xFFFF` do not fit the 16-bit operand and are encoded
    /// through the wide variants, so the size of `Char` and `Range` depends on
    /// the operand value.
    pub fn encoded_size(&self) -> usize {
        match self {
            Instruction::Label(_) => 0,
            Instruction::Halt
            | Instruction::Any
            | Instruction::Fail
            | Instruction::FailTwice
            | Instruction::Return
            | Instruction::CapEnd
            | Instruction::CapTermBeginOffset
            | Instruction::CapEndOffset
            | Instruction::CapReturn => 1,
            Instruction::Char(c) => {
                if (*c as u32) > 0xFFFF {
                    5
                } else {
                    3
                }
            }
            Instruction::Range(a, b) => {
                if (*a as u32) > 0xFFFF || (*b as u32) > 0xFFFF {
                    9
                } else {
                    5
                }
            }
            Instruction::Set(_)
            | Instruction::Span(_)
            | Instruction::Choice(_)
            | Instruction::ChoicePred(_)
            | Instruction::Commit(_)
            | Instruction::BackCommit(_)
            | Instruction::PartialCommit(_)
            | Instruction::Jump(_)
            | Instruction::Throw(_)
            | Instruction::CapBegin(_)
            | Instruction::CapTerm(_)
            | Instruction::CapNonTermBeginOffset(_)
            | Instruction::CapCommit(_)
            | Instruction::CapBackCommit(_)
            | Instruction::CapPartialCommit(_) => 3,
            Instruction::Call(_, _) => 4,
            Instruction::CapNonTerm(_, _) => 5,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Label(l) => write!(f, "L{}:", l.0),
            Instruction::Halt => write!(f, "Halt"),
            Instruction::Any => write!(f, "Any"),
            Instruction::Char(c) => write!(f, "Char '{}'", c.escape_default()),
            Instruction::Range(a, b) => {
                write!(f, "Range '{}' '{}'", a.escape_default(), b.escape_default())
            }
            Instruction::Set(i) => write!(f, "Set {}", i),
            Instruction::Span(i) => write!(f, "Span {}", i),
            Instruction::Fail => write!(f, "Fail"),
            Instruction::FailTwice => write!(f, "FailTwice"),
            Instruction::Choice(l) => write!(f, "Choice L{}", l.0),
            Instruction::ChoicePred(l) => write!(f, "ChoicePred L{}", l.0),
            Instruction::Commit(l) => write!(f, "Commit L{}", l.0),
            Instruction::BackCommit(l) => write!(f, "BackCommit L{}", l.0),
            Instruction::PartialCommit(l) => write!(f, "PartialCommit L{}", l.0),
            Instruction::Call(l, k) => write!(f, "Call L{} {}", l.0, k),
            Instruction::Return => write!(f, "Return"),
            Instruction::Jump(l) => write!(f, "Jump L{}", l.0),
            Instruction::Throw(id) => write!(f, "Throw {}", id),
            Instruction::CapBegin(id) => write!(f, "CapBegin {}", id),
            Instruction::CapEnd => write!(f, "CapEnd"),
            Instruction::CapTerm(offset) => write!(f, "CapTerm {}", offset),
            Instruction::CapNonTerm(id, offset) => write!(f, "CapNonTerm {} {}", id, offset),
            Instruction::CapTermBeginOffset => write!(f, "CapTermBeginOffset"),
            Instruction::CapNonTermBeginOffset(id) => {
                write!(f, "CapNonTermBeginOffset {}", id)
            }
            Instruction::CapEndOffset => write!(f, "CapEndOffset"),
            Instruction::CapCommit(l) => write!(f, "CapCommit L{}", l.0),
            Instruction::CapBackCommit(l) => write!(f, "CapBackCommit L{}", l.0),
            Instruction::CapPartialCommit(l) => write!(f, "CapPartialCommit L{}", l.0),
            Instruction::CapReturn => write!(f, "CapReturn"),
        }
    }
}

/// The symbolic output of one compilation pass.
#[derive(Debug)]
pub struct Program {
    pub(crate) code: Vec<Instruction>,
    /// Instruction index of each rule entry, keyed to the rule name id.
    pub(crate) identifiers: HashMap<usize, usize>,
    /// Interned string table; index 0 is the empty-string sentinel.
    pub(crate) strings: Vec<String>,
    pub(crate) smap: HashMap<String, usize>,
    pub(crate) sets: Vec<CharSet>,
    /// Error label id mapped to the entry label of its recovery rule.
    pub(crate) recovery: HashMap<usize, LabelId>,
    /// Number of labels allocated by the compiler.
    pub(crate) labels: usize,
}

impl Program {
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn string(&self, id: usize) -> &str {
        &self.strings[id]
    }

    pub fn string_id(&self, value: &str) -> Option<usize> {
        self.smap.get(value).copied()
    }

    pub fn sets(&self) -> &[CharSet] {
        &self.sets
    }

    /// Name of the rule whose entry sits at the given instruction index.
    pub fn identifier_at(&self, index: usize) -> Option<&str> {
        self.identifiers.get(&index).map(|id| self.string(*id))
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, instruction) in self.code.iter().enumerate() {
            if let Some(name) = self.identifier_at(index) {
                writeln!(f, ";; {}", name)?;
            }
            match instruction {
                Instruction::Label(_) => writeln!(f, "{}", instruction)?,
                _ => writeln!(f, "  {:03}: {}", index, instruction)?,
            }
        }
        Ok(())
    }
}
