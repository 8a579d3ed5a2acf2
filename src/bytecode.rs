//! The packed, executable form of a compiled grammar.
//!
//! A [Bytecode] bundles the opcode stream with the interned string table, the
//! character set table, the recovery map for labeled failures and the
//! pre-computed expected-set of every charset. It is immutable and can be
//! shared by any number of [machines](crate::vm::VirtualMachine); each machine
//! only holds a cheap reference.
//!
//! All operands are little-endian. Jump targets are absolute byte offsets into
//! the code vector.

use crate::{CharSet, Expected};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Write as _};
use std::rc::Rc;

/// Operation code of one encoded instruction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Halt = 0,
    Any,
    Char,
    Char32,
    Range,
    Range32,
    Set,
    Span,
    Fail,
    FailTwice,
    Choice,
    ChoicePred,
    Commit,
    BackCommit,
    PartialCommit,
    Call,
    Return,
    Jump,
    Throw,
    CapBegin,
    CapEnd,
    CapTerm,
    CapNonTerm,
    CapTermBeginOffset,
    CapNonTermBeginOffset,
    CapEndOffset,
    CapCommit,
    CapBackCommit,
    CapPartialCommit,
    CapReturn,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        const TABLE: [Opcode; 30] = [
            Opcode::Halt,
            Opcode::Any,
            Opcode::Char,
            Opcode::Char32,
            Opcode::Range,
            Opcode::Range32,
            Opcode::Set,
            Opcode::Span,
            Opcode::Fail,
            Opcode::FailTwice,
            Opcode::Choice,
            Opcode::ChoicePred,
            Opcode::Commit,
            Opcode::BackCommit,
            Opcode::PartialCommit,
            Opcode::Call,
            Opcode::Return,
            Opcode::Jump,
            Opcode::Throw,
            Opcode::CapBegin,
            Opcode::CapEnd,
            Opcode::CapTerm,
            Opcode::CapNonTerm,
            Opcode::CapTermBeginOffset,
            Opcode::CapNonTermBeginOffset,
            Opcode::CapEndOffset,
            Opcode::CapCommit,
            Opcode::CapBackCommit,
            Opcode::CapPartialCommit,
            Opcode::CapReturn,
        ];
        TABLE.get(byte as usize).copied()
    }

    /// Widths of the operands following the opcode byte, in order.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Halt
            | Opcode::Any
            | Opcode::Fail
            | Opcode::FailTwice
            | Opcode::Return
            | Opcode::CapEnd
            | Opcode::CapTermBeginOffset
            | Opcode::CapEndOffset
            | Opcode::CapReturn => &[],
            Opcode::Char
            | Opcode::Set
            | Opcode::Span
            | Opcode::Choice
            | Opcode::ChoicePred
            | Opcode::Commit
            | Opcode::BackCommit
            | Opcode::PartialCommit
            | Opcode::Jump
            | Opcode::Throw
            | Opcode::CapBegin
            | Opcode::CapTerm
            | Opcode::CapNonTermBeginOffset => &[2],
            Opcode::Char32 => &[4],
            Opcode::Range | Opcode::CapNonTerm => &[2, 2],
            Opcode::Range32 => &[4, 4],
            Opcode::Call => &[2, 1],
            Opcode::CapCommit | Opcode::CapBackCommit | Opcode::CapPartialCommit => &[2],
        }
    }

    /// Encoded size of the instruction including the opcode byte.
    pub fn size(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }
}

/// One instruction decoded back out of the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operands: [u32; 2],
    pub size: usize,
}

/// Decode the instruction starting at `offset`, if any.
pub fn decode_at(code: &[u8], offset: usize) -> Option<DecodedInstruction> {
    let opcode = Opcode::from_byte(*code.get(offset)?)?;
    let mut operands = [0u32; 2];
    let mut at = offset + 1;
    for (slot, width) in opcode.operand_widths().iter().enumerate() {
        let bytes = code.get(at..at + width)?;
        let mut value: u32 = 0;
        for (index, byte) in bytes.iter().enumerate() {
            value |= (*byte as u32) << (8 * index);
        }
        operands[slot] = value;
        at += width;
    }
    Some(DecodedInstruction {
        offset,
        opcode,
        operands,
        size: at - offset,
    })
}

/// A 512-bit set of error label ids, used for the fast "is this an error
/// label?" check when a capture scope closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelBitset {
    bits: [u64; 8],
}

impl LabelBitset {
    pub const CAPACITY: usize = 512;

    pub fn new() -> Self {
        Self { bits: [0; 8] }
    }

    pub fn set(&mut self, id: usize) {
        debug_assert!(id < Self::CAPACITY);
        self.bits[id >> 6] |= 1u64 << (id & 63);
    }

    pub fn test(&self, id: usize) -> bool {
        if id >= Self::CAPACITY {
            return false;
        }
        self.bits[id >> 6] & (1u64 << (id & 63)) != 0
    }
}

/// The encoded program together with its data tables.
pub struct Bytecode {
    pub(crate) code: Vec<u8>,
    pub(crate) strs: Rc<Vec<String>>,
    pub(crate) smap: HashMap<String, usize>,
    pub(crate) sets: Vec<CharSet>,
    /// Error label id mapped to the absolute address of its recovery rule.
    pub(crate) rxps: HashMap<usize, usize>,
    pub(crate) rxbs: LabelBitset,
    /// Pre-computed expected items per charset, empty for very large sets.
    pub(crate) sexp: Vec<Vec<Expected>>,
    /// Rule name id mapped to the absolute address of the rule entry.
    pub(crate) idents: HashMap<usize, usize>,
}

impl Bytecode {
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn strings(&self) -> &Rc<Vec<String>> {
        &self.strs
    }

    pub fn string(&self, id: usize) -> &str {
        &self.strs[id]
    }

    pub fn string_id(&self, value: &str) -> Option<usize> {
        self.smap.get(value).copied()
    }

    pub fn set(&self, id: usize) -> &CharSet {
        &self.sets[id]
    }

    /// Absolute entry address of a rule, by name.
    pub fn rule_address(&self, name: &str) -> Option<usize> {
        let id = self.string_id(name)?;
        self.idents.get(&id).copied()
    }

    /// Absolute address of the recovery rule bound to an error label id.
    pub fn recovery_address(&self, label: usize) -> Option<usize> {
        self.rxps.get(&label).copied()
    }

    pub fn is_error_label(&self, label: usize) -> bool {
        self.rxbs.test(label)
    }

    /// Walk the encoded instructions from the start of the code vector.
    pub fn instructions(&self) -> InstructionIter<'_> {
        InstructionIter {
            code: &self.code,
            offset: 0,
        }
    }

    /// Render the whole byte stream as an assembly-like listing.
    pub fn disassemble(&self) -> String {
        let mut listing = String::new();
        let addresses: HashMap<usize, &str> = self
            .idents
            .iter()
            .map(|(id, addr)| (*addr, self.string(*id)))
            .collect();
        for instruction in self.instructions() {
            if let Some(name) = addresses.get(&instruction.offset) {
                let _ = writeln!(listing, ";; {}", name);
            }
            let _ = writeln!(listing, "{}", instruction);
        }
        listing
    }
}

/// Iterator over the [DecodedInstruction]s of a code vector.
pub struct InstructionIter<'b> {
    code: &'b [u8],
    offset: usize,
}

impl<'b> Iterator for InstructionIter<'b> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<DecodedInstruction> {
        let decoded = decode_at(self.code, self.offset)?;
        self.offset += decoded.size;
        Some(decoded)
    }
}

impl Display for DecodedInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}: {:?}", self.offset, self.opcode)?;
        for slot in 0..self.opcode.operand_widths().len() {
            let value = self.operands[slot];
            match self.opcode {
                Opcode::Char | Opcode::Char32 | Opcode::Range | Opcode::Range32 => {
                    match char::from_u32(value) {
                        Some(rune) => write!(f, " '{}'", rune.escape_default())?,
                        None => write!(f, " {:#x}", value)?,
                    }
                }
                _ => write!(f, " {}", value)?,
            }
        }
        Ok(())
    }
}
