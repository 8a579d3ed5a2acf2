//! Translation of a symbolic [Program] into an executable [Bytecode].
//!
//! Encoding happens in two passes. The first pass walks the instruction list
//! summing encoded sizes to resolve every label to an absolute byte offset
//! (labels themselves contribute zero bytes). The second pass emits one opcode
//! byte per instruction followed by its little-endian operands, choosing the
//! wide `Char32`/`Range32` forms when an operand does not fit 16 bits.

use crate::bytecode::{Bytecode, LabelBitset, Opcode};
use crate::program::{Instruction, LabelId, Program};
use crate::GrammarError;
use std::collections::HashMap;
use std::rc::Rc;

/// Encode a program into its packed byte form.
///
/// Fails when the encoded program does not fit the 16-bit address space of the
/// jump operands, or when an error label id exceeds the capacity of the
/// recovery bitset.
pub fn encode(program: &Program) -> Result<Bytecode, GrammarError> {
    let mut labels: Vec<usize> = vec![0; program.labels];
    let mut idents: HashMap<usize, usize> = HashMap::new();

    let mut offset = 0usize;
    for (index, instruction) in program.code.iter().enumerate() {
        if let Some(&id) = program.identifiers.get(&index) {
            idents.insert(id, offset);
        }
        if let Instruction::Label(label) = instruction {
            labels[label.0] = offset;
        }
        offset += instruction.encoded_size();
    }
    if offset > u16::MAX as usize {
        return Err(GrammarError::new(
            "encoder".to_string(),
            format!(
                "Encoded program is {} bytes which exceeds the 16-bit address space.",
                offset
            ),
        ));
    }

    let mut code: Vec<u8> = Vec::with_capacity(offset);
    for instruction in &program.code {
        emit(&mut code, instruction, &labels)?;
    }
    debug_assert_eq!(code.len(), offset);

    let mut rxps: HashMap<usize, usize> = HashMap::new();
    let mut rxbs = LabelBitset::new();
    for (&label_id, &rule_label) in &program.recovery {
        if label_id >= LabelBitset::CAPACITY {
            return Err(GrammarError::new(
                "encoder".to_string(),
                format!(
                    "Error label '{}' has id {} which exceeds the recovery bitset capacity.",
                    program.string(label_id),
                    label_id
                ),
            ));
        }
        rxps.insert(label_id, labels[rule_label.0]);
        rxbs.set(label_id);
    }

    let sexp = program
        .sets
        .iter()
        .map(|set| {
            if set.count() > 100 {
                Vec::new()
            } else {
                set.expected_ranges()
            }
        })
        .collect();

    Ok(Bytecode {
        code,
        strs: Rc::new(program.strings.clone()),
        smap: program.smap.clone(),
        sets: program.sets.clone(),
        rxps,
        rxbs,
        sexp,
        idents,
    })
}

fn emit(code: &mut Vec<u8>, instruction: &Instruction, labels: &[usize]) -> Result<(), GrammarError> {
    match instruction {
        Instruction::Label(_) => {}
        Instruction::Halt => code.push(Opcode::Halt as u8),
        Instruction::Any => code.push(Opcode::Any as u8),
        Instruction::Char(c) => {
            let value = *c as u32;
            if value > 0xFFFF {
                code.push(Opcode::Char32 as u8);
                code.extend_from_slice(&value.to_le_bytes());
            } else {
                code.push(Opcode::Char as u8);
                code.extend_from_slice(&(value as u16).to_le_bytes());
            }
        }
        Instruction::Range(a, b) => {
            let (low, high) = (*a as u32, *b as u32);
            if low > 0xFFFF || high > 0xFFFF {
                code.push(Opcode::Range32 as u8);
                code.extend_from_slice(&low.to_le_bytes());
                code.extend_from_slice(&high.to_le_bytes());
            } else {
                code.push(Opcode::Range as u8);
                code.extend_from_slice(&(low as u16).to_le_bytes());
                code.extend_from_slice(&(high as u16).to_le_bytes());
            }
        }
        Instruction::Set(id) => emit_u16(code, Opcode::Set, *id)?,
        Instruction::Span(id) => emit_u16(code, Opcode::Span, *id)?,
        Instruction::Fail => code.push(Opcode::Fail as u8),
        Instruction::FailTwice => code.push(Opcode::FailTwice as u8),
        Instruction::Choice(l) => emit_target(code, Opcode::Choice, *l, labels)?,
        Instruction::ChoicePred(l) => emit_target(code, Opcode::ChoicePred, *l, labels)?,
        Instruction::Commit(l) => emit_target(code, Opcode::Commit, *l, labels)?,
        Instruction::BackCommit(l) => emit_target(code, Opcode::BackCommit, *l, labels)?,
        Instruction::PartialCommit(l) => emit_target(code, Opcode::PartialCommit, *l, labels)?,
        Instruction::Call(l, precedence) => {
            emit_target(code, Opcode::Call, *l, labels)?;
            code.push(*precedence);
        }
        Instruction::Return => code.push(Opcode::Return as u8),
        Instruction::Jump(l) => emit_target(code, Opcode::Jump, *l, labels)?,
        Instruction::Throw(id) => emit_u16(code, Opcode::Throw, *id)?,
        Instruction::CapBegin(id) => emit_u16(code, Opcode::CapBegin, *id)?,
        Instruction::CapEnd => code.push(Opcode::CapEnd as u8),
        Instruction::CapTerm(offset) => emit_u16(code, Opcode::CapTerm, *offset as usize)?,
        Instruction::CapNonTerm(id, offset) => {
            emit_u16(code, Opcode::CapNonTerm, *id)?;
            code.extend_from_slice(&offset.to_le_bytes());
        }
        Instruction::CapTermBeginOffset => code.push(Opcode::CapTermBeginOffset as u8),
        Instruction::CapNonTermBeginOffset(id) => {
            emit_u16(code, Opcode::CapNonTermBeginOffset, *id)?
        }
        Instruction::CapEndOffset => code.push(Opcode::CapEndOffset as u8),
        Instruction::CapCommit(l) => emit_target(code, Opcode::CapCommit, *l, labels)?,
        Instruction::CapBackCommit(l) => emit_target(code, Opcode::CapBackCommit, *l, labels)?,
        Instruction::CapPartialCommit(l) => {
            emit_target(code, Opcode::CapPartialCommit, *l, labels)?
        }
        Instruction::CapReturn => code.push(Opcode::CapReturn as u8),
    }
    Ok(())
}

fn emit_u16(code: &mut Vec<u8>, opcode: Opcode, value: usize) -> Result<(), GrammarError> {
    if value > u16::MAX as usize {
        return Err(GrammarError::new(
            "encoder".to_string(),
            format!("Operand {} of {:?} does not fit 16 bits.", value, opcode),
        ));
    }
    code.push(opcode as u8);
    code.extend_from_slice(&(value as u16).to_le_bytes());
    Ok(())
}

fn emit_target(
    code: &mut Vec<u8>,
    opcode: Opcode,
    label: LabelId,
    labels: &[usize],
) -> Result<(), GrammarError> {
    if label == LabelId::OPEN {
        return Err(GrammarError::new(
            "encoder".to_string(),
            format!("Unpatched forward reference in {:?}.", opcode),
        ));
    }
    emit_u16(code, opcode, labels[label.0])
}
