//! A derived machine that answers "which runes may appear here?".
//!
//! The [Oracle] runs the same bytecode as the parsing machine but never
//! advances past a chosen target offset: whenever an input instruction is
//! about to examine the target position it records the runes that instruction
//! would accept and then fails on purpose, so backtracking walks it through
//! every alternative reachable at that position. Completion tooling uses this
//! to offer valid continuations at the caret.

use crate::bytecode::{Bytecode, Opcode};
use crate::stack::{Stack, StackFrame};
use crate::Code;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Bound on how many runes a single range contributes, mirroring the bound on
/// the pre-computed charset tables.
const MAX_RANGE_RUNES: u32 = 100;

pub struct Oracle {
    bytecode: Rc<Bytecode>,
}

impl Oracle {
    pub fn new(bytecode: Rc<Bytecode>) -> Self {
        Self { bytecode }
    }

    /// The set of runes the grammar accepts at `target`, entering at
    /// `address`.
    ///
    /// `Any` accepts every rune and contributes nothing enumerable; ranges
    /// wider than a small bound are skipped as well.
    pub fn runes_at(&self, code: &Code, address: usize, target: usize) -> BTreeSet<char> {
        let program = self.bytecode.code();
        let mut runes = BTreeSet::new();
        let mut stack = Stack::new();
        let mut pc = address;
        let mut cursor = 0usize;
        let mut predicates = 0usize;
        stack.push_call(Opcode::Call.size());

        loop {
            let opcode = match Opcode::from_byte(program[pc]) {
                Some(opcode) => opcode,
                None => return runes,
            };
            let at_target = cursor == target;
            let step = match opcode {
                // Reaching Halt means one alternative survived without
                // touching the target; keep exploring the rest.
                Opcode::Halt => Err(()),
                Opcode::Any => {
                    if at_target {
                        Err(())
                    } else {
                        match code.rune_at(cursor) {
                            Some((_, width)) => {
                                cursor += width;
                                pc += 1;
                                Ok(())
                            }
                            None => Err(()),
                        }
                    }
                }
                Opcode::Char | Opcode::Char32 => {
                    let wide = opcode == Opcode::Char32;
                    let operand = if wide {
                        read_u32(program, pc + 1)
                    } else {
                        read_u16(program, pc + 1) as u32
                    };
                    let wanted = char::from_u32(operand).unwrap_or(char::REPLACEMENT_CHARACTER);
                    if at_target {
                        runes.insert(wanted);
                        Err(())
                    } else {
                        match code.rune_at(cursor) {
                            Some((rune, width)) if rune == wanted => {
                                cursor += width;
                                pc += if wide { 5 } else { 3 };
                                Ok(())
                            }
                            _ => Err(()),
                        }
                    }
                }
                Opcode::Range | Opcode::Range32 => {
                    let wide = opcode == Opcode::Range32;
                    let (low, high) = if wide {
                        (read_u32(program, pc + 1), read_u32(program, pc + 5))
                    } else {
                        (
                            read_u16(program, pc + 1) as u32,
                            read_u16(program, pc + 3) as u32,
                        )
                    };
                    if at_target {
                        if high - low < MAX_RANGE_RUNES {
                            for point in low..=high {
                                if let Some(rune) = char::from_u32(point) {
                                    runes.insert(rune);
                                }
                            }
                        }
                        Err(())
                    } else {
                        match code.rune_at(cursor) {
                            Some((rune, width))
                                if (rune as u32) >= low && (rune as u32) <= high =>
                            {
                                cursor += width;
                                pc += if wide { 9 } else { 5 };
                                Ok(())
                            }
                            _ => Err(()),
                        }
                    }
                }
                Opcode::Set => {
                    let id = read_u16(program, pc + 1);
                    if at_target {
                        for byte in 0..=127u8 {
                            if self.bytecode.set(id).test(byte) {
                                runes.insert(byte as char);
                            }
                        }
                        Err(())
                    } else {
                        match code.value.get(cursor) {
                            Some(byte) if self.bytecode.set(id).test(*byte) => {
                                cursor += 1;
                                pc += 3;
                                Ok(())
                            }
                            _ => Err(()),
                        }
                    }
                }
                Opcode::Span => {
                    let id = read_u16(program, pc + 1);
                    let set = self.bytecode.set(id);
                    while cursor != target {
                        match code.value.get(cursor) {
                            Some(byte) if set.test(*byte) => cursor += 1,
                            _ => break,
                        }
                    }
                    if cursor == target {
                        // The span could either consume one of its bytes here
                        // or legitimately end; offer both continuations.
                        for candidate in 0..=127u8 {
                            if set.test(candidate) {
                                runes.insert(candidate as char);
                            }
                        }
                    }
                    pc += 3;
                    Ok(())
                }
                Opcode::Fail => Err(()),
                Opcode::FailTwice => {
                    if let Some(StackFrame::Backtrack {
                        predicate: true, ..
                    }) = stack.pop()
                    {
                        predicates -= 1;
                    }
                    Err(())
                }
                Opcode::Choice => {
                    stack.push_backtrack(read_u16(program, pc + 1), cursor, false);
                    pc += 3;
                    Ok(())
                }
                Opcode::ChoicePred => {
                    stack.push_backtrack(read_u16(program, pc + 1), cursor, true);
                    predicates += 1;
                    pc += 3;
                    Ok(())
                }
                Opcode::Commit | Opcode::CapCommit => {
                    if let Some(StackFrame::Backtrack {
                        predicate: true, ..
                    }) = stack.pop()
                    {
                        predicates -= 1;
                    }
                    pc = read_u16(program, pc + 1);
                    Ok(())
                }
                Opcode::BackCommit | Opcode::CapBackCommit => {
                    if let Some(StackFrame::Backtrack {
                        cursor: saved,
                        predicate,
                        ..
                    }) = stack.pop()
                    {
                        cursor = saved;
                        if predicate {
                            predicates -= 1;
                        }
                    }
                    pc = read_u16(program, pc + 1);
                    Ok(())
                }
                Opcode::PartialCommit | Opcode::CapPartialCommit => {
                    let current = cursor;
                    if let Some(StackFrame::Backtrack { cursor: saved, .. }) = stack.top_mut() {
                        *saved = current;
                    }
                    pc = read_u16(program, pc + 1);
                    Ok(())
                }
                Opcode::Call => {
                    stack.push_call(pc + 4);
                    pc = read_u16(program, pc + 1);
                    Ok(())
                }
                Opcode::Return | Opcode::CapReturn => match stack.pop() {
                    Some(StackFrame::Call { ret }) => {
                        pc = ret;
                        Ok(())
                    }
                    _ => return runes,
                },
                Opcode::Jump => {
                    pc = read_u16(program, pc + 1);
                    Ok(())
                }
                Opcode::Throw => {
                    let id = read_u16(program, pc + 1);
                    match self.bytecode.recovery_address(id) {
                        Some(recovery) if predicates == 0 => {
                            stack.push_call(pc + 3);
                            pc = recovery;
                            Ok(())
                        }
                        _ => Err(()),
                    }
                }
                // Captures never move the cursor; the oracle ignores them.
                Opcode::CapBegin | Opcode::CapNonTermBeginOffset => {
                    pc += 3;
                    Ok(())
                }
                Opcode::CapTerm => {
                    pc += 3;
                    Ok(())
                }
                Opcode::CapNonTerm => {
                    pc += 5;
                    Ok(())
                }
                Opcode::CapEnd | Opcode::CapTermBeginOffset | Opcode::CapEndOffset => {
                    pc += 1;
                    Ok(())
                }
            };
            if step.is_err() {
                // Unwind to the nearest backtrack frame.
                loop {
                    match stack.pop() {
                        Some(StackFrame::Backtrack {
                            pc: saved_pc,
                            cursor: saved_cursor,
                            predicate,
                            ..
                        }) => {
                            if predicate {
                                predicates -= 1;
                            }
                            pc = saved_pc;
                            cursor = saved_cursor;
                            break;
                        }
                        Some(_) => {}
                        None => return runes,
                    }
                }
            }
        }
    }
}

fn read_u16(code: &[u8], at: usize) -> usize {
    code[at] as usize | (code[at + 1] as usize) << 8
}

fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}
