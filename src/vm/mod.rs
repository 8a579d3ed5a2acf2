//! The parsing virtual machine.
//!
//! A [VirtualMachine] executes the encoded program over one input slice. It is
//! single threaded and synchronous: one call to
//! [match_input](VirtualMachine::match_input) runs the dispatch loop to
//! completion and produces a [MatchOutcome]. The machine keeps one cursor into
//! the input and one unified [stack](crate::stack) holding backtrack points,
//! call returns and capture scopes; nodes captured by a scope live in the
//! stack's shared arena, so discarding everything a doomed alternative
//! captured is a single truncation.
//!
//! A local mismatch unwinds to the nearest backtrack frame while tracking the
//! furthest failure position for diagnostics. A labeled failure (`Throw`)
//! degrades to a local failure inside predicates; otherwise it either tail
//! calls the recovery rule bound to the label, wrapping the recovered subtree
//! in an error node, or aborts the match with a [ParsingError].
//!
//! The machine can be reset and reused; the compiled [Bytecode] is immutable
//! and may be shared between any number of machines.

use crate::bytecode::{Bytecode, Opcode};
use crate::error::format_failure;
use crate::stack::{Stack, StackFrame};
use crate::tree::{NodeId, Tree};
use crate::{Code, Expected, Log, MatchOutcome, ParsingError};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

#[cfg(test)]
mod __tests__;

/// Upper bound on the expected-set kept for failure messages.
const MAX_EXPECTED: usize = 20;

pub struct VirtualMachine {
    bytecode: Rc<Bytecode>,
    stack: Stack,
    tree: Tree,
    /// Nodes committed outside of any capture scope; the last one becomes the
    /// tree root at `Halt`.
    top_nodes: Vec<NodeId>,
    pc: usize,
    cursor: usize,
    /// Depth of the predicate nesting; `Throw` degrades to a plain failure
    /// while this is non zero.
    predicates: usize,
    /// Number of open capture scopes on the stack.
    open_captures: usize,
    /// Furthest failure position and the pc observed there.
    ffp: usize,
    ffp_pc: usize,
    // Scratch registers for the offset based capture markers.
    cap_offset_id: usize,
    cap_offset_start: usize,
    show_fails: bool,
    expected: Vec<Expected>,
    /// Error label id mapped to the id of a human readable message.
    label_messages: HashMap<usize, usize>,
    strings: Rc<Vec<String>>,
    debugger: Log<&'static str>,
}

impl VirtualMachine {
    pub fn new(bytecode: Rc<Bytecode>) -> Self {
        let strings = bytecode.strings().clone();
        let tree = Tree::new(strings.clone());
        Self {
            bytecode,
            stack: Stack::new(),
            tree,
            top_nodes: Vec::new(),
            pc: 0,
            cursor: 0,
            predicates: 0,
            open_captures: 0,
            ffp: 0,
            ffp_pc: 0,
            cap_offset_id: 0,
            cap_offset_start: 0,
            show_fails: true,
            expected: Vec::new(),
            label_messages: HashMap::new(),
            strings,
            debugger: Log::None,
        }
    }

    /// Bind human readable messages to error labels.
    ///
    /// The message shows up in the diagnostic of an unrecovered throw and in
    /// the error nodes produced by recovery rules.
    pub fn set_label_messages(&mut self, messages: &[(&str, &str)]) -> Result<(), String> {
        let mut unknown = Vec::new();
        for (label, message) in messages {
            match self.bytecode.string_id(label) {
                Some(id) => {
                    let message_id = self.intern_message(message);
                    self.label_messages.insert(id, message_id);
                }
                None => unknown.push(*label),
            }
        }
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "Labels {:?} are not part of the compiled grammar.",
                unknown
            ))
        }
    }

    /// Toggle collection of the expected-set used in failure messages.
    pub fn set_show_fails(&mut self, show_fails: bool) {
        self.show_fails = show_fails;
    }

    /// Set a log label to trace the dispatch loop based on the level of [Log].
    pub fn set_log(&mut self, debugger: Log<&'static str>) {
        self.debugger = debugger;
    }

    /// Furthest input offset any alternative has failed at during the last
    /// match.
    pub fn ffp(&self) -> usize {
        self.ffp
    }

    /// Program counter observed at the furthest failure position.
    pub fn ffp_pc(&self) -> usize {
        self.ffp_pc
    }

    pub fn expected(&self) -> &[Expected] {
        &self.expected
    }

    /// Clear all per-match state, retaining the allocated storage.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.tree.reset();
        self.tree.set_strings(self.strings.clone());
        self.top_nodes.clear();
        self.pc = 0;
        self.cursor = 0;
        self.predicates = 0;
        self.open_captures = 0;
        self.ffp = 0;
        self.ffp_pc = 0;
        self.cap_offset_id = 0;
        self.cap_offset_start = 0;
        self.expected.clear();
    }

    /// Run the program against `code`, entering at the rule whose bytecode
    /// address is `address` (see [Bytecode::rule_address]).
    pub fn match_input(&mut self, code: &Code, address: usize) -> MatchOutcome {
        self.reset();
        let bytecode = self.bytecode.clone();
        let program = bytecode.code();
        // Equivalent of executing the entry call at address zero: return into
        // the Halt that follows it.
        self.stack.push_call(Opcode::Call.size());
        self.pc = address;

        loop {
            let opcode = match Opcode::from_byte(program[self.pc]) {
                Some(opcode) => opcode,
                None => panic!("corrupted bytecode: opcode {} at {}", program[self.pc], self.pc),
            };
            #[cfg(debug_assertions)]
            if self.debugger.order() >= Log::Verbose(()).order() {
                println!(
                    "[{}; Machine]: {:04} {:?} at cursor {}",
                    self.debugger, self.pc, opcode, self.cursor
                );
            }
            let step = match opcode {
                Opcode::Halt => {
                    debug_assert!(self.stack.is_empty(), "frames left behind at halt");
                    let root = self.top_nodes.last().copied();
                    let tree = self.take_tree(root);
                    return MatchOutcome {
                        tree: Some(tree),
                        cursor: self.cursor,
                        error: None,
                    };
                }
                Opcode::Any => match code.rune_at(self.cursor) {
                    Some((_, width)) => {
                        self.cursor += width;
                        self.pc += 1;
                        Ok(())
                    }
                    None => self.fail(code, &[]),
                },
                Opcode::Char => self.match_rune(code, read_u16(program, self.pc + 1) as u32, 3),
                Opcode::Char32 => self.match_rune(code, read_u32(program, self.pc + 1), 5),
                Opcode::Range => {
                    let low = read_u16(program, self.pc + 1) as u32;
                    let high = read_u16(program, self.pc + 3) as u32;
                    self.match_range(code, low, high, 5)
                }
                Opcode::Range32 => {
                    let low = read_u32(program, self.pc + 1);
                    let high = read_u32(program, self.pc + 5);
                    self.match_range(code, low, high, 9)
                }
                Opcode::Set => {
                    let id = read_u16(program, self.pc + 1);
                    match code.value.get(self.cursor) {
                        Some(byte) if bytecode.set(id).test(*byte) => {
                            self.cursor += 1;
                            self.pc += 3;
                            Ok(())
                        }
                        _ => self.fail(code, &bytecode.sexp[id]),
                    }
                }
                Opcode::Span => {
                    let id = read_u16(program, self.pc + 1);
                    let set = bytecode.set(id);
                    while let Some(byte) = code.value.get(self.cursor) {
                        if !set.test(*byte) {
                            break;
                        }
                        self.cursor += 1;
                    }
                    self.pc += 3;
                    Ok(())
                }
                Opcode::Fail => self.fail(code, &[]),
                Opcode::FailTwice => {
                    if let Some(frame) = self.stack.pop() {
                        self.note_popped(&frame);
                    }
                    self.fail(code, &[])
                }
                Opcode::Choice => {
                    let target = read_u16(program, self.pc + 1);
                    self.stack.push_backtrack(target, self.cursor, false);
                    self.pc += 3;
                    Ok(())
                }
                Opcode::ChoicePred => {
                    let target = read_u16(program, self.pc + 1);
                    self.stack.push_backtrack(target, self.cursor, true);
                    self.predicates += 1;
                    self.pc += 3;
                    Ok(())
                }
                Opcode::Commit | Opcode::CapCommit => {
                    let target = read_u16(program, self.pc + 1);
                    if let Some(frame) = self.stack.pop() {
                        self.note_popped(&frame);
                    }
                    self.pc = target;
                    Ok(())
                }
                Opcode::BackCommit => {
                    // The plain variant restores the cursor and discards every
                    // capture made since the frame was pushed.
                    let target = read_u16(program, self.pc + 1);
                    if let Some(frame) = self.stack.pop() {
                        self.note_popped(&frame);
                        if let StackFrame::Backtrack {
                            cursor, nodes_start, ..
                        } = frame
                        {
                            self.cursor = cursor;
                            self.stack.truncate_arena(nodes_start);
                        }
                    }
                    self.pc = target;
                    Ok(())
                }
                Opcode::CapBackCommit => {
                    let target = read_u16(program, self.pc + 1);
                    if let Some(frame) = self.stack.pop() {
                        self.note_popped(&frame);
                        if let StackFrame::Backtrack { cursor, .. } = frame {
                            self.cursor = cursor;
                        }
                    }
                    self.pc = target;
                    Ok(())
                }
                Opcode::PartialCommit => {
                    let target = read_u16(program, self.pc + 1);
                    if let Some(StackFrame::Backtrack { cursor, .. }) = self.stack.top_mut() {
                        *cursor = self.cursor;
                    }
                    self.pc = target;
                    Ok(())
                }
                Opcode::CapPartialCommit => {
                    // Hand the iteration's captures to the enclosing scope and
                    // start the next iteration with a fresh range.
                    let target = read_u16(program, self.pc + 1);
                    let arena = self.stack.arena_len();
                    if let Some(StackFrame::Backtrack {
                        cursor, nodes_start, ..
                    }) = self.stack.top_mut()
                    {
                        *cursor = self.cursor;
                        *nodes_start = arena;
                    }
                    self.pc = target;
                    Ok(())
                }
                Opcode::Call => {
                    let target = read_u16(program, self.pc + 1);
                    debug_assert_eq!(program[self.pc + 3], 0, "precedence is reserved");
                    self.stack.push_call(self.pc + 4);
                    self.pc = target;
                    Ok(())
                }
                Opcode::Return | Opcode::CapReturn => match self.stack.pop() {
                    Some(StackFrame::Call { ret }) => {
                        self.pc = ret;
                        Ok(())
                    }
                    frame => panic!("corrupted bytecode: return over {:?}", frame),
                },
                Opcode::Jump => {
                    self.pc = read_u16(program, self.pc + 1);
                    Ok(())
                }
                Opcode::Throw => {
                    let id = read_u16(program, self.pc + 1);
                    if self.predicates > 0 {
                        // Predicates stay pure: a labeled failure inside one
                        // is only a boolean outcome.
                        self.fail(code, &[])
                    } else {
                        match self.bytecode.recovery_address(id) {
                            Some(recovery) => {
                                self.stack.push_call(self.pc + 3);
                                self.pc = recovery;
                                Ok(())
                            }
                            None => return self.throw_outcome(code, id),
                        }
                    }
                }
                Opcode::CapBegin => {
                    let id = read_u16(program, self.pc + 1);
                    self.stack.push_capture(id, self.cursor);
                    self.open_captures += 1;
                    self.pc += 3;
                    Ok(())
                }
                Opcode::CapEnd => match self.stack.pop() {
                    Some(StackFrame::Capture {
                        id,
                        cursor,
                        nodes_start,
                    }) => {
                        self.open_captures -= 1;
                        self.close_scope(id, cursor, nodes_start);
                        self.pc += 1;
                        Ok(())
                    }
                    frame => panic!("corrupted bytecode: capture end over {:?}", frame),
                },
                Opcode::CapTerm => {
                    let offset = read_u16(program, self.pc + 1);
                    let node = self.tree.push_string(self.cursor - offset, self.cursor);
                    self.emit_node(node);
                    self.pc += 3;
                    Ok(())
                }
                Opcode::CapNonTerm => {
                    let id = read_u16(program, self.pc + 1);
                    let offset = read_u16(program, self.pc + 3);
                    let start = self.cursor - offset;
                    let inner = self.tree.push_string(start, self.cursor);
                    let node = self.tree.push_named(id, inner, start, self.cursor);
                    self.emit_node(node);
                    self.pc += 5;
                    Ok(())
                }
                Opcode::CapTermBeginOffset => {
                    self.cap_offset_id = 0;
                    self.cap_offset_start = self.cursor;
                    self.pc += 1;
                    Ok(())
                }
                Opcode::CapNonTermBeginOffset => {
                    self.cap_offset_id = read_u16(program, self.pc + 1);
                    self.cap_offset_start = self.cursor;
                    self.pc += 3;
                    Ok(())
                }
                Opcode::CapEndOffset => {
                    let start = self.cap_offset_start;
                    let inner = self.tree.push_string(start, self.cursor);
                    let node = if self.cap_offset_id != 0 {
                        self.tree
                            .push_named(self.cap_offset_id, inner, start, self.cursor)
                    } else {
                        inner
                    };
                    self.emit_node(node);
                    self.pc += 1;
                    Ok(())
                }
            };
            if let Err(error) = step {
                return self.failed_outcome(error);
            }
        }
    }

    fn match_rune(&mut self, code: &Code, operand: u32, width: usize) -> Result<(), ParsingError> {
        let wanted = char::from_u32(operand).unwrap_or(char::REPLACEMENT_CHARACTER);
        match code.rune_at(self.cursor) {
            Some((rune, rune_width)) if rune == wanted => {
                self.cursor += rune_width;
                self.pc += width;
                Ok(())
            }
            _ => self.fail(code, &[Expected::Rune(wanted)]),
        }
    }

    fn match_range(
        &mut self,
        code: &Code,
        low: u32,
        high: u32,
        width: usize,
    ) -> Result<(), ParsingError> {
        let low = char::from_u32(low).unwrap_or(char::REPLACEMENT_CHARACTER);
        let high = char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER);
        match code.rune_at(self.cursor) {
            Some((rune, rune_width)) if rune >= low && rune <= high => {
                self.cursor += rune_width;
                self.pc += width;
                Ok(())
            }
            _ => self.fail(code, &[Expected::Range(low, high)]),
        }
    }

    /// Record the failure for diagnostics and unwind to the nearest backtrack
    /// frame, or surface the terminal error when the stack runs out.
    fn fail(&mut self, code: &Code, items: &[Expected]) -> Result<(), ParsingError> {
        if self.cursor > self.ffp {
            self.ffp = self.cursor;
            self.ffp_pc = self.pc;
            self.expected.clear();
        }
        if self.cursor == self.ffp && self.show_fails {
            for item in items {
                if self.expected.len() >= MAX_EXPECTED {
                    break;
                }
                if let Expected::Rune(rune) = item {
                    if rune.is_whitespace() {
                        continue;
                    }
                }
                if !self.expected.contains(item) {
                    self.expected.push(item.clone());
                }
            }
        }
        loop {
            match self.stack.pop() {
                Some(StackFrame::Backtrack {
                    pc,
                    cursor,
                    predicate,
                    nodes_start,
                }) => {
                    if predicate {
                        self.predicates -= 1;
                    }
                    self.stack.truncate_arena(nodes_start);
                    self.pc = pc;
                    self.cursor = cursor;
                    return Ok(());
                }
                Some(StackFrame::Capture { .. }) => self.open_captures -= 1,
                Some(StackFrame::Call { .. }) => {}
                None => return Err(self.failure_error(code)),
            }
        }
    }

    fn note_popped(&mut self, frame: &StackFrame) {
        match frame {
            StackFrame::Backtrack {
                predicate: true, ..
            } => self.predicates -= 1,
            StackFrame::Capture { .. } => self.open_captures -= 1,
            _ => {}
        }
    }

    /// Materialize the tree node of a closed capture scope.
    fn close_scope(&mut self, id: usize, start: usize, nodes_start: usize) {
        let end = self.cursor;
        let kids = self.stack.scope(nodes_start);
        let inner = match kids.len() {
            0 => {
                if end > start {
                    Some(self.tree.push_string(start, end))
                } else {
                    None
                }
            }
            1 => Some(kids[0]),
            _ => Some(self.tree.push_sequence(start, end, kids)),
        };
        self.stack.truncate_arena(nodes_start);

        let result = if self.bytecode.is_error_label(id) {
            // The scope belongs to a recovery rule: wrap whatever it parsed
            // in an error node carrying the label.
            let message = self.label_messages.get(&id).copied().unwrap_or(0);
            Some(self.tree.push_error(id, message, inner, start, end))
        } else {
            match inner {
                None => None,
                Some(node) if id != 0 => Some(self.tree.push_named(id, node, start, end)),
                Some(node) => Some(node),
            }
        };
        if let Some(node) = result {
            self.emit_node(node);
        }
    }

    fn emit_node(&mut self, node: NodeId) {
        if self.open_captures > 0 {
            self.stack.push_node(node);
        } else {
            self.top_nodes.push(node);
        }
    }

    fn take_tree(&mut self, root: Option<NodeId>) -> Tree {
        self.tree.set_root(root);
        std::mem::replace(&mut self.tree, Tree::new(self.strings.clone()))
    }

    fn failed_outcome(&mut self, error: ParsingError) -> MatchOutcome {
        let root = self.top_nodes.last().copied();
        let tree = if root.is_some() {
            Some(self.take_tree(root))
        } else {
            None
        };
        MatchOutcome {
            tree,
            cursor: self.cursor,
            error: Some(error),
        }
    }

    fn throw_outcome(&mut self, code: &Code, id: usize) -> MatchOutcome {
        let label = self.strings[id].clone();
        let mut message = match self.label_messages.get(&id) {
            Some(&message_id) => self.strings[message_id].clone(),
            None => format!("Unexpected input for '{}'.", label),
        };
        write!(
            message,
            "\nFailed to parse at {}.",
            code.obtain_position(self.cursor)
        )
        .unwrap();
        let error = ParsingError::new(label, message, self.cursor, self.ffp.max(self.cursor));
        self.failed_outcome(error)
    }

    fn failure_error(&self, code: &Code) -> ParsingError {
        let found = code.rune_at(self.ffp).map(|(rune, _)| rune);
        let mut message = format_failure(&self.expected, found);
        write!(
            message,
            "\nFailed to parse at {}.",
            code.obtain_position(self.ffp)
        )
        .unwrap();
        ParsingError::new(String::new(), message, self.ffp, self.ffp)
    }

    fn intern_message(&mut self, message: &str) -> usize {
        if let Some(position) = self.strings.iter().position(|known| known == message) {
            return position;
        }
        let strings = Rc::make_mut(&mut self.strings);
        strings.push(message.to_string());
        strings.len() - 1
    }
}

fn read_u16(code: &[u8], at: usize) -> usize {
    code[at] as usize | (code[at + 1] as usize) << 8
}

fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}
