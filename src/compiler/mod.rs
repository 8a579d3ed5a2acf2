//! Translation of a normalized [Grammar] into a symbolic [Program].
//!
//! The compiler is a visitor over the grammar AST. It appends instructions to
//! a growing code vector, allocating zero-sized labels for jump targets and
//! recording unresolved rule references so a backpatch pass can wire them up
//! once every definition has been visited. Along the way it interns strings
//! and character sets, decides between the captured and plain commit variants,
//! and applies the peephole shortcuts: `Span` for charset repetition,
//! `FailTwice` for negative predicates, `PartialCommit` for star loops, call
//! site inlining for small non-recursive rules, and the fixed-size or
//! offset-based capture markers for rules whose capture needs no runtime
//! scope.

use crate::ast::{ClassItem, Definition, Expression, Grammar};
use crate::program::{Instruction, LabelId, Program};
use crate::{CharSet, GrammarError};
use std::collections::{BTreeMap, HashMap, HashSet};

mod inline;


/// Compilation switches.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Wrap every rule body in a capture so the match produces a tree.
    pub captures: bool,
    /// Inline small non-recursive rules at their call sites.
    pub inlining: bool,
    /// Upper bound, in encoded bytes, for a rule to qualify for inlining.
    pub inline_threshold: usize,
}

/// Compile a grammar into its symbolic program form.
///
/// The first definition becomes the entry point. Grammars that still carry
/// import nodes are rejected, as are references to productions that do not
/// exist.
pub fn compile(grammar: &Grammar, config: Config) -> Result<Program, GrammarError> {
    if !grammar.imports.is_empty() {
        return Err(GrammarError::new(
            "compiler".to_string(),
            format!(
                "Grammar carries {} unresolved import(s); imports must be resolved before compilation.",
                grammar.imports.len()
            ),
        ));
    }
    if grammar.definitions.is_empty() {
        return Err(GrammarError::new(
            "compiler".to_string(),
            "Grammar has no definitions.".to_string(),
        ));
    }
    let mut definitions: HashMap<&str, &Definition> = HashMap::new();
    for definition in &grammar.definitions {
        if definitions
            .insert(definition.name.as_str(), definition)
            .is_some()
        {
            return Err(GrammarError::new(
                "compiler".to_string(),
                format!("Production '{}' is defined more than once.", definition.name),
            ));
        }
    }
    let labels_used = collect_labels(grammar);
    let inlinable = if config.inlining {
        inline::inlinable_rules(grammar, &definitions, config, &labels_used)?
    } else {
        HashSet::new()
    };
    Compiler::new(config, &definitions, &inlinable, &labels_used).compile_grammar(grammar)
}

/// Capture strategy chosen for a rule body or an explicit capture.
enum CaptureShape {
    /// Full runtime scope between `CapBegin` and `CapEnd`.
    Scope,
    /// The byte length is a compile time constant; a single trailing marker
    /// carries the offset.
    Fixed(u16),
    /// The expression is purely syntactic but of variable length; the machine
    /// reads the cursor once at the begin marker and once at the end marker.
    Offset,
}

struct Compiler<'g> {
    config: Config,
    definitions: &'g HashMap<&'g str, &'g Definition>,
    inlinable: &'g HashSet<String>,
    labels_used: &'g HashSet<String>,
    code: Vec<Instruction>,
    strings: Vec<String>,
    smap: HashMap<String, usize>,
    sets: Vec<CharSet>,
    labels: usize,
    identifiers: HashMap<usize, usize>,
    definition_labels: HashMap<usize, LabelId>,
    /// Instruction index of each `Call` awaiting a definition, keyed in
    /// emission order.
    open_addrs: BTreeMap<usize, usize>,
    /// Depth of the predicate nesting; captures are never emitted inside a
    /// predicate.
    predicates: usize,
}

impl<'g> Compiler<'g> {
    fn new(
        config: Config,
        definitions: &'g HashMap<&'g str, &'g Definition>,
        inlinable: &'g HashSet<String>,
        labels_used: &'g HashSet<String>,
    ) -> Self {
        let mut smap = HashMap::new();
        smap.insert(String::new(), 0);
        Self {
            config,
            definitions,
            inlinable,
            labels_used,
            code: Vec::new(),
            strings: vec![String::new()],
            smap,
            sets: Vec::new(),
            labels: 0,
            identifiers: HashMap::new(),
            definition_labels: HashMap::new(),
            open_addrs: BTreeMap::new(),
            predicates: 0,
        }
    }

    fn compile_grammar(mut self, grammar: &Grammar) -> Result<Program, GrammarError> {
        let entry = self.intern(&grammar.definitions[0].name);
        self.open_addrs.insert(self.cursor(), entry);
        self.emit(Instruction::Call(LabelId::OPEN, 0));
        self.emit(Instruction::Halt);
        for definition in &grammar.definitions {
            self.compile_definition(definition)?;
        }
        self.backpatch()?;
        let recovery = self.map_recovery();
        Ok(Program {
            code: self.code,
            identifiers: self.identifiers,
            strings: self.strings,
            smap: self.smap,
            sets: self.sets,
            recovery,
            labels: self.labels,
        })
    }

    fn compile_definition(&mut self, definition: &Definition) -> Result<(), GrammarError> {
        let id = self.intern(&definition.name);
        let label = self.make_label();
        self.definition_labels.insert(id, label);
        self.identifiers.insert(self.cursor(), id);
        self.emit(Instruction::Label(label));

        if !self.config.captures {
            self.visit(&definition.expression)?;
            self.emit(Instruction::Return);
            return Ok(());
        }
        // A rule doubling as a recovery expression always closes through the
        // full scope, so error wrapping stays inside the scope handling.
        let recovery = self.labels_used.contains(&definition.name);
        match self.capture_shape(&definition.expression, recovery) {
            CaptureShape::Fixed(offset) => {
                self.visit(&definition.expression)?;
                self.emit(Instruction::CapNonTerm(id, offset));
                self.emit(Instruction::Return);
            }
            CaptureShape::Offset => {
                self.emit(Instruction::CapNonTermBeginOffset(id));
                self.visit(&definition.expression)?;
                self.emit(Instruction::CapEndOffset);
                self.emit(Instruction::Return);
            }
            CaptureShape::Scope => {
                self.emit(Instruction::CapBegin(id));
                self.visit(&definition.expression)?;
                self.emit(Instruction::CapEnd);
                self.emit(Instruction::CapReturn);
            }
        }
        Ok(())
    }

    fn capture_shape(&self, expression: &Expression, recovery: bool) -> CaptureShape {
        if recovery {
            return CaptureShape::Scope;
        }
        match fixed_capture_size(expression) {
            Some(size) if size > 0 && size <= u16::MAX as usize => CaptureShape::Fixed(size as u16),
            _ => {
                if is_syntactic(expression) {
                    CaptureShape::Offset
                } else {
                    CaptureShape::Scope
                }
            }
        }
    }

    fn visit(&mut self, expression: &Expression) -> Result<(), GrammarError> {
        match expression {
            Expression::Sequence(items) => {
                for item in items {
                    self.visit(item)?;
                }
                Ok(())
            }
            Expression::Choice(left, right) => {
                let alternative = self.make_label();
                let done = self.make_label();
                self.emit(Instruction::Choice(alternative));
                self.visit(left)?;
                self.emit_commit(done);
                self.emit(Instruction::Label(alternative));
                self.visit(right)?;
                self.emit(Instruction::Label(done));
                Ok(())
            }
            Expression::Optional(inner) => {
                let done = self.make_label();
                self.emit(Instruction::Choice(done));
                self.visit(inner)?;
                self.emit_commit(done);
                self.emit(Instruction::Label(done));
                Ok(())
            }
            Expression::ZeroOrMore(inner) => self.visit_star(inner),
            Expression::OneOrMore(inner) => {
                self.visit(inner)?;
                self.visit_star(inner)
            }
            Expression::And(inner) => {
                let on_fail = self.make_label();
                let done = self.make_label();
                self.emit(Instruction::ChoicePred(on_fail));
                self.predicates += 1;
                self.visit(inner)?;
                self.predicates -= 1;
                self.emit(Instruction::BackCommit(done));
                self.emit(Instruction::Label(on_fail));
                self.emit(Instruction::Fail);
                self.emit(Instruction::Label(done));
                Ok(())
            }
            Expression::Not(inner) => {
                let done = self.make_label();
                self.emit(Instruction::ChoicePred(done));
                self.predicates += 1;
                self.visit(inner)?;
                self.predicates -= 1;
                self.emit(Instruction::FailTwice);
                self.emit(Instruction::Label(done));
                Ok(())
            }
            Expression::Lex(inner) => self.visit(inner),
            Expression::Labeled(inner, label) => {
                let on_fail = self.make_label();
                let done = self.make_label();
                let id = self.intern(label);
                self.emit(Instruction::Choice(on_fail));
                self.visit(inner)?;
                self.emit_commit(done);
                self.emit(Instruction::Label(on_fail));
                self.emit(Instruction::Throw(id));
                self.emit(Instruction::Label(done));
                Ok(())
            }
            Expression::Capture(name, inner) => self.visit_capture(name, inner),
            Expression::Identifier(name) => self.visit_identifier(name),
            Expression::Literal(value) => {
                for c in value.chars() {
                    self.emit(Instruction::Char(c));
                }
                Ok(())
            }
            Expression::Class(items) => self.visit_class(items),
            Expression::Range(low, high) => {
                self.emit(Instruction::Range(*low, *high));
                Ok(())
            }
            Expression::Charset(set) => {
                let id = self.intern_set(*set);
                self.emit(Instruction::Set(id));
                Ok(())
            }
            Expression::Any => {
                self.emit(Instruction::Any);
                Ok(())
            }
        }
    }

    fn visit_star(&mut self, inner: &Expression) -> Result<(), GrammarError> {
        if let Some(set) = as_charset(inner) {
            let id = self.intern_set(set);
            self.emit(Instruction::Span(id));
            return Ok(());
        }
        let body = self.make_label();
        let done = self.make_label();
        self.emit(Instruction::Choice(done));
        self.emit(Instruction::Label(body));
        self.visit(inner)?;
        self.emit_partial_commit(body);
        self.emit(Instruction::Label(done));
        Ok(())
    }

    fn visit_capture(&mut self, name: &str, inner: &Expression) -> Result<(), GrammarError> {
        if !self.captures_active() {
            return self.visit(inner);
        }
        let id = self.intern(name);
        match self.capture_shape(inner, false) {
            CaptureShape::Fixed(offset) => {
                self.visit(inner)?;
                self.emit(if id == 0 {
                    Instruction::CapTerm(offset)
                } else {
                    Instruction::CapNonTerm(id, offset)
                });
            }
            CaptureShape::Offset => {
                self.emit(if id == 0 {
                    Instruction::CapTermBeginOffset
                } else {
                    Instruction::CapNonTermBeginOffset(id)
                });
                self.visit(inner)?;
                self.emit(Instruction::CapEndOffset);
            }
            CaptureShape::Scope => {
                self.emit(Instruction::CapBegin(id));
                self.visit(inner)?;
                self.emit(Instruction::CapEnd);
            }
        }
        Ok(())
    }

    fn visit_identifier(&mut self, name: &str) -> Result<(), GrammarError> {
        if self.inlinable.contains(name) {
            if let Some(definition) = self.definitions.get(name) {
                // Inlinable rules are never recursive, so this terminates.
                return self.visit(&definition.expression);
            }
        }
        let id = self.intern(name);
        match self.definition_labels.get(&id) {
            Some(&label) => self.emit(Instruction::Call(label, 0)),
            None => {
                self.open_addrs.insert(self.cursor(), id);
                self.emit(Instruction::Call(LabelId::OPEN, 0));
            }
        }
        Ok(())
    }

    fn visit_class(&mut self, items: &[ClassItem]) -> Result<(), GrammarError> {
        if items.is_empty() {
            self.emit(Instruction::Fail);
            return Ok(());
        }
        if let Some(set) = coalesce(items) {
            let id = self.intern_set(set);
            self.emit(Instruction::Set(id));
            return Ok(());
        }
        self.visit_class_alternatives(items)
    }

    fn visit_class_alternatives(&mut self, items: &[ClassItem]) -> Result<(), GrammarError> {
        if items.len() == 1 {
            self.emit_class_item(&items[0]);
            return Ok(());
        }
        let alternative = self.make_label();
        let done = self.make_label();
        self.emit(Instruction::Choice(alternative));
        self.emit_class_item(&items[0]);
        self.emit_commit(done);
        self.emit(Instruction::Label(alternative));
        self.visit_class_alternatives(&items[1..])?;
        self.emit(Instruction::Label(done));
        Ok(())
    }

    fn emit_class_item(&mut self, item: &ClassItem) {
        match item {
            ClassItem::Rune(c) => self.emit(Instruction::Char(*c)),
            ClassItem::Range(low, high) => self.emit(Instruction::Range(*low, *high)),
        }
    }

    fn emit_commit(&mut self, target: LabelId) {
        self.emit(if self.captures_active() {
            Instruction::CapCommit(target)
        } else {
            Instruction::Commit(target)
        });
    }

    fn emit_partial_commit(&mut self, target: LabelId) {
        self.emit(if self.captures_active() {
            Instruction::CapPartialCommit(target)
        } else {
            Instruction::PartialCommit(target)
        });
    }

    fn backpatch(&mut self) -> Result<(), GrammarError> {
        let patches: Vec<(usize, usize)> =
            self.open_addrs.iter().map(|(&at, &id)| (at, id)).collect();
        for (at, id) in patches {
            match self.definition_labels.get(&id) {
                Some(&label) => self.code[at] = Instruction::Call(label, 0),
                None => {
                    return Err(GrammarError::new(
                        "compiler".to_string(),
                        format!("Production '{}' does not exist.", self.strings[id]),
                    ));
                }
            }
        }
        Ok(())
    }

    fn map_recovery(&self) -> HashMap<usize, LabelId> {
        let mut recovery = HashMap::new();
        for label in self.labels_used {
            if let Some(&id) = self.smap.get(label) {
                if let Some(&entry) = self.definition_labels.get(&id) {
                    recovery.insert(id, entry);
                }
            }
        }
        recovery
    }

    fn captures_active(&self) -> bool {
        self.config.captures && self.predicates == 0
    }

    fn intern(&mut self, value: &str) -> usize {
        if let Some(&id) = self.smap.get(value) {
            return id;
        }
        let id = self.strings.len();
        self.strings.push(value.to_string());
        self.smap.insert(value.to_string(), id);
        id
    }

    fn intern_set(&mut self, set: CharSet) -> usize {
        match self.sets.iter().position(|known| *known == set) {
            Some(id) => id,
            None => {
                self.sets.push(set);
                self.sets.len() - 1
            }
        }
    }

    fn make_label(&mut self) -> LabelId {
        let label = LabelId(self.labels);
        self.labels += 1;
        label
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn cursor(&self) -> usize {
        self.code.len()
    }
}

/// Byte length of the capture, when it is a compile time constant.
///
/// Only purely syntactic shapes qualify; a range counts as one byte only when
/// it cannot match outside ASCII.
fn fixed_capture_size(expression: &Expression) -> Option<usize> {
    match expression {
        Expression::Charset(_) => Some(1),
        Expression::Literal(value) => Some(value.len()),
        Expression::Range(_, high) => {
            if (*high as u32) <= 0x7F {
                Some(1)
            } else {
                None
            }
        }
        Expression::Class(items) => {
            let mut size: Option<usize> = None;
            for item in items {
                let item_size = match item {
                    ClassItem::Rune(c) => c.len_utf8(),
                    ClassItem::Range(_, high) => {
                        if (*high as u32) <= 0x7F {
                            1
                        } else {
                            return None;
                        }
                    }
                };
                match size {
                    None => size = Some(item_size),
                    Some(known) if known == item_size => {}
                    _ => return None,
                }
            }
            size
        }
        Expression::Sequence(items) => {
            let mut total = 0;
            for item in items {
                total += fixed_capture_size(item)?;
            }
            Some(total)
        }
        _ => None,
    }
}

/// Whether an expression matches input without producing captures, throwing
/// labels or calling other rules.
fn is_syntactic(expression: &Expression) -> bool {
    match expression {
        Expression::Literal(_)
        | Expression::Class(_)
        | Expression::Range(_, _)
        | Expression::Charset(_)
        | Expression::Any => true,
        Expression::Sequence(items) => items.iter().all(is_syntactic),
        Expression::Choice(left, right) => is_syntactic(left) && is_syntactic(right),
        Expression::Optional(inner)
        | Expression::ZeroOrMore(inner)
        | Expression::OneOrMore(inner)
        | Expression::And(inner)
        | Expression::Not(inner)
        | Expression::Lex(inner) => is_syntactic(inner),
        Expression::Labeled(_, _) | Expression::Capture(_, _) | Expression::Identifier(_) => false,
    }
}

/// A class of plain ASCII characters coalesces into one charset.
fn coalesce(items: &[ClassItem]) -> Option<CharSet> {
    let mut set = CharSet::new();
    for item in items {
        match item {
            ClassItem::Rune(c) if c.is_ascii() => set.add(*c as u8),
            _ => return None,
        }
    }
    Some(set)
}

fn as_charset(expression: &Expression) -> Option<CharSet> {
    match expression {
        Expression::Charset(set) => Some(*set),
        Expression::Class(items) if !items.is_empty() => coalesce(items),
        _ => None,
    }
}

/// All label names thrown anywhere in the grammar.
fn collect_labels(grammar: &Grammar) -> HashSet<String> {
    let mut labels = HashSet::new();
    for definition in &grammar.definitions {
        collect_expression_labels(&definition.expression, &mut labels);
    }
    labels
}

fn collect_expression_labels(expression: &Expression, labels: &mut HashSet<String>) {
    match expression {
        Expression::Labeled(inner, label) => {
            labels.insert(label.clone());
            collect_expression_labels(inner, labels);
        }
        Expression::Sequence(items) => {
            for item in items {
                collect_expression_labels(item, labels);
            }
        }
        Expression::Choice(left, right) => {
            collect_expression_labels(left, labels);
            collect_expression_labels(right, labels);
        }
        Expression::Optional(inner)
        | Expression::ZeroOrMore(inner)
        | Expression::OneOrMore(inner)
        | Expression::And(inner)
        | Expression::Not(inner)
        | Expression::Lex(inner)
        | Expression::Capture(_, inner) => collect_expression_labels(inner, labels),
        _ => {}
    }
}
