use crate::compiler::{compile, Config};
use crate::encoder::encode;
use crate::tree::Tree;
use crate::vm::VirtualMachine;
use crate::{ast::Grammar, bytecode::Bytecode, GrammarError, Log, ParsingError, PegParser};
use once_cell::unsync::OnceCell;
use std::rc::Rc;

impl PegParser {
    /// Compile and encode a grammar with the default [Config].
    pub fn new(grammar: Grammar) -> Result<Self, GrammarError> {
        Self::with_config(grammar, Config::default())
    }

    pub fn with_config(grammar: Grammar, config: Config) -> Result<Self, GrammarError> {
        let program = compile(&grammar, config)?;
        let bytecode = Rc::new(encode(&program)?);
        let entry = match bytecode.rule_address(&grammar.definitions[0].name) {
            Some(address) => address,
            None => {
                return Err(GrammarError::new(
                    "parser".to_string(),
                    "Entry production has no bytecode address.".to_string(),
                ));
            }
        };
        let machine = VirtualMachine::new(bytecode.clone());
        Ok(Self {
            grammar,
            bytecode,
            machine,
            entry,
            grammar_text: OnceCell::new(),
        })
    }

    pub fn bytecode(&self) -> &Rc<Bytecode> {
        &self.bytecode
    }

    /// The grammar rendered back into PEG notation.
    pub fn grammar(&self) -> &str {
        self.grammar_text
            .get_or_init(|| format!("{}", self.grammar))
    }

    pub fn set_label_messages(&mut self, messages: &[(&str, &str)]) -> Result<(), String> {
        self.machine.set_label_messages(messages)
    }

    pub fn set_show_fails(&mut self, show_fails: bool) {
        self.machine.set_show_fails(show_fails);
    }

    /// Set a log label to trace the parsing machine based on the level of
    /// [Log].
    pub fn set_log(&mut self, debugger: Log<&'static str>) {
        self.machine.set_log(debugger);
    }

    /// Parse an input with the entry production, surfacing the first
    /// diagnostic as an error.
    ///
    /// Failures recovered through error labels do not abort the match; use
    /// [parse_with_diagnostics](PegParser::parse_with_diagnostics) to observe
    /// them.
    pub fn parse(&mut self, text: &[u8]) -> Result<Tree, ParsingError> {
        let code = crate::Code::new(text);
        let outcome = self.machine.match_input(&code, self.entry);
        match outcome.error {
            Some(error) => Err(error),
            None => match outcome.tree {
                Some(tree) => Ok(tree),
                None => Err(ParsingError::new(
                    String::new(),
                    "Match produced no tree.".to_string(),
                    0,
                    0,
                )),
            },
        }
    }

    /// Parse an input, returning the (possibly partial) tree together with
    /// every diagnostic collected along the way: one entry per recovered
    /// error node, plus the terminal error when the match aborted.
    pub fn parse_with_diagnostics(&mut self, text: &[u8]) -> (Option<Tree>, Vec<ParsingError>) {
        let code = crate::Code::new(text);
        let outcome = self.machine.match_input(&code, self.entry);
        let mut diagnostics = Vec::new();
        if let Some(tree) = &outcome.tree {
            diagnostics.extend(tree.diagnostics());
        }
        if let Some(error) = outcome.error {
            diagnostics.push(error);
        }
        (outcome.tree, diagnostics)
    }

    /// Parse an input starting from a specific production instead of the
    /// entry point.
    pub fn parse_production(&mut self, id: &str, text: &[u8]) -> Result<Tree, ParsingError> {
        let address = match self.bytecode.rule_address(id) {
            Some(address) => address,
            None => {
                return Err(ParsingError::new(
                    String::new(),
                    format!("Production {} is not part of the grammar.", id),
                    0,
                    0,
                ));
            }
        };
        let code = crate::Code::new(text);
        let outcome = self.machine.match_input(&code, address);
        match outcome.error {
            Some(error) => Err(error),
            None => match outcome.tree {
                Some(tree) => Ok(tree),
                None => Err(ParsingError::new(
                    String::new(),
                    "Match produced no tree.".to_string(),
                    0,
                    0,
                )),
            },
        }
    }
}
