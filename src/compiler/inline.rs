//! Call site inlining analysis.
//!
//! A rule qualifies for inlining when it is not the entry point, is not the
//! target of an error label (recovery dispatch jumps to the rule's address),
//! is not recursive, and its compiled body stays under the configured size.
//! Recursion is detected through the strongly connected components of the
//! call graph; neighbours are visited in sorted order so the analysis is
//! deterministic. Sizes are measured by a dry-run compilation into a
//! throwaway compiler state, walking rules callees-first so that a rule's
//! measurement already accounts for the rules inlined into it.

use super::{Compiler, Config};
use crate::ast::{Definition, Expression, Grammar};
use crate::GrammarError;
use std::collections::{HashMap, HashSet};

pub(super) fn inlinable_rules(
    grammar: &Grammar,
    definitions: &HashMap<&str, &Definition>,
    config: Config,
    labels_used: &HashSet<String>,
) -> Result<HashSet<String>, GrammarError> {
    let names: Vec<&str> = grammar
        .definitions
        .iter()
        .map(|definition| definition.name.as_str())
        .collect();
    let index_of: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(index, name)| (*name, index))
        .collect();

    // Call graph over definition indices, neighbours sorted by name.
    let mut graph: Vec<Vec<usize>> = Vec::with_capacity(names.len());
    for definition in &grammar.definitions {
        let mut called: Vec<&str> = Vec::new();
        collect_identifiers(&definition.expression, &mut called);
        called.sort_unstable();
        called.dedup();
        graph.push(
            called
                .iter()
                .filter_map(|name| index_of.get(name).copied())
                .collect(),
        );
    }

    let components = strongly_connected(&graph);
    let mut recursive: HashSet<usize> = HashSet::new();
    for component in &components {
        if component.len() > 1 {
            recursive.extend(component.iter().copied());
        } else if graph[component[0]].contains(&component[0]) {
            recursive.insert(component[0]);
        }
    }

    // Components come out callees-first, so by the time a rule is measured
    // every rule it can inline has already been decided.
    let entry = names[0];
    let mut inlinable: HashSet<String> = HashSet::new();
    for component in &components {
        for &rule in component {
            let name = names[rule];
            if name == entry || recursive.contains(&rule) || labels_used.contains(name) {
                continue;
            }
            let mut probe = Compiler::new(config, definitions, &inlinable, labels_used);
            probe.visit(&grammar.definitions[rule].expression)?;
            let size: usize = probe
                .code
                .iter()
                .map(|instruction| instruction.encoded_size())
                .sum();
            if size <= config.inline_threshold {
                inlinable.insert(name.to_string());
            }
        }
    }
    Ok(inlinable)
}

/// Tarjan's algorithm; components are produced in reverse topological order
/// of the condensation, so every component precedes its callers.
fn strongly_connected(graph: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'g> {
        graph: &'g [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    fn connect(state: &mut State, v: usize) {
        state.index[v] = Some(state.next);
        state.low[v] = state.next;
        state.next += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for &w in &state.graph[v] {
            match state.index[w] {
                None => {
                    connect(state, w);
                    state.low[v] = state.low[v].min(state.low[w]);
                }
                Some(index) if state.on_stack[w] => {
                    state.low[v] = state.low[v].min(index);
                }
                _ => {}
            }
        }

        if state.index[v] == Some(state.low[v]) {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop().unwrap();
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            state.components.push(component);
        }
    }

    let mut state = State {
        graph,
        index: vec![None; graph.len()],
        low: vec![0; graph.len()],
        on_stack: vec![false; graph.len()],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for v in 0..graph.len() {
        if state.index[v].is_none() {
            connect(&mut state, v);
        }
    }
    state.components
}

fn collect_identifiers<'e>(expression: &'e Expression, found: &mut Vec<&'e str>) {
    match expression {
        Expression::Identifier(name) => found.push(name),
        Expression::Sequence(items) => {
            for item in items {
                collect_identifiers(item, found);
            }
        }
        Expression::Choice(left, right) => {
            collect_identifiers(left, found);
            collect_identifiers(right, found);
        }
        Expression::Optional(inner)
        | Expression::ZeroOrMore(inner)
        | Expression::OneOrMore(inner)
        | Expression::And(inner)
        | Expression::Not(inner)
        | Expression::Lex(inner)
        | Expression::Labeled(inner, _)
        | Expression::Capture(_, inner) => collect_identifiers(inner, found),
        _ => {}
    }
}
