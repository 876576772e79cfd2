//! Instrument dependency graph.
//!
//! Nodes live in a `Vec` and point at their inputs by index. A node is one of:
//! a declared base symbol, a generated instrument with a spec, or a pending
//! symbol that has only been seen as somebody's input so far. Pending symbols
//! are fetched like base symbols until they receive a spec of their own.

pub mod combine;
pub mod spec;

pub use combine::{Combiner, InputRow, Ratio, Spread, Weighted};
pub use spec::{InstrumentInput, InstrumentKind, InstrumentSpec};

use crate::error::{EngineError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};

const KEY_SEPARATOR: char = '~';
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone)]
enum NodeKind {
    Base,
    Pending,
    Generated(Box<InstrumentSpec>),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    kind: NodeKind,
    inputs: Vec<usize>,
}

/// One step of a materialization plan, inputs before dependents.
#[derive(Debug, Clone, Copy)]
pub enum PlanStep<'a> {
    Fetch(&'a str),
    Generate(&'a InstrumentSpec),
}

impl PlanStep<'_> {
    pub fn symbol(&self) -> &str {
        match self {
            PlanStep::Fetch(symbol) => symbol,
            PlanStep::Generate(spec) => &spec.name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl InstrumentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Mark `symbol` as fetched from a source.
    pub fn declare_base(&mut self, symbol: &str) -> Result<()> {
        match self.index.get(symbol) {
            Some(&id) => match self.nodes[id].kind {
                NodeKind::Generated(_) => Err(EngineError::DuplicateName(symbol.to_string())),
                _ => {
                    self.nodes[id].kind = NodeKind::Base;
                    Ok(())
                }
            },
            None => {
                self.push_node(symbol, NodeKind::Base);
                Ok(())
            }
        }
    }

    /// Add a new generated instrument.
    pub fn register(&mut self, spec: InstrumentSpec) -> Result<()> {
        spec.validate()?;
        self.check_acyclic(&spec)?;
        if let Some(&id) = self.index.get(&spec.name) {
            if !matches!(self.nodes[id].kind, NodeKind::Pending) {
                return Err(EngineError::DuplicateName(spec.name));
            }
        }
        self.attach(spec);
        Ok(())
    }

    /// Swap the spec of an already generated instrument.
    pub fn replace(&mut self, spec: InstrumentSpec) -> Result<()> {
        spec.validate()?;
        if !self.is_generated(&spec.name) {
            return Err(EngineError::UnknownInstrument(spec.name));
        }
        self.check_acyclic(&spec)?;
        self.attach(spec);
        Ok(())
    }

    pub fn spec(&self, name: &str) -> Option<&InstrumentSpec> {
        let id = *self.index.get(name)?;
        match &self.nodes[id].kind {
            NodeKind::Generated(spec) => Some(spec.as_ref()),
            _ => None,
        }
    }

    pub fn is_generated(&self, name: &str) -> bool {
        self.spec(name).is_some()
    }

    /// Generated instrument names in registration order.
    pub fn generated_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Generated(_)))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Every symbol the graph knows that is fetched rather than generated.
    pub fn base_symbols(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.kind, NodeKind::Generated(_)))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Transitive inputs of `name` in dependency order, ending with `name`.
    pub fn plan<'a>(&'a self, name: &'a str) -> Vec<PlanStep<'a>> {
        let Some(&root) = self.index.get(name) else {
            return vec![PlanStep::Fetch(name)];
        };
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        self.post_order(root, &mut seen, &mut order);
        order
            .into_iter()
            .map(|id| {
                let node = &self.nodes[id];
                match &node.kind {
                    NodeKind::Generated(spec) => PlanStep::Generate(spec),
                    _ => PlanStep::Fetch(&node.name),
                }
            })
            .collect()
    }

    /// Fetched leaves beneath `name`. A base symbol is its own leaf.
    pub fn base_inputs(&self, name: &str) -> BTreeSet<String> {
        self.plan(name)
            .into_iter()
            .filter_map(|step| match step {
                PlanStep::Fetch(symbol) => Some(symbol.to_string()),
                PlanStep::Generate(_) => None,
            })
            .collect()
    }

    /// Store key for `name`.
    ///
    /// Fetched symbols are stored under their own name. A generated instrument
    /// is stored under `name~<fingerprint>`, the fingerprint covering its kind,
    /// combiner and inputs, including the store keys of generated inputs. Rows
    /// written under one definition are never served for another.
    pub fn storage_key(&self, name: &str) -> String {
        match self.spec(name) {
            Some(spec) => format!("{name}{KEY_SEPARATOR}{}", self.fingerprint(spec)),
            None => name.to_string(),
        }
    }

    fn fingerprint(&self, spec: &InstrumentSpec) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(spec.kind.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(spec.combiner().name().as_bytes());
        for input in &spec.inputs {
            hasher.update(&[0]);
            hasher.update(self.storage_key(&input.symbol).as_bytes());
            hasher.update(&[0]);
            hasher.update(&input.weight.to_bits().to_le_bytes());
            if let Some(interval) = input.interval {
                hasher.update(interval.as_str().as_bytes());
            }
        }
        let hex = hasher.finalize().to_hex();
        hex.as_str()[..FINGERPRINT_LEN].to_string()
    }

    fn post_order(&self, id: usize, seen: &mut HashSet<usize>, out: &mut Vec<usize>) {
        if !seen.insert(id) {
            return;
        }
        for &input in &self.nodes[id].inputs {
            self.post_order(input, seen, out);
        }
        out.push(id);
    }

    fn push_node(&mut self, name: &str, kind: NodeKind) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            inputs: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    fn node_id(&mut self, name: &str) -> usize {
        match self.index.get(name) {
            Some(&id) => id,
            None => self.push_node(name, NodeKind::Pending),
        }
    }

    fn attach(&mut self, spec: InstrumentSpec) {
        let id = self.node_id(&spec.name);
        let inputs = spec.inputs.iter().map(|i| self.node_id(&i.symbol)).collect();
        let node = &mut self.nodes[id];
        node.inputs = inputs;
        node.kind = NodeKind::Generated(Box::new(spec));
    }

    /// Would `spec.name -> inputs` close a loop through existing edges?
    fn check_acyclic(&self, spec: &InstrumentSpec) -> Result<()> {
        match self.find_cycle(&spec.name, spec.inputs.iter().map(|i| i.symbol.as_str())) {
            Some(path) => Err(EngineError::CyclicDependency {
                name: spec.name.clone(),
                path,
            }),
            None => Ok(()),
        }
    }

    fn find_cycle<'a>(
        &self,
        name: &str,
        inputs: impl Iterator<Item = &'a str>,
    ) -> Option<Vec<String>> {
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut visited: HashSet<usize> = HashSet::new();

        for input in inputs {
            if input == name {
                return Some(vec![name.to_string(), name.to_string()]);
            }
            let Some(&start) = self.index.get(input) else {
                continue;
            };
            if !visited.insert(start) {
                continue;
            }

            let mut stack = vec![start];
            while let Some(id) = stack.pop() {
                for &child in &self.nodes[id].inputs {
                    if self.nodes[child].name == name {
                        return Some(self.cycle_path(name, id, &parent));
                    }
                    if visited.insert(child) {
                        parent.insert(child, id);
                        stack.push(child);
                    }
                }
            }
        }
        None
    }

    fn cycle_path(&self, name: &str, last: usize, parent: &HashMap<usize, usize>) -> Vec<String> {
        let mut chain = vec![last];
        let mut cursor = last;
        while let Some(&p) = parent.get(&cursor) {
            chain.push(p);
            cursor = p;
        }

        let mut path = Vec::with_capacity(chain.len() + 2);
        path.push(name.to_string());
        path.extend(chain.iter().rev().map(|&id| self.nodes[id].name.clone()));
        path.push(name.to_string());
        path
    }
}
