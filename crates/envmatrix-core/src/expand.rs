//! Instance expansion: depth-first walk of the spec tree producing the
//! full set of concrete, fully-inherited instances.
//!
//! Instances live in a flat arena and point at their parent by index, so
//! the ancestor chain can be walked without parent pointers or lifetime
//! gymnastics. Enumeration order is deterministic: children in declaration
//! order, and at each node env combinations outermost, interpreters next,
//! package combinations innermost. The ordinal and fingerprint addressing
//! scheme depends on this order being stable.

use regex::Regex;

use crate::fingerprint::{pip_deps, Fingerprint};
use crate::interpreter::{InterpreterResolver, ResolvedInterpreter};
use crate::spec::SpecNode;

/// The interpreter choice carried by an instance. Resolution failure is
/// recorded, not raised, so callers can filter or report before failing.
#[derive(Debug, Clone)]
pub enum PyBinding {
    Resolved(ResolvedInterpreter),
    Unresolved(String),
}

impl PyBinding {
    pub fn hint(&self) -> &str {
        match self {
            PyBinding::Resolved(py) => py.hint(),
            PyBinding::Unresolved(hint) => hint,
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedInterpreter> {
        match self {
            PyBinding::Resolved(py) => Some(py),
            PyBinding::Unresolved(_) => None,
        }
    }

    /// Canonical string form used for fingerprinting. Depends only on the
    /// hint so fingerprints are stable across hosts.
    pub fn canonical(&self) -> String {
        format!("Interpreter('{}')", self.hint())
    }
}

/// One expanded node. Only *own* values are stored; name, command,
/// interpreter and the merged maps are computed against the ancestor chain.
#[derive(Debug)]
pub struct InstanceNode {
    name: Option<String>,
    command: Option<String>,
    /// `None` means "inherit the nearest ancestor's choice".
    py: Option<PyBinding>,
    env: Vec<(String, String)>,
    pkgs: Vec<(String, Option<String>)>,
    create: bool,
    skip_dev_install: bool,
    parent: Option<usize>,
}

/// Flat arena of expanded instances plus the leaves in enumeration order.
#[derive(Debug, Default)]
pub struct InstanceArena {
    nodes: Vec<InstanceNode>,
    leaves: Vec<usize>,
}

impl InstanceArena {
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaves(&self) -> impl Iterator<Item = Instance<'_>> {
        self.leaves.iter().map(move |&idx| Instance { arena: self, idx })
    }

    /// Leaf by zero-based ordinal in the deterministic enumeration.
    pub fn leaf(&self, ordinal: usize) -> Option<Instance<'_>> {
        self.leaves
            .get(ordinal)
            .map(|&idx| Instance { arena: self, idx })
    }

    fn node(&self, idx: usize) -> &InstanceNode {
        &self.nodes[idx]
    }
}

/// A borrowed view of one instance in the arena.
#[derive(Clone, Copy)]
pub struct Instance<'a> {
    arena: &'a InstanceArena,
    idx: usize,
}

impl<'a> Instance<'a> {
    pub fn parent(&self) -> Option<Instance<'a>> {
        self.arena
            .node(self.idx)
            .parent
            .map(|idx| Instance { arena: self.arena, idx })
    }

    /// Resolved name: own value if set, else the nearest ancestor's.
    pub fn name(&self) -> Option<&'a str> {
        self.chain_rev()
            .find_map(|node| node.name.as_deref())
    }

    /// Resolved command template: own value if set, else the nearest
    /// ancestor's.
    pub fn command(&self) -> Option<&'a str> {
        self.chain_rev().find_map(|node| node.command.as_deref())
    }

    /// Interpreter choice: own if declared at this node, else inherited.
    /// `None` when no ancestor declared one either.
    pub fn binding(&self) -> Option<&'a PyBinding> {
        self.chain_rev().find_map(|node| node.py.as_ref())
    }

    pub fn interpreter(&self) -> Option<&'a ResolvedInterpreter> {
        self.binding().and_then(PyBinding::resolved)
    }

    /// Whether this node is an installation boundary.
    pub fn is_boundary(&self) -> bool {
        self.arena.node(self.idx).create
    }

    pub fn skip_dev_install(&self) -> bool {
        self.arena.node(self.idx).skip_dev_install
    }

    pub fn own_pkgs(&self) -> &'a [(String, Option<String>)] {
        &self.arena.node(self.idx).pkgs
    }

    pub fn own_env(&self) -> &'a [(String, String)] {
        &self.arena.node(self.idx).env
    }

    /// Merged env vars across the ancestor chain, root first; on key
    /// collision the descendant wins while the key keeps its original
    /// position.
    pub fn merged_env(&self) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = Vec::new();
        for idx in self.chain() {
            for (key, value) in &self.arena.node(idx).env {
                upsert(&mut merged, key, value.clone());
            }
        }
        merged
    }

    /// Merged package constraints across the ancestor chain; same override
    /// direction as env vars.
    pub fn merged_pkgs(&self) -> Vec<(String, Option<String>)> {
        let mut merged: Vec<(String, Option<String>)> = Vec::new();
        for idx in self.chain() {
            for (name, version) in &self.arena.node(idx).pkgs {
                upsert(&mut merged, name, version.clone());
            }
        }
        merged
    }

    /// Pip-style install string for the full merged package set.
    pub fn full_pkg_str(&self) -> String {
        pip_deps(&self.merged_pkgs())
    }

    /// Human-friendly `K=V K2=V2` form of the merged env vars.
    pub fn env_str(&self) -> String {
        self.merged_env()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(
            self.name(),
            self.binding().map(PyBinding::canonical).as_deref(),
            &self.full_pkg_str(),
        )
    }

    /// Ancestor chain indices, root first.
    fn chain(&self) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = Some(self.idx);
        while let Some(idx) = current {
            chain.push(idx);
            current = self.arena.node(idx).parent;
        }
        chain.reverse();
        chain
    }

    /// Nodes of the ancestor chain, leaf first.
    fn chain_rev(&self) -> impl Iterator<Item = &'a InstanceNode> {
        let arena = self.arena;
        std::iter::successors(Some(self.idx), move |&idx| arena.node(idx).parent)
            .map(move |idx| arena.node(idx))
    }
}

fn upsert<V>(map: &mut Vec<(String, V)>, key: &str, value: V) {
    match map.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => map.push((key.to_string(), value)),
    }
}

/// Expand a spec tree into the arena of concrete instances.
///
/// Named branches whose resolved name does not match `pattern` are pruned
/// before descending; unnamed intermediate nodes are always descended.
pub fn expand(
    root: &SpecNode,
    pattern: &Regex,
    resolver: &dyn InterpreterResolver,
) -> InstanceArena {
    let mut arena = InstanceArena::default();
    expand_node(root, None, pattern, resolver, &mut arena);
    arena
}

fn expand_node(
    spec: &SpecNode,
    parent: Option<usize>,
    pattern: &Regex,
    resolver: &dyn InterpreterResolver,
    arena: &mut InstanceArena,
) {
    let resolved_name = spec.name.clone().or_else(|| {
        parent.and_then(|idx| Instance { arena: &*arena, idx }.name().map(str::to_string))
    });
    if let Some(name) = resolved_name.as_deref() {
        if !prefix_match(pattern, name) {
            tracing::debug!(name, "skipping venv due to name mismatch");
            return;
        }
    }

    // Interpreter choices declared here, or a single "inherit" slot.
    let py_choices: Vec<Option<PyBinding>> = if spec.pys.is_empty() {
        vec![None]
    } else {
        spec.pys
            .iter()
            .map(|py| Some(resolve_binding(py.hint(), resolver)))
            .collect()
    };

    for env in SpecProduct::new(&spec.env) {
        for py in &py_choices {
            for pkgs in SpecProduct::new(&spec.pkgs) {
                let idx = arena.nodes.len();
                arena.nodes.push(InstanceNode {
                    name: spec.name.clone(),
                    command: spec.command.clone(),
                    py: py.clone(),
                    env: env.clone(),
                    pkgs,
                    create: spec.create,
                    skip_dev_install: spec.skip_dev_install,
                    parent,
                });
                if spec.venvs.is_empty() {
                    arena.leaves.push(idx);
                } else {
                    for child in &spec.venvs {
                        expand_node(child, Some(idx), pattern, resolver, arena);
                    }
                }
            }
        }
    }
}

fn resolve_binding(hint: &str, resolver: &dyn InterpreterResolver) -> PyBinding {
    match resolver.resolve(hint) {
        Ok(py) => PyBinding::Resolved(py),
        Err(_) => {
            tracing::debug!(hint, "failed to resolve interpreter");
            PyBinding::Unresolved(hint.to_string())
        }
    }
}

/// Match anchored at the start of the string (name patterns behave like a
/// prefix match; the venv path filter uses plain search instead).
pub(crate) fn prefix_match(pattern: &Regex, s: &str) -> bool {
    pattern.find(s).is_some_and(|m| m.start() == 0)
}

/// Lazy cartesian product over declaration-ordered value lists:
///
/// `{X: [x0, x1], Y: [y0]}` yields `[(X,x0),(Y,y0)]`, `[(X,x1),(Y,y0)]`.
///
/// The last list cycles fastest. An empty spec yields a single empty
/// assignment; a key with an empty value list yields nothing.
struct SpecProduct<'a, V> {
    lists: &'a [(String, Vec<V>)],
    cursor: Vec<usize>,
    done: bool,
}

impl<'a, V> SpecProduct<'a, V> {
    fn new(lists: &'a [(String, Vec<V>)]) -> Self {
        let done = lists.iter().any(|(_, values)| values.is_empty());
        Self {
            lists,
            cursor: vec![0; lists.len()],
            done,
        }
    }
}

impl<V: Clone> Iterator for SpecProduct<'_, V> {
    type Item = Vec<(String, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self
            .lists
            .iter()
            .zip(&self.cursor)
            .map(|((key, values), &i)| (key.clone(), values[i].clone()))
            .collect();

        // Odometer advance, rightmost digit fastest.
        let mut pos = self.lists.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.cursor[pos] += 1;
            if self.cursor[pos] < self.lists[pos].1.len() {
                break;
            }
            self.cursor[pos] = 0;
        }
        Some(item)
    }
}
