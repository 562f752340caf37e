//! Shared, read-only constraint tables for GP trees.
//!
//! A [`GpContext`] owns the type system, the node signatures, the function
//! and terminal definitions, the function sets and the tree constraints. It
//! is built once per experiment and shared by reference (usually `Arc`) with
//! every operator on every thread.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{BreedError, BreedResult};
use crate::gp::types::{GpType, TypeSystem};

/// Index of a function or terminal definition in its [`GpContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncId(pub u16);

impl FuncId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node type signature: return type plus one type per child slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConstraints {
    /// Name of the definition this signature belongs to.
    pub name: String,
    /// Type the node produces.
    pub return_type: GpType,
    /// Required type per child slot; its length is the arity.
    pub child_types: Vec<GpType>,
}

impl NodeConstraints {
    #[inline]
    #[must_use]
    pub fn arity(&self) -> usize {
        self.child_types.len()
    }
}

/// What a definition produces when instantiated as a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A nonterminal with one or more children.
    Function,
    /// A leaf with no value of its own.
    Terminal,
    /// An ephemeral random constant sampled uniformly from `[min, max)`.
    Erc { min: f64, max: f64 },
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// Symbol used in Lisp text and by name lookups.
    pub name: String,
    /// Function, plain terminal or ERC.
    pub kind: NodeKind,
    /// Index into the context's signature table.
    signature: usize,
}

/// The functions and terminals one tree may be built from, indexed by
/// compatible return type and by arity.
#[derive(Debug, Clone)]
pub struct FunctionSet {
    /// Set name referenced by tree constraints.
    pub name: String,
    /// Every definition in the set, in declaration order.
    pub members: Vec<FuncId>,
    /// Indexed by [`GpType::index`].
    terminals: Vec<Vec<FuncId>>,
    nonterminals: Vec<Vec<FuncId>>,
    /// Indexed by arity.
    by_arity: Vec<Vec<FuncId>>,
}

impl FunctionSet {
    /// Terminals whose return type is compatible with `ty`.
    #[must_use]
    pub fn terminals(&self, ty: GpType) -> &[FuncId] {
        &self.terminals[ty.index()]
    }

    /// Nonterminals whose return type is compatible with `ty`.
    #[must_use]
    pub fn nonterminals(&self, ty: GpType) -> &[FuncId] {
        &self.nonterminals[ty.index()]
    }

    /// All members with exactly `arity` children, regardless of type.
    #[must_use]
    pub fn by_arity(&self, arity: usize) -> &[FuncId] {
        self.by_arity.get(arity).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct TreeConstraints {
    /// Tree name, e.g. `main` or an ADF.
    pub name: String,
    /// Type the root must return.
    pub return_type: GpType,
    /// Index of the function set the tree draws nodes from.
    pub function_set: usize,
}

#[derive(Debug, Clone)]
pub struct GpContext {
    /// Atomic and set types every signature refers to.
    pub types: TypeSystem,
    signatures: Vec<NodeConstraints>,
    functions: Vec<FunctionDef>,
    function_sets: Vec<FunctionSet>,
    /// One entry per tree an individual carries.
    trees: Vec<TreeConstraints>,
}

impl GpContext {
    #[inline]
    #[must_use]
    pub fn function(&self, f: FuncId) -> &FunctionDef {
        &self.functions[f.index()]
    }

    #[inline]
    #[must_use]
    pub fn signature(&self, f: FuncId) -> &NodeConstraints {
        &self.signatures[self.functions[f.index()].signature]
    }

    #[inline]
    #[must_use]
    pub fn return_type(&self, f: FuncId) -> GpType {
        self.signature(f).return_type
    }

    #[inline]
    #[must_use]
    pub fn arity(&self, f: FuncId) -> usize {
        self.signature(f).arity()
    }

    #[inline]
    #[must_use]
    pub fn is_erc(&self, f: FuncId) -> bool {
        matches!(self.function(f).kind, NodeKind::Erc { .. })
    }

    #[must_use]
    pub fn lookup_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|d| d.name == name)
            .and_then(|i| u16::try_from(i).ok())
            .map(FuncId)
    }

    #[must_use]
    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn signatures(&self) -> &[NodeConstraints] {
        &self.signatures
    }

    #[must_use]
    pub fn tree_constraints(&self, idx: usize) -> &TreeConstraints {
        &self.trees[idx]
    }

    #[must_use]
    pub fn num_tree_constraints(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn lookup_tree_constraints(&self, name: &str) -> Option<usize> {
        self.trees.iter().position(|t| t.name == name)
    }

    /// The function set used by trees with constraints `idx`.
    #[must_use]
    pub fn tree_function_set(&self, idx: usize) -> &FunctionSet {
        &self.function_sets[self.trees[idx].function_set]
    }

    /// Draw a fresh value for `f`; zero for anything but an ERC.
    pub fn sample_erc<R: Rng + ?Sized>(&self, f: FuncId, rng: &mut R) -> f64 {
        match self.function(f).kind {
            NodeKind::Erc { min, max } if max > min => min + rng.random::<f64>() * (max - min),
            NodeKind::Erc { min, .. } => min,
            _ => 0.0,
        }
    }
}

struct PendingNode {
    name: String,
    kind: NodeKind,
    return_type: String,
    child_types: Vec<String>,
}

/// Incremental construction of a [`GpContext`]. Names are resolved and the
/// whole table validated in [`build`](Self::build).
#[derive(Default)]
pub struct GpContextBuilder {
    atomics: Vec<String>,
    sets: Vec<(String, Vec<String>)>,
    nodes: Vec<PendingNode>,
    function_sets: Vec<(String, Vec<String>)>,
    trees: Vec<(String, String, String)>,
}

impl GpContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder for a single-type system; the type is called `nil`.
    #[must_use]
    pub fn typeless() -> Self {
        Self::new().atomic("nil")
    }

    #[must_use]
    pub fn atomic(mut self, name: &str) -> Self {
        self.atomics.push(name.to_string());
        self
    }

    #[must_use]
    pub fn set(mut self, name: &str, members: &[&str]) -> Self {
        self.sets
            .push((name.to_string(), members.iter().map(|m| m.to_string()).collect()));
        self
    }

    /// A typed node definition.
    #[must_use]
    pub fn node(mut self, name: &str, kind: NodeKind, return_type: &str, child_types: &[&str]) -> Self {
        self.nodes.push(PendingNode {
            name: name.to_string(),
            kind,
            return_type: return_type.to_string(),
            child_types: child_types.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Typeless nonterminal of the given arity.
    #[must_use]
    pub fn function(self, name: &str, arity: usize) -> Self {
        let children = vec!["nil"; arity];
        self.node(name, NodeKind::Function, "nil", &children)
    }

    /// Typeless terminal.
    #[must_use]
    pub fn terminal(self, name: &str) -> Self {
        self.node(name, NodeKind::Terminal, "nil", &[])
    }

    /// Typeless ephemeral random constant.
    #[must_use]
    pub fn erc(self, name: &str, min: f64, max: f64) -> Self {
        self.node(name, NodeKind::Erc { min, max }, "nil", &[])
    }

    #[must_use]
    pub fn function_set(mut self, name: &str, members: &[&str]) -> Self {
        self.function_sets
            .push((name.to_string(), members.iter().map(|m| m.to_string()).collect()));
        self
    }

    #[must_use]
    pub fn tree(mut self, name: &str, return_type: &str, function_set: &str) -> Self {
        self.trees
            .push((name.to_string(), return_type.to_string(), function_set.to_string()));
        self
    }

    /// Resolve names and validate the tables.
    ///
    /// When no function set is declared, one named `default` holding every
    /// node is created; when no tree is declared, one named `tree0` returning
    /// the first declared type is created.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for unknown names, duplicate names,
    /// kind/arity mismatches, bad ERC ranges, or a type that some slot needs
    /// but no terminal in the function set can fill.
    pub fn build(self) -> BreedResult<GpContext> {
        let mut types = TypeSystem::new();
        for name in &self.atomics {
            types.add_atomic(name)?;
        }
        for (name, members) in &self.sets {
            let resolved = members
                .iter()
                .map(|m| resolve_type(&types, m, &format!("gp.type.set.{}", name)))
                .collect::<BreedResult<Vec<_>>>()?;
            types.add_set(name, &resolved)?;
        }
        if types.is_empty() {
            return Err(BreedError::config("gp.type", "no types declared"));
        }

        let mut signatures: Vec<NodeConstraints> = Vec::new();
        let mut functions: Vec<FunctionDef> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let key = format!("gp.fs.func.{}", node.name);
            if functions.iter().any(|f| f.name == node.name) {
                return Err(BreedError::config(key, "duplicate function name"));
            }
            let return_type = resolve_type(&types, &node.return_type, &key)?;
            let child_types = node
                .child_types
                .iter()
                .map(|c| resolve_type(&types, c, &key))
                .collect::<BreedResult<Vec<_>>>()?;
            match node.kind {
                NodeKind::Function if child_types.is_empty() => {
                    return Err(BreedError::config(key, "a function needs at least one child"));
                }
                NodeKind::Terminal | NodeKind::Erc { .. } if !child_types.is_empty() => {
                    return Err(BreedError::config(key, "terminals take no children"));
                }
                NodeKind::Erc { min, max } if !(min <= max) => {
                    return Err(BreedError::config(key, format!("empty ERC range [{}, {})", min, max)));
                }
                _ => {}
            }
            // Identical signatures share one table entry.
            let signature = match signatures
                .iter()
                .position(|s| s.return_type == return_type && s.child_types == child_types)
            {
                Some(i) => i,
                None => {
                    signatures.push(NodeConstraints {
                        name: node.name.clone(),
                        return_type,
                        child_types,
                    });
                    signatures.len() - 1
                }
            };
            functions.push(FunctionDef {
                name: node.name.clone(),
                kind: node.kind,
                signature,
            });
        }
        if functions.len() > usize::from(u16::MAX) {
            return Err(BreedError::config("gp.fs", "too many functions"));
        }

        let mut set_specs = self.function_sets;
        if set_specs.is_empty() {
            set_specs.push((
                "default".to_string(),
                functions.iter().map(|f| f.name.clone()).collect(),
            ));
        }

        let mut function_sets = Vec::with_capacity(set_specs.len());
        for (name, member_names) in &set_specs {
            let key = format!("gp.fs.{}", name);
            let mut members = Vec::with_capacity(member_names.len());
            for m in member_names {
                let idx = functions
                    .iter()
                    .position(|f| &f.name == m)
                    .ok_or_else(|| BreedError::config(&key, format!("unknown function `{}`", m)))?;
                members.push(FuncId(idx as u16));
            }
            function_sets.push(index_function_set(name, members, &types, &signatures, &functions));
        }

        let mut tree_specs = self.trees;
        if tree_specs.is_empty() {
            tree_specs.push((
                "tree0".to_string(),
                types.name(GpType(0)).to_string(),
                set_specs[0].0.clone(),
            ));
        }

        let mut trees = Vec::with_capacity(tree_specs.len());
        for (name, ret, fs_name) in &tree_specs {
            let key = format!("gp.tc.{}", name);
            let return_type = resolve_type(&types, ret, &key)?;
            let function_set = set_specs
                .iter()
                .position(|(n, _)| n == fs_name)
                .ok_or_else(|| BreedError::config(&key, format!("unknown function set `{}`", fs_name)))?;
            trees.push(TreeConstraints {
                name: name.clone(),
                return_type,
                function_set,
            });
        }

        let ctx = GpContext {
            types,
            signatures,
            functions,
            function_sets,
            trees,
        };
        ctx.check_terminal_coverage()?;
        Ok(ctx)
    }
}

impl GpContext {
    /// Every type a tree can ask for must be fillable by some terminal,
    /// otherwise tree generation and demotion cannot terminate.
    fn check_terminal_coverage(&self) -> BreedResult<()> {
        for tc in &self.trees {
            let fs = &self.function_sets[tc.function_set];
            let mut needed = vec![tc.return_type];
            for &f in &fs.members {
                needed.extend(self.signature(f).child_types.iter().copied());
            }
            for ty in needed {
                if fs.terminals(ty).is_empty() {
                    return Err(BreedError::config(
                        format!("gp.fs.{}", fs.name),
                        format!(
                            "no terminal returns a type compatible with `{}` (needed by tree `{}`)",
                            self.types.name(ty),
                            tc.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn resolve_type(types: &TypeSystem, name: &str, key: &str) -> BreedResult<GpType> {
    types
        .lookup(name)
        .ok_or_else(|| BreedError::config(key, format!("unknown type `{}`", name)))
}

fn index_function_set(
    name: &str,
    members: Vec<FuncId>,
    types: &TypeSystem,
    signatures: &[NodeConstraints],
    functions: &[FunctionDef],
) -> FunctionSet {
    let mut terminals = vec![Vec::new(); types.len()];
    let mut nonterminals = vec![Vec::new(); types.len()];
    let mut by_arity: Vec<Vec<FuncId>> = Vec::new();

    for &f in &members {
        let sig = &signatures[functions[f.index()].signature];
        for t in 0..types.len() {
            let ty = GpType(t as u16);
            if types.compatible(sig.return_type, ty) {
                if sig.arity() == 0 {
                    terminals[t].push(f);
                } else {
                    nonterminals[t].push(f);
                }
            }
        }
        if by_arity.len() <= sig.arity() {
            by_arity.resize(sig.arity() + 1, Vec::new());
        }
        by_arity[sig.arity()].push(f);
    }

    FunctionSet {
        name: name.to_string(),
        members,
        terminals,
        nonterminals,
        by_arity,
    }
}
