//! Arena-allocated GP expression trees.
//!
//! All nodes of a tree live in one `SlotMap`; parent and child links are
//! generational keys into that arena, so there are no reference cycles and
//! navigation in either direction is O(1). The structural invariant kept by
//! every edit is:
//!
//! - `nodes[p].children[c.argposition] == c` whenever `c.parent == Node(p)`;
//! - the root has `parent == Parent::Tree` and `argposition == 0`.

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::{FuncId, GpContext, NodeKind};
use crate::gp::types::GpType;

/// Deepest nesting `parse_lisp` accepts before rejecting the input.
pub const MAX_PARSE_DEPTH: usize = 512;

new_key_type! {
    /// Identifier of a node within one tree's arena.
    pub struct GpNodeId;
}

/// Who holds a node: another node, or the tree itself (root only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parent {
    Tree,
    Node(GpNodeId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpNode {
    /// Definition this node instantiates.
    pub func: FuncId,
    /// Constant value; only meaningful for ERC nodes.
    pub value: f64,
    /// Child ids in argument order; empty for terminals.
    pub children: Vec<GpNodeId>,
    /// Holder of this node.
    pub parent: Parent,
    /// Slot this node occupies in its parent's child list.
    pub argposition: usize,
}

impl GpNode {
    fn detached(func: FuncId, value: f64) -> Self {
        Self {
            func,
            value,
            children: Vec::new(),
            parent: Parent::Tree,
            argposition: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }
}

/// Restricts counting and positional lookup to a kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFilter {
    All,
    Terminals,
    Nonterminals,
}

impl NodeFilter {
    #[inline]
    fn accepts(self, node: &GpNode) -> bool {
        match self {
            NodeFilter::All => true,
            NodeFilter::Terminals => node.is_terminal(),
            NodeFilter::Nonterminals => !node.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpTree {
    pub(crate) nodes: SlotMap<GpNodeId, GpNode>,
    /// Node held by [`Parent::Tree`].
    pub(crate) root: GpNodeId,
    /// Index of this tree's [`TreeConstraints`](crate::gp::constraints::TreeConstraints).
    pub constraints: usize,
}

impl GpTree {
    /// A tree consisting of a single leaf.
    #[must_use]
    pub fn leaf(constraints: usize, func: FuncId, value: f64) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(GpNode::detached(func, value));
        Self {
            nodes,
            root,
            constraints,
        }
    }

    pub(crate) fn empty(constraints: usize) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: GpNodeId::default(),
            constraints,
        }
    }

    /// Allocate a detached node in this arena.
    pub(crate) fn alloc(&mut self, func: FuncId, value: f64) -> GpNodeId {
        self.nodes.insert(GpNode::detached(func, value))
    }

    /// Append `child` as the next child of `parent`.
    pub(crate) fn attach(&mut self, parent: GpNodeId, child: GpNodeId) {
        let pos = self.nodes[parent].children.len();
        self.nodes[parent].children.push(child);
        let node = &mut self.nodes[child];
        node.parent = Parent::Node(parent);
        node.argposition = pos;
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> GpNodeId {
        self.root
    }

    #[inline]
    #[must_use]
    pub fn node(&self, id: GpNodeId) -> &GpNode {
        &self.nodes[id]
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: GpNodeId) -> Option<&GpNode> {
        self.nodes.get(id)
    }

    /// Total number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth of the whole tree; a single leaf has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.subtree_depth(self.root)
    }

    /// Depth of the subtree rooted at `id`; a leaf has depth 1.
    #[must_use]
    pub fn subtree_depth(&self, id: GpNodeId) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(id, 1usize)];
        while let Some((n, level)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(self.nodes[n].children.iter().map(|&c| (c, level + 1)));
        }
        deepest
    }

    /// Distance from the root; the root is at depth 0.
    #[must_use]
    pub fn at_depth(&self, id: GpNodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Parent::Node(p) = self.nodes[current].parent {
            depth += 1;
            current = p;
        }
        depth
    }

    /// Number of nodes in the subtree rooted at `id` accepted by `filter`.
    #[must_use]
    pub fn subtree_size(&self, id: GpNodeId, filter: NodeFilter) -> usize {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if filter.accepts(node) {
                count += 1;
            }
            stack.extend_from_slice(&node.children);
        }
        count
    }

    #[must_use]
    pub fn num_nodes(&self, filter: NodeFilter) -> usize {
        self.subtree_size(self.root, filter)
    }

    /// Nodes of the subtree rooted at `id` in preorder.
    #[must_use]
    pub fn preorder(&self, id: GpNodeId) -> Vec<GpNodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            order.push(n);
            stack.extend(self.nodes[n].children.iter().rev());
        }
        order
    }

    /// The `n`th node (preorder) accepted by `filter`.
    #[must_use]
    pub fn node_in_position(&self, n: usize, filter: NodeFilter) -> Option<GpNodeId> {
        self.preorder(self.root)
            .into_iter()
            .filter(|&id| filter.accepts(&self.nodes[id]))
            .nth(n)
    }

    /// Subtree size of every node, computed in one post-order pass.
    #[must_use]
    pub fn subtree_sizes(&self) -> SecondaryMap<GpNodeId, usize> {
        let order = self.preorder(self.root);
        let mut sizes: SecondaryMap<GpNodeId, usize> = SecondaryMap::with_capacity(order.len());
        for &id in order.iter().rev() {
            let size = 1 + self.nodes[id]
                .children
                .iter()
                .map(|&c| sizes.get(c).copied().unwrap_or(0))
                .sum::<usize>();
            sizes.insert(id, size);
        }
        sizes
    }

    /// Argument positions from the root down to `id`.
    #[must_use]
    pub fn path_from_root(&self, id: GpNodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = id;
        while let Parent::Node(p) = self.nodes[current].parent {
            path.push(self.nodes[current].argposition);
            current = p;
        }
        path.reverse();
        path
    }

    /// Whether `descendant` lies in the subtree rooted at `ancestor`
    /// (a node contains itself).
    #[must_use]
    pub fn contains(&self, ancestor: GpNodeId, descendant: GpNodeId) -> bool {
        let mut current = descendant;
        loop {
            if current == ancestor {
                return true;
            }
            match self.nodes[current].parent {
                Parent::Node(p) => current = p,
                Parent::Tree => return false,
            }
        }
    }

    #[must_use]
    pub fn return_type(&self, ctx: &GpContext, id: GpNodeId) -> GpType {
        ctx.return_type(self.nodes[id].func)
    }

    /// The type required of whatever occupies `id`'s position.
    #[must_use]
    pub fn slot_type(&self, ctx: &GpContext, id: GpNodeId) -> GpType {
        let node = &self.nodes[id];
        match node.parent {
            Parent::Tree => ctx.tree_constraints(self.constraints).return_type,
            Parent::Node(p) => {
                ctx.signature(self.nodes[p].func).child_types[node.argposition]
            }
        }
    }

    /// Put `child` into `parent`'s slot `argposition` (or make it the root).
    fn set_slot(&mut self, parent: Parent, argposition: usize, child: GpNodeId) {
        match parent {
            Parent::Tree => self.root = child,
            Parent::Node(p) => self.nodes[p].children[argposition] = child,
        }
        let node = &mut self.nodes[child];
        node.parent = parent;
        node.argposition = argposition;
    }

    /// Copy a subtree of `src` into this arena. The copy is detached.
    pub(crate) fn copy_subtree_from(&mut self, src: &GpTree, src_id: GpNodeId) -> GpNodeId {
        let top = self.alloc(src.nodes[src_id].func, src.nodes[src_id].value);
        let mut stack = vec![(src_id, top)];
        while let Some((from, to)) = stack.pop() {
            for &child in &src.nodes[from].children {
                let copy = self.alloc(src.nodes[child].func, src.nodes[child].value);
                self.attach(to, copy);
                stack.push((child, copy));
            }
        }
        top
    }

    /// Free every node of the subtree rooted at `id`. The parent's slot is
    /// left dangling; callers overwrite it immediately.
    pub(crate) fn remove_subtree(&mut self, id: GpNodeId) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if let Some(node) = self.nodes.remove(n) {
                stack.extend(node.children);
            }
        }
    }

    /// Replace the subtree rooted at `old` with the detached subtree `new`.
    pub(crate) fn replace_subtree(&mut self, old: GpNodeId, new: GpNodeId) {
        let (parent, argposition) = {
            let node = &self.nodes[old];
            (node.parent, node.argposition)
        };
        self.remove_subtree(old);
        self.set_slot(parent, argposition, new);
    }

    /// Replace the subtree at `at` with a copy of `src`'s subtree at `src_id`.
    /// Returns the id of the copy's root in this tree.
    pub fn graft(&mut self, at: GpNodeId, src: &GpTree, src_id: GpNodeId) -> GpNodeId {
        let copy = self.copy_subtree_from(src, src_id);
        self.replace_subtree(at, copy);
        copy
    }

    /// Exchange two disjoint subtrees of this tree in place.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] if either subtree contains the other.
    pub(crate) fn swap_subtrees(&mut self, a: GpNodeId, b: GpNodeId) -> BreedResult<()> {
        if self.contains(a, b) || self.contains(b, a) {
            return Err(BreedError::Invariant(
                "swap of nested subtrees requested".to_string(),
            ));
        }
        let (pa, posa) = (self.nodes[a].parent, self.nodes[a].argposition);
        let (pb, posb) = (self.nodes[b].parent, self.nodes[b].argposition);
        self.set_slot(pa, posa, b);
        self.set_slot(pb, posb, a);
        Ok(())
    }

    /// Insert a new nonterminal between `node` and its parent. `node` becomes
    /// child `slot` of the new nonterminal; every other slot receives a fresh
    /// leaf from `fillers` (in slot order, skipping `slot`).
    pub(crate) fn splice_above(
        &mut self,
        node: GpNodeId,
        func: FuncId,
        value: f64,
        slot: usize,
        fillers: &[(FuncId, f64)],
    ) -> GpNodeId {
        let (parent, argposition) = (self.nodes[node].parent, self.nodes[node].argposition);
        let spliced = self.alloc(func, value);
        let mut fill = fillers.iter();
        for i in 0..=fillers.len() {
            if i == slot {
                self.attach(spliced, node);
            } else if let Some(&(f, v)) = fill.next() {
                let leaf = self.alloc(f, v);
                self.attach(spliced, leaf);
            }
        }
        self.set_slot(parent, argposition, spliced);
        spliced
    }

    /// Re-root the tree at `pivot` by rotating the spine from `pivot` up to
    /// the old root. The subtree in `pivot`'s slot `cut_slot` is detached and
    /// re-attached in the slot the old root used to hold the spine.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] if `pivot` is the root, a terminal,
    /// or `cut_slot` is out of range.
    pub(crate) fn rotate_to_root(&mut self, pivot: GpNodeId, cut_slot: usize) -> BreedResult<()> {
        if pivot == self.root || cut_slot >= self.nodes[pivot].children.len() {
            return Err(BreedError::Invariant(
                "rehang pivot must be a non-root nonterminal".to_string(),
            ));
        }
        let mut spine = vec![pivot];
        let mut positions = Vec::new();
        let mut current = pivot;
        while let Parent::Node(p) = self.nodes[current].parent {
            positions.push(self.nodes[current].argposition);
            spine.push(p);
            current = p;
        }
        let k = spine.len() - 1;
        let cut = self.nodes[pivot].children[cut_slot];

        self.set_slot(Parent::Node(pivot), cut_slot, spine[1]);
        for i in 1..k {
            self.set_slot(Parent::Node(spine[i]), positions[i - 1], spine[i + 1]);
        }
        self.set_slot(Parent::Node(spine[k]), positions[k - 1], cut);
        self.set_slot(Parent::Tree, 0, pivot);
        Ok(())
    }

    /// Check parent/child/argposition integrity, arity and type safety.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] describing the first violation found.
    pub fn verify(&self, ctx: &GpContext) -> BreedResult<()> {
        let broken = |msg: String| Err(BreedError::Invariant(msg));

        let Some(root) = self.nodes.get(self.root) else {
            return broken("root is not in the arena".to_string());
        };
        if root.parent != Parent::Tree || root.argposition != 0 {
            return broken("root is not held by the tree at argposition 0".to_string());
        }
        if self.constraints >= ctx.num_tree_constraints() {
            return broken(format!("unknown tree constraints {}", self.constraints));
        }
        let tc = ctx.tree_constraints(self.constraints);
        let fs = ctx.tree_function_set(self.constraints);
        if !ctx.types.compatible(ctx.return_type(root.func), tc.return_type) {
            return broken("root return type does not match the tree".to_string());
        }

        let mut seen: SecondaryMap<GpNodeId, ()> = SecondaryMap::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if seen.insert(id, ()).is_some() {
                return broken("node reachable twice (cycle or shared child)".to_string());
            }
            let node = &self.nodes[id];
            if node.func.index() >= ctx.num_functions() || !fs.members.contains(&node.func) {
                return broken(format!("function {:?} is not in set `{}`", node.func, fs.name));
            }
            let sig = ctx.signature(node.func);
            if sig.arity() != node.children.len() {
                return broken(format!(
                    "`{}` has {} children, expected {}",
                    ctx.function(node.func).name,
                    node.children.len(),
                    sig.arity()
                ));
            }
            for (i, &child_id) in node.children.iter().enumerate() {
                let Some(child) = self.nodes.get(child_id) else {
                    return broken("dangling child link".to_string());
                };
                if child.parent != Parent::Node(id) || child.argposition != i {
                    return broken(format!(
                        "child {} of `{}` has a stale parent link",
                        i,
                        ctx.function(node.func).name
                    ));
                }
                if !ctx.types.compatible(ctx.return_type(child.func), sig.child_types[i]) {
                    return broken(format!(
                        "child {} of `{}` has an incompatible type",
                        i,
                        ctx.function(node.func).name
                    ));
                }
                stack.push(child_id);
            }
        }
        if seen.len() != self.nodes.len() {
            return broken(format!(
                "{} orphaned nodes in arena",
                self.nodes.len() - seen.len()
            ));
        }
        Ok(())
    }

    /// Same shape, functions and constant values, regardless of arena keys.
    #[must_use]
    pub fn structurally_eq(&self, other: &GpTree) -> bool {
        if self.constraints != other.constraints || self.len() != other.len() {
            return false;
        }
        let mut stack = vec![(self.root, other.root)];
        while let Some((a, b)) = stack.pop() {
            let (na, nb) = (&self.nodes[a], &other.nodes[b]);
            if na.func != nb.func
                || na.value.to_bits() != nb.value.to_bits()
                || na.children.len() != nb.children.len()
            {
                return false;
            }
            stack.extend(na.children.iter().copied().zip(nb.children.iter().copied()));
        }
        true
    }

    /// Lisp-style text: `(f a (g b))`, ERCs written as `name=value`.
    #[must_use]
    pub fn to_lisp(&self, ctx: &GpContext) -> String {
        let mut out = String::new();
        self.write_lisp(ctx, self.root, &mut out);
        out
    }

    fn write_lisp(&self, ctx: &GpContext, id: GpNodeId, out: &mut String) {
        let node = &self.nodes[id];
        let def = ctx.function(node.func);
        if node.children.is_empty() {
            out.push_str(&def.name);
            if matches!(def.kind, NodeKind::Erc { .. }) {
                out.push('=');
                out.push_str(&node.value.to_string());
            }
            return;
        }
        out.push('(');
        out.push_str(&def.name);
        for &c in &node.children {
            out.push(' ');
            self.write_lisp(ctx, c, out);
        }
        out.push(')');
    }

    /// Parse the output of [`to_lisp`](Self::to_lisp) back into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Codec`] for malformed text, unknown names, or a
    /// tree that violates the constraints.
    pub fn parse_lisp(ctx: &GpContext, constraints: usize, text: &str) -> BreedResult<GpTree> {
        let spaced = text.replace('(', " ( ").replace(')', " ) ");
        let tokens: Vec<&str> = spaced.split_whitespace().collect();
        let mut tree = GpTree::empty(constraints);
        let mut pos = 0;
        let root = parse_node(ctx, &tokens, &mut pos, &mut tree, 0)?;
        if pos != tokens.len() {
            return Err(BreedError::Codec(format!(
                "trailing input after tree: `{}`",
                tokens[pos..].join(" ")
            )));
        }
        tree.root = root;
        tree.verify(ctx)
            .map_err(|e| BreedError::Codec(format!("parsed tree is invalid: {}", e)))?;
        Ok(tree)
    }
}

fn parse_node(
    ctx: &GpContext,
    tokens: &[&str],
    pos: &mut usize,
    tree: &mut GpTree,
    depth: usize,
) -> BreedResult<GpNodeId> {
    if depth > MAX_PARSE_DEPTH {
        return Err(BreedError::Codec(format!(
            "tree nested deeper than {} levels",
            MAX_PARSE_DEPTH
        )));
    }
    let Some(&token) = tokens.get(*pos) else {
        return Err(BreedError::Codec("unexpected end of input".to_string()));
    };
    *pos += 1;
    match token {
        ")" => Err(BreedError::Codec("unexpected `)`".to_string())),
        "(" => {
            let Some(&name) = tokens.get(*pos) else {
                return Err(BreedError::Codec("unexpected end after `(`".to_string()));
            };
            *pos += 1;
            let func = ctx
                .lookup_function(name)
                .ok_or_else(|| BreedError::Codec(format!("unknown function `{}`", name)))?;
            let id = tree.alloc(func, 0.0);
            while tokens.get(*pos) != Some(&")") {
                let child = parse_node(ctx, tokens, pos, tree, depth + 1)?;
                tree.attach(id, child);
            }
            *pos += 1;
            Ok(id)
        }
        leaf => {
            let (name, value) = match leaf.split_once('=') {
                Some((name, raw)) => {
                    let value = raw
                        .parse::<f64>()
                        .map_err(|_| BreedError::Codec(format!("bad constant `{}`", raw)))?;
                    (name, value)
                }
                None => (leaf, 0.0),
            };
            let func = ctx
                .lookup_function(name)
                .ok_or_else(|| BreedError::Codec(format!("unknown terminal `{}`", name)))?;
            Ok(tree.alloc(func, value))
        }
    }
}
