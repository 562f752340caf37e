//! Demotion: push a node one level down under a freshly created nonterminal.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::debug;

use crate::error::{BreedError, BreedResult};
use crate::gp::builder::random_terminal;
use crate::gp::constraints::{FuncId, GpContext};
use crate::gp::crossover::{choose_tree, DEFAULT_MAX_DEPTH};
use crate::gp::individual::GpIndividual;
use crate::gp::tree::{GpNodeId, GpTree};
use crate::gp::types::GpType;
use crate::params::{ParamPath, Parameters};
use crate::pipeline::Individual;

#[derive(Debug, Clone)]
pub struct MutateDemote {
    /// Attempts at a node with a fitting replacement (default: 1).
    pub tries: usize,
    /// Demotion must not push the tree past this depth (default: 17).
    pub max_depth: usize,
    /// Fixed tree to mutate, or random when `None`.
    pub tree: Option<usize>,
    ctx: Arc<GpContext>,
}

impl MutateDemote {
    #[must_use]
    pub fn new(ctx: Arc<GpContext>) -> Self {
        Self {
            tries: 1,
            max_depth: DEFAULT_MAX_DEPTH,
            tree: None,
            ctx,
        }
    }

    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("gp.breed.mutate-demote")
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for non-positive tries or depth, or a
    /// bad tree index.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        self.tries = params.get_positive(&base.push("tries"), &def.push("tries"), self.tries)?;
        self.max_depth =
            params.get_positive(&base.push("max-depth"), &def.push("max-depth"), self.max_depth)?;
        self.tree = params.get_tree_index(&base.push("tree.0"), &def.push("tree.0"))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for an out-of-range fixed tree and
    /// [`BreedError::Invariant`] if the spliced tree fails verification.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        parent: &GpIndividual,
        rng: &mut R,
    ) -> BreedResult<GpIndividual> {
        let ctx = &*self.ctx;
        let t = choose_tree(self.tree, parent.trees.len(), &Self::default_base().push("tree.0"), rng)?;
        let tree = &parent.trees[t];

        let demotable: Vec<GpNodeId> = tree
            .preorder(tree.root())
            .into_iter()
            .filter(|&id| is_demotable(ctx, tree, id))
            .collect();

        let mut chosen = None;
        for _ in 0..self.tries {
            let Some(&node) = demotable.choose(rng) else {
                break;
            };
            if tree.at_depth(node) + 1 + tree.subtree_depth(node) <= self.max_depth {
                chosen = Some(node);
                break;
            }
        }
        let mut child = parent.clone();
        let Some(node) = chosen else {
            debug!(candidates = demotable.len(), "no demotable node fits the depth bound");
            return Ok(child);
        };

        let (f, slot) = pick_splice(ctx, tree, node, rng)
            .ok_or_else(|| BreedError::Invariant("demotable node has no splice".to_string()))?;
        let fs = ctx.tree_function_set(tree.constraints);
        let sig = ctx.signature(f);
        let mut fillers = Vec::with_capacity(sig.arity().saturating_sub(1));
        for (i, &ty) in sig.child_types.iter().enumerate() {
            if i == slot {
                continue;
            }
            let leaf = random_terminal(ctx, fs, ty, rng).ok_or_else(|| {
                BreedError::Invariant(format!("no terminal for `{}`", ctx.types.name(ty)))
            })?;
            fillers.push(leaf);
        }

        let out = &mut child.trees[t];
        out.splice_above(node, f, 0.0, slot, &fillers);
        out.verify(ctx)
            .map_err(|e| BreedError::Invariant(format!("demotion broke tree {}: {}", t, e)))?;
        child.invalidate();
        Ok(child)
    }
}

/// Some nonterminal fits `id`'s slot and accepts `id` as one of its children.
fn is_demotable(ctx: &GpContext, tree: &GpTree, id: GpNodeId) -> bool {
    let fs = ctx.tree_function_set(tree.constraints);
    if ctx.types.is_typeless() {
        return !fs.nonterminals(tree.slot_type(ctx, id)).is_empty();
    }
    let slot = tree.slot_type(ctx, id);
    let ret = tree.return_type(ctx, id);
    fs.nonterminals(slot).iter().any(|&f| {
        let sig = ctx.signature(f);
        (0..sig.arity()).any(|j| splice_fits(ctx, tree, f, j, ret))
    })
}

/// `f` can hold a node returning `ret` in slot `j`, and every other slot of
/// `f` has a terminal to fill it.
fn splice_fits(ctx: &GpContext, tree: &GpTree, f: FuncId, j: usize, ret: GpType) -> bool {
    let fs = ctx.tree_function_set(tree.constraints);
    let sig = ctx.signature(f);
    ctx.types.compatible(ret, sig.child_types[j])
        && sig
            .child_types
            .iter()
            .enumerate()
            .all(|(i, &ty)| i == j || !fs.terminals(ty).is_empty())
}

fn pick_splice<R: Rng + ?Sized>(
    ctx: &GpContext,
    tree: &GpTree,
    id: GpNodeId,
    rng: &mut R,
) -> Option<(FuncId, usize)> {
    let fs = ctx.tree_function_set(tree.constraints);
    let slot = tree.slot_type(ctx, id);
    if ctx.types.is_typeless() {
        let &f = fs.nonterminals(slot).choose(rng)?;
        return Some((f, rng.random_range(0..ctx.arity(f))));
    }
    let ret = tree.return_type(ctx, id);
    let options: Vec<(FuncId, usize)> = fs
        .nonterminals(slot)
        .iter()
        .flat_map(|&f| (0..ctx.arity(f)).map(move |j| (f, j)))
        .filter(|&(f, j)| splice_fits(ctx, tree, f, j, ret))
        .collect();
    options.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::constraints::{GpContextBuilder, NodeKind};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_typeless_demotion_adds_a_level() {
        let ctx = Arc::new(
            GpContextBuilder::typeless()
                .function("+", 2)
                .function("neg", 1)
                .terminal("x")
                .build()
                .unwrap(),
        );
        let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "(neg x)").unwrap()]);
        let mut op = MutateDemote::new(ctx.clone());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..30 {
            let child = op.breed(&parent, &mut rng).unwrap();
            child.validate(&ctx).unwrap();
            let grown = child.size() - parent.size();
            assert!(grown == 1 || grown == 2, "grew by {}", grown);
            assert_eq!(child.trees[0].depth(), 3);
            assert!(!child.evaluated);
        }
    }

    #[test]
    fn test_depth_bound_blocks_demotion() {
        let ctx = Arc::new(
            GpContextBuilder::typeless()
                .function("neg", 1)
                .terminal("x")
                .build()
                .unwrap(),
        );
        let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "(neg x)").unwrap()]);
        let mut op = MutateDemote::new(ctx.clone());
        op.max_depth = 2;
        op.tries = 10;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let child = op.breed(&parent, &mut rng).unwrap();
        assert!(child.structurally_eq(&parent));
    }

    #[test]
    fn test_typed_demotion_respects_slots() {
        let ctx = Arc::new(
            GpContextBuilder::new()
                .atomic("real")
                .atomic("bool")
                .node("if", NodeKind::Function, "real", &["bool", "real", "real"])
                .node("not", NodeKind::Function, "bool", &["bool"])
                .node("x", NodeKind::Terminal, "real", &[])
                .node("t", NodeKind::Terminal, "bool", &[])
                .tree("main", "real", "default")
                .build()
                .unwrap(),
        );
        let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "(if t x x)").unwrap()]);
        let mut op = MutateDemote::new(ctx.clone());
        op.tries = 5;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..50 {
            let child = op.breed(&parent, &mut rng).unwrap();
            child.validate(&ctx).unwrap();
        }
    }
}
