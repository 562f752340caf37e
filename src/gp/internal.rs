//! Crossover between two trees (possibly the same one) of a single individual.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::GpContext;
use crate::gp::crossover::{choose_tree, type_fits, DEFAULT_MAX_DEPTH};
use crate::gp::individual::GpIndividual;
use crate::gp::select::{configure_selector, NodeSelector};
use crate::params::{ParamPath, Parameters};
use crate::pipeline::Individual;

#[derive(Debug, Clone)]
pub struct InternalCrossover {
    /// Attempts at a valid swap before returning the parent unchanged (default: 1).
    pub tries: usize,
    /// Swaps that push either tree past this depth are rejected (default: 17).
    pub max_depth: usize,
    /// First tree, or random when `None`.
    pub tree1: Option<usize>,
    /// Second tree, or random when `None`; may equal the first.
    pub tree2: Option<usize>,
    /// Picks the swap points in both trees.
    pub selector: NodeSelector,
    ctx: Arc<GpContext>,
}

impl InternalCrossover {
    #[must_use]
    pub fn new(ctx: Arc<GpContext>) -> Self {
        Self {
            tries: 1,
            max_depth: DEFAULT_MAX_DEPTH,
            tree1: None,
            tree2: None,
            selector: NodeSelector::default(),
            ctx,
        }
    }

    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("gp.breed.internal")
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for non-positive tries or depth, or a
    /// bad selector.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        self.tries = params.get_positive(&base.push("tries"), &def.push("tries"), self.tries)?;
        self.max_depth =
            params.get_positive(&base.push("max-depth"), &def.push("max-depth"), self.max_depth)?;
        self.tree1 = params.get_tree_index(&base.push("tree.0"), &def.push("tree.0"))?;
        self.tree2 = params.get_tree_index(&base.push("tree.1"), &def.push("tree.1"))?;
        self.selector = configure_selector(params, base)?;
        Ok(())
    }

    /// Swap two subtrees inside a copy of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for an out-of-range fixed tree and
    /// [`BreedError::Invariant`] if the swapped trees fail verification.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        parent: &GpIndividual,
        rng: &mut R,
    ) -> BreedResult<GpIndividual> {
        let ctx = &*self.ctx;
        let base = Self::default_base();
        let mut found = None;
        for _ in 0..self.tries {
            let t1 = choose_tree(self.tree1, parent.trees.len(), &base.push("tree.0"), rng)?;
            let t2 = choose_tree(self.tree2, parent.trees.len(), &base.push("tree.1"), rng)?;
            let (tree1, tree2) = (&parent.trees[t1], &parent.trees[t2]);
            if tree1.constraints != tree2.constraints {
                continue;
            }

            self.selector.reset();
            let Some(n1) = self.selector.pick(tree1, rng) else {
                continue;
            };
            self.selector.reset();
            let Some(n2) = self.selector.pick(tree2, rng) else {
                continue;
            };

            if t1 == t2 && (n1 == n2 || tree1.contains(n1, n2) || tree1.contains(n2, n1)) {
                continue;
            }
            if !type_fits(ctx, tree2, n2, tree1, n1) || !type_fits(ctx, tree1, n1, tree2, n2) {
                continue;
            }
            if tree2.subtree_depth(n2) + tree1.at_depth(n1) > self.max_depth
                || tree1.subtree_depth(n1) + tree2.at_depth(n2) > self.max_depth
            {
                continue;
            }
            found = Some((t1, n1, t2, n2));
            break;
        }

        let mut child = parent.clone();
        let Some((t1, n1, t2, n2)) = found else {
            debug!(tries = self.tries, "internal crossover found no valid pair; cloning parent");
            return Ok(child);
        };

        if t1 == t2 {
            child.trees[t1].swap_subtrees(n1, n2)?;
        } else {
            child.trees[t1].graft(n1, &parent.trees[t2], n2);
            child.trees[t2].graft(n2, &parent.trees[t1], n1);
        }
        for &t in &[t1, t2] {
            child.trees[t].verify(ctx).map_err(|e| {
                BreedError::Invariant(format!("internal crossover broke tree {}: {}", t, e))
            })?;
        }
        child.invalidate();
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::constraints::GpContextBuilder;
    use crate::gp::tree::GpTree;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ctx() -> Arc<GpContext> {
        Arc::new(
            GpContextBuilder::typeless()
                .function("+", 2)
                .function("neg", 1)
                .terminal("x")
                .terminal("y")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_same_tree_swap_keeps_size_and_integrity() {
        let ctx = ctx();
        let tree = GpTree::parse_lisp(&ctx, 0, "(+ (neg (+ x y)) (+ y (neg x)))").unwrap();
        let parent = GpIndividual::new(vec![tree]);
        let mut op = InternalCrossover::new(ctx.clone());
        op.tries = 10;
        op.selector = NodeSelector::Uniform;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut changed = 0;
        for _ in 0..100 {
            let child = op.breed(&parent, &mut rng).unwrap();
            child.validate(&ctx).unwrap();
            assert_eq!(child.size(), parent.size());
            if !child.structurally_eq(&parent) {
                changed += 1;
                assert!(!child.evaluated);
            }
        }
        assert!(changed > 0);
    }

    #[test]
    fn test_single_node_tree_falls_back() {
        let ctx = ctx();
        let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "x").unwrap()]);
        let mut op = InternalCrossover::new(ctx.clone());
        op.tries = 5;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let child = op.breed(&parent, &mut rng).unwrap();
        assert!(child.structurally_eq(&parent));
    }

    #[test]
    fn test_two_tree_exchange() {
        let ctx = ctx();
        let parent = GpIndividual::new(vec![
            GpTree::parse_lisp(&ctx, 0, "(neg x)").unwrap(),
            GpTree::parse_lisp(&ctx, 0, "(neg y)").unwrap(),
        ]);
        let mut op = InternalCrossover::new(ctx.clone());
        op.tree1 = Some(0);
        op.tree2 = Some(1);
        op.selector = NodeSelector::kind_weighted(1.0, 0.0, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let child = op.breed(&parent, &mut rng).unwrap();
        assert_eq!(child.trees[0].to_lisp(&ctx), "(neg y)");
        assert_eq!(child.trees[1].to_lisp(&ctx), "(neg x)");
    }
}
