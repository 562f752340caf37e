//! Rehang: re-root a tree at one of its inner nodes.
//!
//! Only meaningful in a typeless system, where any node may occupy any slot.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::debug;

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::GpContext;
use crate::gp::crossover::{choose_tree, DEFAULT_MAX_DEPTH};
use crate::gp::individual::GpIndividual;
use crate::gp::tree::{GpNodeId, NodeFilter};
use crate::params::{ParamPath, Parameters};
use crate::pipeline::Individual;

#[derive(Debug, Clone)]
pub struct MutateRehang {
    /// Attempts at a pivot that keeps the tree within depth (default: 1).
    pub tries: usize,
    /// Rehung trees deeper than this are rejected (default: 17).
    pub max_depth: usize,
    /// Fixed tree to mutate, or random when `None`.
    pub tree: Option<usize>,
    ctx: Arc<GpContext>,
}

impl MutateRehang {
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
        ParamPath::new("gp.breed.mutate-rehang")
    }

    fn require_typeless(&self, base: &ParamPath) -> BreedResult<()> {
        if self.ctx.types.is_typeless() {
            Ok(())
        } else {
            Err(BreedError::config(
                base,
                format!(
                    "rehang needs a typeless system, found {} types",
                    self.ctx.types.len()
                ),
            ))
        }
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] on a typed system, for non-positive
    /// tries or depth, or a bad tree index.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        self.require_typeless(base)?;
        let def = Self::default_base();
        self.tries = params.get_positive(&base.push("tries"), &def.push("tries"), self.tries)?;
        self.max_depth =
            params.get_positive(&base.push("max-depth"), &def.push("max-depth"), self.max_depth)?;
        self.tree = params.get_tree_index(&base.push("tree.0"), &def.push("tree.0"))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] on a typed system or an out-of-range
    /// fixed tree, and [`BreedError::Invariant`] if rotation breaks the tree.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        parent: &GpIndividual,
        rng: &mut R,
    ) -> BreedResult<GpIndividual> {
        self.require_typeless(&Self::default_base())?;
        let t = choose_tree(self.tree, parent.trees.len(), &Self::default_base().push("tree.0"), rng)?;
        let tree = &parent.trees[t];
        let root = tree.root();
        let pivots: Vec<GpNodeId> = tree
            .preorder(root)
            .into_iter()
            .filter(|&id| id != root && !tree.node(id).is_terminal())
            .collect();

        for _ in 0..self.tries {
            let Some(&pivot) = pivots.choose(rng) else {
                break;
            };
            let cut = rng.random_range(0..tree.node(pivot).children.len());
            let mut child = parent.clone();
            child.trees[t].rotate_to_root(pivot, cut)?;
            if child.trees[t].depth() > self.max_depth {
                continue;
            }
            child.trees[t].verify(&self.ctx)?;
            child.invalidate();
            return Ok(child);
        }
        debug!(
            pivots = pivots.len(),
            nonterminals = tree.num_nodes(NodeFilter::Nonterminals),
            "rehang found no pivot"
        );
        Ok(parent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::constraints::{GpContextBuilder, NodeKind};
    use crate::gp::tree::{GpTree, Parent};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn chain_ctx() -> Arc<GpContext> {
        Arc::new(
            GpContextBuilder::typeless()
                .function("a", 1)
                .function("b", 1)
                .function("c", 1)
                .function("+", 2)
                .terminal("d")
                .terminal("e")
                .build()
                .unwrap(),
        )
    }

    fn parent_chain(tree: &GpTree, ctx: &GpContext, name: &str) -> Vec<String> {
        let f = ctx.lookup_function(name).unwrap();
        let start = tree
            .preorder(tree.root())
            .into_iter()
            .find(|&id| tree.node(id).func == f)
            .unwrap();
        let mut names = vec![];
        let mut cur = start;
        while let Parent::Node(p) = tree.node(cur).parent {
            names.push(ctx.function(tree.node(p).func).name.clone());
            cur = p;
        }
        names
    }

    #[test]
    fn test_chain_rehang_at_second_node() {
        let ctx = chain_ctx();
        let mut tree = GpTree::parse_lisp(&ctx, 0, "(a (b (c d)))").unwrap();
        assert_eq!(parent_chain(&tree, &ctx, "d"), vec!["c", "b", "a"]);

        let b = tree.node_in_position(1, NodeFilter::All).unwrap();
        tree.rotate_to_root(b, 0).unwrap();
        tree.verify(&ctx).unwrap();
        assert_eq!(tree.to_lisp(&ctx), "(b (a (c d)))");
        assert_eq!(tree.depth(), 4);
        assert_eq!(parent_chain(&tree, &ctx, "a"), vec!["b"]);
        assert_eq!(parent_chain(&tree, &ctx, "d"), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_deep_spine_rotation() {
        let ctx = chain_ctx();
        let mut tree = GpTree::parse_lisp(&ctx, 0, "(+ d (a (+ (b e) d)))").unwrap();
        // pivot = (b e), cut its only child `e`
        let pivot = tree.node_in_position(4, NodeFilter::All).unwrap();
        assert_eq!(ctx.function(tree.node(pivot).func).name, "b");
        tree.rotate_to_root(pivot, 0).unwrap();
        tree.verify(&ctx).unwrap();
        assert_eq!(tree.to_lisp(&ctx), "(b (+ (a (+ d e)) d))");
        assert_eq!(tree.len(), 7);
    }

    #[test]
    fn test_root_and_terminal_pivots_rejected() {
        let ctx = chain_ctx();
        let mut tree = GpTree::parse_lisp(&ctx, 0, "(a d)").unwrap();
        let root = tree.root();
        assert!(tree.rotate_to_root(root, 0).is_err());
        let d = tree.node_in_position(1, NodeFilter::All).unwrap();
        assert!(tree.rotate_to_root(d, 0).is_err());
    }

    #[test]
    fn test_breed_without_pivot_is_noop() {
        let ctx = chain_ctx();
        let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "(+ d e)").unwrap()]);
        let mut op = MutateRehang::new(ctx.clone());
        op.tries = 3;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let child = op.breed(&parent, &mut rng).unwrap();
        assert!(child.structurally_eq(&parent));
    }

    #[test]
    fn test_breed_preserves_node_multiset() {
        let ctx = chain_ctx();
        let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "(+ (a (b d)) (c (+ d e)))").unwrap()]);
        let mut op = MutateRehang::new(ctx.clone());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..20 {
            let child = op.breed(&parent, &mut rng).unwrap();
            child.validate(&ctx).unwrap();
            assert_eq!(child.size(), parent.size());
            assert_ne!(child.trees[0].to_lisp(&ctx), parent.trees[0].to_lisp(&ctx));
        }
    }

    #[test]
    fn test_typed_system_is_config_error() {
        let ctx = Arc::new(
            GpContextBuilder::new()
                .atomic("real")
                .atomic("bool")
                .node("x", NodeKind::Terminal, "real", &[])
                .node("t", NodeKind::Terminal, "bool", &[])
                .tree("main", "real", "default")
                .build()
                .unwrap(),
        );
        let mut op = MutateRehang::new(ctx);
        let err = op
            .setup(&Parameters::new(), &MutateRehang::default_base())
            .unwrap_err();
        assert!(matches!(err, BreedError::Config { ref key, .. } if key == "gp.breed.mutate-rehang"));
    }
}
