//! Size-fair and homologous subtree crossover.
//!
//! A node is chosen in parent 1 with the node selector. Parent 2 is then
//! searched for a node whose subtree size is "fair" relative to it: all
//! candidates up to `2 * size1 + 1` nodes are bucketed by size in one pass,
//! a lottery picks "same size", "smaller" or "larger" so that the expected
//! size change is zero, and a node of the drawn size is chosen uniformly
//! (size-fair) or by the shortest structural distance from parent 1's node
//! (homologous).

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::GpContext;
use crate::gp::individual::GpIndividual;
use crate::gp::select::{configure_selector, NodeSelector};
use crate::gp::tree::{GpNodeId, GpTree, NodeFilter};
use crate::params::{ParamPath, Parameters};
use crate::pipeline::Individual;

pub const DEFAULT_TRIES: usize = 1;
pub const DEFAULT_MAX_DEPTH: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossoverMode {
    SizeFair,
    Homologous,
}

#[derive(Debug, Clone)]
pub struct SubtreeCrossover {
    /// Size-fair or homologous second-point choice.
    pub mode: CrossoverMode,
    /// Attempts at a valid pair of points before falling back to clones (default: 1).
    pub tries: usize,
    /// Children deeper than this are rejected (default: 17).
    pub max_depth: usize,
    /// Fixed tree in parent 1, or random when `None`.
    pub tree1: Option<usize>,
    /// Fixed tree in parent 2, or random when `None`.
    pub tree2: Option<usize>,
    /// Produce only the first child.
    pub toss_second: bool,
    /// Picks the crossover point in parent 1.
    pub selector: NodeSelector,
    ctx: Arc<GpContext>,
}

impl SubtreeCrossover {
    #[must_use]
    pub fn new(ctx: Arc<GpContext>, mode: CrossoverMode) -> Self {
        Self {
            mode,
            tries: DEFAULT_TRIES,
            max_depth: DEFAULT_MAX_DEPTH,
            tree1: None,
            tree2: None,
            toss_second: false,
            selector: NodeSelector::default(),
            ctx,
        }
    }

    #[must_use]
    pub fn default_base(&self) -> ParamPath {
        match self.mode {
            CrossoverMode::SizeFair => ParamPath::new("gp.breed.size-fair"),
            CrossoverMode::Homologous => ParamPath::new("gp.breed.homologous"),
        }
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for non-positive tries or depth, a tree
    /// index beyond the context's tree constraints, or a bad selector.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = self.default_base();
        self.tries = params.get_positive(&base.push("tries"), &def.push("tries"), self.tries)?;
        self.max_depth =
            params.get_positive(&base.push("max-depth"), &def.push("max-depth"), self.max_depth)?;
        self.tree1 = params.get_tree_index(&base.push("tree.0"), &def.push("tree.0"))?;
        self.tree2 = params.get_tree_index(&base.push("tree.1"), &def.push("tree.1"))?;
        self.toss_second = params.get_bool(&base.push("toss"), &def.push("toss"), self.toss_second)?;
        self.selector = configure_selector(params, base)?;
        Ok(())
    }

    #[must_use]
    pub fn typical_count(&self) -> usize {
        if self.toss_second {
            1
        } else {
            2
        }
    }

    /// Cross two parents, returning one or two children. When no valid pair
    /// of nodes is found within `tries`, the children are unmodified clones.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] if a fixed tree index is out of range
    /// for a parent.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        p1: &GpIndividual,
        p2: &GpIndividual,
        rng: &mut R,
    ) -> BreedResult<Vec<GpIndividual>> {
        let base = self.default_base();
        let mut found = None;
        for attempt in 0..self.tries {
            let t1 = choose_tree(self.tree1, p1.trees.len(), &base.push("tree.0"), rng)?;
            let t2 = choose_tree(self.tree2, p2.trees.len(), &base.push("tree.1"), rng)?;
            let (tree1, tree2) = (&p1.trees[t1], &p2.trees[t2]);
            if tree1.constraints != tree2.constraints {
                trace!(attempt, t1, t2, "tree constraints differ");
                continue;
            }

            self.selector.reset();
            let Some(node1) = self.selector.pick(tree1, rng) else {
                continue;
            };
            let Some(node2) = self.fair_partner(tree1, node1, tree2, rng) else {
                continue;
            };
            if self.depth_fits(tree2, node2, tree1, node1)
                && (self.toss_second || self.depth_fits(tree1, node1, tree2, node2))
            {
                found = Some((t1, node1, t2, node2));
                break;
            }
        }

        let mut c1 = p1.clone();
        let mut c2 = if self.toss_second { None } else { Some(p2.clone()) };
        match found {
            Some((t1, node1, t2, node2)) => {
                c1.trees[t1].graft(node1, &p2.trees[t2], node2);
                c1.invalidate();
                if let Some(c2) = c2.as_mut() {
                    c2.trees[t2].graft(node2, &p1.trees[t1], node1);
                    c2.invalidate();
                }
            }
            None => debug!(tries = self.tries, mode = ?self.mode, "crossover found no valid pair; cloning parents"),
        }
        Ok(std::iter::once(c1).chain(c2).collect())
    }

    /// Whether `from`'s subtree can replace `to` within the depth bound.
    fn depth_fits(&self, from_tree: &GpTree, from: GpNodeId, to_tree: &GpTree, to: GpNodeId) -> bool {
        from_tree.subtree_depth(from) + to_tree.at_depth(to) <= self.max_depth
    }

    /// Pick a node of `tree2` to exchange with `node1` of `tree1`.
    fn fair_partner<R: Rng + ?Sized>(
        &self,
        tree1: &GpTree,
        node1: GpNodeId,
        tree2: &GpTree,
        rng: &mut R,
    ) -> Option<GpNodeId> {
        let ctx = &*self.ctx;
        let size1 = tree1.subtree_size(node1, NodeFilter::All);
        let limit = 2 * size1 + 1;
        let sizes = tree2.subtree_sizes();

        let mut buckets: Vec<Vec<GpNodeId>> = vec![Vec::new(); limit + 1];
        for (id, &size) in sizes.iter() {
            if size > limit {
                continue;
            }
            if !type_fits(ctx, tree2, id, tree1, node1)
                || (!self.toss_second && !type_fits(ctx, tree1, node1, tree2, id))
            {
                continue;
            }
            buckets[size].push(id);
        }

        let n_same = buckets[size1].len();
        let (mut n_smaller, mut sum_smaller) = (0usize, 0usize);
        for (size, bucket) in buckets.iter().enumerate().take(size1) {
            n_smaller += bucket.len();
            sum_smaller += size * bucket.len();
        }
        let (mut n_larger, mut sum_larger) = (0usize, 0usize);
        for (size, bucket) in buckets.iter().enumerate().skip(size1 + 1) {
            n_larger += bucket.len();
            sum_larger += size * bucket.len();
        }
        let total = n_same + n_smaller + n_larger;
        if total == 0 {
            return None;
        }

        let p_same = n_same as f64 / total as f64;
        let rest = 1.0 - p_same;
        let (p_smaller, p_larger) = match (n_smaller, n_larger) {
            (0, 0) => (0.0, 0.0),
            (_, 0) => (rest, 0.0),
            (0, _) => (0.0, rest),
            _ => {
                // Balance so that p_smaller * shrink == p_larger * growth.
                let shrink = size1 as f64 - sum_smaller as f64 / n_smaller as f64;
                let growth = sum_larger as f64 / n_larger as f64 - size1 as f64;
                (rest * growth / (shrink + growth), rest * shrink / (shrink + growth))
            }
        };

        let r: f64 = rng.random();
        let target = if r < p_same || (p_smaller == 0.0 && p_larger == 0.0) {
            size1
        } else if r < p_same + p_smaller {
            sample_size(&buckets[..size1], 0, n_smaller, rng)
        } else {
            sample_size(&buckets[size1 + 1..], size1 + 1, n_larger, rng)
        };

        let bucket = &buckets[target];
        match self.mode {
            CrossoverMode::SizeFair => Some(bucket[rng.random_range(0..bucket.len())]),
            CrossoverMode::Homologous => {
                let path1 = tree1.path_from_root(node1);
                closest_by_path(tree2, bucket, &path1, rng)
            }
        }
    }
}

/// Draw a size from `buckets` (offset by `first`) weighted by bucket length.
fn sample_size<R: Rng + ?Sized>(buckets: &[Vec<GpNodeId>], first: usize, count: usize, rng: &mut R) -> usize {
    let mut n = rng.random_range(0..count);
    for (i, bucket) in buckets.iter().enumerate() {
        if n < bucket.len() {
            return first + i;
        }
        n -= bucket.len();
    }
    first + buckets.len() - 1
}

/// Among `candidates`, the node whose root path diverges least from `path1`;
/// ties are broken uniformly.
fn closest_by_path<R: Rng + ?Sized>(
    tree: &GpTree,
    candidates: &[GpNodeId],
    path1: &[usize],
    rng: &mut R,
) -> Option<GpNodeId> {
    let mut best = None;
    let mut best_distance = usize::MAX;
    let mut ties = 0u32;
    for &id in candidates {
        let path2 = tree.path_from_root(id);
        let common = path1.iter().zip(&path2).take_while(|(a, b)| a == b).count();
        let distance = path1.len() + path2.len() - 2 * common;
        if distance < best_distance {
            best = Some(id);
            best_distance = distance;
            ties = 1;
        } else if distance == best_distance {
            ties += 1;
            if rng.random_range(0..ties) == 0 {
                best = Some(id);
            }
        }
    }
    best
}

/// Whether the subtree at `from` may occupy `to`'s slot.
pub(crate) fn type_fits(
    ctx: &GpContext,
    from_tree: &GpTree,
    from: GpNodeId,
    to_tree: &GpTree,
    to: GpNodeId,
) -> bool {
    ctx.types
        .compatible(from_tree.return_type(ctx, from), to_tree.slot_type(ctx, to))
}

/// A fixed tree index (validated) or a random one.
pub(crate) fn choose_tree<R: Rng + ?Sized>(
    fixed: Option<usize>,
    len: usize,
    key: &ParamPath,
    rng: &mut R,
) -> BreedResult<usize> {
    match fixed {
        Some(t) if t < len => Ok(t),
        Some(t) => Err(BreedError::config(
            key,
            format!("tree {} requested but individual has {} trees", t, len),
        )),
        None if len == 0 => Err(BreedError::Invariant("individual has no trees".to_string())),
        None => Ok(rng.random_range(0..len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::constraints::{GpContextBuilder, NodeKind};
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

    fn ind(ctx: &GpContext, text: &str) -> GpIndividual {
        GpIndividual::new(vec![GpTree::parse_lisp(ctx, 0, text).unwrap()])
    }

    #[test]
    fn test_size_fair_children_are_valid_and_bounded() {
        let ctx = ctx();
        let p1 = ind(&ctx, "(+ (+ x (neg y)) (neg (neg x)))");
        let p2 = ind(&ctx, "(neg (+ (+ y y) (+ x (neg x))))");
        let mut op = SubtreeCrossover::new(ctx.clone(), CrossoverMode::SizeFair);
        op.tries = 5;
        op.max_depth = 6;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            let kids = op.breed(&p1, &p2, &mut rng).unwrap();
            assert_eq!(kids.len(), 2);
            for kid in &kids {
                kid.validate(&ctx).unwrap();
                assert!(kid.trees[0].depth() <= 6);
            }
            // Nodes are conserved across the two children.
            assert_eq!(kids[0].size() + kids[1].size(), p1.size() + p2.size());
        }
    }

    #[test]
    fn test_homologous_prefers_matching_position() {
        let ctx = ctx();
        let p1 = ind(&ctx, "(+ x y)");
        let p2 = ind(&ctx, "(+ y x)");
        let mut op = SubtreeCrossover::new(ctx.clone(), CrossoverMode::Homologous);
        // Always pick a terminal in parent 1.
        op.selector = NodeSelector::kind_weighted(1.0, 0.0, 0.0);
        op.toss_second = true;
        // Grafting parent 2's root under a terminal would exceed depth 2.
        op.max_depth = 2;
        op.tries = 50;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..20 {
            let kids = op.breed(&p1, &p2, &mut rng).unwrap();
            assert_eq!(kids.len(), 1);
            // Same-position swap of single terminals yields one of these.
            let text = kids[0].trees[0].to_lisp(&ctx);
            assert!(text == "(+ y y)" || text == "(+ x x)", "{}", text);
        }
    }

    #[test]
    fn test_depth_bound_forces_clone_fallback() {
        let ctx = ctx();
        let p1 = ind(&ctx, "(neg (neg x))");
        let p2 = ind(&ctx, "(neg (neg (neg y)))");
        let mut op = SubtreeCrossover::new(ctx.clone(), CrossoverMode::SizeFair);
        op.max_depth = 1;
        op.tries = 10;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let kids = op.breed(&p1, &p2, &mut rng).unwrap();
        assert!(kids[0].structurally_eq(&p1));
        assert!(kids[1].structurally_eq(&p2));
    }

    #[test]
    fn test_mismatched_tree_types_fall_back() {
        let ctx = Arc::new(
            GpContextBuilder::new()
                .atomic("real")
                .atomic("bool")
                .node("x", NodeKind::Terminal, "real", &[])
                .node("t", NodeKind::Terminal, "bool", &[])
                .function_set("fs", &["x", "t"])
                .tree("value", "real", "fs")
                .tree("flag", "bool", "fs")
                .build()
                .unwrap(),
        );
        let make = || {
            GpIndividual::new(vec![
                GpTree::parse_lisp(&ctx, 0, "x").unwrap(),
                GpTree::parse_lisp(&ctx, 1, "t").unwrap(),
            ])
        };
        let (p1, p2) = (make(), make());
        let mut op = SubtreeCrossover::new(ctx.clone(), CrossoverMode::SizeFair);
        op.max_depth = 1;
        op.tree1 = Some(0);
        op.tree2 = Some(1);
        op.tries = 4;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let kids = op.breed(&p1, &p2, &mut rng).unwrap();
        assert!(kids[0].structurally_eq(&p1));
        assert!(kids[1].structurally_eq(&p2));

        op.tree2 = Some(5);
        assert!(matches!(
            op.breed(&p1, &p2, &mut rng),
            Err(BreedError::Config { .. })
        ));
    }

    #[test]
    fn test_single_terminals_swap_under_depth_one() {
        let ctx = ctx();
        let p1 = ind(&ctx, "x");
        let p2 = ind(&ctx, "y");
        let mut op = SubtreeCrossover::new(ctx.clone(), CrossoverMode::SizeFair);
        op.max_depth = 1;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let kids = op.breed(&p1, &p2, &mut rng).unwrap();
        assert_eq!(kids[0].trees[0].to_lisp(&ctx), "y");
        assert_eq!(kids[1].trees[0].to_lisp(&ctx), "x");
        assert!(!kids[0].evaluated);
    }

    #[test]
    fn test_setup_reads_keys() {
        let ctx = ctx();
        let mut params = Parameters::new();
        params.set("gp.breed.size-fair.tries", "4");
        params.set("pop.xo.max-depth", "9");
        params.set("pop.xo.tree.0", "0");
        params.set("pop.xo.toss", "true");
        let mut op = SubtreeCrossover::new(ctx, CrossoverMode::SizeFair);
        op.setup(&params, &ParamPath::new("pop.xo")).unwrap();
        assert_eq!(op.tries, 4);
        assert_eq!(op.max_depth, 9);
        assert_eq!(op.tree1, Some(0));
        assert_eq!(op.tree2, None);
        assert_eq!(op.typical_count(), 1);

        params.set("pop.xo.tries", "0");
        assert!(op.setup(&params, &ParamPath::new("pop.xo")).is_err());
    }
}
