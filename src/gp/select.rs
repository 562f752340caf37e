//! Node selection strategies.
//!
//! A selector picks one node of a tree. Operators call [`NodeSelector::reset`]
//! before picking from a new tree so per-call caches never leak between trees;
//! an empty candidate set is `None`, which the operator's retry loop absorbs.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{BreedError, BreedResult};
use crate::gp::tree::{GpNodeId, GpTree, NodeFilter};
use crate::params::{ParamPath, Parameters};
use crate::registry::Registry;

/// Node counts of the tree currently being picked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    /// Leaves in the tree.
    pub terminals: usize,
    /// Nodes with at least one child.
    pub nonterminals: usize,
    /// Total node count.
    pub all: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSelector {
    /// Every node equally likely.
    Uniform,
    /// Pick the root, a nonterminal, a terminal or any node with the given
    /// probabilities (the remainder goes to "any node").
    KindWeighted {
        terminal: f32,
        nonterminal: f32,
        root: f32,
        #[serde(skip)]
        counts: Option<KindCounts>,
    },
    /// Sample `size` nodes uniformly and keep the deepest (or shallowest).
    DepthTournament { size: usize, prefer_deep: bool },
}

impl Default for NodeSelector {
    fn default() -> Self {
        Self::kind_weighted(0.1, 0.9, 0.0)
    }
}

impl NodeSelector {
    #[must_use]
    pub fn kind_weighted(terminal: f32, nonterminal: f32, root: f32) -> Self {
        NodeSelector::KindWeighted {
            terminal,
            nonterminal,
            root,
            counts: None,
        }
    }

    #[must_use]
    pub fn default_base(&self) -> ParamPath {
        ParamPath::new(match self {
            NodeSelector::Uniform => "gp.ns.uniform",
            NodeSelector::KindWeighted { .. } => "gp.ns.kind-weighted",
            NodeSelector::DepthTournament { .. } => "gp.ns.depth-tournament",
        })
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for probabilities outside `[0, 1]`, a
    /// probability sum above 1, or a non-positive tournament size.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = self.default_base();
        match self {
            NodeSelector::Uniform => {}
            NodeSelector::KindWeighted {
                terminal,
                nonterminal,
                root,
                counts,
            } => {
                *terminal =
                    params.get_probability(&base.push("terminals"), &def.push("terminals"), *terminal)?;
                *nonterminal = params.get_probability(
                    &base.push("nonterminals"),
                    &def.push("nonterminals"),
                    *nonterminal,
                )?;
                *root = params.get_probability(&base.push("root"), &def.push("root"), *root)?;
                if *terminal + *nonterminal + *root > 1.0 + f32::EPSILON {
                    return Err(BreedError::config(
                        base,
                        "terminal, nonterminal and root probabilities sum above 1",
                    ));
                }
                *counts = None;
            }
            NodeSelector::DepthTournament { size, prefer_deep } => {
                *size = params.get_positive(&base.push("size"), &def.push("size"), *size)?;
                *prefer_deep =
                    params.get_bool(&base.push("prefer-deep"), &def.push("prefer-deep"), *prefer_deep)?;
            }
        }
        Ok(())
    }

    /// Forget anything cached about the last tree.
    pub fn reset(&mut self) {
        if let NodeSelector::KindWeighted { counts, .. } = self {
            *counts = None;
        }
    }

    /// Pick a node of `tree`, or `None` if the tree has no candidate.
    pub fn pick<R: Rng + ?Sized>(&mut self, tree: &GpTree, rng: &mut R) -> Option<GpNodeId> {
        if tree.is_empty() {
            return None;
        }
        match self {
            NodeSelector::Uniform => {
                let n = rng.random_range(0..tree.len());
                tree.node_in_position(n, NodeFilter::All)
            }
            NodeSelector::KindWeighted {
                terminal,
                nonterminal,
                root,
                counts,
            } => {
                let c = *counts.get_or_insert_with(|| {
                    let terminals = tree.num_nodes(NodeFilter::Terminals);
                    KindCounts {
                        terminals,
                        nonterminals: tree.len() - terminals,
                        all: tree.len(),
                    }
                });
                let r: f32 = rng.random();
                if r < *root {
                    Some(tree.root())
                } else if r < *root + *nonterminal {
                    if c.nonterminals > 0 {
                        let n = rng.random_range(0..c.nonterminals);
                        tree.node_in_position(n, NodeFilter::Nonterminals)
                    } else {
                        let n = rng.random_range(0..c.terminals);
                        tree.node_in_position(n, NodeFilter::Terminals)
                    }
                } else if r < *root + *nonterminal + *terminal {
                    let n = rng.random_range(0..c.terminals);
                    tree.node_in_position(n, NodeFilter::Terminals)
                } else {
                    let n = rng.random_range(0..c.all);
                    tree.node_in_position(n, NodeFilter::All)
                }
            }
            NodeSelector::DepthTournament { size, prefer_deep } => {
                let nodes = tree.preorder(tree.root());
                let mut best = nodes[rng.random_range(0..nodes.len())];
                let mut best_depth = tree.at_depth(best);
                for _ in 1..(*size).max(1) {
                    let contender = nodes[rng.random_range(0..nodes.len())];
                    let depth = tree.at_depth(contender);
                    let better = if *prefer_deep {
                        depth > best_depth
                    } else {
                        depth < best_depth
                    };
                    if better {
                        best = contender;
                        best_depth = depth;
                    }
                }
                Some(best)
            }
        }
    }
}

/// Selectors by tag: `uniform`, `kind-weighted` and `depth-tournament`.
#[must_use]
pub fn selector_registry() -> Registry<NodeSelector> {
    let mut registry = Registry::new();
    registry.register("uniform", |_: &()| NodeSelector::Uniform);
    registry.register("kind-weighted", |_: &()| NodeSelector::default());
    registry.register("depth-tournament", |_: &()| NodeSelector::DepthTournament {
        size: 7,
        prefer_deep: true,
    });
    registry
}

/// Resolve `<base>.ns` (default `gp.ns`) to a selector and set it up from
/// `<base>.ns.*`.
///
/// # Errors
///
/// Returns [`BreedError::Config`] for an unknown tag or bad selector parameters.
pub fn configure_selector(params: &Parameters, base: &ParamPath) -> BreedResult<NodeSelector> {
    let path = base.push("ns");
    let mut selector = match params.lookup(&path, &ParamPath::new("gp.ns")) {
        None => NodeSelector::default(),
        Some(_) => selector_registry().resolve(params, &path, &ParamPath::new("gp.ns"), &())?,
    };
    selector.setup(params, &path)?;
    Ok(selector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::constraints::{GpContext, GpContextBuilder};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ctx() -> GpContext {
        GpContextBuilder::typeless()
            .function("+", 2)
            .terminal("x")
            .build()
            .unwrap()
    }

    #[test]
    fn test_kind_weighted_all_nonterminals() {
        let ctx = ctx();
        let tree = GpTree::parse_lisp(&ctx, 0, "(+ (+ x x) x)").unwrap();
        let mut selector = NodeSelector::kind_weighted(0.0, 1.0, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..50 {
            let id = selector.pick(&tree, &mut rng).unwrap();
            assert!(!tree.node(id).is_terminal());
        }
    }

    #[test]
    fn test_kind_weighted_falls_back_to_terminal_on_leaf() {
        let ctx = ctx();
        let tree = GpTree::parse_lisp(&ctx, 0, "x").unwrap();
        let mut selector = NodeSelector::kind_weighted(0.0, 1.0, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        assert_eq!(selector.pick(&tree, &mut rng), Some(tree.root()));
    }

    #[test]
    fn test_reset_clears_cached_counts() {
        let ctx = ctx();
        let big = GpTree::parse_lisp(&ctx, 0, "(+ (+ x x) (+ x x))").unwrap();
        let small = GpTree::parse_lisp(&ctx, 0, "(+ x x)").unwrap();
        let mut selector = NodeSelector::kind_weighted(0.0, 1.0, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        selector.pick(&big, &mut rng);
        selector.reset();
        for _ in 0..20 {
            assert!(selector.pick(&small, &mut rng).is_some());
        }
    }

    #[test]
    fn test_depth_tournament_prefers_deep() {
        let ctx = ctx();
        let tree = GpTree::parse_lisp(&ctx, 0, "(+ (+ (+ x x) x) x)").unwrap();
        let mut selector = NodeSelector::DepthTournament {
            size: 64,
            prefer_deep: true,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let id = selector.pick(&tree, &mut rng).unwrap();
        assert_eq!(tree.at_depth(id), 3);
    }

    #[test]
    fn test_configure_from_registry() {
        let mut params = Parameters::new();
        params.set("gp.ns", "depth-tournament");
        params.set("gp.ns.size", "3");
        params.set("gp.ns.prefer-deep", "false");
        let selector = configure_selector(&params, &ParamPath::new("gp")).unwrap();
        assert_eq!(
            selector,
            NodeSelector::DepthTournament {
                size: 3,
                prefer_deep: false
            }
        );

        params.set("gp.ns", "roulette");
        assert!(configure_selector(&params, &ParamPath::new("gp")).is_err());
    }
}
