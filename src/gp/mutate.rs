//! Shape-preserving mutations: all-nodes replacement and ERC re-sampling.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::{FuncId, GpContext, NodeKind};
use crate::gp::crossover::choose_tree;
use crate::gp::individual::GpIndividual;
use crate::gp::select::{configure_selector, NodeSelector};
use crate::gp::tree::{GpNodeId, GpTree};
use crate::params::{ParamPath, Parameters};
use crate::pipeline::Individual;

/// Replace every node of a chosen subtree with a random node of the same
/// arity that fits both its slot and its (original) children.
#[derive(Debug, Clone)]
pub struct MutateAllNodes {
    /// Fixed tree to mutate, or random when `None`.
    pub tree: Option<usize>,
    /// Picks the subtree whose nodes are rewritten.
    pub selector: NodeSelector,
    ctx: Arc<GpContext>,
}

impl MutateAllNodes {
    #[must_use]
    pub fn new(ctx: Arc<GpContext>) -> Self {
        Self {
            tree: None,
            selector: NodeSelector::default(),
            ctx,
        }
    }

    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("gp.breed.mutate-all-nodes")
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for a bad tree index or selector.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        self.tree = params.get_tree_index(&base.push("tree.0"), &def.push("tree.0"))?;
        self.selector = configure_selector(params, base)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for an out-of-range fixed tree.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        parent: &GpIndividual,
        rng: &mut R,
    ) -> BreedResult<GpIndividual> {
        let ctx = &*self.ctx;
        let t = choose_tree(self.tree, parent.trees.len(), &Self::default_base().push("tree.0"), rng)?;
        let mut child = parent.clone();
        self.selector.reset();
        let Some(top) = self.selector.pick(&child.trees[t], rng) else {
            return Ok(child);
        };

        let tree = &mut child.trees[t];
        for id in tree.preorder(top) {
            let Some(f) = compatible_replacement(ctx, tree, id, rng) else {
                return Err(BreedError::Invariant(
                    "no replacement fits a node's own signature".to_string(),
                ));
            };
            let value = ctx.sample_erc(f, rng);
            let node = &mut tree.nodes[id];
            node.func = f;
            node.value = value;
        }
        child.invalidate();
        Ok(child)
    }
}

/// A uniformly chosen function whose arity matches `id`'s, whose return type
/// fits `id`'s slot, and whose child slots accept `id`'s current children.
fn compatible_replacement<R: Rng + ?Sized>(
    ctx: &GpContext,
    tree: &GpTree,
    id: GpNodeId,
    rng: &mut R,
) -> Option<FuncId> {
    let node = tree.node(id);
    let fs = ctx.tree_function_set(tree.constraints);
    let arity = node.children.len();
    if ctx.types.is_typeless() {
        return fs.by_arity(arity).choose(rng).copied();
    }

    let slot = tree.slot_type(ctx, id);
    let pool = if arity == 0 {
        fs.terminals(slot)
    } else {
        fs.nonterminals(slot)
    };
    let eligible: Vec<FuncId> = pool
        .iter()
        .copied()
        .filter(|&f| {
            let sig = ctx.signature(f);
            sig.arity() == arity
                && node.children.iter().zip(&sig.child_types).all(|(&c, &want)| {
                    ctx.types.compatible(tree.return_type(ctx, c), want)
                })
        })
        .collect();
    eligible.choose(rng).copied()
}

/// Re-sample (or perturb) every ERC in a chosen subtree.
#[derive(Debug, Clone)]
pub struct MutateErc {
    /// Fixed tree to mutate, or random when `None`.
    pub tree: Option<usize>,
    /// Gaussian step size; `None` re-samples uniformly from the ERC's range.
    pub sigma: Option<f64>,
    /// Picks the subtree whose constants change (default: the root).
    pub selector: NodeSelector,
    ctx: Arc<GpContext>,
}

impl MutateErc {
    #[must_use]
    pub fn new(ctx: Arc<GpContext>) -> Self {
        Self {
            tree: None,
            sigma: None,
            // The root, so every constant in the tree is touched.
            selector: NodeSelector::kind_weighted(0.0, 0.0, 1.0),
            ctx,
        }
    }

    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("gp.breed.mutate-erc")
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for a bad tree index, a non-positive
    /// sigma, or a bad selector.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        self.tree = params.get_tree_index(&base.push("tree.0"), &def.push("tree.0"))?;
        self.sigma = params.get(&base.push("sigma"), &def.push("sigma"))?;
        if let Some(sigma) = self.sigma {
            if !(sigma > 0.0 && sigma.is_finite()) {
                return Err(BreedError::config(base.push("sigma"), format!("must be > 0, got {}", sigma)));
            }
        }
        if params.lookup(&base.push("ns"), &ParamPath::new("gp.ns")).is_some() {
            self.selector = configure_selector(params, base)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for an out-of-range fixed tree or a
    /// sigma that is not positive and finite.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        parent: &GpIndividual,
        rng: &mut R,
    ) -> BreedResult<GpIndividual> {
        let ctx = &*self.ctx;
        let step = match self.sigma {
            Some(sigma) if sigma > 0.0 && sigma.is_finite() => Normal::new(0.0, sigma).ok(),
            Some(sigma) => {
                return Err(BreedError::config(
                    Self::default_base().push("sigma"),
                    format!("must be > 0, got {}", sigma),
                ))
            }
            None => None,
        };
        let t = choose_tree(self.tree, parent.trees.len(), &Self::default_base().push("tree.0"), rng)?;
        let mut child = parent.clone();
        self.selector.reset();
        let Some(top) = self.selector.pick(&child.trees[t], rng) else {
            return Ok(child);
        };

        let tree = &mut child.trees[t];
        let mut touched = 0usize;
        for id in tree.preorder(top) {
            let f = tree.nodes[id].func;
            let NodeKind::Erc { min, max } = ctx.function(f).kind else {
                continue;
            };
            let value = match &step {
                Some(step) => (tree.nodes[id].value + step.sample(rng)).clamp(min, max),
                None => ctx.sample_erc(f, rng),
            };
            tree.nodes[id].value = value;
            touched += 1;
        }
        if touched == 0 {
            debug!("no ERC below the chosen node");
            return Ok(child);
        }
        child.invalidate();
        Ok(child)
    }
}
