use serde::{Deserialize, Serialize};

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::GpContext;
use crate::gp::tree::{GpTree, NodeFilter};
use crate::pipeline::Individual;

/// A GP individual: one or more trees plus a fitness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpIndividual {
    /// One tree per tree constraint, in context order.
    pub trees: Vec<GpTree>,
    /// Raw fitness, higher is better; meaningless until `evaluated`.
    pub fitness: f32,
    /// Cleared whenever breeding changes a tree.
    pub evaluated: bool,
}

impl GpIndividual {
    #[must_use]
    pub fn new(trees: Vec<GpTree>) -> Self {
        Self {
            trees,
            fitness: 0.0,
            evaluated: false,
        }
    }

    /// Total node count across all trees.
    #[must_use]
    pub fn size(&self) -> usize {
        self.trees.iter().map(|t| t.num_nodes(NodeFilter::All)).sum()
    }

    /// Check every tree against `ctx`. Decoded individuals must pass this
    /// before they are bred.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] naming the first broken tree.
    pub fn validate(&self, ctx: &GpContext) -> BreedResult<()> {
        if self.trees.is_empty() {
            return Err(BreedError::Invariant("individual has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.verify(ctx)
                .map_err(|e| BreedError::Invariant(format!("tree {}: {}", i, e)))?;
        }
        Ok(())
    }

    /// Same trees, node for node.
    #[must_use]
    pub fn structurally_eq(&self, other: &GpIndividual) -> bool {
        self.trees.len() == other.trees.len()
            && self
                .trees
                .iter()
                .zip(&other.trees)
                .all(|(a, b)| a.structurally_eq(b))
    }
}

impl Individual for GpIndividual {
    fn fitness(&self) -> f32 {
        self.fitness
    }

    fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    fn invalidate(&mut self) {
        self.evaluated = false;
    }
}
