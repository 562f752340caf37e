//! GP breeding stages.
//!
//! [`GpOperator`] closes the set of tree operators; [`GpPipeline`] wires one
//! of them to upstream sources and exposes it as a [`BreedingSource`].

use std::sync::Arc;

use rand::{Rng, RngCore};
use tracing::trace;

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::GpContext;
use crate::gp::crossover::{CrossoverMode, SubtreeCrossover};
use crate::gp::demote::MutateDemote;
use crate::gp::individual::GpIndividual;
use crate::gp::internal::InternalCrossover;
use crate::gp::mutate::{MutateAllNodes, MutateErc};
use crate::gp::rehang::MutateRehang;
use crate::params::{ParamPath, Parameters};
use crate::pipeline::BreedingSource;
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub enum GpOperator {
    Crossover(SubtreeCrossover),
    Internal(InternalCrossover),
    AllNodes(MutateAllNodes),
    Demote(MutateDemote),
    Rehang(MutateRehang),
    Erc(MutateErc),
}

impl GpOperator {
    /// # Errors
    ///
    /// Propagates the operator's own [`BreedError::Config`] failures.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        match self {
            GpOperator::Crossover(op) => op.setup(params, base),
            GpOperator::Internal(op) => op.setup(params, base),
            GpOperator::AllNodes(op) => op.setup(params, base),
            GpOperator::Demote(op) => op.setup(params, base),
            GpOperator::Rehang(op) => op.setup(params, base),
            GpOperator::Erc(op) => op.setup(params, base),
        }
    }

    #[must_use]
    pub fn parents_needed(&self) -> usize {
        match self {
            GpOperator::Crossover(_) => 2,
            _ => 1,
        }
    }

    #[must_use]
    pub fn typical_count(&self) -> usize {
        match self {
            GpOperator::Crossover(op) => op.typical_count(),
            _ => 1,
        }
    }

    /// Breed `parents` (exactly [`parents_needed`](Self::parents_needed) of them).
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] for a wrong parent count, and
    /// propagates operator errors.
    pub fn breed<R: Rng + ?Sized>(
        &mut self,
        parents: &[GpIndividual],
        rng: &mut R,
    ) -> BreedResult<Vec<GpIndividual>> {
        if parents.len() != self.parents_needed() {
            return Err(BreedError::Invariant(format!(
                "operator needs {} parents, got {}",
                self.parents_needed(),
                parents.len()
            )));
        }
        match self {
            GpOperator::Crossover(op) => op.breed(&parents[0], &parents[1], rng),
            GpOperator::Internal(op) => op.breed(&parents[0], rng).map(|c| vec![c]),
            GpOperator::AllNodes(op) => op.breed(&parents[0], rng).map(|c| vec![c]),
            GpOperator::Demote(op) => op.breed(&parents[0], rng).map(|c| vec![c]),
            GpOperator::Rehang(op) => op.breed(&parents[0], rng).map(|c| vec![c]),
            GpOperator::Erc(op) => op.breed(&parents[0], rng).map(|c| vec![c]),
        }
    }
}

/// Operators by tag, each constructed around the shared context.
#[must_use]
pub fn operator_registry() -> Registry<GpOperator, Arc<GpContext>> {
    let mut registry = Registry::new();
    registry.register("size-fair", |ctx: &Arc<GpContext>| {
        GpOperator::Crossover(SubtreeCrossover::new(ctx.clone(), CrossoverMode::SizeFair))
    });
    registry.register("homologous", |ctx: &Arc<GpContext>| {
        GpOperator::Crossover(SubtreeCrossover::new(ctx.clone(), CrossoverMode::Homologous))
    });
    registry.register("internal", |ctx: &Arc<GpContext>| {
        GpOperator::Internal(InternalCrossover::new(ctx.clone()))
    });
    registry.register("mutate-all-nodes", |ctx: &Arc<GpContext>| {
        GpOperator::AllNodes(MutateAllNodes::new(ctx.clone()))
    });
    registry.register("mutate-demote", |ctx: &Arc<GpContext>| {
        GpOperator::Demote(MutateDemote::new(ctx.clone()))
    });
    registry.register("mutate-rehang", |ctx: &Arc<GpContext>| {
        GpOperator::Rehang(MutateRehang::new(ctx.clone()))
    });
    registry.register("mutate-erc", |ctx: &Arc<GpContext>| {
        GpOperator::Erc(MutateErc::new(ctx.clone()))
    });
    registry
}

/// An operator fed by upstream sources. A two-parent operator with a single
/// source draws both parents from it.
pub struct GpPipeline {
    /// Breeding step applied to the gathered parents.
    pub operator: GpOperator,
    /// One source per parent slot, or a single shared source.
    sources: Vec<Box<dyn BreedingSource<GpIndividual>>>,
    /// Scratch buffer reused between calls.
    parents: Vec<GpIndividual>,
}

impl GpPipeline {
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] when no source is given.
    pub fn new(
        operator: GpOperator,
        // One source per parent slot, or a single shared source.
        sources: Vec<Box<dyn BreedingSource<GpIndividual>>>,
    ) -> BreedResult<Self> {
        if sources.is_empty() {
            return Err(BreedError::config("gp.breed.source", "pipeline has no sources"));
        }
        Ok(Self {
            operator,
            sources,
            parents: Vec::with_capacity(2),
        })
    }

    /// Resolve the operator tag stored at `base` (default `gp.breed`), set
    /// it up from `base.*`, and attach `sources`.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for a missing or unknown tag, bad
    /// operator parameters, or no sources.
    pub fn configure(
        params: &Parameters,
        base: &ParamPath,
        ctx: &Arc<GpContext>,
        // One source per parent slot, or a single shared source.
        sources: Vec<Box<dyn BreedingSource<GpIndividual>>>,
    ) -> BreedResult<Self> {
        let mut operator = operator_registry().resolve(params, base, &ParamPath::new("gp.breed"), ctx)?;
        operator.setup(params, base)?;
        Self::new(operator, sources)
    }
}

impl BreedingSource<GpIndividual> for GpPipeline {
    fn produce(
        &mut self,
        min: usize,
        max: usize,
        out: &mut Vec<GpIndividual>,
        rng: &mut dyn RngCore,
        thread: usize,
    ) -> BreedResult<usize> {
        let max = max.max(min);
        let needed = self.operator.parents_needed();
        let last = self.sources.len() - 1;
        let mut produced = 0;
        while produced < min {
            self.parents.clear();
            for i in 0..needed {
                let source = &mut self.sources[i.min(last)];
                if source.produce(1, 1, &mut self.parents, &mut *rng, thread)? == 0 {
                    return Err(BreedError::Invariant("upstream source produced nothing".to_string()));
                }
            }
            let children = self.operator.breed(&self.parents, &mut *rng)?;
            for child in children.into_iter().take(max - produced) {
                out.push(child);
                produced += 1;
            }
        }
        trace!(thread, produced, "gp pipeline produced offspring");
        Ok(produced)
    }

    fn typical_count(&self) -> usize {
        self.operator.typical_count()
    }

    fn duplicate(&self) -> Box<dyn BreedingSource<GpIndividual>> {
        Box::new(GpPipeline {
            operator: self.operator.clone(),
            sources: self.sources.iter().map(|s| s.duplicate()).collect(),
            parents: Vec::with_capacity(2),
        })
    }
}
