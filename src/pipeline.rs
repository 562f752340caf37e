//! The breeding-pipeline contract shared by GP and NEAT individuals.
//!
//! A pipeline stage pulls parents from upstream [`BreedingSource`]s and writes
//! offspring into a caller-supplied buffer. Stages are duplicated per worker
//! thread so that selectors and scratch buffers are never shared; each thread
//! also owns its own deterministic generator (see [`thread_rngs`]).

use std::cmp::Ordering;
use std::sync::Arc;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{BreedError, BreedResult};
use crate::params::{ParamPath, Parameters};

/// Anything the breeding core can produce and select.
pub trait Individual: Clone + Send + Sync {
    /// Raw fitness, higher is better.
    fn fitness(&self) -> f32;
    /// Whether the fitness is current.
    fn is_evaluated(&self) -> bool;
    /// Mark as needing evaluation after a structural change.
    fn invalidate(&mut self);
}

/// A producer of individuals.
pub trait BreedingSource<I: Individual>: Send {
    /// Produce between `min` and `max` individuals, appending them to `out`.
    /// Returns how many were appended.
    ///
    /// # Errors
    ///
    /// Propagates configuration and invariant errors from the stage or its sources.
    fn produce(
        &mut self,
        min: usize,
        max: usize,
        out: &mut Vec<I>,
        rng: &mut dyn RngCore,
        thread: usize,
    ) -> BreedResult<usize>;

    /// How many individuals one natural invocation yields (2 for a
    /// two-child crossover, 1 otherwise).
    fn typical_count(&self) -> usize {
        1
    }

    /// A fresh copy for another worker thread.
    fn duplicate(&self) -> Box<dyn BreedingSource<I>>;
}

/// Compare two f32 values, treating NaN as less than all other values.
/// NaN-fitness individuals therefore lose every comparison.
#[must_use]
pub fn cmp_f32_nan_last(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// One deterministic generator per worker thread, derived from a base seed.
#[must_use]
pub fn thread_rngs(seed: u64, threads: usize) -> Vec<ChaCha8Rng> {
    (0..threads)
        .map(|thread| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(thread as u64);
            rng
        })
        .collect()
}

/// Tournament selection over a shared, read-only population.
#[derive(Debug, Clone)]
pub struct TournamentSource<I> {
    /// Shared, so duplicated sources do not copy the population.
    population: Arc<Vec<I>>,
    /// Number of contestants per tournament.
    pub size: usize,
}

impl<I: Individual> TournamentSource<I> {
    #[must_use]
    pub fn new(population: Arc<Vec<I>>, size: usize) -> Self {
        Self { population, size }
    }

    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("select.tournament")
    }

    /// Read `size` from parameters.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] if the size is not positive.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        self.size = params.get_positive(&base.push("size"), &def.push("size"), self.size)?;
        Ok(())
    }

    /// Replace the population selected from (one per generation).
    pub fn set_population(&mut self, population: Arc<Vec<I>>) {
        self.population = population;
    }

    /// Index of the tournament winner.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.population.is_empty() {
            return None;
        }
        let mut best = rng.random_range(0..self.population.len());
        for _ in 1..self.size.max(1) {
            let contender = rng.random_range(0..self.population.len());
            if cmp_f32_nan_last(
                self.population[contender].fitness(),
                self.population[best].fitness(),
            ) == Ordering::Greater
            {
                best = contender;
            }
        }
        Some(best)
    }
}

impl<I: Individual + 'static> BreedingSource<I> for TournamentSource<I> {
    fn produce(
        &mut self,
        min: usize,
        _max: usize,
        out: &mut Vec<I>,
        rng: &mut dyn RngCore,
        _thread: usize,
    ) -> BreedResult<usize> {
        for _ in 0..min {
            let idx = self
                .select(rng)
                .ok_or_else(|| BreedError::config(Self::default_base(), "empty population"))?;
            out.push(self.population[idx].clone());
        }
        Ok(min)
    }

    fn duplicate(&self) -> Box<dyn BreedingSource<I>> {
        Box::new(self.clone())
    }
}
