//! Generation loop over a speciated NEAT population.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{BreedError, BreedResult};
use crate::neat::genome::{NeatConfig, NeatGenome};
use crate::neat::innovation::InnovationLedger;
use crate::neat::species::{NeatIndividual, Subspecies};
use crate::pipeline::cmp_f32_nan_last;

/// Owns the subspecies and the innovation ledger they share.
#[derive(Debug)]
pub struct NeatBreeder {
    /// Settings shared by every subspecies.
    pub config: NeatConfig,
    /// Innovation record shared across generations and threads.
    pub ledger: Arc<InnovationLedger>,
    /// Subspecies in creation order; `breed` drops any left without members.
    pub species: Vec<Subspecies>,
    /// Id handed to the next subspecies founded.
    next_species_id: usize,
    /// Completed calls to `breed`.
    pub generation: u32,
}

impl NeatBreeder {
    #[must_use]
    pub fn new(config: NeatConfig, ledger: Arc<InnovationLedger>) -> Self {
        Self {
            config,
            ledger,
            species: Vec::new(),
            next_species_id: 0,
            generation: 0,
        }
    }

    /// `pop_size` fully connected genomes with random weights, speciated.
    pub fn spawn_population<R: Rng + ?Sized>(config: NeatConfig, rng: &mut R) -> Self {
        let mut breeder = Self::new(config, Arc::new(InnovationLedger::default()));
        let population = (0..breeder.config.pop_size)
            .map(|_| NeatIndividual::new(NeatGenome::fully_connected(&breeder.config, &breeder.ledger, rng)))
            .collect();
        breeder.speciate(population);
        breeder
    }

    /// Place each individual in the first subspecies whose representative is
    /// closer than `compat_threshold`, founding a new one otherwise.
    pub fn speciate(&mut self, individuals: Vec<NeatIndividual>) {
        for ind in individuals {
            let home = self.species.iter().position(|s| {
                ind.genome.compatibility(&s.representative, &self.config) < self.config.compat_threshold
            });
            match home {
                Some(i) => self.species[i].members.push(ind),
                None => {
                    self.species.push(Subspecies::new(self.next_species_id, ind));
                    self.next_species_id += 1;
                }
            }
        }
    }

    pub fn population(&self) -> impl Iterator<Item = &NeatIndividual> + '_ {
        self.species.iter().flat_map(|s| s.members.iter())
    }

    pub fn population_mut(&mut self) -> impl Iterator<Item = &mut NeatIndividual> + '_ {
        self.species.iter_mut().flat_map(|s| s.members.iter_mut())
    }

    #[must_use]
    pub fn population_len(&self) -> usize {
        self.species.iter().map(|s| s.members.len()).sum()
    }

    /// Score every member with `fitness` and mark it evaluated.
    pub fn evaluate<F>(&mut self, fitness: F)
    where
        F: Fn(&NeatGenome) -> f32 + Sync,
    {
        #[cfg(feature = "parallel")]
        self.species
            .par_iter_mut()
            .flat_map(|s| s.members.par_iter_mut())
            .for_each(|m| {
                m.fitness = fitness(&m.genome);
                m.evaluated = true;
            });
        #[cfg(not(feature = "parallel"))]
        for m in self.population_mut() {
            m.fitness = fitness(&m.genome);
            m.evaluated = true;
        }
    }

    /// Highest raw fitness in the current population.
    #[must_use]
    pub fn best(&self) -> Option<&NeatIndividual> {
        self.population()
            .max_by(|a, b| cmp_f32_nan_last(a.fitness, b.fitness))
    }

    /// Replace the population with the next generation.
    ///
    /// Offspring are apportioned by average adjusted fitness, rounded so the
    /// total is exactly `pop_size`, and re-speciated; subspecies left without
    /// members are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] for an empty population or an
    /// unevaluated member.
    pub fn breed<R: Rng + ?Sized>(&mut self, rng: &mut R) -> BreedResult<()> {
        let total_members = self.population_len();
        if total_members == 0 {
            return Err(BreedError::Invariant("cannot breed an empty population".to_string()));
        }
        if self.population().any(|m| !m.evaluated) {
            return Err(BreedError::Invariant("population has unevaluated members".to_string()));
        }

        for s in &mut self.species {
            s.adjust_fitness(&self.config);
        }
        let total: f64 = self.population().map(|m| f64::from(m.adjusted_fitness)).sum();
        let average = total / total_members as f64;
        for m in self.population_mut() {
            m.expected_offspring = (f64::from(m.adjusted_fitness) / average) as f32;
        }
        let mut skim = 0.0;
        for s in &mut self.species {
            skim = s.count_offspring(skim);
        }
        self.balance_offspring();

        let mut champions: Vec<(usize, NeatIndividual)> = self
            .species
            .iter()
            .filter_map(|s| s.champion().map(|c| (s.id, c.clone())))
            .collect();
        champions.sort_by(|a, b| cmp_f32_nan_last(b.1.fitness, a.1.fitness));

        let seeds: Vec<u64> = self.species.iter().map(|_| rng.random()).collect();
        let config = &self.config;
        let ledger = &*self.ledger;
        let champions = &champions;
        #[cfg(feature = "parallel")]
        self.species
            .par_iter_mut()
            .zip(seeds.par_iter())
            .try_for_each(|(s, &seed)| s.reproduce(config, ledger, champions, &mut ChaCha8Rng::seed_from_u64(seed)))?;
        #[cfg(not(feature = "parallel"))]
        for (s, &seed) in self.species.iter_mut().zip(&seeds) {
            s.reproduce(config, ledger, champions, &mut ChaCha8Rng::seed_from_u64(seed))?;
        }

        let offspring: Vec<NeatIndividual> =
            self.species.iter_mut().flat_map(Subspecies::advance_generation).collect();
        self.speciate(offspring);
        self.species.retain(|s| !s.members.is_empty());
        self.generation += 1;
        debug!(
            generation = self.generation,
            population = self.population_len(),
            species = self.species.len(),
            innovations = self.ledger.len(),
            "bred generation"
        );
        Ok(())
    }

    /// Push the summed subspecies quotas to exactly `pop_size`: the
    /// subspecies holding the best individual absorbs a shortfall, the
    /// largest quotas give up any surplus.
    fn balance_offspring(&mut self) {
        let target = self.config.pop_size;
        let assigned: usize = self.species.iter().map(|s| s.expected_offspring).sum();
        if assigned < target {
            let best = self
                .species
                .iter_mut()
                .filter(|s| !s.members.is_empty())
                .max_by(|a, b| cmp_f32_nan_last(a.members[0].fitness, b.members[0].fitness));
            if let Some(best) = best {
                best.expected_offspring += target - assigned;
            }
        } else {
            for _ in target..assigned {
                if let Some(largest) = self.species.iter_mut().max_by_key(|s| s.expected_offspring) {
                    largest.expected_offspring -= 1;
                }
            }
        }
    }
}
