//! NEAT individuals and subspecies reproduction.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{BreedError, BreedResult};
use crate::neat::genome::{NeatConfig, NeatGenome};
use crate::neat::innovation::InnovationLedger;
use crate::pipeline::{cmp_f32_nan_last, Individual};

/// Subspecies up to this age get `age_significance` applied.
const YOUTH_AGE: u32 = 10;

/// Multiplier applied to a stagnant subspecies' fitness.
const STAGNATION_PENALTY: f32 = 0.01;

/// Floor for adjusted fitness so every member keeps a nonzero share.
const MIN_ADJUSTED_FITNESS: f32 = 0.0001;

/// Subspecies with more expected offspring than this keep their champion unchanged.
const CHAMPION_CLONE_MIN_OFFSPRING: usize = 5;

/// Attempts at drawing a different subspecies for interspecies mating.
const OUTSIDE_MATE_TRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeatIndividual {
    pub genome: NeatGenome,
    /// Raw fitness, higher is better.
    pub fitness: f32,
    /// Fitness after sharing and age adjustments.
    pub adjusted_fitness: f32,
    /// Adjusted fitness divided by the population average.
    pub expected_offspring: f32,
    /// Set once `fitness` holds a value for the current genome.
    pub evaluated: bool,
    /// Below the survival cut of its subspecies.
    pub eliminate: bool,
    /// Best member of its subspecies.
    pub champion: bool,
}

impl NeatIndividual {
    #[must_use]
    pub fn new(genome: NeatGenome) -> Self {
        Self {
            genome,
            fitness: 0.0,
            adjusted_fitness: 0.0,
            expected_offspring: 0.0,
            evaluated: false,
            eliminate: false,
            champion: false,
        }
    }

    /// An unchanged copy for the next generation. Keeps the fitness.
    #[must_use]
    pub fn carry_over(&self) -> Self {
        let mut copy = self.clone();
        copy.adjusted_fitness = 0.0;
        copy.expected_offspring = 0.0;
        copy.eliminate = false;
        copy.champion = false;
        copy
    }
}

impl Individual for NeatIndividual {
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

/// A niche of compatible genomes.
///
/// Members are either eliminated or kept as parents by
/// [`adjust_fitness`](Self::adjust_fitness); offspring are staged in
/// `next_generation` until [`advance_generation`](Self::advance_generation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subspecies {
    /// Unique for the life of the breeder.
    pub id: usize,
    /// Generations since the subspecies was founded.
    pub age: u32,
    /// Age at which `max_fitness_ever` last rose.
    pub age_of_last_improvement: u32,
    /// Best raw fitness any member has reached.
    pub max_fitness_ever: f32,
    /// New individuals join the first subspecies whose representative is
    /// within the compatibility threshold.
    pub representative: NeatGenome,
    /// Current generation, best first after `adjust_fitness`.
    pub members: Vec<NeatIndividual>,
    /// Offspring staged by `reproduce`.
    pub next_generation: Vec<NeatIndividual>,
    /// Offspring quota for the coming generation.
    pub expected_offspring: usize,
}

impl Subspecies {
    #[must_use]
    pub fn new(id: usize, founder: NeatIndividual) -> Self {
        Self {
            id,
            age: 0,
            age_of_last_improvement: 0,
            max_fitness_ever: f32::MIN,
            representative: founder.genome.clone(),
            members: vec![founder],
            next_generation: Vec::new(),
            expected_offspring: 0,
        }
    }

    #[must_use]
    pub fn champion(&self) -> Option<&NeatIndividual> {
        self.members.first()
    }

    /// Members that survived the last [`adjust_fitness`](Self::adjust_fitness).
    #[must_use]
    pub fn survivors(&self) -> &[NeatIndividual] {
        let n = self.members.iter().take_while(|m| !m.eliminate).count();
        &self.members[..n]
    }

    /// Share fitness within the subspecies, sort members best first, and
    /// mark everyone below the survival threshold for elimination.
    ///
    /// A subspecies that has not improved for `dropoff_age` generations is
    /// penalized; a young one is scaled by `age_significance`.
    pub fn adjust_fitness(&mut self, config: &NeatConfig) {
        let size = self.members.len();
        if size == 0 {
            return;
        }
        let stagnant = self.age.saturating_sub(self.age_of_last_improvement) + 1 >= config.dropoff_age;
        for member in &mut self.members {
            let mut f = if member.fitness.is_nan() { 0.0 } else { member.fitness };
            if stagnant {
                f *= STAGNATION_PENALTY;
            }
            if self.age <= YOUTH_AGE {
                f *= config.age_significance;
            }
            if f <= 0.0 {
                f = MIN_ADJUSTED_FITNESS;
            }
            member.adjusted_fitness = f / size as f32;
            member.eliminate = false;
            member.champion = false;
        }
        self.members
            .sort_by(|a, b| cmp_f32_nan_last(b.fitness, a.fitness));

        let best = self.members[0].fitness;
        if best > self.max_fitness_ever {
            self.max_fitness_ever = best;
            self.age_of_last_improvement = self.age;
        }
        self.members[0].champion = true;

        let survivors = ((config.survival_threshold * size as f32).ceil() as usize).clamp(1, size);
        for member in &mut self.members[survivors..] {
            member.eliminate = true;
        }
        trace!(id = self.id, size, survivors, stagnant, "adjusted subspecies fitness");
    }

    /// Turn members' fractional expected-offspring counts into a whole
    /// number for the subspecies. Fractions accumulate in `skim` across
    /// subspecies; the leftover is returned for the next one.
    pub fn count_offspring(&mut self, mut skim: f64) -> f64 {
        let mut expected = 0usize;
        for member in &self.members {
            let e = f64::from(member.expected_offspring.max(0.0));
            expected += e.floor() as usize;
            skim += e.fract();
            if skim >= 1.0 {
                expected += skim.floor() as usize;
                skim = skim.fract();
            }
        }
        self.expected_offspring = expected;
        skim
    }

    /// Stage `expected_offspring` children in `next_generation`.
    ///
    /// A large subspecies first keeps its champion unchanged. Each other
    /// child is either a mutated copy of one survivor or a crossover of two.
    /// With `interspecies_mate_rate` the second parent is another
    /// subspecies' champion; `champions` must be `(id, champion)` pairs
    /// sorted best first, and the draw favors the front of that list.
    /// Mated children are mutated too, unless the `mate_only_prob` roll
    /// says otherwise and the parents differ.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] when offspring are expected from
    /// an empty subspecies.
    pub fn reproduce<R: Rng + ?Sized>(
        &mut self,
        config: &NeatConfig,
        ledger: &InnovationLedger,
        champions: &[(usize, NeatIndividual)],
        rng: &mut R,
    ) -> BreedResult<()> {
        if self.expected_offspring == 0 {
            return Ok(());
        }
        if self.members.is_empty() {
            return Err(BreedError::Invariant(format!(
                "subspecies {} expects {} offspring but has no members",
                self.id, self.expected_offspring
            )));
        }
        let n = self.members.iter().take_while(|m| !m.eliminate).count().max(1);
        let pool = &self.members[..n];
        let mating_total = config.mate_multipoint_prob + config.mate_multipoint_avg_prob;

        let mut champ_done = false;
        for _ in 0..self.expected_offspring {
            if !champ_done && self.expected_offspring > CHAMPION_CLONE_MIN_OFFSPRING {
                champ_done = true;
                self.next_generation.push(pool[0].carry_over());
                continue;
            }

            let mom = &pool[rng.random_range(0..pool.len())];
            if pool.len() == 1 || rng.random::<f32>() < config.mutate_only_prob {
                let mut genome = mom.genome.clone();
                genome.default_mutate(config, ledger, rng);
                self.next_generation.push(NeatIndividual::new(genome));
                continue;
            }

            let dad = if champions.is_empty() || rng.random::<f32>() >= config.interspecies_mate_rate {
                &pool[rng.random_range(0..pool.len())]
            } else {
                outside_mate(self.id, champions, rng)
            };
            let mut genome = if rng.random::<f32>() * mating_total < config.mate_multipoint_prob {
                mom.genome.mate_multipoint(mom.fitness, &dad.genome, dad.fitness, rng)
            } else {
                mom.genome.mate_multipoint_avg(mom.fitness, &dad.genome, dad.fitness, rng)
            };
            let same_parents =
                std::ptr::eq(mom, dad) || mom.genome.compatibility(&dad.genome, config) == 0.0;
            if same_parents || rng.random::<f32>() > config.mate_only_prob {
                genome.default_mutate(config, ledger, rng);
            }
            self.next_generation.push(NeatIndividual::new(genome));
        }
        debug!(
            id = self.id,
            offspring = self.next_generation.len(),
            parents = n,
            "subspecies reproduced"
        );
        Ok(())
    }

    /// Close the generation: the champion becomes the representative, the
    /// members are dropped, and the staged offspring are handed back for
    /// re-speciation.
    pub fn advance_generation(&mut self) -> Vec<NeatIndividual> {
        if let Some(champion) = self.members.first() {
            self.representative = champion.genome.clone();
        }
        self.members.clear();
        self.expected_offspring = 0;
        self.age += 1;
        std::mem::take(&mut self.next_generation)
    }
}

/// A champion drawn with a half-normal bias toward the front of
/// `champions`, avoiding `own` for a few tries.
fn outside_mate<'a, R: Rng + ?Sized>(
    own: usize,
    champions: &'a [(usize, NeatIndividual)],
    rng: &mut R,
) -> &'a NeatIndividual {
    let last = champions.len() - 1;
    let mut pick = 0;
    for _ in 0..OUTSIDE_MATE_TRIES {
        let g: f64 = StandardNormal.sample(rng);
        let mult = (g / 4.0).abs().min(1.0);
        pick = (mult * last as f64).round() as usize;
        if champions[pick].0 != own {
            break;
        }
    }
    &champions[pick].1
}
