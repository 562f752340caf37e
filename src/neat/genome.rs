//! NEAT genomes and their structural operators.
//!
//! A [`NeatGenome`] is a node list sorted by id and a gene list sorted by
//! innovation. Structural mutations number their changes through a shared
//! [`InnovationLedger`], and crossover lines genes up by those numbers.

use std::cmp::Ordering;

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{BreedError, BreedResult};
use crate::neat::activation::Activation;
use crate::neat::gene::{LinkGene, NodeGene, NodeKey, NodeRole};
use crate::neat::innovation::InnovationLedger;
use crate::neat::topology::{GraphTopology, PathStatus};
use crate::params::{ParamPath, Parameters};
use crate::pipeline::cmp_f32_nan_last;

/// Chance that add-node settles on each eligible gene it walks past.
const SPLIT_STOP_PROB: f64 = 0.7;

/// Chance that a matching gene disabled in either parent is disabled in the child.
const INHERIT_DISABLED_PROB: f64 = 0.75;

/// Genome layout, mutation rates, compatibility coefficients and
/// reproduction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeatConfig {
    /// Number of input nodes (excluding bias).
    pub num_inputs: usize,
    /// Number of output nodes (default: 1).
    pub num_outputs: usize,
    /// Add a bias sensor that always reads 1.0 (default: true).
    pub use_bias: bool,
    /// Activation of output nodes (default: NEAT sigmoid).
    pub output_activation: Activation,
    /// New hidden nodes draw their activation from this list.
    pub hidden_activations: Vec<Activation>,

    /// New link weights are drawn from `[-weight_range, weight_range]`.
    pub weight_range: f32,
    /// Mutated weights are clamped to `[-weight_cap, weight_cap]`.
    pub weight_cap: f32,
    /// Largest perturbation applied to a weight per mutation (default: 2.5).
    pub weight_mutation_power: f32,
    /// Chance that a weight is replaced outright instead of perturbed.
    pub weight_replace_prob: f32,

    /// Chance of splitting a link with a new node, 0.0-1.0 (default: 0.03).
    pub mutate_add_node_prob: f32,
    /// Chance of adding a new link, 0.0-1.0 (default: 0.05).
    pub mutate_add_link_prob: f32,
    /// Chance of perturbing link weights, 0.0-1.0 (default: 0.9).
    pub mutate_link_weights_prob: f32,
    /// Chance of flipping one gene's enabled flag, 0.0-1.0 (default: 0.01).
    pub mutate_toggle_enable_prob: f32,
    /// Chance of re-enabling the first disabled gene, 0.0-1.0 (default: 0.01).
    pub mutate_gene_reenable_prob: f32,
    /// Chance that add-link looks only for a recurrent link.
    pub recur_only_prob: f32,
    /// Random node pairs add-link tries before giving up (default: 20).
    pub newlink_tries: usize,

    /// Compatibility weight of disjoint genes (default: 1.0).
    pub disjoint_coeff: f32,
    /// Compatibility weight of excess genes (default: 1.0).
    pub excess_coeff: f32,
    /// Compatibility weight of the mean mutation-number difference of matching genes (default: 0.4).
    pub mutdiff_coeff: f32,
    /// Genomes closer than this share a subspecies (default: 3.0).
    pub compat_threshold: f32,

    /// Individuals per generation (default: 150).
    pub pop_size: usize,
    /// Subspecies that have not improved for this many generations are penalized.
    pub dropoff_age: u32,
    /// Fitness multiplier for subspecies at most ten generations old.
    pub age_significance: f32,
    /// Fraction of each subspecies kept as parents, 0.0-1.0 (default: 0.2).
    pub survival_threshold: f32,
    /// Chance that a non-champion offspring comes from mutation alone.
    pub mutate_only_prob: f32,
    /// Relative weight of multipoint mating (default: 0.6).
    pub mate_multipoint_prob: f32,
    /// Relative weight of multipoint-average mating (default: 0.4).
    pub mate_multipoint_avg_prob: f32,
    /// Chance that a mated offspring skips the extra mutation pass.
    pub mate_only_prob: f32,
    /// Chance that a mate comes from another subspecies (default: 0.001).
    pub interspecies_mate_rate: f32,
}

impl Default for NeatConfig {
    fn default() -> Self {
        Self {
            num_inputs: 2,
            num_outputs: 1,
            use_bias: true,
            output_activation: Activation::NeatSigmoid,
            hidden_activations: vec![Activation::NeatSigmoid],
            weight_range: 1.0,
            weight_cap: 8.0,
            weight_mutation_power: 2.5,
            weight_replace_prob: 0.1,
            mutate_add_node_prob: 0.03,
            mutate_add_link_prob: 0.05,
            mutate_link_weights_prob: 0.9,
            mutate_toggle_enable_prob: 0.01,
            mutate_gene_reenable_prob: 0.01,
            recur_only_prob: 0.0,
            newlink_tries: 20,
            disjoint_coeff: 1.0,
            excess_coeff: 1.0,
            mutdiff_coeff: 0.4,
            compat_threshold: 3.0,
            pop_size: 150,
            dropoff_age: 15,
            age_significance: 1.0,
            survival_threshold: 0.2,
            mutate_only_prob: 0.25,
            mate_multipoint_prob: 0.6,
            mate_multipoint_avg_prob: 0.4,
            mate_only_prob: 0.2,
            interspecies_mate_rate: 0.001,
        }
    }
}

impl NeatConfig {
    #[must_use]
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            num_outputs,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("neat")
    }

    /// Read every field from `base.<kebab-name>`, falling back to `neat.*`
    /// and then to the current value.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for unparsable values, probabilities
    /// outside `[0, 1]`, non-positive counts or ranges, and when both mating
    /// probabilities are zero.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        let at = |key: &str| (base.push(key), def.push(key));
        let prob = |key: &str, fallback: f32| {
            let (path, default) = at(key);
            params.get_probability(&path, &default, fallback)
        };
        let count = |key: &str, fallback: usize| {
            let (path, default) = at(key);
            params.get_positive(&path, &default, fallback)
        };
        let real = |key: &str, fallback: f32, strict: bool| {
            let (path, default) = at(key);
            real_param(params, &path, &default, fallback, strict)
        };

        self.num_inputs = count("num-inputs", self.num_inputs)?;
        self.num_outputs = count("num-outputs", self.num_outputs)?;
        let (path, default) = at("use-bias");
        self.use_bias = params.get_bool(&path, &default, self.use_bias)?;
        let (path, default) = at("output-activation");
        self.output_activation = params.get_or(&path, &default, self.output_activation)?;
        let (path, default) = at("hidden-activations");
        if let Some((list, key)) = params.lookup(&path, &default) {
            self.hidden_activations = list
                .split(',')
                .map(|name| name.trim().parse::<Activation>())
                .collect::<Result<_, _>>()
                .map_err(|e| BreedError::config(&key, e))?;
        }

        self.weight_range = real("weight-range", self.weight_range, true)?;
        self.weight_cap = real("weight-cap", self.weight_cap, true)?;
        self.weight_mutation_power = real("weight-mutation-power", self.weight_mutation_power, false)?;
        self.weight_replace_prob = prob("weight-replace-prob", self.weight_replace_prob)?;

        self.mutate_add_node_prob = prob("mutate-add-node-prob", self.mutate_add_node_prob)?;
        self.mutate_add_link_prob = prob("mutate-add-link-prob", self.mutate_add_link_prob)?;
        self.mutate_link_weights_prob = prob("mutate-link-weights-prob", self.mutate_link_weights_prob)?;
        self.mutate_toggle_enable_prob = prob("mutate-toggle-enable-prob", self.mutate_toggle_enable_prob)?;
        self.mutate_gene_reenable_prob = prob("mutate-gene-reenable-prob", self.mutate_gene_reenable_prob)?;
        self.recur_only_prob = prob("recur-only-prob", self.recur_only_prob)?;
        self.newlink_tries = count("newlink-tries", self.newlink_tries)?;

        self.disjoint_coeff = real("disjoint-coeff", self.disjoint_coeff, false)?;
        self.excess_coeff = real("excess-coeff", self.excess_coeff, false)?;
        self.mutdiff_coeff = real("mutdiff-coeff", self.mutdiff_coeff, false)?;
        self.compat_threshold = real("compat-threshold", self.compat_threshold, true)?;

        self.pop_size = count("pop-size", self.pop_size)?;
        let (path, default) = at("dropoff-age");
        self.dropoff_age = params.get_or(&path, &default, self.dropoff_age)?;
        self.age_significance = real("age-significance", self.age_significance, false)?;
        self.survival_threshold = prob("survival-threshold", self.survival_threshold)?;
        self.mutate_only_prob = prob("mutate-only-prob", self.mutate_only_prob)?;
        self.mate_multipoint_prob = prob("mate-multipoint-prob", self.mate_multipoint_prob)?;
        self.mate_multipoint_avg_prob = prob("mate-multipoint-avg-prob", self.mate_multipoint_avg_prob)?;
        self.mate_only_prob = prob("mate-only-prob", self.mate_only_prob)?;
        self.interspecies_mate_rate = prob("interspecies-mate-rate", self.interspecies_mate_rate)?;

        if self.mate_multipoint_prob + self.mate_multipoint_avg_prob <= 0.0 {
            return Err(BreedError::config(
                base,
                "mate-multipoint-prob and mate-multipoint-avg-prob are both zero",
            ));
        }
        Ok(())
    }
}

fn real_param(
    params: &Parameters,
    path: &ParamPath,
    default: &ParamPath,
    fallback: f32,
    strict: bool,
) -> BreedResult<f32> {
    let value: f32 = params.get_or(path, default, fallback)?;
    let ok = value.is_finite() && if strict { value > 0.0 } else { value >= 0.0 };
    if ok {
        return Ok(value);
    }
    let key = params
        .lookup(path, default)
        .map_or_else(|| path.clone(), |(_, key)| key);
    let bound = if strict { "> 0" } else { ">= 0" };
    Err(BreedError::config(key, format!("must be finite and {}, got {}", bound, value)))
}

/// A NEAT genome. Fitness lives on the individual, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeatGenome {
    /// Sorted by id.
    pub nodes: Vec<NodeGene>,
    /// Sorted by innovation.
    pub genes: Vec<LinkGene>,
}

impl NeatGenome {
    /// Sensors and outputs only, numbered bias (if any) first, then inputs,
    /// then outputs.
    #[must_use]
    pub fn minimal(config: &NeatConfig) -> Self {
        let mut nodes = Vec::with_capacity(config.num_inputs + config.num_outputs + 1);
        let mut next: NodeKey = 0;
        if config.use_bias {
            nodes.push(NodeGene::bias(next));
            next += 1;
        }
        for _ in 0..config.num_inputs {
            nodes.push(NodeGene::input(next));
            next += 1;
        }
        for _ in 0..config.num_outputs {
            nodes.push(NodeGene::output(next, config.output_activation));
            next += 1;
        }
        Self {
            nodes,
            genes: Vec::new(),
        }
    }

    /// Every sensor linked to every output with a random weight. Genomes
    /// built from the same ledger share their innovation numbers.
    #[must_use]
    pub fn fully_connected<R: Rng + ?Sized>(config: &NeatConfig, ledger: &InnovationLedger, rng: &mut R) -> Self {
        let mut genome = Self::minimal(config);
        ledger.observe(&genome);
        let sensors: Vec<NodeKey> = genome
            .nodes
            .iter()
            .filter(|n| n.role.is_sensor())
            .map(|n| n.id)
            .collect();
        let outputs: Vec<NodeKey> = genome.output_ids().collect();
        for &out in &outputs {
            for &sensor in &sensors {
                let innovation = ledger.link(sensor, out, false);
                let weight = rng.random_range(-config.weight_range..=config.weight_range);
                let mut gene = LinkGene::new(innovation, sensor, out, weight, false);
                gene.mutation_num = weight;
                genome.insert_gene(gene);
            }
        }
        genome
    }

    #[must_use]
    pub fn node(&self, id: NodeKey) -> Option<&NodeGene> {
        self.nodes
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Input ids in ascending order (sensor order for
    /// [`Network::load_sensors`](crate::neat::network::Network::load_sensors)).
    pub fn input_ids(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.ids_with_role(NodeRole::Input)
    }

    pub fn output_ids(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.ids_with_role(NodeRole::Output)
    }

    fn ids_with_role(&self, role: NodeRole) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.iter().filter(move |n| n.role == role).map(|n| n.id)
    }

    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.input_ids().count()
    }

    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.output_ids().count()
    }

    #[must_use]
    pub fn num_hidden(&self) -> usize {
        self.ids_with_role(NodeRole::Hidden).count()
    }

    #[must_use]
    pub fn num_enabled_genes(&self) -> usize {
        self.genes.iter().filter(|g| g.enabled).count()
    }

    /// One past the highest innovation in use.
    #[must_use]
    pub fn next_innovation(&self) -> u64 {
        self.genes.last().map_or(0, |g| g.innovation + 1)
    }

    /// One past the highest node id in use.
    #[must_use]
    pub fn next_node_id(&self) -> NodeKey {
        self.nodes.last().map_or(0, |n| n.id + 1)
    }

    fn insert_node(&mut self, node: NodeGene) {
        let at = self.nodes.partition_point(|n| n.id < node.id);
        self.nodes.insert(at, node);
    }

    fn insert_gene(&mut self, gene: LinkGene) {
        let at = self.genes.partition_point(|g| g.innovation < gene.innovation);
        self.genes.insert(at, gene);
    }

    #[must_use]
    pub fn topology(&self) -> GraphTopology {
        GraphTopology::from_genome(self)
    }

    /// Path search over the enabled genes, bounded by `nodes²` visits.
    #[must_use]
    pub fn has_path(&self, from: NodeKey, to: NodeKey) -> PathStatus {
        let n = self.nodes.len();
        self.topology().has_path(from, to, n * n)
    }

    /// Add one link between unlinked nodes. With probability
    /// `recur_only_prob` only a recurrent link is accepted, otherwise only
    /// a feed-forward one. Returns whether a gene was added.
    pub fn mutate_add_link<R: Rng + ?Sized>(
        &mut self,
        config: &NeatConfig,
        ledger: &InnovationLedger,
        rng: &mut R,
    ) -> bool {
        let targets: Vec<NodeKey> = self
            .nodes
            .iter()
            .filter(|n| !n.role.is_sensor())
            .map(|n| n.id)
            .collect();
        if targets.is_empty() {
            return false;
        }
        let do_recur = rng.random::<f32>() < config.recur_only_prob;
        let topo = self.topology();
        let threshold = self.nodes.len() * self.nodes.len();

        for _ in 0..config.newlink_tries {
            let Some(&to) = targets.choose(rng) else {
                return false;
            };
            let from = if do_recur && rng.random_bool(0.5) {
                to
            } else {
                self.nodes[rng.random_range(0..self.nodes.len())].id
            };
            if self
                .genes
                .iter()
                .any(|g| g.in_node == from && g.out_node == to && g.recurrent == do_recur)
            {
                continue;
            }
            // The new link closes a loop iff `to` already reaches `from`.
            let recurrent = match topo.has_path(to, from, threshold) {
                PathStatus::NoPath => false,
                PathStatus::FeedForward | PathStatus::Recurrent => true,
                PathStatus::Aborted => {
                    warn!(from, to, threshold, "path search exceeded its visit threshold");
                    return false;
                }
            };
            if recurrent != do_recur {
                continue;
            }

            let innovation = ledger.link(from, to, recurrent);
            let weight = rng.random_range(-config.weight_range..=config.weight_range);
            let mut gene = LinkGene::new(innovation, from, to, weight, recurrent);
            gene.mutation_num = weight;
            self.insert_gene(gene);
            trace!(from, to, recurrent, innovation, "added link");
            return true;
        }
        false
    }

    /// Split an enabled gene with a new hidden node. The old gene is
    /// disabled; the link into the new node has weight 1 and keeps the old
    /// recurrence, the link out of it keeps the old weight.
    pub fn mutate_add_node<R: Rng + ?Sized>(
        &mut self,
        config: &NeatConfig,
        ledger: &InnovationLedger,
        rng: &mut R,
    ) -> bool {
        let len = self.genes.len();
        if len == 0 {
            return false;
        }
        let start = rng.random_range(0..len);
        let mut chosen = None;
        for i in (start..len).chain(0..start) {
            let gene = &self.genes[i];
            let from_bias = self.node(gene.in_node).is_some_and(|n| n.role == NodeRole::Bias);
            if !gene.enabled || from_bias {
                continue;
            }
            chosen = Some(i);
            if rng.random_bool(SPLIT_STOP_PROB) {
                break;
            }
        }
        let Some(i) = chosen else {
            return false;
        };

        ledger.observe(self);
        let old = &mut self.genes[i];
        old.enabled = false;
        let (in_node, out_node, weight, recurrent, innovation) =
            (old.in_node, old.out_node, old.weight, old.recurrent, old.innovation);
        let (node, in_innovation, out_innovation) = match ledger.node_split(in_node, out_node, innovation) {
            // This genome already made that split once (the gene was re-enabled since).
            split if self.node(split.0).is_some() => ledger.fresh_node_split(),
            split => split,
        };

        let activation = config.hidden_activations.choose(rng).copied().unwrap_or_default();
        self.insert_node(NodeGene::hidden(node, activation));
        self.insert_gene(LinkGene::new(in_innovation, in_node, node, 1.0, recurrent));
        self.insert_gene(LinkGene::new(out_innovation, node, out_node, weight, false));
        trace!(node, in_node, out_node, "split link");
        true
    }

    /// Perturb (or, with `weight_replace_prob`, replace) every weight by up
    /// to `weight_mutation_power`, clamped to the weight cap.
    pub fn mutate_link_weights<R: Rng + ?Sized>(&mut self, config: &NeatConfig, rng: &mut R) {
        let cap = config.weight_cap;
        for gene in &mut self.genes {
            let step = rng.random_range(-1.0f32..=1.0) * config.weight_mutation_power;
            if rng.random::<f32>() < config.weight_replace_prob {
                gene.weight = step;
            } else {
                gene.weight += step;
            }
            gene.weight = gene.weight.clamp(-cap, cap);
            gene.mutation_num = gene.weight;
        }
    }

    /// Flip the enable flag of `times` random genes. A gene is only disabled
    /// while its source node keeps another enabled outgoing link.
    pub fn mutate_toggle_enable<R: Rng + ?Sized>(&mut self, times: usize, rng: &mut R) -> bool {
        let mut changed = false;
        for _ in 0..times {
            if self.genes.is_empty() {
                break;
            }
            let i = rng.random_range(0..self.genes.len());
            let (from, innovation, enabled) = {
                let g = &self.genes[i];
                (g.in_node, g.innovation, g.enabled)
            };
            if !enabled {
                self.genes[i].enabled = true;
                changed = true;
            } else if self
                .genes
                .iter()
                .any(|g| g.enabled && g.in_node == from && g.innovation != innovation)
            {
                self.genes[i].enabled = false;
                changed = true;
            }
        }
        changed
    }

    /// Re-enable the oldest disabled gene.
    pub fn mutate_gene_reenable(&mut self) -> bool {
        match self.genes.iter_mut().find(|g| !g.enabled) {
            Some(gene) => {
                gene.enabled = true;
                true
            }
            None => false,
        }
    }

    /// Add a node; failing that roll, add a link; failing that, roll
    /// weights, toggling and re-enabling independently. Returns whether the
    /// genome changed.
    pub fn default_mutate<R: Rng + ?Sized>(
        &mut self,
        config: &NeatConfig,
        ledger: &InnovationLedger,
        rng: &mut R,
    ) -> bool {
        if rng.random::<f32>() < config.mutate_add_node_prob {
            return self.mutate_add_node(config, ledger, rng);
        }
        if rng.random::<f32>() < config.mutate_add_link_prob {
            return self.mutate_add_link(config, ledger, rng);
        }
        let mut changed = false;
        if rng.random::<f32>() < config.mutate_link_weights_prob {
            self.mutate_link_weights(config, rng);
            changed = !self.genes.is_empty();
        }
        if rng.random::<f32>() < config.mutate_toggle_enable_prob {
            changed |= self.mutate_toggle_enable(1, rng);
        }
        if rng.random::<f32>() < config.mutate_gene_reenable_prob {
            changed |= self.mutate_gene_reenable();
        }
        changed
    }

    /// Multipoint crossover: matching genes come from either parent at
    /// random, disjoint and excess genes from the fitter parent only. Ties in
    /// fitness go to the shorter genome, then to `self`.
    #[must_use]
    pub fn mate_multipoint<R: Rng + ?Sized>(
        &self,
        fitness: f32,
        other: &Self,
        other_fitness: f32,
        rng: &mut R,
    ) -> Self {
        self.mate(fitness, other, other_fitness, false, rng)
    }

    /// As [`mate_multipoint`](Self::mate_multipoint), but matching genes
    /// average their weights.
    #[must_use]
    pub fn mate_multipoint_avg<R: Rng + ?Sized>(
        &self,
        fitness: f32,
        other: &Self,
        other_fitness: f32,
        rng: &mut R,
    ) -> Self {
        self.mate(fitness, other, other_fitness, true, rng)
    }

    fn mate<R: Rng + ?Sized>(
        &self,
        fitness: f32,
        other: &Self,
        other_fitness: f32,
        average: bool,
        rng: &mut R,
    ) -> Self {
        let self_better = match cmp_f32_nan_last(fitness, other_fitness) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.genes.len() <= other.genes.len(),
        };

        let mut child = NeatGenome {
            nodes: self
                .nodes
                .iter()
                .filter(|n| n.role != NodeRole::Hidden)
                .cloned()
                .collect(),
            genes: Vec::with_capacity(self.genes.len().max(other.genes.len())),
        };

        let (mut i, mut j) = (0, 0);
        loop {
            let (gene, from_self) = match (self.genes.get(i), other.genes.get(j)) {
                (None, None) => break,
                (Some(a), None) => {
                    i += 1;
                    if !self_better {
                        continue;
                    }
                    (a.clone(), true)
                }
                (None, Some(b)) => {
                    j += 1;
                    if self_better {
                        continue;
                    }
                    (b.clone(), false)
                }
                (Some(a), Some(b)) => match a.innovation.cmp(&b.innovation) {
                    Ordering::Less => {
                        i += 1;
                        if !self_better {
                            continue;
                        }
                        (a.clone(), true)
                    }
                    Ordering::Greater => {
                        j += 1;
                        if self_better {
                            continue;
                        }
                        (b.clone(), false)
                    }
                    Ordering::Equal => {
                        i += 1;
                        j += 1;
                        matching_gene(a, b, average, rng)
                    }
                },
            };

            if child.genes.iter().any(|g| g.duplicates(&gene)) {
                continue;
            }
            let (primary, secondary) = if from_self { (self, other) } else { (other, self) };
            let src = primary.node(gene.in_node).or_else(|| secondary.node(gene.in_node));
            let dst = primary.node(gene.out_node).or_else(|| secondary.node(gene.out_node));
            let (Some(src), Some(dst)) = (src, dst) else {
                continue;
            };
            for node in [src, dst] {
                if child.node(node.id).is_none() {
                    child.insert_node(node.clone());
                }
            }
            child.genes.push(gene);
        }
        child
    }

    /// `disjoint_coeff * D + excess_coeff * E + mutdiff_coeff * W̄`, where
    /// `W̄` is the mean mutation-number difference of matching genes.
    #[must_use]
    pub fn compatibility(&self, other: &Self, config: &NeatConfig) -> f32 {
        let (mut i, mut j) = (0, 0);
        let (mut disjoint, mut excess, mut matching) = (0usize, 0usize, 0usize);
        let mut mut_diff = 0.0f32;
        loop {
            match (self.genes.get(i), other.genes.get(j)) {
                (None, None) => break,
                (Some(_), None) => {
                    excess += 1;
                    i += 1;
                }
                (None, Some(_)) => {
                    excess += 1;
                    j += 1;
                }
                (Some(a), Some(b)) => match a.innovation.cmp(&b.innovation) {
                    Ordering::Equal => {
                        matching += 1;
                        mut_diff += (a.mutation_num - b.mutation_num).abs();
                        i += 1;
                        j += 1;
                    }
                    Ordering::Less => {
                        disjoint += 1;
                        i += 1;
                    }
                    Ordering::Greater => {
                        disjoint += 1;
                        j += 1;
                    }
                },
            }
        }
        let mean_diff = if matching > 0 {
            mut_diff / matching as f32
        } else {
            0.0
        };
        config.disjoint_coeff * disjoint as f32
            + config.excess_coeff * excess as f32
            + config.mutdiff_coeff * mean_diff
    }

    /// Check ordering, endpoint existence, and that no gene feeds a sensor.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] describing the first violation.
    pub fn verify(&self) -> BreedResult<()> {
        if let Some(w) = self.nodes.windows(2).find(|w| w[0].id >= w[1].id) {
            return Err(BreedError::Invariant(format!("node ids out of order at {}", w[1].id)));
        }
        if let Some(w) = self.genes.windows(2).find(|w| w[0].innovation >= w[1].innovation) {
            return Err(BreedError::Invariant(format!(
                "innovations out of order at {}",
                w[1].innovation
            )));
        }
        for gene in &self.genes {
            let (Some(_), Some(out)) = (self.node(gene.in_node), self.node(gene.out_node)) else {
                return Err(BreedError::Invariant(format!(
                    "gene {} references a missing node",
                    gene.innovation
                )));
            };
            if out.role.is_sensor() {
                return Err(BreedError::Invariant(format!(
                    "gene {} feeds sensor {}",
                    gene.innovation, out.id
                )));
            }
        }
        if self.num_outputs() == 0 {
            return Err(BreedError::Invariant("genome has no output node".to_string()));
        }
        Ok(())
    }
}

/// Pick one side of a matching pair (or average it). Returns the gene and
/// whether it came from the first parent.
fn matching_gene<R: Rng + ?Sized>(a: &LinkGene, b: &LinkGene, average: bool, rng: &mut R) -> (LinkGene, bool) {
    let take_a = rng.random_bool(0.5);
    let mut gene = if take_a { a.clone() } else { b.clone() };
    if average {
        gene.weight = (a.weight + b.weight) / 2.0;
        gene.mutation_num = (a.mutation_num + b.mutation_num) / 2.0;
    }
    gene.enabled = (a.enabled && b.enabled) || !rng.random_bool(INHERIT_DISABLED_PROB);
    (gene, take_a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::neat::innovation::{Innovation, InnovationKey};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn one_to_one() -> NeatConfig {
        NeatConfig {
            use_bias: false,
            ..NeatConfig::new(1, 1)
        }
    }

    #[test]
    fn test_minimal_layout() {
        let genome = NeatGenome::minimal(&NeatConfig::new(2, 1));
        let roles: Vec<NodeRole> = genome.nodes.iter().map(|n| n.role).collect();
        assert_eq!(
            roles,
            vec![NodeRole::Bias, NodeRole::Input, NodeRole::Input, NodeRole::Output]
        );
        assert_eq!(genome.input_ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(genome.output_ids().collect::<Vec<_>>(), vec![3]);
        assert!(genome.genes.is_empty());
        assert_eq!(genome.next_node_id(), 4);
        genome.verify().unwrap();
    }

    #[test]
    fn test_fully_connected_shares_innovations() {
        let config = NeatConfig::new(2, 2);
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let a = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        let b = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        assert_eq!(a.genes.len(), 6);
        let inn = |g: &NeatGenome| g.genes.iter().map(|x| x.innovation).collect::<Vec<_>>();
        assert_eq!(inn(&a), inn(&b));
        assert!(a.genes.iter().all(|g| g.weight.abs() <= config.weight_range));
        assert_eq!(ledger.next_node_id(), a.next_node_id());
        a.verify().unwrap();
    }

    #[test]
    fn test_add_node_on_single_gene_genome() {
        let config = one_to_one();
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        assert_eq!(genome.nodes.len(), 2);
        assert_eq!(genome.genes.len(), 1);
        let old_weight = genome.genes[0].weight;

        assert!(genome.mutate_add_node(&config, &ledger, &mut rng));
        genome.verify().unwrap();
        assert_eq!(genome.nodes.len(), 3);
        assert_eq!(genome.genes.len(), 3);
        assert!(!genome.genes[0].enabled);
        assert_eq!(genome.num_enabled_genes(), 2);

        let Some(Innovation::NodeSplit {
            node,
            in_innovation,
            out_innovation,
        }) = ledger.lookup(&InnovationKey::NodeSplit {
            in_node: 0,
            out_node: 1,
            old_innovation: 0,
        })
        else {
            panic!("split not recorded");
        };
        assert_eq!(genome.node(node).unwrap().role, NodeRole::Hidden);
        let first = genome.genes.iter().find(|g| g.innovation == in_innovation).unwrap();
        let second = genome.genes.iter().find(|g| g.innovation == out_innovation).unwrap();
        assert_eq!((first.in_node, first.out_node, first.weight), (0, node, 1.0));
        assert_eq!((second.in_node, second.out_node, second.weight), (node, 1, old_weight));
        assert!(first.enabled && second.enabled);
    }

    #[test]
    fn test_same_split_in_two_genomes_agrees() {
        let config = one_to_one();
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let parent = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        let mut a = parent.clone();
        let mut b = parent.clone();
        assert!(a.mutate_add_node(&config, &ledger, &mut rng));
        assert!(b.mutate_add_node(&config, &ledger, &mut rng));
        assert_eq!(a.nodes, b.nodes);
        let inn = |g: &NeatGenome| g.genes.iter().map(|x| x.innovation).collect::<Vec<_>>();
        assert_eq!(inn(&a), inn(&b));
    }

    #[test]
    fn test_resplitting_a_reenabled_gene_gets_fresh_numbers() {
        let config = one_to_one();
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        assert!(genome.mutate_add_node(&config, &ledger, &mut rng));
        // Disable the two new genes so only the re-enabled original is eligible.
        genome.genes[0].enabled = true;
        genome.genes[1].enabled = false;
        genome.genes[2].enabled = false;
        assert!(genome.mutate_add_node(&config, &ledger, &mut rng));
        genome.verify().unwrap();
        assert_eq!(genome.num_hidden(), 2);
        assert_eq!(genome.genes.len(), 5);
    }

    #[test]
    fn test_add_link_is_feedforward_by_default() {
        let config = NeatConfig {
            use_bias: false,
            newlink_tries: 50,
            ..NeatConfig::new(2, 1)
        };
        let ledger = InnovationLedger::for_genome(&NeatGenome::minimal(&config));
        let mut rng = test_rng();
        let mut genome = NeatGenome::minimal(&config);
        assert!(genome.mutate_add_link(&config, &ledger, &mut rng));
        let gene = &genome.genes[0];
        assert!(!gene.recurrent);
        assert_eq!(gene.out_node, 2);
        assert!(gene.in_node < 2);
        assert_eq!(gene.mutation_num, gene.weight);
        genome.verify().unwrap();
    }

    #[test]
    fn test_identical_links_share_innovation() {
        let config = NeatConfig {
            newlink_tries: 100,
            ..one_to_one()
        };
        let base = NeatGenome::minimal(&config);
        let ledger = InnovationLedger::for_genome(&base);
        let mut rng = test_rng();
        let mut a = base.clone();
        let mut b = base;
        assert!(a.mutate_add_link(&config, &ledger, &mut rng));
        assert!(b.mutate_add_link(&config, &ledger, &mut rng));
        assert_eq!(a.genes[0].innovation, b.genes[0].innovation);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_recur_only_adds_self_loop() {
        let config = NeatConfig {
            recur_only_prob: 1.0,
            newlink_tries: 100,
            ..one_to_one()
        };
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        assert!(genome.mutate_add_link(&config, &ledger, &mut rng));
        let added = genome.genes.iter().find(|g| g.recurrent).unwrap();
        assert_eq!((added.in_node, added.out_node), (1, 1));
        assert_eq!(genome.has_path(1, 1), PathStatus::FeedForward);
    }

    #[test]
    fn test_saturated_genome_rejects_new_link() {
        let config = one_to_one();
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        let before = genome.clone();
        assert!(!genome.mutate_add_link(&config, &ledger, &mut rng));
        assert_eq!(genome, before);
    }

    #[test]
    fn test_genome_has_path() {
        let config = one_to_one();
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        genome.mutate_add_node(&config, &ledger, &mut rng);
        assert_eq!(genome.has_path(1, 0), PathStatus::NoPath);
        assert_eq!(genome.has_path(0, 1), PathStatus::FeedForward);
        assert_eq!(genome.has_path(0, 2), PathStatus::FeedForward);
    }

    #[test]
    fn test_toggle_keeps_last_outlet() {
        let config = one_to_one();
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        assert!(!genome.mutate_toggle_enable(10, &mut rng));
        assert!(genome.genes[0].enabled);

        genome.genes[0].enabled = false;
        assert!(genome.mutate_toggle_enable(1, &mut rng));
        assert!(genome.genes[0].enabled);
    }

    #[test]
    fn test_reenable_oldest_disabled() {
        let config = NeatConfig::new(2, 1);
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        assert!(!genome.mutate_gene_reenable());
        genome.genes[1].enabled = false;
        genome.genes[2].enabled = false;
        assert!(genome.mutate_gene_reenable());
        assert!(genome.genes[1].enabled);
        assert!(!genome.genes[2].enabled);
    }

    #[test]
    fn test_weight_mutation_respects_cap() {
        let config = NeatConfig {
            weight_mutation_power: 50.0,
            weight_cap: 3.0,
            ..NeatConfig::new(3, 2)
        };
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        for _ in 0..10 {
            genome.mutate_link_weights(&config, &mut rng);
        }
        for gene in &genome.genes {
            assert!(gene.weight.abs() <= 3.0);
            assert_eq!(gene.mutation_num, gene.weight);
        }
    }

    fn parents() -> (NeatConfig, NeatGenome, NeatGenome) {
        let config = NeatConfig::new(2, 1);
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let short = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        let mut long = short.clone();
        assert!(long.mutate_add_node(&config, &ledger, &mut rng));
        (config, short, long)
    }

    fn innovations(genome: &NeatGenome) -> Vec<u64> {
        genome.genes.iter().map(|g| g.innovation).collect()
    }

    #[test]
    fn test_mate_takes_unmatched_genes_from_fitter_parent() {
        let (_, short, long) = parents();
        let mut rng = test_rng();
        for _ in 0..10 {
            let child = short.mate_multipoint(1.0, &long, 2.0, &mut rng);
            child.verify().unwrap();
            assert_eq!(innovations(&child), innovations(&long));
            assert_eq!(child.num_hidden(), 1);

            let child = short.mate_multipoint(2.0, &long, 1.0, &mut rng);
            child.verify().unwrap();
            assert_eq!(innovations(&child), innovations(&short));
            assert_eq!(child.num_hidden(), 0);
        }
    }

    #[test]
    fn test_mate_tie_goes_to_shorter_genome() {
        let (_, short, long) = parents();
        let mut rng = test_rng();
        let child = long.mate_multipoint(1.0, &short, 1.0, &mut rng);
        assert_eq!(innovations(&child), innovations(&short));
    }

    #[test]
    fn test_mate_avg_averages_matching_weights() {
        let (config, short, _) = parents();
        let mut rng = test_rng();
        let mut other = short.clone();
        other.mutate_link_weights(&config, &mut rng);
        let child = short.mate_multipoint_avg(1.0, &other, 1.0, &mut rng);
        for ((c, a), b) in child.genes.iter().zip(&short.genes).zip(&other.genes) {
            assert!((c.weight - (a.weight + b.weight) / 2.0).abs() < 1e-6);
            assert!(c.enabled);
        }
    }

    #[test]
    fn test_mate_skips_duplicate_links() {
        let (_, short, _) = parents();
        let mut twin = short.clone();
        // Same endpoints under a different innovation.
        let mut copy = twin.genes[0].clone();
        copy.innovation = 100;
        twin.genes.push(copy);
        let mut rng = test_rng();
        let child = short.mate_multipoint(0.0, &twin, 1.0, &mut rng);
        assert_eq!(child.genes.len(), short.genes.len());
        child.verify().unwrap();
    }

    #[test]
    fn test_compatibility_counts_excess() {
        let (config, short, long) = parents();
        assert_eq!(short.compatibility(&short, &config), 0.0);
        assert!((short.compatibility(&long, &config) - 2.0).abs() < 1e-6);
        assert!((long.compatibility(&short, &config) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_verify_rejects_link_into_sensor() {
        let (_, mut genome, _) = parents();
        genome.genes.push(LinkGene::new(99, 3, 1, 1.0, true));
        assert!(matches!(genome.verify(), Err(BreedError::Invariant(_))));
    }

    #[test]
    fn test_default_mutate_changes_genome() {
        let config = NeatConfig {
            mutate_add_node_prob: 0.3,
            mutate_add_link_prob: 0.3,
            ..NeatConfig::new(3, 2)
        };
        let ledger = InnovationLedger::default();
        let mut rng = test_rng();
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        for _ in 0..100 {
            genome.default_mutate(&config, &ledger, &mut rng);
            genome.verify().unwrap();
        }
        assert!(genome.num_hidden() > 0);
    }

    #[test]
    fn test_setup_from_parameters() {
        let params = Parameters::parse(
            "pop.neat.num-inputs = 4\n\
             neat.num-outputs = 3\n\
             pop.neat.hidden-activations = tanh, relu\n\
             pop.neat.compat-threshold = 4.5\n\
             pop.neat.use-bias = false\n",
        )
        .unwrap();
        let mut config = NeatConfig::default();
        config.setup(&params, &ParamPath::new("pop.neat")).unwrap();
        assert_eq!(config.num_inputs, 4);
        assert_eq!(config.num_outputs, 3);
        assert_eq!(config.hidden_activations, vec![Activation::Tanh, Activation::ReLU]);
        assert_eq!(config.compat_threshold, 4.5);
        assert!(!config.use_bias);
    }

    #[test]
    fn test_setup_rejects_bad_values() {
        let base = ParamPath::new("pop.neat");
        for (key, value) in [
            ("neat.weight-range", "0"),
            ("pop.neat.survival-threshold", "1.5"),
            ("pop.neat.hidden-activations", "sigmoid,softmax"),
            ("neat.newlink-tries", "-1"),
        ] {
            let mut params = Parameters::new();
            params.set(key, value);
            let err = NeatConfig::default().setup(&params, &base).unwrap_err();
            assert!(matches!(err, BreedError::Config { key: ref k, .. } if k == key), "{}", key);
        }
    }

    #[test]
    fn test_codec_roundtrip() {
        let (config, _, long) = parents();
        let text = codec::to_text(&long).unwrap();
        assert_eq!(codec::from_text::<NeatGenome>(&text).unwrap(), long);
        let bytes = codec::to_binary(&config).unwrap();
        assert_eq!(codec::from_binary::<NeatConfig>(&bytes).unwrap(), config);
    }
}
