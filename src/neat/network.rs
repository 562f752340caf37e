//! Executable networks built from NEAT genomes.
//!
//! A [`Network`] keeps, per node, the list of enabled incoming links in CSR
//! form. [`Network::activate`] runs synchronous passes: every non-sensor node
//! sums its active inputs, then all nodes update at once. Passes repeat until
//! each output has fired at least once, so a fresh network needs as many
//! passes as its shortest input-to-output path. Later calls make one pass
//! per call. Recurrent links read the value their source had before the
//! current call, which makes each call one time step.

use tracing::debug;

use crate::error::{BreedError, BreedResult};
use crate::neat::activation::Activation;
use crate::neat::gene::{NodeKey, NodeRole};
use crate::neat::genome::NeatGenome;

/// Passes [`Network::activate`] makes before giving up on silent outputs.
pub const ACTIVATION_ABORT_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct Network {
    /// Genome node id per dense index.
    ids: Vec<NodeKey>,
    roles: Vec<NodeRole>,
    /// Activation per dense index.
    functions: Vec<Activation>,
    /// CSR offsets into the incoming-link arrays; length is node count + 1.
    in_offsets: Vec<usize>,
    /// Dense index of each incoming link's source.
    in_sources: Vec<usize>,
    in_weights: Vec<f32>,
    /// Recurrent links read `prev_value` instead of `value`.
    in_recurrent: Vec<bool>,
    /// Input sensors in id order; the bias is not among them.
    inputs: Vec<usize>,
    /// Output nodes in id order.
    outputs: Vec<usize>,
    /// Non-sensor nodes, in id order.
    computed: Vec<usize>,
    /// Current activation per node.
    value: Vec<f32>,
    /// Whether the node has produced a value since the last flush.
    fired: Vec<bool>,
    /// State at the start of the current call, read by recurrent links.
    prev_value: Vec<f32>,
    prev_fired: Vec<bool>,
    /// Per-pass scratch.
    sums: Vec<f32>,
    /// Per-pass scratch: some active input reached the node.
    reached: Vec<bool>,
    /// Longest feed-forward path, or the node count if feed-forward links loop.
    depth: usize,
}

impl Network {
    /// # Errors
    ///
    /// Returns [`BreedError::Invariant`] if the genome fails
    /// [`NeatGenome::verify`].
    pub fn from_genome(genome: &NeatGenome) -> BreedResult<Self> {
        genome.verify()?;
        let topo = genome.topology();
        let n = topo.node_count();

        let mut in_offsets = Vec::with_capacity(n + 1);
        let mut in_sources = Vec::new();
        let mut in_weights = Vec::new();
        let mut in_recurrent = Vec::new();
        in_offsets.push(0);
        for idx in 0..n {
            for (src, gene) in topo.predecessors(idx) {
                let gene = &genome.genes[gene];
                in_sources.push(src);
                in_weights.push(gene.weight);
                in_recurrent.push(gene.recurrent);
            }
            in_offsets.push(in_sources.len());
        }

        let roles: Vec<NodeRole> = genome.nodes.iter().map(|n| n.role).collect();
        let with_role = |role: NodeRole| -> Vec<usize> { (0..n).filter(|&i| roles[i] == role).collect() };
        let inputs = with_role(NodeRole::Input);
        let outputs = with_role(NodeRole::Output);
        let computed: Vec<usize> = (0..n).filter(|&i| !roles[i].is_sensor()).collect();
        let depth = topo
            .feedforward_depths()
            .map_or(n, |d| d.into_iter().max().unwrap_or(0) as usize);

        let mut net = Self {
            ids: genome.nodes.iter().map(|n| n.id).collect(),
            functions: genome.nodes.iter().map(|n| n.activation).collect(),
            roles,
            in_offsets,
            in_sources,
            in_weights,
            in_recurrent,
            inputs,
            outputs,
            computed,
            value: vec![0.0; n],
            fired: vec![false; n],
            prev_value: vec![0.0; n],
            prev_fired: vec![false; n],
            sums: vec![0.0; n],
            reached: vec![false; n],
            depth,
        };
        net.flush();
        Ok(net)
    }

    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Longest input-to-output chain of feed-forward links.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Id of each output, in the order of [`output_results`](Self::output_results).
    pub fn output_ids(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.outputs.iter().map(|&i| self.ids[i])
    }

    /// Set the input values, in ascending input-id order.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::SensorCount`] if `values` has the wrong length.
    pub fn load_sensors(&mut self, values: &[f32]) -> BreedResult<()> {
        if values.len() != self.inputs.len() {
            return Err(BreedError::SensorCount {
                expected: self.inputs.len(),
                actual: values.len(),
            });
        }
        for (&idx, &v) in self.inputs.iter().zip(values) {
            self.value[idx] = v;
        }
        Ok(())
    }

    /// Advance one time step.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Topology`] when some output still has not fired
    /// after [`ACTIVATION_ABORT_LIMIT`] passes.
    pub fn activate(&mut self) -> BreedResult<()> {
        self.prev_value.copy_from_slice(&self.value);
        self.prev_fired.copy_from_slice(&self.fired);

        let mut passes = 0;
        loop {
            if passes == ACTIVATION_ABORT_LIMIT {
                debug!(passes, depth = self.depth, "outputs never fired");
                return Err(BreedError::Topology("inputs disconnected from output".to_string()));
            }
            passes += 1;
            self.pass();
            if self.outputs.iter().all(|&o| self.fired[o]) {
                return Ok(());
            }
        }
    }

    fn pass(&mut self) {
        for &node in &self.computed {
            let mut sum = 0.0;
            let mut reached = false;
            for e in self.in_offsets[node]..self.in_offsets[node + 1] {
                let src = self.in_sources[e];
                let w = self.in_weights[e];
                if self.in_recurrent[e] {
                    if self.prev_fired[src] {
                        sum += w * self.prev_value[src];
                        reached = true;
                    }
                } else if self.fired[src] {
                    sum += w * self.value[src];
                    reached = true;
                }
            }
            self.sums[node] = sum;
            self.reached[node] = reached;
        }
        for &node in &self.computed {
            if self.reached[node] {
                self.value[node] = self.functions[node].apply(self.sums[node]);
                self.fired[node] = true;
            }
        }
    }

    /// Output values, in ascending output-id order.
    #[must_use]
    pub fn output_results(&self) -> Vec<f32> {
        self.outputs.iter().map(|&o| self.value[o]).collect()
    }

    /// Forget all state. Sensors keep firing (inputs read 0 until loaded,
    /// the bias reads 1).
    pub fn flush(&mut self) {
        for i in 0..self.ids.len() {
            let sensor = self.roles[i].is_sensor();
            self.value[i] = if self.roles[i] == NodeRole::Bias { 1.0 } else { 0.0 };
            self.fired[i] = sensor;
            self.prev_value[i] = self.value[i];
            self.prev_fired[i] = sensor;
        }
    }

    /// Flush, load `inputs`, and activate until the signal has crossed the
    /// deepest feed-forward chain.
    ///
    /// # Errors
    ///
    /// Propagates [`load_sensors`](Self::load_sensors) and
    /// [`activate`](Self::activate) errors.
    pub fn evaluate(&mut self, inputs: &[f32]) -> BreedResult<Vec<f32>> {
        self.flush();
        self.load_sensors(inputs)?;
        self.activate()?;
        for _ in 1..self.depth {
            self.activate()?;
        }
        Ok(self.output_results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neat::gene::{LinkGene, NodeGene};
    use crate::neat::genome::NeatConfig;
    use crate::neat::innovation::InnovationLedger;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn identity_chain() -> NeatGenome {
        // 1 -> 3 -> 2 with a direct 1 -> 2 shortcut.
        NeatGenome {
            nodes: vec![
                NodeGene::input(1),
                NodeGene::output(2, Activation::Identity),
                NodeGene::hidden(3, Activation::Identity),
            ],
            genes: vec![
                LinkGene::new(0, 1, 3, 2.0, false),
                LinkGene::new(1, 3, 2, 3.0, false),
                LinkGene::new(2, 1, 2, 0.5, false),
            ],
        }
    }

    #[test]
    fn test_evaluate_propagates_through_depth() {
        let mut net = Network::from_genome(&identity_chain()).unwrap();
        assert_eq!(net.depth(), 2);
        let out = net.evaluate(&[1.0]).unwrap();
        assert_eq!(out, vec![6.5]);
        // Repeatable after flush.
        assert_eq!(net.evaluate(&[2.0]).unwrap(), vec![13.0]);
    }

    #[test]
    fn test_first_activate_stops_when_outputs_fire() {
        let mut net = Network::from_genome(&identity_chain()).unwrap();
        net.load_sensors(&[1.0]).unwrap();
        net.activate().unwrap();
        // Only the shortcut has reached the output so far.
        assert_eq!(net.output_results(), vec![0.5]);
        net.activate().unwrap();
        assert_eq!(net.output_results(), vec![6.5]);
    }

    #[test]
    fn test_sensor_count_mismatch() {
        let mut net = Network::from_genome(&identity_chain()).unwrap();
        let err = net.load_sensors(&[1.0, 2.0]).unwrap_err();
        assert_eq!(err, BreedError::SensorCount { expected: 1, actual: 2 });
    }

    #[test]
    fn test_disconnected_output_is_topology_error() {
        let mut genome = identity_chain();
        for gene in &mut genome.genes {
            gene.enabled = false;
        }
        let mut net = Network::from_genome(&genome).unwrap();
        net.load_sensors(&[1.0]).unwrap();
        assert!(matches!(net.activate(), Err(BreedError::Topology(_))));
    }

    #[test]
    fn test_recurrent_link_reads_previous_step() {
        let mut genome = identity_chain();
        genome.genes.push(LinkGene::new(3, 2, 3, 1.0, true));
        let mut net = Network::from_genome(&genome).unwrap();
        net.load_sensors(&[1.0]).unwrap();
        net.activate().unwrap(); // hidden = 2, out = 0.5
        assert_eq!(net.output_results(), vec![0.5]);
        net.activate().unwrap(); // hidden = 2 + 0.5, out = 0.5 + 3 * 2
        assert_eq!(net.output_results(), vec![6.5]);
        net.activate().unwrap(); // hidden = 2 + 6.5, out = 0.5 + 3 * 2.5
        assert_eq!(net.output_results(), vec![8.0]);
    }

    #[test]
    fn test_bias_reads_one() {
        let config = NeatConfig::new(1, 1);
        let ledger = InnovationLedger::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        genome.nodes[2].activation = Activation::Identity;
        genome.genes[0].weight = 0.25; // bias -> out
        genome.genes[1].weight = 2.0; // input -> out
        let mut net = Network::from_genome(&genome).unwrap();
        assert_eq!(net.evaluate(&[3.0]).unwrap(), vec![6.25]);
    }

    #[test]
    fn test_invalid_genome_rejected() {
        let mut genome = identity_chain();
        genome.genes.push(LinkGene::new(9, 2, 1, 1.0, true));
        assert!(matches!(Network::from_genome(&genome), Err(BreedError::Invariant(_))));
    }
}
