//! Node and link genes.
//!
//! Genes refer to nodes by their genome-wide id rather than by position, so a
//! gene list can be copied between genomes during crossover unchanged.

use serde::{Deserialize, Serialize};

use crate::neat::activation::Activation;

/// Node identity, stable across genomes that share an ancestor.
pub type NodeKey = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Sensor fed by [`Network::load_sensors`](crate::neat::network::Network::load_sensors).
    Input,
    /// Sensor that always reads 1.0.
    Bias,
    Output,
    Hidden,
}

impl NodeRole {
    #[inline]
    #[must_use]
    pub fn is_sensor(self) -> bool {
        matches!(self, NodeRole::Input | NodeRole::Bias)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    /// Unique within a genome; ids are handed out by the ledger.
    pub id: NodeKey,
    /// Sensors never receive links.
    pub role: NodeRole,
    /// Applied to the summed input. Unused by sensors.
    pub activation: Activation,
}

impl NodeGene {
    #[must_use]
    pub fn input(id: NodeKey) -> Self {
        Self {
            id,
            role: NodeRole::Input,
            activation: Activation::Identity,
        }
    }

    #[must_use]
    pub fn bias(id: NodeKey) -> Self {
        Self {
            id,
            role: NodeRole::Bias,
            activation: Activation::Identity,
        }
    }

    #[must_use]
    pub fn output(id: NodeKey, activation: Activation) -> Self {
        Self {
            id,
            role: NodeRole::Output,
            activation,
        }
    }

    #[must_use]
    pub fn hidden(id: NodeKey, activation: Activation) -> Self {
        Self {
            id,
            role: NodeRole::Hidden,
            activation,
        }
    }
}

/// A directed, weighted link. Genes are never deleted, only disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkGene {
    /// Historical marking; genes are aligned on this during mating.
    pub innovation: u64,
    /// Source node id.
    pub in_node: NodeKey,
    /// Target node id; never a sensor.
    pub out_node: NodeKey,
    /// Connection weight, clamped to `[-weight_cap, weight_cap]` by mutation.
    pub weight: f32,
    /// Disabled genes are inherited but ignored by the network.
    pub enabled: bool,
    /// The link closes a loop and reads the previous step's activation.
    pub recurrent: bool,
    /// Weight at the last mutation; used as the matching-gene distance in
    /// [`NeatGenome::compatibility`](crate::neat::genome::NeatGenome::compatibility).
    pub mutation_num: f32,
}

impl LinkGene {
    #[must_use]
    pub fn new(innovation: u64, in_node: NodeKey, out_node: NodeKey, weight: f32, recurrent: bool) -> Self {
        Self {
            innovation,
            in_node,
            out_node,
            weight,
            enabled: true,
            recurrent,
            mutation_num: 0.0,
        }
    }

    /// Same endpoints and recurrence, or the non-recurrent reverse of a
    /// non-recurrent link.
    #[must_use]
    pub fn duplicates(&self, other: &LinkGene) -> bool {
        let same = self.in_node == other.in_node
            && self.out_node == other.out_node
            && self.recurrent == other.recurrent;
        let reversed = self.in_node == other.out_node
            && self.out_node == other.in_node
            && !self.recurrent
            && !other.recurrent;
        same || reversed
    }
}
