//! # Symbios Breed
//!
//! Breeding operators for two evolutionary representations: strongly typed
//! genetic-programming trees and NEAT neural-network genomes.
//!
//! ## Features
//!
//! - **Arena Trees**: GP trees live in a `SlotMap`; parent links and argument
//!   positions are kept consistent by every operator
//! - **Typed GP Operators**: size-fair and homologous subtree crossover,
//!   internal crossover, all-nodes, demote, rehang and ERC mutation, all
//!   falling back to an unmodified clone when no valid edit exists
//! - **Shared Innovation Ledger**: NEAT link and node-split innovations are
//!   numbered once per structural change and reused by every genome that
//!   makes the same change, safely across threads
//! - **Subspecies Reproduction**: fitness sharing, stagnation dropoff,
//!   champion cloning and interspecies mating
//!
//! ## GP Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use symbios_breed::{GpContextBuilder, GpIndividual, GpTree, MutateRehang};
//!
//! let ctx = Arc::new(
//!     GpContextBuilder::typeless()
//!         .function("+", 2)
//!         .function("neg", 1)
//!         .terminal("x")
//!         .build()?,
//! );
//! let parent = GpIndividual::new(vec![GpTree::parse_lisp(&ctx, 0, "(neg (+ x x))")?]);
//!
//! let mut rehang = MutateRehang::new(ctx.clone());
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let child = rehang.breed(&parent, &mut rng)?;
//! assert_eq!(child.size(), parent.size());
//! assert!(child.trees[0].to_lisp(&ctx).starts_with("(+"));
//! # Ok::<(), symbios_breed::BreedError>(())
//! ```
//!
//! ## NEAT Quick Start
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use symbios_breed::{InnovationLedger, NeatConfig, NeatGenome, Network};
//!
//! let config = NeatConfig::new(2, 1);
//! let ledger = InnovationLedger::default();
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//!
//! let mut genome = NeatGenome::fully_connected(&config, &ledger, &mut rng);
//! assert!(genome.mutate_add_node(&config, &ledger, &mut rng));
//!
//! let mut net = Network::from_genome(&genome)?;
//! let output = net.evaluate(&[1.0, 0.0])?;
//! assert_eq!(output.len(), 1);
//! # Ok::<(), symbios_breed::BreedError>(())
//! ```
//!
//! ## Architecture
//!
//! ### Breeding Sources
//!
//! Selection and variation stages implement [`BreedingSource`]. A
//! [`GpPipeline`] pulls parents from its upstream sources, applies one
//! [`GpOperator`] and hands the offspring downstream. Each worker thread
//! owns a [`duplicate`](BreedingSource::duplicate) of the pipeline and its
//! own seeded RNG from [`thread_rngs`].
//!
//! ### Configuration
//!
//! Components read their settings from [`Parameters`], a flat store of
//! dotted keys. Every lookup tries the component's own path first and then
//! a shared default path, so `pop.subpop.0.breed.tries` can override
//! `gp.breed.size-fair.tries`.
//!
//! ### NEAT Generation Loop
//!
//! [`NeatBreeder`] speciates by compatibility distance, shares fitness
//! within each [`Subspecies`], apportions offspring, and re-speciates the
//! children. With the `parallel` feature subspecies reproduce concurrently
//! against the same [`InnovationLedger`].

pub mod codec;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod registry;

pub mod gp {
    //! Strongly typed tree genomes and their breeding operators.

    pub mod builder;
    pub mod constraints;
    pub mod crossover;
    pub mod demote;
    pub mod individual;
    pub mod internal;
    pub mod mutate;
    pub mod pipeline;
    pub mod rehang;
    pub mod select;
    pub mod tree;
    pub mod types;
}

pub mod neat {
    //! NEAT genomes, networks and subspecies.

    pub mod activation;
    pub mod breeder;
    pub mod gene;
    pub mod genome;
    pub mod innovation;
    pub mod network;
    pub mod species;
    pub mod topology;
}

// Re-exports for convenience
pub use error::{BreedError, BreedResult};
pub use params::{ParamPath, Parameters};
pub use pipeline::{thread_rngs, BreedingSource, Individual, TournamentSource};
pub use registry::Registry;

pub use gp::builder::{GrowMethod, TreeBuilder};
pub use gp::constraints::{FuncId, GpContext, GpContextBuilder, NodeKind};
pub use gp::crossover::{CrossoverMode, SubtreeCrossover};
pub use gp::demote::MutateDemote;
pub use gp::individual::GpIndividual;
pub use gp::internal::InternalCrossover;
pub use gp::mutate::{MutateAllNodes, MutateErc};
pub use gp::pipeline::{operator_registry, GpOperator, GpPipeline};
pub use gp::rehang::MutateRehang;
pub use gp::select::{selector_registry, NodeSelector};
pub use gp::tree::{GpNode, GpNodeId, GpTree, NodeFilter, Parent};
pub use gp::types::{GpType, TypeSystem};

pub use neat::activation::Activation;
pub use neat::breeder::NeatBreeder;
pub use neat::gene::{LinkGene, NodeGene, NodeKey, NodeRole};
pub use neat::genome::{NeatConfig, NeatGenome};
pub use neat::innovation::{Innovation, InnovationKey, InnovationLedger};
pub use neat::network::Network;
pub use neat::species::{NeatIndividual, Subspecies};
pub use neat::topology::{GraphTopology, PathStatus};
