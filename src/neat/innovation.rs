//! Innovation ledger.
//!
//! Every structural mutation asks the ledger for its numbers. Two genomes that
//! make the same structural change during a run get the same innovation, which
//! is what lets crossover line their genes up. The ledger is shared between
//! breeding threads behind a single lock; records are never removed.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::neat::gene::NodeKey;
use crate::neat::genome::NeatGenome;

/// The structural event being numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InnovationKey {
    Link {
        in_node: NodeKey,
        out_node: NodeKey,
        recurrent: bool,
    },
    /// Splitting gene `old_innovation` (from `in_node` to `out_node`) with a
    /// new hidden node.
    NodeSplit {
        in_node: NodeKey,
        out_node: NodeKey,
        old_innovation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Innovation {
    Link {
        innovation: u64,
    },
    NodeSplit {
        node: NodeKey,
        /// Gene from the split's input to the new node.
        in_innovation: u64,
        /// Gene from the new node to the split's output.
        out_innovation: u64,
    },
}

/// A split's new node and its two gene innovations.
type Split = (NodeKey, u64, u64);

#[derive(Debug, Default, Clone)]
struct LedgerState {
    /// Keyed by `(in, out, recurrent)`.
    links: HashMap<(NodeKey, NodeKey, bool), u64>,
    /// Keyed by `(in, out, split gene innovation)`.
    splits: HashMap<(NodeKey, NodeKey, u64), Split>,
    next_innovation: u64,
    next_node: NodeKey,
}

impl LedgerState {
    fn take_innovation(&mut self) -> u64 {
        let n = self.next_innovation;
        self.next_innovation += 1;
        n
    }

    fn new_split(&mut self) -> Split {
        let node = self.next_node;
        self.next_node += 1;
        let in_innovation = self.take_innovation();
        (node, in_innovation, self.take_innovation())
    }
}

#[derive(Debug, Default)]
pub struct InnovationLedger {
    /// Held only while one record is looked up or created.
    state: Mutex<LedgerState>,
}

impl InnovationLedger {
    /// A ledger whose next innovation and node id are the given values.
    #[must_use]
    pub fn new(next_innovation: u64, next_node: NodeKey) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                next_innovation,
                next_node,
                ..LedgerState::default()
            }),
        }
    }

    /// A ledger that numbers past everything `genome` already uses.
    #[must_use]
    pub fn for_genome(genome: &NeatGenome) -> Self {
        Self::new(genome.next_innovation(), genome.next_node_id())
    }

    /// Innovation number for a link, reusing an earlier identical event.
    pub fn link(&self, in_node: NodeKey, out_node: NodeKey, recurrent: bool) -> u64 {
        let mut state = self.state.lock();
        if let Some(&innovation) = state.links.get(&(in_node, out_node, recurrent)) {
            return innovation;
        }
        let innovation = state.take_innovation();
        state.links.insert((in_node, out_node, recurrent), innovation);
        trace!(in_node, out_node, recurrent, innovation, "new link innovation");
        innovation
    }

    /// Node id and the two gene innovations for splitting a gene, reusing an
    /// earlier identical split.
    ///
    /// Returns `(node, in_innovation, out_innovation)`.
    pub fn node_split(&self, in_node: NodeKey, out_node: NodeKey, old_innovation: u64) -> (NodeKey, u64, u64) {
        let mut state = self.state.lock();
        let key = (in_node, out_node, old_innovation);
        if let Some(&split) = state.splits.get(&key) {
            return split;
        }
        let split = state.new_split();
        state.splits.insert(key, split);
        trace!(in_node, out_node, old_innovation, node = split.0, "new node-split innovation");
        split
    }

    /// Fresh numbers for a split whose recorded node already lives in the
    /// genome being mutated (the same gene split twice). Not recorded.
    pub fn fresh_node_split(&self) -> (NodeKey, u64, u64) {
        self.state.lock().new_split()
    }

    #[must_use]
    pub fn lookup(&self, key: &InnovationKey) -> Option<Innovation> {
        let state = self.state.lock();
        match *key {
            InnovationKey::Link {
                in_node,
                out_node,
                recurrent,
            } => state
                .links
                .get(&(in_node, out_node, recurrent))
                .map(|&innovation| Innovation::Link { innovation }),
            InnovationKey::NodeSplit {
                in_node,
                out_node,
                old_innovation,
            } => state.splits.get(&(in_node, out_node, old_innovation)).map(
                |&(node, in_innovation, out_innovation)| Innovation::NodeSplit {
                    node,
                    in_innovation,
                    out_innovation,
                },
            ),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.links.len() + state.splits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn next_innovation(&self) -> u64 {
        self.state.lock().next_innovation
    }

    #[must_use]
    pub fn next_node_id(&self) -> NodeKey {
        self.state.lock().next_node
    }

    /// Make sure later numbers do not collide with `genome`'s, e.g. after
    /// loading it from disk.
    pub fn observe(&self, genome: &NeatGenome) {
        let mut state = self.state.lock();
        state.next_innovation = state.next_innovation.max(genome.next_innovation());
        state.next_node = state.next_node.max(genome.next_node_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_same_link_same_innovation() {
        let ledger = InnovationLedger::new(10, 5);
        let a = ledger.link(1, 3, false);
        let b = ledger.link(1, 3, false);
        assert_eq!(a, b);
        assert_eq!(a, 10);
        assert_ne!(ledger.link(1, 3, true), a);
        assert_ne!(ledger.link(3, 1, false), a);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_node_split_reuse() {
        let ledger = InnovationLedger::new(4, 3);
        let first = ledger.node_split(1, 2, 0);
        assert_eq!(first, (3, 4, 5));
        assert_eq!(ledger.node_split(1, 2, 0), first);
        let other = ledger.node_split(1, 2, 1);
        assert_eq!(other, (4, 6, 7));
        assert_eq!(
            ledger.lookup(&InnovationKey::NodeSplit {
                in_node: 1,
                out_node: 2,
                old_innovation: 0
            }),
            Some(Innovation::NodeSplit {
                node: 3,
                in_innovation: 4,
                out_innovation: 5
            })
        );
    }

    #[test]
    fn test_fresh_split_not_recorded() {
        let ledger = InnovationLedger::new(0, 0);
        let (node, a, b) = ledger.fresh_node_split();
        assert_eq!((node, a, b), (0, 0, 1));
        assert!(ledger.is_empty());
        assert_eq!(ledger.next_innovation(), 2);
        assert_eq!(ledger.next_node_id(), 1);
    }

    #[test]
    fn test_threads_agree_on_one_number() {
        let ledger = Arc::new(InnovationLedger::new(0, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.link(2, 7, false))
            })
            .collect();
        let numbers: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(numbers.iter().all(|&n| n == numbers[0]));
        assert_eq!(ledger.next_innovation(), 1);
    }
}
