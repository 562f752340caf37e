//! Shared graph topology for NEAT genomes.
//!
//! [`GraphTopology`] is a CSR snapshot of a genome's enabled genes. It backs
//! path queries during add-link mutation and network construction. Edges keep
//! the genome's innovation order, so every traversal is deterministic.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::neat::gene::NodeKey;
use crate::neat::genome::NeatGenome;

/// Outcome of a bounded path search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    NoPath,
    /// A path exists using only non-recurrent links.
    FeedForward,
    /// Every path uses at least one recurrent link.
    Recurrent,
    /// The search visited more nodes than its threshold allowed.
    Aborted,
}

impl PathStatus {
    #[must_use]
    pub fn exists(self) -> bool {
        matches!(self, PathStatus::FeedForward | PathStatus::Recurrent)
    }
}

#[derive(Debug, Clone)]
pub struct GraphTopology {
    /// Node id per dense index, ascending.
    idx_to_node: Vec<NodeKey>,
    /// CSR offsets of outgoing edges per dense index.
    fwd_offsets: Vec<usize>,
    fwd_targets: Vec<usize>,
    /// Gene index per outgoing edge.
    fwd_genes: Vec<usize>,
    /// CSR offsets of incoming edges per dense index.
    rev_offsets: Vec<usize>,
    rev_sources: Vec<usize>,
    /// Gene index per incoming edge.
    rev_genes: Vec<usize>,
    /// Per gene index into the genome; `false` for disabled genes.
    recurrent: Vec<bool>,
}

impl GraphTopology {
    /// Build from the enabled genes of `genome`. Genes whose endpoints are
    /// missing are left out.
    #[must_use]
    pub fn from_genome(genome: &NeatGenome) -> Self {
        let idx_to_node: Vec<NodeKey> = genome.nodes.iter().map(|n| n.id).collect();
        let node_count = idx_to_node.len();
        let index = |id: NodeKey| idx_to_node.binary_search(&id).ok();

        let edges: Vec<(usize, usize, usize)> = genome
            .genes
            .iter()
            .enumerate()
            .filter(|(_, g)| g.enabled)
            .filter_map(|(gi, g)| Some((index(g.in_node)?, index(g.out_node)?, gi)))
            .collect();

        let mut fwd_offsets = vec![0usize; node_count + 1];
        let mut rev_offsets = vec![0usize; node_count + 1];
        for &(from, to, _) in &edges {
            fwd_offsets[from + 1] += 1;
            rev_offsets[to + 1] += 1;
        }
        for i in 0..node_count {
            fwd_offsets[i + 1] += fwd_offsets[i];
            rev_offsets[i + 1] += rev_offsets[i];
        }

        let mut fwd_targets = vec![0usize; edges.len()];
        let mut fwd_genes = vec![0usize; edges.len()];
        let mut rev_sources = vec![0usize; edges.len()];
        let mut rev_genes = vec![0usize; edges.len()];
        let mut fwd_pos = fwd_offsets[..node_count].to_vec();
        let mut rev_pos = rev_offsets[..node_count].to_vec();
        for &(from, to, gi) in &edges {
            fwd_targets[fwd_pos[from]] = to;
            fwd_genes[fwd_pos[from]] = gi;
            fwd_pos[from] += 1;
            rev_sources[rev_pos[to]] = from;
            rev_genes[rev_pos[to]] = gi;
            rev_pos[to] += 1;
        }

        let recurrent = genome.genes.iter().map(|g| g.enabled && g.recurrent).collect();

        Self {
            idx_to_node,
            fwd_offsets,
            fwd_targets,
            fwd_genes,
            rev_offsets,
            rev_sources,
            rev_genes,
            recurrent,
        }
    }

    #[inline]
    #[must_use]
    pub fn node_index(&self, id: NodeKey) -> Option<usize> {
        self.idx_to_node.binary_search(&id).ok()
    }

    #[inline]
    #[must_use]
    pub fn node_id(&self, idx: usize) -> Option<NodeKey> {
        self.idx_to_node.get(idx).copied()
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idx_to_node.len()
    }

    /// `(target index, gene index)` for each enabled outgoing gene.
    #[inline]
    pub fn successors(&self, idx: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let range = self.fwd_offsets[idx]..self.fwd_offsets[idx + 1];
        self.fwd_targets[range.clone()]
            .iter()
            .copied()
            .zip(self.fwd_genes[range].iter().copied())
    }

    /// `(source index, gene index)` for each enabled incoming gene.
    #[inline]
    pub fn predecessors(&self, idx: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let range = self.rev_offsets[idx]..self.rev_offsets[idx + 1];
        self.rev_sources[range.clone()]
            .iter()
            .copied()
            .zip(self.rev_genes[range].iter().copied())
    }

    /// Whether signal can flow from `from` to `to` (a node trivially reaches
    /// itself), and whether it needs a recurrent link to do so.
    ///
    /// Each search stops after `threshold` node visits in total, which bounds
    /// the work on malformed graphs.
    #[must_use]
    pub fn has_path(&self, from: NodeKey, to: NodeKey, threshold: usize) -> PathStatus {
        let (Some(from), Some(to)) = (self.node_index(from), self.node_index(to)) else {
            return PathStatus::NoPath;
        };
        let mut visits = 0usize;
        match self.reaches(from, to, false, threshold, &mut visits) {
            None => PathStatus::Aborted,
            Some(true) => PathStatus::FeedForward,
            Some(false) => match self.reaches(from, to, true, threshold, &mut visits) {
                None => PathStatus::Aborted,
                Some(true) => PathStatus::Recurrent,
                Some(false) => PathStatus::NoPath,
            },
        }
    }

    /// Iterative DFS with a visited set. `None` once `visits` passes `threshold`.
    fn reaches(
        &self,
        from: usize,
        to: usize,
        through_recurrent: bool,
        threshold: usize,
        visits: &mut usize,
    ) -> Option<bool> {
        let mut visited = vec![false; self.node_count()];
        let mut stack = vec![from];
        visited[from] = true;
        while let Some(node) = stack.pop() {
            *visits += 1;
            if *visits > threshold {
                return None;
            }
            if node == to {
                return Some(true);
            }
            for (next, gene) in self.successors(node) {
                if visited[next] || (!through_recurrent && self.recurrent[gene]) {
                    continue;
                }
                visited[next] = true;
                stack.push(next);
            }
        }
        Some(false)
    }

    /// Longest-path depth of each node over the non-recurrent links (Kahn's
    /// algorithm). `None` if those links contain a cycle.
    #[must_use]
    pub fn feedforward_depths(&self) -> Option<Vec<u32>> {
        let n = self.node_count();
        let mut in_degree = vec![0usize; n];
        for (idx, deg) in in_degree.iter_mut().enumerate() {
            *deg = self.predecessors(idx).filter(|&(_, g)| !self.recurrent[g]).count();
        }
        let mut depths = vec![0u32; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut processed = 0;
        while let Some(u) = queue.pop_front() {
            processed += 1;
            for (v, gene) in self.successors(u) {
                if self.recurrent[gene] {
                    continue;
                }
                depths[v] = depths[v].max(depths[u].saturating_add(1));
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    queue.push_back(v);
                }
            }
        }
        (processed == n).then_some(depths)
    }
}
