//! Topology partitioning.
//!
//! Nodes are assigned to LPs by BFS over the channel graph. A
//! point-to-point link whose delay is at least the minimum lookahead is a
//! cut: the BFS does not traverse it, so the link becomes an inter-LP
//! boundary. Every event crossing a boundary therefore incurs at least
//! `min_lookahead` of virtual delay, which is exactly what makes the
//! granted window safe. Intra-partition links may be shorter;
//! inter-partition links cannot be.

use parsim_types::{LpId, NetworkGraph, SystemId, Time};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Outcome of partitioning: how many LPs exist on this rank and the
/// lookahead the cut guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Number of LPs assigned (ids `1..=lp_count`).
    pub lp_count: u32,
    /// The edge-cut delay threshold, configured or auto-computed.
    pub min_lookahead: Time,
}

/// BFS partitioner for one rank's share of the topology.
#[derive(Debug, Clone)]
pub struct Partitioner {
    rank: u32,
    min_lookahead: Option<Time>,
}

impl Partitioner {
    /// Partition the nodes whose system id carries `rank`.
    pub fn new(rank: u32) -> Self {
        Partitioner {
            rank,
            min_lookahead: None,
        }
    }

    /// Use an explicit cut threshold instead of the median link delay.
    pub fn with_min_lookahead(mut self, lookahead: Time) -> Self {
        self.min_lookahead = Some(lookahead);
        self
    }

    /// Assign every local node a `(lp, rank)` system id and return the
    /// resulting plan.
    pub fn partition(&self, graph: &NetworkGraph) -> PartitionPlan {
        let min_lookahead = self
            .min_lookahead
            .unwrap_or_else(|| median_link_delay(graph, self.rank));

        let mut visited = vec![false; graph.node_count()];
        let mut lp_count = 0u32;
        let mut queue = VecDeque::new();

        for start in graph.nodes() {
            if visited[start.0 as usize] || graph.system_id(start).rank() != self.rank {
                continue;
            }
            lp_count += 1;
            visited[start.0 as usize] = true;
            queue.push_back(start);

            while let Some(node) = queue.pop_front() {
                graph.set_system_id(node, SystemId::new(LpId(lp_count), self.rank));
                debug!(%node, lp = lp_count, "node assigned");

                for link in graph.links_of(node) {
                    // Long-enough p2p links are the cut.
                    if link.point_to_point && link.delay >= min_lookahead {
                        continue;
                    }
                    for &peer in &link.endpoints {
                        if peer == node || visited[peer.0 as usize] {
                            continue;
                        }
                        // Only peers on this rank join the partition.
                        if graph.system_id(peer).rank() != self.rank {
                            continue;
                        }
                        visited[peer.0 as usize] = true;
                        queue.push_back(peer);
                    }
                }
            }
        }

        info!(lp_count, %min_lookahead, rank = self.rank, "partition complete");
        PartitionPlan {
            lp_count,
            min_lookahead,
        }
    }
}

/// Median delay over the point-to-point channels attached to this rank's
/// nodes, counted once per attached device. Zero when the rank has none.
fn median_link_delay(graph: &NetworkGraph, rank: u32) -> Time {
    let mut delays: Vec<Time> = Vec::new();
    for node in graph.nodes() {
        if graph.system_id(node).rank() != rank {
            continue;
        }
        for link in graph.links_of(node) {
            if link.point_to_point {
                delays.push(link.delay);
            }
        }
    }
    delays.sort();

    if delays.is_empty() {
        Time::ZERO
    } else if delays.len() % 2 == 1 {
        delays[delays.len() / 2]
    } else {
        let low = delays[delays.len() / 2 - 1];
        let high = delays[delays.len() / 2];
        Time::from_ticks((low.ticks() + high.ticks()) / 2)
    }
}
