//! The simulated topology consumed by the partitioner.
//!
//! The engine never looks inside the host's node or channel objects; it
//! only needs the connectivity graph, per-link delays, and a mutable
//! system-id slot per node. System ids live in atomics so the graph can be
//! shared read-only with worker threads once partitioning has rewritten
//! them.

use crate::{LpId, NodeId, SystemId, Time};
use std::sync::atomic::{AtomicU32, Ordering};

/// A channel connecting two or more nodes.
#[derive(Debug)]
pub struct Link {
    /// Propagation delay of the channel.
    pub delay: Time,
    /// True for point-to-point channels; only these are partition-cut
    /// candidates.
    pub point_to_point: bool,
    /// Nodes with a device attached to this channel.
    pub endpoints: Vec<NodeId>,
}

/// Connectivity graph of the simulated network.
#[derive(Debug, Default)]
pub struct NetworkGraph {
    /// Packed system id per node, indexed by `NodeId`.
    system_ids: Vec<AtomicU32>,
    /// Attached link indices per node, one entry per net device.
    node_links: Vec<Vec<usize>>,
    links: Vec<Link>,
}

impl NetworkGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node initially placed on `rank`. Returns its id.
    pub fn add_node(&mut self, rank: u32) -> NodeId {
        let id = NodeId(self.system_ids.len() as u32);
        self.system_ids
            .push(AtomicU32::new(SystemId::from_rank(rank).raw()));
        self.node_links.push(Vec::new());
        id
    }

    /// Add a channel attaching a device on every endpoint node.
    pub fn add_link(&mut self, endpoints: &[NodeId], delay: Time, point_to_point: bool) {
        let index = self.links.len();
        for &node in endpoints {
            self.node_links[node.0 as usize].push(index);
        }
        self.links.push(Link {
            delay,
            point_to_point,
            endpoints: endpoints.to_vec(),
        });
    }

    /// Convenience for the common case: a point-to-point link between two
    /// nodes.
    pub fn connect(&mut self, a: NodeId, b: NodeId, delay: Time) {
        self.add_link(&[a, b], delay, true);
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.system_ids.len()
    }

    /// Current system id of a node.
    pub fn system_id(&self, node: NodeId) -> SystemId {
        SystemId::from_raw(self.system_ids[node.0 as usize].load(Ordering::Acquire))
    }

    /// Rewrite a node's system id (partitioner only).
    pub fn set_system_id(&self, node: NodeId, sid: SystemId) {
        self.system_ids[node.0 as usize].store(sid.raw(), Ordering::Release);
    }

    /// The LP owning a node, if the node id is in range.
    pub fn lp_of(&self, node: NodeId) -> Option<LpId> {
        if (node.0 as usize) < self.system_ids.len() {
            Some(self.system_id(node).lp())
        } else {
            None
        }
    }

    /// Links attached to a node, one per device.
    pub fn links_of(&self, node: NodeId) -> impl Iterator<Item = &Link> {
        self.node_links[node.0 as usize]
            .iter()
            .map(move |&i| &self.links[i])
    }

    /// All links in the graph.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// All node ids, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.system_ids.len() as u32).map(NodeId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_nodes_and_links() {
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0);
        let b = graph.add_node(0);
        let c = graph.add_node(1);
        graph.connect(a, b, Time::millis(2));
        graph.add_link(&[b, c], Time::millis(5), false);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.links_of(b).count(), 2);
        assert_eq!(graph.links_of(a).count(), 1);

        let link = graph.links_of(a).next().unwrap();
        assert!(link.point_to_point);
        assert_eq!(link.delay, Time::millis(2));
        assert_eq!(link.endpoints, vec![a, b]);
    }

    #[test]
    fn test_system_id_rewrite() {
        let mut graph = NetworkGraph::new();
        let n = graph.add_node(1);
        assert_eq!(graph.system_id(n).rank(), 1);
        assert_eq!(graph.system_id(n).lp(), LpId(0));

        graph.set_system_id(n, SystemId::new(LpId(4), 1));
        assert_eq!(graph.system_id(n).lp(), LpId(4));
        assert_eq!(graph.system_id(n).rank(), 1);
    }

    #[test]
    fn test_lp_of_out_of_range() {
        let graph = NetworkGraph::new();
        assert!(graph.lp_of(NodeId(9)).is_none());
    }
}
