//! Undirected graph used as the interference graph during allocation.
//!
//! Nodes are live-range ids; an edge means the two ranges are live at the
//! same program point. No self loops, no parallel edges.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Graph node identifier.
pub type NodeId = usize;

#[derive(Debug, Clone, Default)]
pub struct UndirectedGraph {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl UndirectedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new lone node.
    pub fn add_node(&mut self, id: NodeId) -> Result<()> {
        if self.adjacency.contains_key(&id) {
            return Err(Error::DuplicateNode { id });
        }
        self.adjacency.insert(id, BTreeSet::new());
        Ok(())
    }

    /// Links two existing nodes.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> Result<()> {
        if a == b {
            return Err(Error::SelfEdge { id: a });
        }
        if !self.adjacency.contains_key(&a) {
            return Err(Error::MissingNode { id: a });
        }
        if !self.adjacency.contains_key(&b) {
            return Err(Error::MissingNode { id: b });
        }
        self.adjacency.get_mut(&a).unwrap().insert(b);
        self.adjacency.get_mut(&b).unwrap().insert(a);
        Ok(())
    }

    /// Removes a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let neighbors = self.adjacency.remove(&id).ok_or(Error::MissingNode { id })?;
        for neighbor in neighbors {
            self.adjacency
                .get_mut(&neighbor)
                .expect("adjacency is symmetric")
                .remove(&id);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.adjacency.clear();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.adjacency.contains_key(&id)
    }

    pub fn degree(&self, id: NodeId) -> Option<usize> {
        self.adjacency.get(&id).map(|n| n.len())
    }

    pub fn neighbors(&self, id: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.adjacency.get(&id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    /// First node (in id order) with degree below `k`.
    pub fn find_node_with_degree_less_than(&self, k: usize) -> Option<NodeId> {
        self.adjacency
            .iter()
            .find(|(_, neighbors)| neighbors.len() < k)
            .map(|(&id, _)| id)
    }

    pub fn has_node_with_degree_less_than(&self, k: usize) -> bool {
        self.find_node_with_degree_less_than(k).is_some()
    }

    pub fn size(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }
}
