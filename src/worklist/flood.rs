use std::collections::VecDeque;

use super::NodeBitMap;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::types::NodeRef;

/// Visit-once queue.
///
/// A node is marked when it is added and is never queued again. Only live
/// nodes may be added, but a node deleted after it was queued is still
/// returned by [`NodeFlood::pop`].
#[derive(Clone, Debug)]
pub struct NodeFlood {
    visited: NodeBitMap,
    queue: VecDeque<NodeRef>,
}

impl NodeFlood {
    /// Empty flood for `graph`.
    pub fn new(graph: &Graph) -> Self {
        Self {
            visited: NodeBitMap::new(graph),
            queue: VecDeque::new(),
        }
    }

    /// Queues `node` unless it was seen before.
    pub fn add(&mut self, graph: &Graph, node: NodeRef) -> Result<()> {
        if !graph.is_alive(node) {
            return Err(GraphError::NotAlive(node));
        }
        if self.visited.mark(node) {
            self.queue.push_back(node);
        }
        Ok(())
    }

    /// Queues every node of `nodes` not seen before.
    pub fn add_all(&mut self, graph: &Graph, nodes: impl IntoIterator<Item = NodeRef>) -> Result<()> {
        for node in nodes {
            self.add(graph, node)?;
        }
        Ok(())
    }

    /// Next queued node.
    pub fn pop(&mut self) -> Option<NodeRef> {
        self.queue.pop_front()
    }

    /// Returns true if `node` was ever added.
    pub fn is_marked(&self, node: NodeRef) -> bool {
        self.visited.is_marked(node)
    }

    /// Number of nodes ever added.
    pub fn total_marked(&self) -> usize {
        self.visited.count()
    }

    /// Every node ever added.
    pub fn visited(&self) -> &NodeBitMap {
        &self.visited
    }
}
