use std::collections::VecDeque;

use tracing::warn;

use super::NodeBitMap;
use crate::graph::Graph;
use crate::types::NodeRef;

/// Queue length past which [`IterativeNodeWorkList`] tracks membership in a
/// bit map instead of scanning the queue.
pub const EXPLICIT_BITMAP_THRESHOLD: usize = 10;

/// Visit-once worklist that drops deleted nodes.
///
/// Unlike [`super::NodeFlood`], nodes that are already deleted are ignored
/// when added, and nodes deleted while queued are skipped when dequeued.
#[derive(Clone, Debug)]
pub struct SingletonNodeWorkList {
    visited: NodeBitMap,
    queue: VecDeque<NodeRef>,
}

impl SingletonNodeWorkList {
    /// Empty worklist for `graph`.
    pub fn new(graph: &Graph) -> Self {
        Self {
            visited: NodeBitMap::new(graph),
            queue: VecDeque::new(),
        }
    }

    /// Worklist holding every live node of `graph` in id order.
    pub fn filled(graph: &Graph) -> Self {
        let mut list = Self::new(graph);
        list.add_all(graph, graph.nodes());
        list
    }

    /// Queues `node` if it is live and was never queued.
    pub fn add(&mut self, graph: &Graph, node: NodeRef) {
        if graph.is_alive(node) && self.visited.mark(node) {
            self.queue.push_back(node);
        }
    }

    /// Queues every node of `nodes`.
    pub fn add_all(&mut self, graph: &Graph, nodes: impl IntoIterator<Item = NodeRef>) {
        for node in nodes {
            self.add(graph, node);
        }
    }

    /// Next queued node that is still live.
    pub fn next(&mut self, graph: &Graph) -> Option<NodeRef> {
        while let Some(node) = self.queue.pop_front() {
            if graph.is_alive(node) {
                return Some(node);
            }
        }
        None
    }

    /// Returns true if no node is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns true if `node` was ever queued.
    pub fn is_marked(&self, node: NodeRef) -> bool {
        self.visited.is_marked(node)
    }
}

/// Worklist for fixed-point rewriting where nodes may be revisited.
///
/// Adding a node that is already queued is a no-op. The total number of
/// dequeues is capped at `iteration_limit_per_node` times the number of live
/// nodes when the list was created, which guarantees termination.
#[derive(Clone, Debug)]
pub struct IterativeNodeWorkList {
    queue: VecDeque<NodeRef>,
    in_queue: Option<NodeBitMap>,
    iterations_left: usize,
    limit_reported: bool,
    #[cfg(debug_assertions)]
    infinite_work: InfiniteWorkCheck,
}

impl IterativeNodeWorkList {
    /// Empty worklist for `graph`.
    pub fn new(graph: &Graph, iteration_limit_per_node: usize) -> Self {
        debug_assert!(iteration_limit_per_node > 0, "iteration limit must be positive");
        Self {
            queue: VecDeque::new(),
            in_queue: None,
            iterations_left: iteration_limit_per_node.saturating_mul(graph.node_count()),
            limit_reported: false,
            #[cfg(debug_assertions)]
            infinite_work: InfiniteWorkCheck::default(),
        }
    }

    /// Worklist holding every live node of `graph` in id order.
    pub fn filled(graph: &Graph, iteration_limit_per_node: usize) -> Self {
        let mut list = Self::new(graph, iteration_limit_per_node);
        list.add_all(graph, graph.nodes());
        list
    }

    /// Queues `node` unless it is already queued.
    pub fn add(&mut self, graph: &Graph, node: NodeRef) {
        if self.in_queue.is_none() && self.queue.len() > EXPLICIT_BITMAP_THRESHOLD {
            let mut map = NodeBitMap::new(graph);
            for &queued in &self.queue {
                map.mark(queued);
            }
            self.in_queue = Some(map);
        }
        let queued = match &self.in_queue {
            Some(map) => map.is_marked(node),
            None => self.queue.contains(&node),
        };
        if queued {
            return;
        }
        #[cfg(debug_assertions)]
        self.infinite_work.on_add(graph, node);
        if let Some(map) = &mut self.in_queue {
            map.mark(node);
        }
        self.queue.push_back(node);
    }

    /// Queues every node of `nodes`.
    pub fn add_all(&mut self, graph: &Graph, nodes: impl IntoIterator<Item = NodeRef>) {
        for node in nodes {
            self.add(graph, node);
        }
    }

    /// Next live node, or `None` once the queue is empty or the iteration
    /// limit is exhausted.
    pub fn next(&mut self, graph: &Graph) -> Option<NodeRef> {
        self.drop_deleted(graph);
        if self.queue.is_empty() {
            return None;
        }
        if self.iterations_left == 0 {
            if !self.limit_reported {
                self.limit_reported = true;
                warn!(
                    graph = ?graph.name(),
                    queued = self.queue.len(),
                    "worklist.iteration_limit_reached"
                );
            }
            return None;
        }
        self.iterations_left -= 1;
        let node = self.queue.pop_front()?;
        if let Some(map) = &mut self.in_queue {
            map.clear(node);
        }
        #[cfg(debug_assertions)]
        self.infinite_work.on_pull(graph, node);
        Some(node)
    }

    fn drop_deleted(&mut self, graph: &Graph) {
        while let Some(&node) = self.queue.front() {
            if graph.is_alive(node) {
                break;
            }
            self.queue.pop_front();
            if let Some(map) = &mut self.in_queue {
                map.clear(node);
            }
        }
    }

    /// Number of queued entries, deleted ones included.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Dequeues still allowed before the limit is hit.
    pub fn iterations_left(&self) -> usize {
        self.iterations_left
    }

    /// Returns true if membership is tracked with a bit map.
    pub fn uses_bitmap(&self) -> bool {
        self.in_queue.is_some()
    }

    /// First node that was re-queued right after being dequeued without its
    /// usages changing, and then came around again. Only tracked in debug
    /// builds.
    pub fn suspected_infinite_work(&self) -> Option<NodeRef> {
        #[cfg(debug_assertions)]
        {
            self.infinite_work.suspect
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    }
}

/// Detects rewrites that keep re-queuing a node without changing anything.
#[cfg(debug_assertions)]
#[derive(Clone, Debug, Default)]
struct InfiniteWorkCheck {
    last_pull: Option<(NodeRef, u32)>,
    first_no_change: Option<NodeRef>,
    suspect: Option<NodeRef>,
}

#[cfg(debug_assertions)]
impl InfiniteWorkCheck {
    fn on_pull(&mut self, graph: &Graph, node: NodeRef) {
        self.last_pull = Some((node, graph.usage_mod_count(node)));
    }

    fn on_add(&mut self, graph: &Graph, node: NodeRef) {
        let unchanged = self.last_pull
            == Some((node, graph.usage_mod_count(node)))
            && graph.has_usages(node);
        if !unchanged {
            return;
        }
        match self.first_no_change {
            None => self.first_no_change = Some(node),
            Some(first) if first == node => {
                if self.suspect.is_none() {
                    warn!(
                        graph = ?graph.name(),
                        node = %graph.describe(node),
                        "worklist.likely_infinite_rewrite"
                    );
                }
                self.suspect = Some(node);
            }
            Some(_) => {}
        }
    }
}
