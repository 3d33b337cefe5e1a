//! Iteration over nodes and edges.
//!
//! Edge iterators are driven by the type's packed iteration mask and never
//! allocate. Node iterators walk the dense table and skip dead slots. Typed
//! iteration follows per-type chains linked at registration; deleted links
//! are skipped lazily and the chain is repaired in place.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::node::{EdgeCell, NodeRecord, NO_NODE};
use super::{Graph, Mark};
use crate::nodeclass::{EdgeKind, IterationMask, NodeType, Position};
use crate::types::{NodeId, NodeRef};

// =============================================================================
// Edge iteration
// =============================================================================

/// Non-null targets of one edge family of a node, in slot order.
pub struct EdgeIter<'g> {
    graph: &'g Graph,
    record: &'g NodeRecord,
    kind: EdgeKind,
    mask: IterationMask,
    list: Option<&'g [Option<NodeRef>]>,
}

impl<'g> EdgeIter<'g> {
    pub(crate) fn new(graph: &'g Graph, node: NodeRef, kind: EdgeKind) -> Self {
        let record = graph.record(node);
        Self {
            graph,
            record,
            kind,
            mask: record.ty.edges(kind).iteration_mask(),
            list: None,
        }
    }
}

impl Iterator for EdgeIter<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        loop {
            if let Some(items) = self.list.as_mut() {
                while let Some((first, rest)) = items.split_first() {
                    *items = rest;
                    if let Some(node) = first {
                        return Some(*node);
                    }
                }
                self.list = None;
            }
            let entry = self.mask.pop()?;
            match self.record.cells(self.kind)[entry.storage] {
                EdgeCell::Direct(Some(node)) => return Some(node),
                EdgeCell::List(list) => {
                    self.list = Some(&self.graph.lists[list as usize].items);
                }
                _ => {}
            }
        }
    }
}

/// Every position of one edge family of a node, empty ones included.
pub struct PositionIter<'g> {
    graph: &'g Graph,
    record: &'g NodeRecord,
    kind: EdgeKind,
    mask: IterationMask,
    slot: usize,
    list: Option<(usize, usize)>,
}

impl<'g> PositionIter<'g> {
    pub(crate) fn new(graph: &'g Graph, node: NodeRef, kind: EdgeKind) -> Self {
        let record = graph.record(node);
        Self {
            graph,
            record,
            kind,
            mask: record.ty.edges(kind).iteration_mask(),
            slot: 0,
            list: None,
        }
    }
}

impl Iterator for PositionIter<'_> {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        loop {
            if let Some((index, len)) = self.list {
                if index < len {
                    self.list = Some((index + 1, len));
                    return Some(Position::element(self.kind, self.slot - 1, index));
                }
                self.list = None;
            }
            let entry = self.mask.pop()?;
            let slot = self.slot;
            self.slot += 1;
            match self.record.cells(self.kind)[entry.storage] {
                EdgeCell::List(list) => {
                    let len = self.graph.lists[list as usize].items.len();
                    self.list = Some((0, len));
                }
                _ => return Some(Position::direct(self.kind, slot)),
            }
        }
    }
}

/// Edge walk that does not borrow the graph, so the caller may mutate it
/// between steps.
///
/// Debug builds check that neither the node's edges nor the node table were
/// restructured while the cursor was open.
#[derive(Clone, Debug)]
pub struct EdgeCursor {
    node: NodeRef,
    kind: EdgeKind,
    mask: IterationMask,
    slot: usize,
    list: Option<(u32, usize)>,
    mod_count: u32,
    epoch: u32,
}

impl EdgeCursor {
    pub(crate) fn new(graph: &Graph, node: NodeRef, kind: EdgeKind) -> Self {
        let record = graph.record(node);
        Self {
            node,
            kind,
            mask: record.ty.edges(kind).iteration_mask(),
            slot: 0,
            list: None,
            mod_count: record.mod_count,
            epoch: graph.compressions(),
        }
    }

    /// Node whose edges are walked.
    pub fn node(&self) -> NodeRef {
        self.node
    }

    /// Next non-null edge and its position.
    pub fn next(&mut self, graph: &Graph) -> Option<(Position, NodeRef)> {
        let record = graph.record(self.node);
        debug_assert_eq!(
            record.mod_count, self.mod_count,
            "edges of {} changed during iteration in graph {:?}",
            self.node,
            graph.name()
        );
        debug_assert_eq!(
            graph.compressions(),
            self.epoch,
            "graph {:?} was compacted during iteration",
            graph.name()
        );
        loop {
            if let Some((list, index)) = self.list {
                let items = &graph.lists[list as usize].items;
                if let Some(entry) = items.get(index) {
                    self.list = Some((list, index + 1));
                    if let Some(target) = entry {
                        return Some((Position::element(self.kind, self.slot - 1, index), *target));
                    }
                    continue;
                }
                self.list = None;
            }
            let entry = self.mask.pop()?;
            let slot = self.slot;
            self.slot += 1;
            match record.cells(self.kind)[entry.storage] {
                EdgeCell::Direct(Some(target)) => {
                    return Some((Position::direct(self.kind, slot), target));
                }
                EdgeCell::List(list) => self.list = Some((list, 0)),
                _ => {}
            }
        }
    }
}

// =============================================================================
// Node iteration
// =============================================================================

/// Live nodes in id order.
#[derive(Clone)]
pub struct NodeIter<'g> {
    graph: &'g Graph,
    next: usize,
}

impl Iterator for NodeIter<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        while let Some(slot) = self.graph.table.get(self.next) {
            self.next += 1;
            if let Some(node) = slot {
                return Some(*node);
            }
        }
        None
    }
}

/// Live nodes registered after a [`Mark`], in id order.
///
/// The sequence is restartable by cloning and is empty when the mark is stale.
#[derive(Clone)]
pub struct NewNodes<'g> {
    inner: NodeIter<'g>,
    valid: bool,
}

impl Iterator for NewNodes<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        if !self.valid {
            return None;
        }
        self.inner.next()
    }
}

/// Live nodes of one type and its iterable subtypes, chain by chain.
pub struct TypedNodes<'g> {
    graph: &'g Graph,
    chains: smallvec::SmallVec<[u32; 4]>,
    chain: usize,
    current: u32,
}

impl Iterator for TypedNodes<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        loop {
            if self.current != NO_NODE {
                let node = self.graph.handle(self.current as usize);
                self.current = self.graph.iterable_next(node);
                return Some(node);
            }
            let iterable = *self.chains.get(self.chain)?;
            self.chain += 1;
            self.current = self.graph.iterable_start(iterable);
        }
    }
}

impl Graph {
    /// Live nodes in id order.
    pub fn nodes(&self) -> NodeIter<'_> {
        self.nodes_from(NodeId(0))
    }

    /// Live nodes with an id of at least `start`.
    pub fn nodes_from(&self, start: NodeId) -> NodeIter<'_> {
        NodeIter {
            graph: self,
            next: start.as_usize(),
        }
    }

    /// Captures the current id high-watermark.
    pub fn mark(&self) -> Mark {
        Mark {
            graph: self.uid,
            value: self.table.len() as u32,
            epoch: self.compressions,
        }
    }

    /// Live nodes registered after `mark`. Empty if the mark belongs to
    /// another graph or a compaction happened since.
    pub fn new_nodes(&self, mark: &Mark) -> NewNodes<'_> {
        NewNodes {
            inner: self.nodes_from(NodeId(mark.value)),
            valid: mark.is_current(self),
        }
    }

    /// Returns true if `node` is live and was registered after `mark`.
    pub fn is_new(&self, mark: &Mark, node: NodeRef) -> bool {
        mark.is_current(self) && self.id(node).is_some_and(|id| id.0 >= mark.value)
    }

    /// Live nodes of `ty` and its iterable subtypes. Types that are neither
    /// iterable nor have iterable descendants yield nothing.
    pub fn iter_type(&self, ty: &Arc<NodeType>) -> TypedNodes<'_> {
        TypedNodes {
            graph: self,
            chains: self.registry.iterable_ids(ty.id()),
            chain: 0,
            current: NO_NODE,
        }
    }

    /// Returns true if a live node of `ty` or an iterable subtype exists.
    pub fn has_node(&self, ty: &Arc<NodeType>) -> bool {
        self.iter_type(ty).next().is_some()
    }

    /// First live node of chain `iterable`. Dead leading links are dropped
    /// from the head.
    pub(crate) fn iterable_start(&self, iterable: u32) -> u32 {
        let Some(head) = self.iterable_heads.get(iterable as usize) else {
            return NO_NODE;
        };
        let mut current = head.load(Ordering::Relaxed);
        while current != NO_NODE && !self.store[current as usize].is_alive() {
            current = self.store[current as usize].type_next.load(Ordering::Relaxed);
        }
        if current == NO_NODE {
            head.store(NO_NODE, Ordering::Relaxed);
            self.iterable_tails[iterable as usize].store(NO_NODE, Ordering::Relaxed);
        } else {
            head.store(current, Ordering::Relaxed);
        }
        current
    }

    /// Live node following `node` in its chain. The link of `node` is moved
    /// past dead entries only when a live one follows them, so nodes linked
    /// behind the current tail are never cut off.
    pub(crate) fn iterable_next(&self, node: NodeRef) -> u32 {
        let link = &self.store[node.index()].type_next;
        let first = link.load(Ordering::Relaxed);
        let mut current = first;
        while current != NO_NODE && !self.store[current as usize].is_alive() {
            current = self.store[current as usize].type_next.load(Ordering::Relaxed);
        }
        if current != NO_NODE && current != first {
            link.store(current, Ordering::Relaxed);
        }
        current
    }
}
