//! Per-node storage held in the graph arena.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::nodeclass::{DataValue, EdgeKind, NodeType, MAX_EDGES};
use crate::types::{NodeId, NodeRef, SourcePosition};

/// Sentinel for "no node" in atomic links.
pub(crate) const NO_NODE: u32 = u32::MAX;

/// Lifecycle state of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Created but not yet registered.
    Unregistered,
    /// Registered and present in the node table at the given id.
    Alive(NodeId),
    /// Removed from the graph.
    Deleted,
}

/// Content of one edge storage cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum EdgeCell {
    /// Cell not used by the node's layout.
    #[default]
    Vacant,
    /// Direct edge.
    Direct(Option<NodeRef>),
    /// Index into the graph's list side table.
    List(u32),
}

pub(crate) type EdgeCells = [EdgeCell; MAX_EDGES];

/// Arena record backing one node.
pub(crate) struct NodeRecord {
    pub(crate) ty: Arc<NodeType>,
    pub(crate) state: NodeState,
    pub(crate) data: Vec<DataValue>,
    pub(crate) inputs: EdgeCells,
    pub(crate) successors: EdgeCells,
    pub(crate) usages: SmallVec<[NodeRef; 2]>,
    pub(crate) predecessor: Option<NodeRef>,
    pub(crate) type_next: AtomicU32,
    pub(crate) source_position: Option<SourcePosition>,
    pub(crate) zero_usages_notified: bool,
    pub(crate) mod_count: u32,
    pub(crate) usage_mod_count: u32,
    /// Bumped each time the slot is reclaimed.
    pub(crate) generation: u32,
}

impl NodeRecord {
    pub(crate) fn new(ty: Arc<NodeType>, data: Vec<DataValue>, generation: u32) -> Self {
        Self {
            ty,
            state: NodeState::Unregistered,
            data,
            inputs: [EdgeCell::Vacant; MAX_EDGES],
            successors: [EdgeCell::Vacant; MAX_EDGES],
            usages: SmallVec::new(),
            predecessor: None,
            type_next: AtomicU32::new(NO_NODE),
            source_position: None,
            zero_usages_notified: false,
            mod_count: 0,
            usage_mod_count: 0,
            generation,
        }
    }

    /// Returns true if `node` is the current handle of this slot.
    #[inline]
    pub(crate) fn holds(&self, node: NodeRef) -> bool {
        self.generation == node.generation()
    }

    #[inline]
    pub(crate) fn cells(&self, kind: EdgeKind) -> &EdgeCells {
        match kind {
            EdgeKind::Inputs => &self.inputs,
            EdgeKind::Successors => &self.successors,
        }
    }

    #[inline]
    pub(crate) fn cells_mut(&mut self, kind: EdgeKind) -> &mut EdgeCells {
        match kind {
            EdgeKind::Inputs => &mut self.inputs,
            EdgeKind::Successors => &mut self.successors,
        }
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        matches!(self.state, NodeState::Alive(_))
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.state == NodeState::Deleted
    }
}

/// Backing storage of one list edge.
#[derive(Debug, Default)]
pub(crate) struct ListStore {
    pub(crate) owner: Option<NodeRef>,
    pub(crate) kind: Option<EdgeKind>,
    pub(crate) items: Vec<Option<NodeRef>>,
}
