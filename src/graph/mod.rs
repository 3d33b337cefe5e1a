//! The mutable node graph.
//!
//! A [`Graph`] owns an arena of node records addressed by [`NodeRef`]
//! handles, and a dense node table addressed by [`NodeId`]. Nodes are created
//! detached, registered into the table, and deleted by clearing their table
//! slot; compaction later slides the survivors down and returns the records
//! of deleted nodes to a free list. Every edge write goes through the graph so
//! that usage multisets and predecessor links stay consistent with the
//! forward edges.
//!
//! The `impl Graph` is spread over several files by concern.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::metrics::GraphMetrics;
use crate::nodeclass::{DataValue, NodeType, TypeRegistry};
use crate::options::GraphOptions;
use crate::types::{GraphUid, NodeId, NodeRef, SourcePosition};

mod builder;
mod compaction;
mod duplicate;
mod edge_ops;
mod events;
mod graph_types;
mod gvn;
mod iter;
mod list_ops;
mod node;
mod node_ops;
mod tests;
mod verify;

pub use builder::NodeBuilder;
pub use duplicate::{DuplicationMap, DuplicationReplacement};
pub use events::{ListenerId, NodeEvent, NodeEventListener, ZeroUsagesAction};
pub use graph_types::{EdgeSelector, FreezeState, GraphStats, Mark};
pub use gvn::NodePredicate;
pub use iter::{EdgeCursor, EdgeIter, NewNodes, NodeIter, PositionIter, TypedNodes};
pub use list_ops::NodeListRef;
pub use node::NodeState;

use events::ListenerEntry;
use node::{ListStore, NodeRecord};

type LeafCache = FxHashMap<u64, SmallVec<[NodeRef; 1]>>;

/// Mutable, deduplicating graph of IR nodes.
///
/// A graph is mutated by one thread at a time. Once frozen it may be shared
/// between reader threads.
pub struct Graph {
    uid: GraphUid,
    registry: Arc<TypeRegistry>,
    options: GraphOptions,
    metrics: Arc<dyn GraphMetrics>,
    store: Vec<NodeRecord>,
    free_nodes: Vec<u32>,
    deleted_records: Vec<u32>,
    last_allocated: Option<NodeRef>,
    lists: Vec<ListStore>,
    free_lists: Vec<u32>,
    table: Vec<Option<NodeRef>>,
    deleted_since_last_compression: usize,
    deleted_before_last_compression: usize,
    compressions: u32,
    edge_modification_count: u64,
    iterable_heads: Vec<AtomicU32>,
    iterable_tails: Vec<AtomicU32>,
    leaf_cache: Vec<LeafCache>,
    leaf_cache_entries: usize,
    freeze_state: FreezeState,
    listeners: Vec<ListenerEntry>,
    next_listener_id: u64,
    observed: bool,
    current_position: Option<SourcePosition>,
}

impl Graph {
    /// Creates an empty graph for types of `registry`.
    pub fn new(registry: Arc<TypeRegistry>, options: GraphOptions) -> Self {
        let uid = GraphUid::fresh();
        let metrics = Arc::clone(&options.metrics);
        Self {
            uid,
            registry,
            options,
            metrics,
            store: Vec::new(),
            free_nodes: Vec::new(),
            deleted_records: Vec::new(),
            last_allocated: None,
            lists: Vec::new(),
            free_lists: Vec::new(),
            table: Vec::new(),
            deleted_since_last_compression: 0,
            deleted_before_last_compression: 0,
            compressions: 0,
            edge_modification_count: 0,
            iterable_heads: Vec::new(),
            iterable_tails: Vec::new(),
            leaf_cache: Vec::new(),
            leaf_cache_entries: 0,
            freeze_state: FreezeState::Unfrozen,
            listeners: Vec::new(),
            next_listener_id: 0,
            observed: false,
            current_position: None,
        }
    }

    /// Creates an empty graph with default options.
    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self::new(registry, GraphOptions::new())
    }

    /// Identity of this graph.
    #[inline]
    pub fn uid(&self) -> GraphUid {
        self.uid
    }

    /// Configured name, if any.
    pub fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    /// Options the graph was built with.
    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    /// Registry the graph's types come from.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Number of live nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.table.len() - self.deleted_since_last_compression
    }

    /// Size of the node table, including slots of deleted nodes.
    #[inline]
    pub fn node_id_count(&self) -> usize {
        self.table.len()
    }

    /// Size of the record arena, free slots included. Every handle of this
    /// graph indexes below this bound.
    pub fn allocated_nodes(&self) -> usize {
        self.store.len()
    }

    /// Arena slots waiting to be reused.
    pub fn free_node_slots(&self) -> usize {
        self.free_nodes.len()
    }

    /// Nodes deleted over the graph's life.
    pub fn total_nodes_deleted(&self) -> usize {
        self.deleted_before_last_compression + self.deleted_since_last_compression
    }

    /// Nodes deleted since the last compaction.
    pub fn nodes_deleted_since_last_compression(&self) -> usize {
        self.deleted_since_last_compression
    }

    /// Number of compactions that renumbered the table.
    #[inline]
    pub fn compressions(&self) -> u32 {
        self.compressions
    }

    /// Number of edge writes performed so far.
    pub fn edge_modification_count(&self) -> u64 {
        self.edge_modification_count
    }

    /// Summary counters.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            name: self.options.name.clone(),
            live_nodes: self.node_count(),
            node_id_count: self.node_id_count(),
            total_deleted: self.total_nodes_deleted(),
            compressions: self.compressions,
            gvn_cache_entries: self.gvn_cache_len(),
            edge_modifications: self.edge_modification_count,
            listeners: self.listeners.len(),
        }
    }

    // =========================================================================
    // Freezing and observation
    // =========================================================================

    /// Current freeze state.
    pub fn freeze_state(&self) -> FreezeState {
        self.freeze_state
    }

    /// Returns true if mutations are currently rejected.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.freeze_state != FreezeState::Unfrozen
    }

    /// Makes the graph read-only until [`Graph::unfreeze`].
    pub fn temporary_freeze(&mut self) -> Result<()> {
        if self.freeze_state == FreezeState::DeepFreeze {
            return Err(GraphError::Frozen("graph is permanently frozen"));
        }
        self.freeze_state = FreezeState::TemporaryFreeze;
        debug!(graph = ?self.options.name, "graph.temporary_freeze");
        Ok(())
    }

    /// Makes the graph permanently read-only.
    pub fn freeze(&mut self) {
        self.freeze_state = FreezeState::DeepFreeze;
        debug!(graph = ?self.options.name, "graph.freeze");
    }

    /// Lifts a temporary freeze.
    pub fn unfreeze(&mut self) -> Result<()> {
        if self.freeze_state == FreezeState::DeepFreeze {
            return Err(GraphError::Frozen("cannot unfreeze a permanently frozen graph"));
        }
        self.freeze_state = FreezeState::Unfrozen;
        debug!(graph = ?self.options.name, "graph.unfreeze");
        Ok(())
    }

    /// Flags that a consumer is observing the graph, which suppresses
    /// automatic compaction.
    pub fn set_observed(&mut self, observed: bool) {
        self.observed = observed;
    }

    /// Returns true while a consumer observes the graph.
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    #[inline]
    pub(crate) fn check_mutable(&self, operation: &'static str) -> Result<()> {
        if self.is_frozen() {
            return Err(GraphError::Frozen(operation));
        }
        Ok(())
    }

    // =========================================================================
    // Source positions
    // =========================================================================

    /// Sets the position stamped onto nodes registered while tracking is on,
    /// returning the previous one.
    pub fn set_current_source_position(
        &mut self,
        position: Option<SourcePosition>,
    ) -> Option<SourcePosition> {
        std::mem::replace(&mut self.current_position, position)
    }

    /// Position applied to newly registered nodes.
    pub fn current_source_position(&self) -> Option<&SourcePosition> {
        self.current_position.as_ref()
    }

    /// Returns true if nodes are stamped with source positions.
    pub fn tracks_source_positions(&self) -> bool {
        self.options.track_source_positions
    }

    /// Source position of a node.
    pub fn source_position(&self, node: NodeRef) -> Option<&SourcePosition> {
        self.record(node).source_position.as_ref()
    }

    /// Replaces the source position of a node.
    pub fn set_source_position(
        &mut self,
        node: NodeRef,
        position: Option<SourcePosition>,
    ) -> Result<()> {
        self.check_mutable("set_source_position")?;
        self.check_owned(node)?;
        self.store[node.index()].source_position = position;
        Ok(())
    }

    // =========================================================================
    // Node queries
    // =========================================================================

    #[inline]
    fn lookup(&self, node: NodeRef) -> Option<&NodeRecord> {
        if node.graph() != self.uid {
            return None;
        }
        self.store
            .get(node.index())
            .filter(|record| record.holds(node))
    }

    /// Record behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if `node` belongs to another graph or its slot was reclaimed.
    /// Fallible entry points reject such handles with
    /// [`GraphError::ForeignNode`] or [`GraphError::NotAlive`] instead.
    #[inline]
    #[track_caller]
    pub(crate) fn record(&self, node: NodeRef) -> &NodeRecord {
        match self.lookup(node) {
            Some(record) => record,
            None => self.invalid_handle(node),
        }
    }

    #[cold]
    #[track_caller]
    fn invalid_handle(&self, node: NodeRef) -> ! {
        if self.owns(node) {
            panic!("{node} was reclaimed from graph {:?}", self.options.name)
        }
        panic!(
            "{node} of graph {:?} used with graph {:?} ({:?})",
            node.graph(),
            self.uid,
            self.options.name
        )
    }

    /// Current handle of the record in arena slot `index`.
    #[inline]
    pub(crate) fn handle(&self, index: usize) -> NodeRef {
        NodeRef::new(self.uid, index as u32, self.store[index].generation)
    }

    /// Returns true if `node` was created by this graph. Handles of reclaimed
    /// nodes still count as owned.
    pub fn owns(&self, node: NodeRef) -> bool {
        node.graph() == self.uid && node.index() < self.store.len()
    }

    /// Rejects handles of other graphs and handles whose slot was reclaimed.
    #[inline]
    pub(crate) fn check_owned(&self, node: NodeRef) -> Result<()> {
        if !self.owns(node) {
            return Err(GraphError::ForeignNode(node));
        }
        if !self.store[node.index()].holds(node) {
            return Err(GraphError::NotAlive(node));
        }
        Ok(())
    }

    /// Type of a node.
    #[inline]
    pub fn node_type(&self, node: NodeRef) -> &Arc<NodeType> {
        &self.record(node).ty
    }

    /// Lifecycle state of a node. Reclaimed nodes read as deleted.
    ///
    /// # Panics
    ///
    /// Panics if `node` belongs to another graph.
    #[inline]
    pub fn state(&self, node: NodeRef) -> NodeState {
        match self.lookup(node) {
            Some(record) => record.state,
            None if self.owns(node) => NodeState::Deleted,
            None => self.invalid_handle(node),
        }
    }

    /// Returns true if the node is registered and not deleted.
    #[inline]
    pub fn is_alive(&self, node: NodeRef) -> bool {
        self.lookup(node).is_some_and(NodeRecord::is_alive)
    }

    /// Returns true if the node was deleted.
    #[inline]
    pub fn is_deleted(&self, node: NodeRef) -> bool {
        self.state(node) == NodeState::Deleted
    }

    /// Returns true if the node was never registered.
    #[inline]
    pub fn is_unregistered(&self, node: NodeRef) -> bool {
        self.state(node) == NodeState::Unregistered
    }

    /// Current id of a live node.
    #[inline]
    pub fn id(&self, node: NodeRef) -> Option<NodeId> {
        match self.state(node) {
            NodeState::Alive(id) => Some(id),
            _ => None,
        }
    }

    /// Live node at `id`.
    pub fn node_at(&self, id: NodeId) -> Option<NodeRef> {
        self.table.get(id.as_usize()).copied().flatten()
    }

    /// Data values of a node.
    pub fn data(&self, node: NodeRef) -> &[DataValue] {
        &self.record(node).data
    }

    /// One data value of a node.
    pub fn data_field(&self, node: NodeRef, index: usize) -> Option<&DataValue> {
        self.record(node).data.get(index)
    }

    /// Overwrites a data value. A cached leaf node is refiled under its new
    /// value number.
    pub fn set_data(&mut self, node: NodeRef, index: usize, value: DataValue) -> Result<()> {
        self.check_mutable("set_data")?;
        self.check_owned(node)?;
        let record = &self.store[node.index()];
        record.ty.data().check(record.ty.name(), index, &value)?;
        let leaf_alive = record.is_alive() && record.ty.leaf_id().is_some();
        let cached = leaf_alive && self.remove_node_from_cache(node);
        let record = &mut self.store[node.index()];
        record.data[index] = value;
        record.mod_count = record.mod_count.wrapping_add(1);
        if cached {
            self.put_node_into_cache(node);
        }
        Ok(())
    }

    /// Nodes that use `node` as an input, one entry per edge.
    #[inline]
    pub fn usages(&self, node: NodeRef) -> &[NodeRef] {
        &self.record(node).usages
    }

    /// Number of usage entries.
    #[inline]
    pub fn usage_count(&self, node: NodeRef) -> usize {
        self.record(node).usages.len()
    }

    /// Returns true if anything uses the node.
    #[inline]
    pub fn has_usages(&self, node: NodeRef) -> bool {
        !self.record(node).usages.is_empty()
    }

    /// Node holding `node` as a successor.
    #[inline]
    pub fn predecessor(&self, node: NodeRef) -> Option<NodeRef> {
        self.record(node).predecessor
    }

    /// Debug modification counter of a node's edges.
    pub fn mod_count(&self, node: NodeRef) -> u32 {
        self.record(node).mod_count
    }

    /// Debug modification counter of a node's usages.
    pub fn usage_mod_count(&self, node: NodeRef) -> u32 {
        self.record(node).usage_mod_count
    }

    /// Human-readable `id|ShortName` label.
    pub fn describe(&self, node: NodeRef) -> String {
        let record = self.record(node);
        match record.state {
            NodeState::Alive(id) => format!("{}|{}", id, record.ty.short_name()),
            NodeState::Unregistered => format!("?|{}", record.ty.short_name()),
            NodeState::Deleted => format!("del|{}", record.ty.short_name()),
        }
    }

    // =========================================================================
    // Usage and predecessor bookkeeping
    // =========================================================================

    #[inline]
    fn bump_mod_count(&mut self, node: NodeRef) {
        let record = &mut self.store[node.index()];
        record.mod_count = record.mod_count.wrapping_add(1);
    }

    pub(crate) fn add_usage(&mut self, target: NodeRef, user: NodeRef) {
        let record = &mut self.store[target.index()];
        record.usages.push(user);
        record.usage_mod_count = record.usage_mod_count.wrapping_add(1);
        record.zero_usages_notified = false;
    }

    /// Removes one occurrence of `user`: the two inline entries are checked
    /// first, then the overflow from the back. The last entry fills the hole.
    pub(crate) fn remove_usage(&mut self, target: NodeRef, user: NodeRef) -> bool {
        let record = &mut self.store[target.index()];
        record.usage_mod_count = record.usage_mod_count.wrapping_add(1);
        let usages = &mut record.usages;
        let found = if usages.first() == Some(&user) {
            Some(0)
        } else if usages.get(1) == Some(&user) {
            Some(1)
        } else {
            (2..usages.len()).rev().find(|&i| usages[i] == user)
        };
        match found {
            Some(index) => {
                usages.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes up to `count` occurrences of `user` in one pass, keeping the
    /// order of the remaining entries. Returns the number removed.
    pub(crate) fn remove_usage_n_times(
        &mut self,
        target: NodeRef,
        user: NodeRef,
        count: usize,
    ) -> usize {
        let record = &mut self.store[target.index()];
        record.usage_mod_count = record.usage_mod_count.wrapping_add(1);
        let mut removed = 0;
        record.usages.retain(|usage| {
            if removed < count && *usage == user {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Moves the usage entry of `node` from `old` to `new` after an input
    /// slot of `node` changed.
    pub(crate) fn update_usages(
        &mut self,
        node: NodeRef,
        old: Option<NodeRef>,
        new: Option<NodeRef>,
    ) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if let Some(old) = old {
            if !self.remove_usage(old, node) {
                return Err(GraphError::MissingUsage {
                    node: old,
                    usage: node,
                });
            }
        }
        self.maybe_notify_input_changed(node)?;
        if let Some(new) = new {
            self.add_usage(new, node);
        }
        if let Some(old) = old {
            if !self.has_usages(old) {
                self.maybe_notify_zero_usages(old)?;
            }
        }
        Ok(())
    }

    /// Moves the predecessor link after a successor slot of `node` changed.
    pub(crate) fn update_predecessor(
        &mut self,
        node: NodeRef,
        old: Option<NodeRef>,
        new: Option<NodeRef>,
    ) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if let Some(old) = old {
            let current = self.store[old.index()].predecessor;
            if new.is_some() && current != Some(node) {
                return Err(GraphError::incompatible(
                    node,
                    format!("old successor {old} has predecessor {current:?}"),
                ));
            }
            self.store[old.index()].predecessor = None;
        }
        if let Some(new) = new {
            if let Some(existing) = self.store[new.index()].predecessor {
                return Err(GraphError::incompatible(
                    node,
                    format!("successor {new} already has predecessor {existing}"),
                ));
            }
            self.store[new.index()].predecessor = Some(node);
        }
        self.maybe_notify_input_changed(node)
    }

    pub(crate) fn note_edge_write(&mut self, node: NodeRef) {
        self.edge_modification_count += 1;
        self.bump_mod_count(node);
    }

    pub(crate) fn metrics(&self) -> &dyn GraphMetrics {
        self.metrics.as_ref()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("uid", &self.uid)
            .field("name", &self.options.name)
            .field("live", &self.node_count())
            .field("ids", &self.node_id_count())
            .field("freeze_state", &self.freeze_state)
            .finish_non_exhaustive()
    }
}
