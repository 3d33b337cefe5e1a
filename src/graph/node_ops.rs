use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use super::node::{EdgeCell, ListStore, NodeRecord, NodeState, NO_NODE};
use super::{EdgeSelector, Graph, NodeBuilder, NodeEvent};
use crate::error::{GraphError, Result};
use crate::nodeclass::{DataValue, EdgeKind, InputType, NodeType};
use crate::types::{NodeId, NodeRef};

/// Lists longer than this release their usages in bulk.
const BULK_USAGE_REMOVAL_MIN_LEN: usize = 3;

impl Graph {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Creates a detached node of type `ty` holding `data`.
    pub fn create_node(&mut self, ty: &Arc<NodeType>, data: Vec<DataValue>) -> Result<NodeRef> {
        self.check_mutable("create_node")?;
        if ty.flags().is_abstract {
            return Err(GraphError::AbstractType(ty.id()));
        }
        match self.registry.get(ty.id()) {
            Some(registered) if Arc::ptr_eq(&registered, ty) => {}
            _ => return Err(GraphError::UnknownType(ty.id())),
        }
        ty.data().check_all(ty.name(), &data)?;
        Ok(self.alloc_record(Arc::clone(ty), data))
    }

    /// Creates a detached node whose data fields hold their defaults.
    pub fn create_default(&mut self, ty: &Arc<NodeType>) -> Result<NodeRef> {
        self.create_node(ty, ty.data().defaults())
    }

    /// Starts building a node of type `ty`.
    pub fn build(&mut self, ty: &Arc<NodeType>) -> NodeBuilder<'_> {
        NodeBuilder::new(self, Arc::clone(ty))
    }

    /// Allocates a detached record, reusing a reclaimed slot when one is free.
    pub(crate) fn alloc_record(&mut self, ty: Arc<NodeType>, data: Vec<DataValue>) -> NodeRef {
        let (index, generation) = match self.free_nodes.pop() {
            Some(index) => (index, self.store[index as usize].generation),
            None => (self.store.len() as u32, 0),
        };
        let node = NodeRef::new(self.uid, index, generation);
        let mut record = NodeRecord::new(Arc::clone(&ty), data, generation);
        for kind in [EdgeKind::Inputs, EdgeKind::Successors] {
            for slot in ty.edges(kind).slots() {
                let cell = if slot.is_list() {
                    EdgeCell::List(self.alloc_list(node, kind))
                } else {
                    EdgeCell::Direct(None)
                };
                record.cells_mut(kind)[slot.storage()] = cell;
            }
        }
        if index as usize == self.store.len() {
            self.store.push(record);
        } else {
            self.store[index as usize] = record;
        }
        self.last_allocated = Some(node);
        node
    }

    /// Returns the slot of a dead or discarded record to the free list. The
    /// slot's generation moves on, so every outstanding handle to it reads
    /// as deleted.
    pub(super) fn reclaim_record(&mut self, index: usize) {
        let record = &mut self.store[index];
        let mut lists: SmallVec<[u32; 4]> = SmallVec::new();
        for cells in [&mut record.inputs, &mut record.successors] {
            for cell in cells.iter_mut() {
                if let EdgeCell::List(list) = *cell {
                    lists.push(list);
                }
                *cell = EdgeCell::Vacant;
            }
        }
        record.state = NodeState::Deleted;
        record.data = Vec::new();
        record.usages = SmallVec::new();
        record.predecessor = None;
        record.source_position = None;
        record.zero_usages_notified = false;
        record.type_next.store(NO_NODE, Ordering::Relaxed);
        record.generation = record.generation.wrapping_add(1);
        for list in lists {
            self.free_list(list);
        }
        self.free_nodes.push(index as u32);
        if self.last_allocated.is_some_and(|last| last.index() == index) {
            self.last_allocated = None;
        }
    }

    /// Drops a detached node that lost a value-numbering race. Only the most
    /// recently allocated node is dropped, since no other detached node can
    /// have been pointed at it yet.
    pub(super) fn discard_transient(&mut self, node: NodeRef) {
        if self.last_allocated == Some(node) && self.is_unregistered(node) {
            trace!(node = %node, "graph.discard_transient");
            self.reclaim_record(node.index());
        }
    }

    fn alloc_list(&mut self, owner: NodeRef, kind: EdgeKind) -> u32 {
        let store = ListStore {
            owner: Some(owner),
            kind: Some(kind),
            items: Vec::new(),
        };
        match self.free_lists.pop() {
            Some(index) => {
                self.lists[index as usize] = store;
                index
            }
            None => {
                self.lists.push(store);
                (self.lists.len() - 1) as u32
            }
        }
    }

    pub(crate) fn free_list(&mut self, index: u32) {
        self.lists[index as usize] = ListStore::default();
        self.free_lists.push(index);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a detached node without value numbering. Value-numberable
    /// nodes are rejected; use [`Graph::unique`] or
    /// [`Graph::add_without_unique`] for them.
    pub fn add(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.check_owned(node)?;
        if self.node_type(node).is_value_numberable() {
            return Err(GraphError::ValueNumberable(node));
        }
        self.initialize(node)?;
        Ok(node)
    }

    /// Registers a detached node, bypassing value numbering.
    pub fn add_without_unique(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.check_owned(node)?;
        self.initialize(node)?;
        Ok(node)
    }

    /// Registers a detached node after registering any detached inputs,
    /// bypassing value numbering throughout.
    pub fn add_without_unique_with_inputs(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.check_owned(node)?;
        if self.is_alive(node) {
            return Ok(node);
        }
        self.apply_inputs(node, |graph, input| {
            if graph.is_alive(input) {
                Ok(input)
            } else {
                graph.add_without_unique_with_inputs(input)
            }
        })?;
        self.initialize(node)?;
        Ok(node)
    }

    /// Registers `node` and records it as usage of its inputs and as
    /// predecessor of its successors.
    pub(crate) fn initialize(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("register")?;
        if self.state(node) != NodeState::Unregistered {
            return Err(GraphError::AlreadyRegistered(node));
        }
        let inputs: SmallVec<[NodeRef; 8]> = self.inputs(node).collect();
        if let Some(dead) = inputs.iter().copied().find(|input| !self.is_alive(*input)) {
            return Err(GraphError::NotAlive(dead));
        }
        let successors: SmallVec<[NodeRef; 4]> = self.successors(node).collect();
        for &successor in &successors {
            if !self.is_alive(successor) {
                return Err(GraphError::NotAlive(successor));
            }
            if let Some(existing) = self.predecessor(successor) {
                return Err(GraphError::incompatible(
                    node,
                    format!("successor {successor} already has predecessor {existing}"),
                ));
            }
        }
        self.register(node)?;
        for input in inputs {
            self.add_usage(input, node);
        }
        for successor in successors {
            self.store[successor.index()].predecessor = Some(node);
        }
        Ok(())
    }

    fn register(&mut self, node: NodeRef) -> Result<()> {
        let id = NodeId(self.table.len() as u32);
        self.table.push(Some(node));
        let track = self.options.track_source_positions;
        let record = &mut self.store[node.index()];
        record.state = NodeState::Alive(id);
        if track && record.source_position.is_none() {
            record.source_position = self.current_position.clone();
        }
        self.link_iterable(node);
        self.metrics.node_added();
        trace!(node = %node, id = id.0, ty = self.node_type(node).short_name(), "graph.register");
        self.fire(NodeEvent::NodeAdded, node)
    }

    pub(super) fn link_iterable(&mut self, node: NodeRef) {
        let Some(iterable) = self.store[node.index()].ty.iterable_id() else {
            return;
        };
        let iterable = iterable as usize;
        while self.iterable_heads.len() <= iterable {
            self.iterable_heads.push(AtomicU32::new(NO_NODE));
            self.iterable_tails.push(AtomicU32::new(NO_NODE));
        }
        self.store[node.index()]
            .type_next
            .store(NO_NODE, Ordering::Relaxed);
        let tail = self.iterable_tails[iterable].load(Ordering::Relaxed);
        if tail == NO_NODE {
            self.iterable_heads[iterable].store(node.index() as u32, Ordering::Relaxed);
        } else {
            self.store[tail as usize]
                .type_next
                .store(node.index() as u32, Ordering::Relaxed);
        }
        self.iterable_tails[iterable].store(node.index() as u32, Ordering::Relaxed);
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Removes a live node from the node table without touching its edges.
    pub fn mark_deleted(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("mark_deleted")?;
        self.check_owned(node)?;
        let NodeState::Alive(id) = self.state(node) else {
            return Err(GraphError::NotAlive(node));
        };
        if self.node_type(node).leaf_id().is_some() {
            self.remove_node_from_cache(node);
        }
        self.table[id.as_usize()] = None;
        self.store[node.index()].state = NodeState::Deleted;
        self.deleted_records.push(node.index() as u32);
        self.deleted_since_last_compression += 1;
        self.metrics.node_removed();
        trace!(node = %node, id = id.0, "graph.unregister");
        self.fire(NodeEvent::NodeRemoved, node)
    }

    /// Deletes a node that has no usages and no predecessor.
    ///
    /// The node leaves the table first; clearing its inputs afterwards lets
    /// zero-usage listeners see it as gone.
    pub fn safe_delete(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("safe_delete")?;
        self.check_owned(node)?;
        if !self.is_alive(node) {
            return Err(GraphError::NotAlive(node));
        }
        if self.has_usages(node) {
            return Err(GraphError::DeletionBlocked {
                node,
                reason: "node still has usages",
            });
        }
        if self.predecessor(node).is_some() {
            return Err(GraphError::DeletionBlocked {
                node,
                reason: "node still has a predecessor",
            });
        }
        self.mark_deleted(node)?;
        self.release_inputs(node)?;
        self.release_successors(node);
        Ok(())
    }

    /// Empties every input of a node, dropping the matching usage entries.
    pub fn clear_inputs(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("clear_inputs")?;
        self.check_owned(node)?;
        if self.is_deleted(node) {
            return Err(GraphError::NotAlive(node));
        }
        self.release_inputs(node)
    }

    /// Empties every successor of a node, dropping the predecessor links.
    pub fn clear_successors(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("clear_successors")?;
        self.check_owned(node)?;
        if self.is_deleted(node) {
            return Err(GraphError::NotAlive(node));
        }
        self.release_successors(node);
        Ok(())
    }

    fn release_inputs(&mut self, node: NodeRef) -> Result<()> {
        let tracked = !self.is_unregistered(node);
        let ty = Arc::clone(self.node_type(node));
        for entry in ty.inputs().iteration_mask() {
            match self.store[node.index()].inputs[entry.storage] {
                EdgeCell::Direct(Some(input)) => {
                    self.store[node.index()].inputs[entry.storage] = EdgeCell::Direct(None);
                    if tracked {
                        self.release_usage(input, node)?;
                    }
                }
                EdgeCell::List(list) => {
                    let items = std::mem::take(&mut self.lists[list as usize].items);
                    if !tracked {
                        continue;
                    }
                    if items.len() > BULK_USAGE_REMOVAL_MIN_LEN {
                        self.release_usages_bulk(node, &items)?;
                    } else {
                        for input in items.into_iter().flatten() {
                            self.release_usage(input, node)?;
                        }
                    }
                }
                _ => {}
            }
        }
        self.note_edge_write(node);
        Ok(())
    }

    fn release_usage(&mut self, input: NodeRef, user: NodeRef) -> Result<()> {
        if !self.remove_usage(input, user) {
            return Err(GraphError::MissingUsage { node: input, usage: user });
        }
        if !self.has_usages(input) {
            self.maybe_notify_zero_usages(input)?;
        }
        Ok(())
    }

    /// Drops the usages of a long input list, one pass per distinct input.
    ///
    /// The scan for further occurrences of an input stops once it has passed
    /// more than `usage_removal_lookahead` entries holding other inputs in
    /// total. Empty entries are not counted.
    fn release_usages_bulk(&mut self, user: NodeRef, items: &[Option<NodeRef>]) -> Result<()> {
        let lookahead = self.options.usage_removal_lookahead;
        let mut consumed = vec![false; items.len()];
        for start in 0..items.len() {
            if consumed[start] {
                continue;
            }
            let Some(input) = items[start] else {
                continue;
            };
            let mut count = 1;
            let mut others = 0;
            for next in start + 1..items.len() {
                if others > lookahead {
                    break;
                }
                if consumed[next] {
                    continue;
                }
                match items[next] {
                    Some(item) if item == input => {
                        consumed[next] = true;
                        count += 1;
                    }
                    Some(_) => others += 1,
                    None => {}
                }
            }
            let removed = self.remove_usage_n_times(input, user, count);
            if removed != count {
                return Err(GraphError::MissingUsage { node: input, usage: user });
            }
            if !self.has_usages(input) {
                self.maybe_notify_zero_usages(input)?;
            }
        }
        Ok(())
    }

    fn release_successors(&mut self, node: NodeRef) {
        let tracked = !self.is_unregistered(node);
        let ty = Arc::clone(self.node_type(node));
        for entry in ty.successors().iteration_mask() {
            match self.store[node.index()].successors[entry.storage] {
                EdgeCell::Direct(Some(successor)) => {
                    self.store[node.index()].successors[entry.storage] = EdgeCell::Direct(None);
                    if tracked {
                        self.drop_predecessor(successor, node);
                    }
                }
                EdgeCell::List(list) => {
                    let items = std::mem::take(&mut self.lists[list as usize].items);
                    if tracked {
                        for successor in items.into_iter().flatten() {
                            self.drop_predecessor(successor, node);
                        }
                    }
                }
                _ => {}
            }
        }
        self.note_edge_write(node);
    }

    fn drop_predecessor(&mut self, successor: NodeRef, node: NodeRef) {
        let record = &mut self.store[successor.index()];
        if record.predecessor == Some(node) {
            record.predecessor = None;
        }
    }

    // =========================================================================
    // Replacement
    // =========================================================================

    fn check_replace_with(&self, node: NodeRef, other: Option<NodeRef>) -> Result<()> {
        self.check_mutable("replace")?;
        self.check_owned(node)?;
        if let Some(other) = other {
            self.check_owned(other)?;
            if other == node {
                return Err(GraphError::incompatible(node, "cannot replace a node with itself"));
            }
            if !self.is_alive(other) {
                return Err(GraphError::NotAlive(other));
            }
        }
        Ok(())
    }

    /// Redirects every usage of `node` to `other`.
    pub fn replace_at_usages(&mut self, node: NodeRef, other: Option<NodeRef>) -> Result<()> {
        self.check_replace_with(node, other)?;
        self.replace_at_all_usages(node, other, None)
    }

    /// Redirects every usage of `node` to `other`, then deletes `node`.
    pub fn replace_at_usages_and_delete(&mut self, node: NodeRef, other: Option<NodeRef>) -> Result<()> {
        self.check_replace_with(node, other)?;
        self.replace_at_all_usages(node, other, Some(node))?;
        self.safe_delete(node)
    }

    /// Redirects the usages of `node` accepted by `filter` to `other`.
    pub fn replace_at_matching_usages(
        &mut self,
        node: NodeRef,
        other: Option<NodeRef>,
        filter: &dyn Fn(&Graph, NodeRef) -> bool,
    ) -> Result<()> {
        self.check_replace_with(node, other)?;
        let mut i = 0;
        while i < self.usage_count(node) {
            let usage = self.usages(node)[i];
            if filter(self, usage) {
                self.replace_at_usage(node, other, usage, None)?;
                self.take_usage_at(node, i);
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Redirects the usages of `node` that reach it through an input of
    /// kind `input_type`.
    pub fn replace_at_usages_of_type(
        &mut self,
        node: NodeRef,
        other: Option<NodeRef>,
        input_type: InputType,
    ) -> Result<()> {
        self.check_replace_with(node, other)?;
        if !self.has_usages(node) {
            return Ok(());
        }
        let mut i = 0;
        while i < self.usage_count(node) {
            let usage = self.usages(node)[i];
            let position = self
                .input_positions(usage)
                .find(|&pos| {
                    self.input_type_at(usage, pos) == Some(input_type)
                        && self.get_at(usage, pos) == Some(node)
                });
            match position {
                Some(pos) => {
                    self.write_position_raw(usage, pos, other)?;
                    self.note_edge_write(usage);
                    self.maybe_notify_input_changed(usage)?;
                    if let Some(other) = other {
                        self.add_usage(other, usage);
                    }
                    self.take_usage_at(node, i);
                }
                None => i += 1,
            }
        }
        if !self.has_usages(node) {
            self.maybe_notify_zero_usages(node)?;
        }
        Ok(())
    }

    fn replace_at_all_usages(
        &mut self,
        node: NodeRef,
        other: Option<NodeRef>,
        to_be_deleted: Option<NodeRef>,
    ) -> Result<()> {
        let record = &mut self.store[node.index()];
        record.usage_mod_count = record.usage_mod_count.wrapping_add(1);
        let usages = std::mem::take(&mut record.usages);
        for usage in usages {
            self.replace_at_usage(node, other, usage, to_be_deleted)?;
        }
        Ok(())
    }

    fn replace_at_usage(
        &mut self,
        node: NodeRef,
        other: Option<NodeRef>,
        usage: NodeRef,
        to_be_deleted: Option<NodeRef>,
    ) -> Result<()> {
        if !self.replace_first_edge_raw(usage, EdgeKind::Inputs, node, other)? {
            return Err(GraphError::MissingUsage { node, usage });
        }
        self.note_edge_write(usage);
        if to_be_deleted != Some(usage) {
            self.maybe_notify_input_changed(usage)?;
        }
        if let Some(other) = other {
            self.add_usage(other, usage);
        }
        Ok(())
    }

    fn take_usage_at(&mut self, node: NodeRef, index: usize) {
        let record = &mut self.store[node.index()];
        record.usage_mod_count = record.usage_mod_count.wrapping_add(1);
        record.usages.swap_remove(index);
    }

    /// Points the predecessor of `node` at `other` instead.
    pub fn replace_at_predecessor(&mut self, node: NodeRef, other: Option<NodeRef>) -> Result<()> {
        self.check_replace_with(node, other)?;
        if let Some(predecessor) = self.predecessor(node) {
            self.check_successor_free(predecessor, Some(node), other)?;
            if !self.replace_first_edge_raw(predecessor, EdgeKind::Successors, node, other)? {
                return Err(GraphError::incompatible(
                    predecessor,
                    format!("{node} not found among the successors"),
                ));
            }
            self.note_edge_write(predecessor);
            self.update_predecessor(predecessor, Some(node), other)?;
        }
        Ok(())
    }

    /// Replaces `node` by `other` at its usages and predecessor, then deletes
    /// it.
    pub fn replace_and_delete(&mut self, node: NodeRef, other: NodeRef) -> Result<()> {
        self.check_replace_with(node, Some(other))?;
        if self.has_usages(node) {
            self.replace_at_usages(node, Some(other))?;
        }
        self.replace_at_predecessor(node, Some(other))?;
        self.safe_delete(node)
    }

    // =========================================================================
    // Cloning
    // =========================================================================

    /// Creates a detached copy of `node` with the same type and data. Edges are
    /// copied according to `edges` without any bookkeeping.
    pub fn clone_detached(&mut self, node: NodeRef, edges: EdgeSelector) -> Result<NodeRef> {
        self.check_mutable("clone")?;
        self.check_owned(node)?;
        let source = self.record(node);
        let ty = Arc::clone(&source.ty);
        let data = source.data.clone();
        let position = source.source_position.clone();
        let copy = self.alloc_record(Arc::clone(&ty), data);
        self.store[copy.index()].source_position = position;
        for (kind, enabled) in [
            (EdgeKind::Inputs, edges.copies_inputs()),
            (EdgeKind::Successors, edges.copies_successors()),
        ] {
            if !enabled {
                continue;
            }
            for slot in ty.edges(kind).slots() {
                let storage = slot.storage();
                match (
                    self.store[node.index()].cells(kind)[storage],
                    self.store[copy.index()].cells(kind)[storage],
                ) {
                    (EdgeCell::Direct(value), _) => {
                        self.store[copy.index()].cells_mut(kind)[storage] = EdgeCell::Direct(value);
                    }
                    (EdgeCell::List(from), EdgeCell::List(to)) => {
                        let items = self.lists[from as usize].items.clone();
                        self.lists[to as usize].items = items;
                    }
                    _ => {}
                }
            }
        }
        Ok(copy)
    }

    /// Clones `node` into this graph and registers the copy.
    ///
    /// With `apply_gvn`, a leaf value-numberable node returns an equal cached
    /// node instead when one exists. Copied successors must not already have
    /// a predecessor.
    pub fn clone_node(&mut self, node: NodeRef, edges: EdgeSelector, apply_gvn: bool) -> Result<NodeRef> {
        self.check_owned(node)?;
        let leaf_gvn = apply_gvn && self.node_type(node).leaf_id().is_some();
        if leaf_gvn {
            if let Some(existing) = self.find_node_in_cache(node) {
                return Ok(existing);
            }
        }
        let copy = self.clone_detached(node, edges)?;
        self.initialize(copy)?;
        if leaf_gvn {
            self.put_node_into_cache(copy);
        }
        Ok(copy)
    }

    /// Clones `node` with its inputs and registers the copy as a new usage of
    /// them.
    pub fn copy_with_inputs(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.clone_node(node, EdgeSelector::InputsOnly, false)
    }
}
