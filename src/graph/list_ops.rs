//! Ordered multi-edges owned by one `(node, slot)`.
//!
//! List contents live in a side table of the graph; a [`NodeListRef`] names
//! the list and every mutation goes through the graph so the owner's usage or
//! predecessor bookkeeping is replayed per element.

use std::sync::Arc;

use super::node::EdgeCell;
use super::Graph;
use crate::error::{GraphError, Result};
use crate::nodeclass::EdgeKind;
use crate::types::NodeRef;

/// Handle to the list stored in one list slot of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeListRef {
    owner: NodeRef,
    kind: EdgeKind,
    slot: usize,
    index: u32,
}

impl NodeListRef {
    /// Node owning the list.
    pub fn owner(&self) -> NodeRef {
        self.owner
    }

    /// Edge family of the list.
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Slot index of the list in its owner's layout.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Graph {
    /// List stored in slot `slot` of the given edge family.
    pub fn list(&self, node: NodeRef, kind: EdgeKind, slot: usize) -> Result<NodeListRef> {
        self.check_owned(node)?;
        let record = self.record(node);
        let info = record
            .ty
            .edges(kind)
            .slot(slot)
            .ok_or_else(|| GraphError::incompatible(node, format!("no {kind:?} slot {slot}")))?;
        match record.cells(kind)[info.storage()] {
            EdgeCell::List(index) => Ok(NodeListRef {
                owner: node,
                kind,
                slot,
                index,
            }),
            _ => Err(GraphError::incompatible(
                node,
                format!("slot {} is not a list", info.name()),
            )),
        }
    }

    /// Input list in slot `slot`.
    pub fn input_list(&self, node: NodeRef, slot: usize) -> Result<NodeListRef> {
        self.list(node, EdgeKind::Inputs, slot)
    }

    /// Successor list in slot `slot`.
    pub fn successor_list(&self, node: NodeRef, slot: usize) -> Result<NodeListRef> {
        self.list(node, EdgeKind::Successors, slot)
    }

    /// Input list called `name`.
    pub fn input_list_named(&self, node: NodeRef, name: &str) -> Result<NodeListRef> {
        let slot = self.slot_named(node, EdgeKind::Inputs, name)?;
        self.input_list(node, slot)
    }

    /// Successor list called `name`.
    pub fn successor_list_named(&self, node: NodeRef, name: &str) -> Result<NodeListRef> {
        let slot = self.slot_named(node, EdgeKind::Successors, name)?;
        self.successor_list(node, slot)
    }

    /// Elements of a list, including empty entries.
    ///
    /// # Panics
    ///
    /// Panics if the list handle is stale or belongs to another graph.
    #[track_caller]
    pub fn list_items(&self, list: NodeListRef) -> &[Option<NodeRef>] {
        match self.lists.get(list.index as usize) {
            Some(store) if store.owner == Some(list.owner) && store.kind == Some(list.kind) => {
                &store.items
            }
            _ => panic!("stale list handle of {} in graph {:?}", list.owner, self.name()),
        }
    }

    /// Number of entries in a list.
    pub fn list_len(&self, list: NodeListRef) -> usize {
        self.list_items(list).len()
    }

    /// Returns true if the list has no entries.
    pub fn list_is_empty(&self, list: NodeListRef) -> bool {
        self.list_items(list).is_empty()
    }

    /// Entry at `index`.
    pub fn list_get(&self, list: NodeListRef, index: usize) -> Option<NodeRef> {
        self.list_items(list).get(index).copied().flatten()
    }

    /// Non-null entries in order.
    pub fn list_nodes(&self, list: NodeListRef) -> impl Iterator<Item = NodeRef> + '_ {
        self.list_items(list).iter().copied().flatten()
    }

    /// Index of the first entry equal to `node`.
    pub fn list_index_of(&self, list: NodeListRef, node: NodeRef) -> Option<usize> {
        self.list_items(list)
            .iter()
            .position(|entry| *entry == Some(node))
    }

    /// Appends `value`.
    pub fn list_append(&mut self, list: NodeListRef, value: Option<NodeRef>) -> Result<()> {
        let tracked = self.check_list_write(list, value)?;
        self.check_list_successor(list, tracked, None, value)?;
        self.lists[list.index as usize].items.push(value);
        self.element_changed(list, tracked, None, value)
    }

    /// Inserts `value` at `index`, shifting later entries.
    pub fn list_insert(&mut self, list: NodeListRef, index: usize, value: Option<NodeRef>) -> Result<()> {
        let tracked = self.check_list_write(list, value)?;
        let len = self.list_len(list);
        if index > len {
            return Err(GraphError::incompatible(
                list.owner,
                format!("insert index {index} beyond list length {len}"),
            ));
        }
        self.check_list_successor(list, tracked, None, value)?;
        self.lists[list.index as usize].items.insert(index, value);
        self.element_changed(list, tracked, None, value)
    }

    /// Overwrites the entry at `index`, returning the previous one.
    pub fn list_set(
        &mut self,
        list: NodeListRef,
        index: usize,
        value: Option<NodeRef>,
    ) -> Result<Option<NodeRef>> {
        let tracked = self.check_list_write(list, value)?;
        let len = self.list_len(list);
        if index >= len {
            return Err(GraphError::incompatible(
                list.owner,
                format!("index {index} beyond list length {len}"),
            ));
        }
        let old = self.list_get(list, index);
        self.check_list_successor(list, tracked, old, value)?;
        self.lists[list.index as usize].items[index] = value;
        self.element_changed(list, tracked, old, value)?;
        Ok(old)
    }

    /// Removes the entry at `index`, shifting later entries down.
    pub fn list_remove_at(&mut self, list: NodeListRef, index: usize) -> Result<Option<NodeRef>> {
        let tracked = self.check_list_write(list, None)?;
        let items = &mut self.lists[list.index as usize].items;
        if index >= items.len() {
            return Err(GraphError::incompatible(
                list.owner,
                format!("index {index} beyond list length {}", items.len()),
            ));
        }
        let old = items.remove(index);
        self.element_changed(list, tracked, old, None)?;
        Ok(old)
    }

    /// Removes the first entry equal to `node`. Returns false if absent.
    pub fn list_remove(&mut self, list: NodeListRef, node: NodeRef) -> Result<bool> {
        self.check_list(list)?;
        match self.list_index_of(list, node) {
            Some(index) => self.list_remove_at(list, index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Shortens the list to `len` entries.
    pub fn list_truncate(&mut self, list: NodeListRef, len: usize) -> Result<()> {
        let tracked = self.check_list_write(list, None)?;
        let items = &mut self.lists[list.index as usize].items;
        if len >= items.len() {
            return Ok(());
        }
        let removed = items.split_off(len);
        for old in removed {
            self.element_changed(list, tracked, old, None)?;
        }
        Ok(())
    }

    /// Removes every entry.
    pub fn list_clear(&mut self, list: NodeListRef) -> Result<()> {
        self.list_truncate(list, 0)
    }

    /// Makes `list` hold the same entries as `from`, binding each of them to
    /// the owner of `list`.
    pub fn list_copy(&mut self, list: NodeListRef, from: NodeListRef) -> Result<()> {
        self.check_list(from)?;
        let items = self.list_items(from).to_vec();
        self.list_assign(list, &items)
    }

    /// Replaces the contents of `list` by `items`.
    ///
    /// Usages of new entries are recorded before old ones are dropped, so an
    /// input present in both never transiently loses its last usage. For a
    /// successor list every new target is checked before any link changes.
    pub fn list_assign(&mut self, list: NodeListRef, items: &[Option<NodeRef>]) -> Result<()> {
        self.check_list(list)?;
        self.check_mutable("list_assign")?;
        let tracked = !self.is_unregistered(list.owner);
        for value in items {
            self.check_list_write(list, *value)?;
        }
        if tracked && list.kind == EdgeKind::Successors {
            self.check_successor_list(list, items)?;
        }
        let old = std::mem::replace(&mut self.lists[list.index as usize].items, items.to_vec());
        if !tracked {
            return Ok(());
        }
        self.note_edge_write(list.owner);
        let owner = list.owner;
        match list.kind {
            EdgeKind::Inputs => {
                for value in items.iter().flatten() {
                    self.add_usage(*value, owner);
                }
                for value in old.iter().flatten() {
                    if !self.remove_usage(*value, owner) {
                        return Err(GraphError::MissingUsage {
                            node: *value,
                            usage: owner,
                        });
                    }
                }
                self.maybe_notify_input_changed(owner)?;
                for value in old.iter().flatten() {
                    if !self.has_usages(*value) {
                        self.maybe_notify_zero_usages(*value)?;
                    }
                }
            }
            EdgeKind::Successors => {
                for value in old.iter().flatten() {
                    let record = &mut self.store[value.index()];
                    if record.predecessor == Some(owner) {
                        record.predecessor = None;
                    }
                }
                for value in items.iter().flatten() {
                    self.store[value.index()].predecessor = Some(owner);
                }
                self.maybe_notify_input_changed(owner)?;
            }
        }
        Ok(())
    }

    /// Drops trailing empty entries and releases spare capacity. Remaining
    /// entries keep their order.
    pub fn list_minimize_size(&mut self, list: NodeListRef) -> Result<()> {
        self.check_list(list)?;
        let items = &mut self.lists[list.index as usize].items;
        let len = items.iter().rposition(Option::is_some).map_or(0, |last| last + 1);
        items.truncate(len);
        items.shrink_to_fit();
        Ok(())
    }

    fn check_list(&self, list: NodeListRef) -> Result<()> {
        let store = self.lists.get(list.index as usize);
        match store {
            Some(store) if store.owner == Some(list.owner) && store.kind == Some(list.kind) => Ok(()),
            _ => Err(GraphError::incompatible(list.owner, "stale list handle")),
        }
    }

    fn check_list_write(&self, list: NodeListRef, value: Option<NodeRef>) -> Result<bool> {
        self.check_mutable("list_write")?;
        self.check_list(list)?;
        let tracked = self.check_edge_target(list.owner, value)?;
        let ty = Arc::clone(self.node_type(list.owner));
        if let Some(slot) = ty.edges(list.kind).slot(list.slot) {
            self.check_assignable(list.owner, slot, value)?;
        }
        Ok(tracked)
    }

    fn check_list_successor(
        &self,
        list: NodeListRef,
        tracked: bool,
        old: Option<NodeRef>,
        value: Option<NodeRef>,
    ) -> Result<()> {
        if tracked && list.kind == EdgeKind::Successors {
            self.check_successor_free(list.owner, old, value)?;
        }
        Ok(())
    }

    /// New successors must be distinct and either free or already held by
    /// the list being replaced.
    fn check_successor_list(&self, list: NodeListRef, items: &[Option<NodeRef>]) -> Result<()> {
        let current = self.list_items(list);
        for (i, value) in items.iter().enumerate() {
            let Some(value) = *value else {
                continue;
            };
            if items[..i].contains(&Some(value)) {
                return Err(GraphError::incompatible(
                    list.owner,
                    format!("successor {value} appears twice"),
                ));
            }
            match self.predecessor(value) {
                None => {}
                Some(existing) if existing == list.owner && current.contains(&Some(value)) => {}
                Some(existing) => {
                    return Err(GraphError::incompatible(
                        list.owner,
                        format!("successor {value} already has predecessor {existing}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn element_changed(
        &mut self,
        list: NodeListRef,
        tracked: bool,
        old: Option<NodeRef>,
        new: Option<NodeRef>,
    ) -> Result<()> {
        if !tracked {
            return Ok(());
        }
        self.note_edge_write(list.owner);
        match list.kind {
            EdgeKind::Inputs => self.update_usages(list.owner, old, new),
            EdgeKind::Successors => self.update_predecessor(list.owner, old, new),
        }
    }
}
