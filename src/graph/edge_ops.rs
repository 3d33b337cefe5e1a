use std::sync::Arc;

use super::iter::{EdgeCursor, EdgeIter, PositionIter};
use super::node::EdgeCell;
use super::Graph;
use crate::error::{GraphError, Result};
use crate::nodeclass::{EdgeKind, EdgeSlot, InputType, Position};
use crate::types::NodeRef;

impl Graph {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Non-null inputs of a node in slot order, list elements inline.
    #[inline]
    pub fn inputs(&self, node: NodeRef) -> EdgeIter<'_> {
        EdgeIter::new(self, node, EdgeKind::Inputs)
    }

    /// Non-null successors of a node in slot order.
    #[inline]
    pub fn successors(&self, node: NodeRef) -> EdgeIter<'_> {
        EdgeIter::new(self, node, EdgeKind::Successors)
    }

    /// Every input position of a node, including empty ones.
    pub fn input_positions(&self, node: NodeRef) -> PositionIter<'_> {
        PositionIter::new(self, node, EdgeKind::Inputs)
    }

    /// Every successor position of a node, including empty ones.
    pub fn successor_positions(&self, node: NodeRef) -> PositionIter<'_> {
        PositionIter::new(self, node, EdgeKind::Successors)
    }

    /// Detached cursor over the inputs of `node`.
    pub fn input_cursor(&self, node: NodeRef) -> EdgeCursor {
        EdgeCursor::new(self, node, EdgeKind::Inputs)
    }

    /// Detached cursor over the successors of `node`.
    pub fn successor_cursor(&self, node: NodeRef) -> EdgeCursor {
        EdgeCursor::new(self, node, EdgeKind::Successors)
    }

    /// Target of direct input slot `slot`.
    pub fn input(&self, node: NodeRef, slot: usize) -> Option<NodeRef> {
        self.direct(node, EdgeKind::Inputs, slot)
    }

    /// Target of direct successor slot `slot`.
    pub fn successor(&self, node: NodeRef, slot: usize) -> Option<NodeRef> {
        self.direct(node, EdgeKind::Successors, slot)
    }

    /// Target of the direct input called `name`.
    pub fn input_named(&self, node: NodeRef, name: &str) -> Option<NodeRef> {
        let slot = self.node_type(node).inputs().index_of(name)?;
        self.input(node, slot)
    }

    /// Target of the direct successor called `name`.
    pub fn successor_named(&self, node: NodeRef, name: &str) -> Option<NodeRef> {
        let slot = self.node_type(node).successors().index_of(name)?;
        self.successor(node, slot)
    }

    fn direct(&self, node: NodeRef, kind: EdgeKind, slot: usize) -> Option<NodeRef> {
        let record = self.record(node);
        let slot = record.ty.edges(kind).slot(slot)?;
        match record.cells(kind)[slot.storage()] {
            EdgeCell::Direct(value) => value,
            _ => None,
        }
    }

    /// Target at `pos`.
    pub fn get_at(&self, node: NodeRef, pos: Position) -> Option<NodeRef> {
        let record = self.record(node);
        let slot = record.ty.edges(pos.kind).slot(pos.slot)?;
        match (record.cells(pos.kind)[slot.storage()], pos.sub_index) {
            (EdgeCell::Direct(value), None) => value,
            (EdgeCell::List(list), Some(index)) => {
                self.lists[list as usize].items.get(index).copied().flatten()
            }
            _ => None,
        }
    }

    /// Input kind of the slot at `pos`.
    pub fn input_type_at(&self, node: NodeRef, pos: Position) -> Option<InputType> {
        self.node_type(node)
            .edges(pos.kind)
            .slot(pos.slot)
            .and_then(EdgeSlot::input_type)
    }

    /// Returns true if `target` is among the inputs of `node`.
    pub fn has_input(&self, node: NodeRef, target: NodeRef) -> bool {
        self.inputs(node).any(|input| input == target)
    }

    /// Pushes every non-null input of `node` onto `stack`.
    pub fn push_inputs(&self, node: NodeRef, stack: &mut Vec<NodeRef>) {
        stack.extend(self.inputs(node));
    }

    /// Returns true if both nodes have the same type and identical inputs.
    pub fn equal_inputs(&self, a: NodeRef, b: NodeRef) -> bool {
        self.equal_edges(a, b, EdgeKind::Inputs)
    }

    /// Returns true if both nodes have the same type and identical successors.
    pub fn equal_successors(&self, a: NodeRef, b: NodeRef) -> bool {
        self.equal_edges(a, b, EdgeKind::Successors)
    }

    fn equal_edges(&self, a: NodeRef, b: NodeRef, kind: EdgeKind) -> bool {
        let (ra, rb) = (self.record(a), self.record(b));
        if ra.ty.id() != rb.ty.id() {
            return false;
        }
        for entry in ra.ty.edges(kind).iteration_mask() {
            let equal = match (ra.cells(kind)[entry.storage], rb.cells(kind)[entry.storage]) {
                (EdgeCell::Direct(x), EdgeCell::Direct(y)) => x == y,
                (EdgeCell::List(x), EdgeCell::List(y)) => {
                    self.lists[x as usize].items == self.lists[y as usize].items
                }
                (x, y) => x == y,
            };
            if !equal {
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Sets direct input slot `slot`, updating usages and firing events.
    pub fn set_input(&mut self, node: NodeRef, slot: usize, value: Option<NodeRef>) -> Result<()> {
        self.write_direct(node, EdgeKind::Inputs, slot, value)
    }

    /// Sets direct successor slot `slot`, updating the predecessor links.
    pub fn set_successor(
        &mut self,
        node: NodeRef,
        slot: usize,
        value: Option<NodeRef>,
    ) -> Result<()> {
        self.write_direct(node, EdgeKind::Successors, slot, value)
    }

    /// Sets the direct input called `name`.
    pub fn set_input_named(&mut self, node: NodeRef, name: &str, value: Option<NodeRef>) -> Result<()> {
        let slot = self.slot_named(node, EdgeKind::Inputs, name)?;
        self.set_input(node, slot, value)
    }

    /// Sets the direct successor called `name`.
    pub fn set_successor_named(
        &mut self,
        node: NodeRef,
        name: &str,
        value: Option<NodeRef>,
    ) -> Result<()> {
        let slot = self.slot_named(node, EdgeKind::Successors, name)?;
        self.set_successor(node, slot, value)
    }

    pub(crate) fn slot_named(&self, node: NodeRef, kind: EdgeKind, name: &str) -> Result<usize> {
        self.check_owned(node)?;
        self.node_type(node)
            .edges(kind)
            .index_of(name)
            .ok_or_else(|| GraphError::incompatible(node, format!("no {kind:?} slot named {name}")))
    }

    /// Writes the edge at `pos` with full bookkeeping.
    pub fn set_at(&mut self, node: NodeRef, pos: Position, value: Option<NodeRef>) -> Result<()> {
        match pos.sub_index {
            None => self.write_direct(node, pos.kind, pos.slot, value),
            Some(index) => {
                let list = self.list(node, pos.kind, pos.slot)?;
                self.list_set(list, index, value).map(|_| ())
            }
        }
    }

    fn write_direct(
        &mut self,
        node: NodeRef,
        kind: EdgeKind,
        slot: usize,
        value: Option<NodeRef>,
    ) -> Result<()> {
        self.check_mutable("set_edge")?;
        self.check_owned(node)?;
        let tracked = self.check_edge_target(node, value)?;
        let ty = Arc::clone(self.node_type(node));
        let slot_info = ty
            .edges(kind)
            .slot(slot)
            .ok_or_else(|| GraphError::incompatible(node, format!("no {kind:?} slot {slot}")))?;
        if slot_info.is_list() {
            return Err(GraphError::incompatible(
                node,
                format!("slot {} is a list", slot_info.name()),
            ));
        }
        self.check_assignable(node, slot_info, value)?;
        let storage = slot_info.storage();
        let old = match self.store[node.index()].cells(kind)[storage] {
            EdgeCell::Direct(old) => old,
            _ => None,
        };
        if tracked && kind == EdgeKind::Successors {
            self.check_successor_free(node, old, value)?;
        }
        self.store[node.index()].cells_mut(kind)[storage] = EdgeCell::Direct(value);
        if tracked {
            self.note_edge_write(node);
            match kind {
                EdgeKind::Inputs => self.update_usages(node, old, value)?,
                EdgeKind::Successors => self.update_predecessor(node, old, value)?,
            }
        }
        Ok(())
    }

    /// Validates an edge write on `node` and reports whether bookkeeping
    /// applies, which is the case once the node was registered.
    pub(crate) fn check_edge_target(&self, node: NodeRef, value: Option<NodeRef>) -> Result<bool> {
        if let Some(value) = value {
            self.check_owned(value)?;
        }
        if self.is_unregistered(node) {
            if let Some(value) = value {
                if self.is_deleted(value) {
                    return Err(GraphError::NotAlive(value));
                }
            }
            return Ok(false);
        }
        if self.is_deleted(node) {
            return Err(GraphError::NotAlive(node));
        }
        if let Some(value) = value {
            if !self.is_alive(value) {
                return Err(GraphError::NotAlive(value));
            }
        }
        Ok(true)
    }

    /// Fails if `value` already has a predecessor, so that a successor write
    /// replacing `old` is rejected before anything changes.
    pub(crate) fn check_successor_free(
        &self,
        node: NodeRef,
        old: Option<NodeRef>,
        value: Option<NodeRef>,
    ) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        if Some(value) == old {
            return Ok(());
        }
        match self.predecessor(value) {
            Some(existing) => Err(GraphError::incompatible(
                node,
                format!("successor {value} already has predecessor {existing}"),
            )),
            None => Ok(()),
        }
    }

    pub(crate) fn check_assignable(
        &self,
        node: NodeRef,
        slot: &EdgeSlot,
        value: Option<NodeRef>,
    ) -> Result<()> {
        if let (Some(declared), Some(value)) = (slot.declared(), value) {
            let ty = self.node_type(value);
            if !ty.is_a(declared) {
                return Err(GraphError::incompatible(
                    node,
                    format!(
                        "{} ({}) is not assignable to slot {}",
                        value,
                        ty.name(),
                        slot.name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Writes the edge at `pos` without usage or predecessor bookkeeping and
    /// returns the previous target.
    pub(crate) fn write_position_raw(
        &mut self,
        node: NodeRef,
        pos: Position,
        value: Option<NodeRef>,
    ) -> Result<Option<NodeRef>> {
        let ty = Arc::clone(self.node_type(node));
        let slot = ty
            .edges(pos.kind)
            .slot(pos.slot)
            .ok_or_else(|| GraphError::incompatible(node, format!("no slot at {pos}")))?;
        self.check_assignable(node, slot, value)?;
        let cell = self.store[node.index()].cells(pos.kind)[slot.storage()];
        match (cell, pos.sub_index) {
            (EdgeCell::Direct(old), None) => {
                self.store[node.index()].cells_mut(pos.kind)[slot.storage()] = EdgeCell::Direct(value);
                Ok(old)
            }
            (EdgeCell::List(list), Some(index)) => {
                let items = &mut self.lists[list as usize].items;
                match items.get_mut(index) {
                    Some(entry) => Ok(std::mem::replace(entry, value)),
                    None => Err(GraphError::incompatible(node, format!("{pos} is out of range"))),
                }
            }
            _ => Err(GraphError::incompatible(node, format!("{pos} does not match the slot shape"))),
        }
    }

    /// Replaces the first edge of `kind` pointing at `old` by `new`, without
    /// bookkeeping. Returns false if no edge pointed at `old`.
    pub(crate) fn replace_first_edge_raw(
        &mut self,
        node: NodeRef,
        kind: EdgeKind,
        old: NodeRef,
        new: Option<NodeRef>,
    ) -> Result<bool> {
        let position = self
            .positions(node, kind)
            .find(|&pos| self.get_at(node, pos) == Some(old));
        match position {
            Some(pos) => {
                self.write_position_raw(node, pos, new)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn positions(&self, node: NodeRef, kind: EdgeKind) -> PositionIter<'_> {
        PositionIter::new(self, node, kind)
    }

    /// Replaces the first input pointing at `old` by `new`.
    pub fn replace_first_input(
        &mut self,
        node: NodeRef,
        old: NodeRef,
        new: Option<NodeRef>,
    ) -> Result<bool> {
        self.check_mutable("replace_first_input")?;
        self.check_owned(node)?;
        let tracked = self.check_edge_target(node, new)?;
        if !self.replace_first_edge_raw(node, EdgeKind::Inputs, old, new)? {
            return Ok(false);
        }
        if tracked {
            self.note_edge_write(node);
            self.update_usages(node, Some(old), new)?;
        }
        Ok(true)
    }

    /// Replaces every input pointing at `old` by `new`, returning the number
    /// of edges rewritten.
    pub fn replace_all_inputs(
        &mut self,
        node: NodeRef,
        old: NodeRef,
        new: Option<NodeRef>,
    ) -> Result<usize> {
        if new == Some(old) {
            return Ok(0);
        }
        let mut replaced = 0;
        while self.replace_first_input(node, old, new)? {
            replaced += 1;
        }
        Ok(replaced)
    }

    /// Replaces the first successor pointing at `old` by `new`.
    pub fn replace_first_successor(
        &mut self,
        node: NodeRef,
        old: NodeRef,
        new: Option<NodeRef>,
    ) -> Result<bool> {
        self.check_mutable("replace_first_successor")?;
        self.check_owned(node)?;
        let tracked = self.check_edge_target(node, new)?;
        if tracked && self.successors(node).any(|successor| successor == old) {
            self.check_successor_free(node, Some(old), new)?;
        }
        if !self.replace_first_edge_raw(node, EdgeKind::Successors, old, new)? {
            return Ok(false);
        }
        if tracked {
            self.note_edge_write(node);
            self.update_predecessor(node, Some(old), new)?;
        }
        Ok(true)
    }

    /// Rewrites every non-null input of `node` through `f`.
    pub fn apply_inputs<F>(&mut self, node: NodeRef, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Graph, NodeRef) -> Result<NodeRef>,
    {
        self.check_owned(node)?;
        let positions: Vec<_> = self.input_positions(node).collect();
        for pos in positions {
            let Some(current) = self.get_at(node, pos) else {
                continue;
            };
            let replacement = f(self, current)?;
            if replacement != current {
                self.set_at(node, pos, Some(replacement))?;
            }
        }
        Ok(())
    }
}
