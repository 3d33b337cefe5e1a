//! Listener chain notified about structural changes.

use std::fmt;

use tracing::{debug, trace};

use crate::error::{GraphError, Result};
use crate::types::NodeRef;

use super::Graph;

/// Kind of structural change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    /// An input or successor of the node was rewritten.
    InputChanged,
    /// The node lost its last usage.
    ZeroUsages,
    /// The node was registered.
    NodeAdded,
    /// The node was deleted.
    NodeRemoved,
    /// A decoder is about to populate the node's fields.
    BeforeDecodingFields,
    /// A decoder finished populating the node's fields.
    AfterDecodingFields,
}

/// What the graph should do with a node whose usages dropped to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZeroUsagesAction {
    /// Leave the node in place.
    #[default]
    Keep,
    /// Delete the node once all listeners ran.
    Delete,
}

/// Receiver of node events.
///
/// Callbacks see the graph read-only. A listener that wants an unused node
/// gone returns [`ZeroUsagesAction::Delete`] and the graph deletes it after
/// the chain has run, which may cascade to the node's inputs.
pub trait NodeEventListener: Send + Sync {
    /// Called after an edge of `node` changed.
    fn input_changed(&mut self, _graph: &Graph, _node: NodeRef) {}

    /// Called when `node` lost its last usage.
    fn usages_dropped_to_zero(&mut self, _graph: &Graph, _node: NodeRef) -> ZeroUsagesAction {
        ZeroUsagesAction::Keep
    }

    /// Called after `node` was registered.
    fn node_added(&mut self, _graph: &Graph, _node: NodeRef) {}

    /// Called after `node` was deleted.
    fn node_removed(&mut self, _graph: &Graph, _node: NodeRef) {}

    /// Called before a decoder populates the fields of `node`.
    fn before_decoding_fields(&mut self, _graph: &Graph, _node: NodeRef) {}

    /// Called after a decoder populated the fields of `node`.
    fn after_decoding_fields(&mut self, _graph: &Graph, _node: NodeRef) {}

    /// Called for every event after the specific callback.
    fn changed(&mut self, _graph: &Graph, _event: NodeEvent, _node: NodeRef) {}
}

/// Handle returned when a listener is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

pub(crate) struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) listener: Box<dyn NodeEventListener>,
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerEntry").field(&self.id).finish()
    }
}

impl Graph {
    /// Adds a listener to the chain. The newest listener is notified first.
    pub fn track_events(&mut self, listener: Box<dyn NodeEventListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push(ListenerEntry { id, listener });
        debug!(graph = ?self.options.name, listener = id.0, "graph.listener_added");
        id
    }

    /// Removes a listener and hands it back.
    pub fn untrack_events(&mut self, id: ListenerId) -> Option<Box<dyn NodeEventListener>> {
        let index = self.listeners.iter().position(|entry| entry.id == id)?;
        debug!(graph = ?self.options.name, listener = id.0, "graph.listener_removed");
        Some(self.listeners.remove(index).listener)
    }

    /// Number of tracked listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Marks the start of staged field population for an already registered
    /// node.
    pub fn begin_decoding_fields(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("begin_decoding_fields")?;
        self.check_owned(node)?;
        self.fire(NodeEvent::BeforeDecodingFields, node)
    }

    /// Marks the end of staged field population.
    pub fn end_decoding_fields(&mut self, node: NodeRef) -> Result<()> {
        self.check_mutable("end_decoding_fields")?;
        self.check_owned(node)?;
        self.fire(NodeEvent::AfterDecodingFields, node)
    }

    pub(crate) fn maybe_notify_input_changed(&mut self, node: NodeRef) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        self.fire(NodeEvent::InputChanged, node)
    }

    pub(crate) fn maybe_notify_zero_usages(&mut self, node: NodeRef) -> Result<()> {
        if self.listeners.is_empty() || !self.is_alive(node) {
            return Ok(());
        }
        let record = &mut self.store[node.index()];
        debug_assert!(
            !record.zero_usages_notified,
            "zero-usages fired twice for {} without new usages in graph {:?}",
            node,
            self.options.name
        );
        record.zero_usages_notified = true;
        self.fire(NodeEvent::ZeroUsages, node)
    }

    pub(crate) fn fire(&mut self, event: NodeEvent, node: NodeRef) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        trace!(?event, %node, "graph.event");
        let mut listeners = std::mem::take(&mut self.listeners);
        let mut delete = false;
        for entry in listeners.iter_mut().rev() {
            let listener = &mut entry.listener;
            match event {
                NodeEvent::InputChanged => listener.input_changed(self, node),
                NodeEvent::ZeroUsages => {
                    if listener.usages_dropped_to_zero(self, node) == ZeroUsagesAction::Delete {
                        delete = true;
                    }
                }
                NodeEvent::NodeAdded => listener.node_added(self, node),
                NodeEvent::NodeRemoved => listener.node_removed(self, node),
                NodeEvent::BeforeDecodingFields => listener.before_decoding_fields(self, node),
                NodeEvent::AfterDecodingFields => listener.after_decoding_fields(self, node),
            }
            listener.changed(self, event, node);
        }
        self.listeners = listeners;
        if delete {
            self.delete_unused(node)?;
        }
        Ok(())
    }

    fn delete_unused(&mut self, node: NodeRef) -> Result<()> {
        if !self.is_alive(node) {
            return Ok(());
        }
        if self.has_usages(node) {
            return Err(GraphError::DeletionBlocked {
                node,
                reason: "a listener requested deletion but usages remain",
            });
        }
        self.safe_delete(node)
    }
}
