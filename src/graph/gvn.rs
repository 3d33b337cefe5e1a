//! Global value numbering.
//!
//! Leaf types are deduplicated through a per-leaf-type cache keyed by the
//! value number of the data fields. Non-leaf types have no global cache: a
//! candidate must already use every input of the new node, so only the usage
//! list of the least-used input is scanned. When every input is heavily used
//! that scan can miss an equal node; this is accepted in exchange for O(1)
//! misses in the common case of a fresh input.

use smallvec::SmallVec;
use tracing::trace;

use super::node::NodeRecord;
use super::Graph;
use crate::error::{GraphError, Result};
use crate::types::NodeRef;

/// Extra filter applied to GVN candidates.
pub type NodePredicate<'a> = &'a dyn Fn(&Graph, NodeRef) -> bool;

impl Graph {
    /// Registers a detached value-numberable node, or returns an equal node
    /// that is already registered. Callers must continue with the returned
    /// node; on a hit the detached node is dropped if it was the last one
    /// allocated.
    pub fn unique(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.check_owned(node)?;
        if !self.node_type(node).is_value_numberable() {
            return Err(GraphError::NotValueNumberable(node));
        }
        self.unique_helper(node, None)
    }

    /// [`Graph::unique`] for value-numberable nodes, [`Graph::add`] otherwise.
    pub fn add_or_unique(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.check_owned(node)?;
        if self.node_type(node).is_value_numberable() {
            self.unique_helper(node, None)
        } else {
            self.add(node)
        }
    }

    /// Adds or deduplicates `node` after doing the same for every detached
    /// input, recursively.
    pub fn add_or_unique_with_inputs(&mut self, node: NodeRef) -> Result<NodeRef> {
        self.add_or_unique_with_inputs_matching(node, None)
    }

    /// Like [`Graph::add_or_unique_with_inputs`], only reusing nodes accepted
    /// by `predicate`.
    pub fn add_or_unique_with_inputs_matching(
        &mut self,
        node: NodeRef,
        predicate: Option<NodePredicate<'_>>,
    ) -> Result<NodeRef> {
        self.check_owned(node)?;
        if self.is_alive(node) {
            return Ok(node);
        }
        if self.is_deleted(node) {
            return Err(GraphError::NotAlive(node));
        }
        self.apply_inputs(node, |graph, input| {
            if graph.is_alive(input) {
                Ok(input)
            } else {
                graph.add_or_unique_with_inputs_matching(input, predicate)
            }
        })?;
        if self.node_type(node).is_value_numberable() {
            self.unique_helper(node, predicate)
        } else {
            self.add(node)
        }
    }

    fn unique_helper(&mut self, node: NodeRef, predicate: Option<NodePredicate<'_>>) -> Result<NodeRef> {
        if !self.is_unregistered(node) {
            return Err(GraphError::AlreadyRegistered(node));
        }
        if let Some(other) = self.find_duplicate_matching(node, predicate) {
            self.transfer_source_position(node, other);
            trace!(node = %node, existing = %other, "gvn.hit");
            self.discard_transient(node);
            return Ok(other);
        }
        self.initialize(node)?;
        if self.node_type(node).leaf_id().is_some() {
            self.put_node_into_cache(node);
        }
        Ok(node)
    }

    fn transfer_source_position(&mut self, from: NodeRef, to: NodeRef) {
        if self.store[to.index()].source_position.is_none() {
            let position = self.store[from.index()].source_position.clone();
            self.store[to.index()].source_position = position;
        }
    }

    /// Registered node equal to `node`, if one can be found.
    pub fn find_duplicate(&self, node: NodeRef) -> Option<NodeRef> {
        self.find_duplicate_matching(node, None)
    }

    /// Registered node equal to `node` and accepted by `predicate`.
    pub fn find_duplicate_matching(
        &self,
        node: NodeRef,
        predicate: Option<NodePredicate<'_>>,
    ) -> Option<NodeRef> {
        let ty = self.node_type(node);
        if !ty.is_value_numberable() {
            return None;
        }
        if ty.is_leaf() {
            return self
                .find_node_in_cache(node)
                .filter(|&other| predicate.map_or(true, |p| p(self, other)));
        }
        let early_exit = usize::from(self.is_alive(node));
        let mut least_used: Option<(NodeRef, usize)> = None;
        for input in self.inputs(node) {
            let count = self.usage_count(input);
            if count == early_exit {
                return None;
            }
            if least_used.map_or(true, |(_, min)| count < min) {
                least_used = Some((input, count));
            }
        }
        let (input, _) = least_used?;
        let type_id = ty.id();
        self.usages(input).iter().copied().find(|&usage| {
            usage != node
                && self.node_type(usage).id() == type_id
                && self.is_alive(usage)
                && predicate.map_or(true, |p| p(self, usage))
                && self.data_equals(node, usage)
                && self.equal_inputs(node, usage)
                && self.equal_successors(node, usage)
        })
    }

    /// Returns true if both nodes have the same type and equal data. Types
    /// with identity are only equal to themselves.
    pub fn data_equals(&self, a: NodeRef, b: NodeRef) -> bool {
        let (ra, rb) = (self.record(a), self.record(b));
        if ra.ty.id() != rb.ty.id() {
            return false;
        }
        if ra.ty.flags().has_identity && a != b {
            return false;
        }
        ra.data == rb.data
    }

    /// Value number of a node's data.
    pub fn value_number(&self, node: NodeRef) -> u64 {
        let record = self.record(node);
        record.ty.value_number(&record.data)
    }

    /// Cached live leaf node equal to `node`.
    pub fn find_node_in_cache(&self, node: NodeRef) -> Option<NodeRef> {
        let leaf = self.node_type(node).leaf_id()? as usize;
        let bucket = self.leaf_cache.get(leaf)?.get(&self.value_number(node))?;
        bucket
            .iter()
            .copied()
            .find(|&cached| self.is_alive(cached) && self.data_equals(node, cached))
    }

    pub(crate) fn put_node_into_cache(&mut self, node: NodeRef) {
        let Some(leaf) = self.node_type(node).leaf_id() else {
            return;
        };
        let leaf = leaf as usize;
        if self.leaf_cache.len() <= leaf {
            self.leaf_cache.resize_with(leaf + 1, Default::default);
        }
        let number = self.value_number(node);
        let store = &self.store;
        let bucket = self.leaf_cache[leaf].entry(number).or_default();
        let before = bucket.len();
        bucket.retain(|cached| is_cached_live(store, *cached));
        let purged = before - bucket.len();
        bucket.push(node);
        self.leaf_cache_entries = self.leaf_cache_entries + 1 - purged;
        self.metrics.gvn_cache_size(self.leaf_cache_entries);
    }

    /// Removes `node` from its leaf cache bucket. Returns true if it was
    /// cached.
    pub(crate) fn remove_node_from_cache(&mut self, node: NodeRef) -> bool {
        let Some(leaf) = self.node_type(node).leaf_id() else {
            return false;
        };
        let number = self.value_number(node);
        let Some(bucket) = self
            .leaf_cache
            .get_mut(leaf as usize)
            .and_then(|cache| cache.get_mut(&number))
        else {
            return false;
        };
        match bucket.iter().position(|cached| *cached == node) {
            Some(index) => {
                bucket.swap_remove(index);
                self.leaf_cache_entries -= 1;
                true
            }
            None => false,
        }
    }

    /// Drops cache entries of dead nodes and empty buckets.
    pub(crate) fn purge_leaf_cache(&mut self) {
        let store = &self.store;
        let mut entries = 0;
        for cache in &mut self.leaf_cache {
            cache.retain(|_, bucket: &mut SmallVec<[NodeRef; 1]>| {
                bucket.retain(|cached| is_cached_live(store, *cached));
                entries += bucket.len();
                !bucket.is_empty()
            });
        }
        self.leaf_cache_entries = entries;
    }

    /// Number of entries in the leaf cache, stale ones included.
    pub fn gvn_cache_len(&self) -> usize {
        self.leaf_cache_entries
    }
}

fn is_cached_live(store: &[NodeRecord], node: NodeRef) -> bool {
    let record = &store[node.index()];
    record.holds(node) && record.is_alive()
}
