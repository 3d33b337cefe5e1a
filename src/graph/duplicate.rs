//! Subgraph duplication.
//!
//! Duplication runs in two passes: every node is first cloned (or mapped to
//! its replacement), then every copy is rewired through the resulting map.
//! Cycles and forward references inside the duplicated set therefore resolve
//! to the copies. The source nodes are snapshotted up front so the same code
//! serves copies within one graph and copies between graphs.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::node::EdgeCell;
use super::Graph;
use crate::error::{GraphError, Result};
use crate::nodeclass::{DataValue, EdgeKind, NodeType, Position};
use crate::types::{GraphUid, NodeRef, SourcePosition};

/// Source of replacement nodes during duplication.
///
/// A node for which [`DuplicationReplacement::replacement`] returns a target
/// is not cloned; the target stands in for it and receives its edges where
/// the layouts are compatible.
pub trait DuplicationReplacement {
    /// Node of the target graph that replaces `node`, if any.
    fn replacement(&mut self, node: NodeRef) -> Option<NodeRef>;
}

impl DuplicationReplacement for FxHashMap<NodeRef, NodeRef> {
    fn replacement(&mut self, node: NodeRef) -> Option<NodeRef> {
        self.get(&node).copied()
    }
}

impl<F> DuplicationReplacement for F
where
    F: FnMut(NodeRef) -> Option<NodeRef>,
{
    fn replacement(&mut self, node: NodeRef) -> Option<NodeRef> {
        self(node)
    }
}

/// Correspondence from duplicated nodes to their copies or replacements.
#[derive(Clone, Debug)]
pub enum DuplicationMap {
    /// Indexed by source arena slot; used when most of the source is copied.
    Dense {
        /// `(source, copy)` per source slot.
        slots: Vec<Option<(NodeRef, NodeRef)>>,
        /// Number of occupied slots.
        len: usize,
    },
    /// Hash map for small subsets.
    Sparse(FxHashMap<NodeRef, NodeRef>),
}

impl DuplicationMap {
    fn dense(capacity: usize) -> Self {
        DuplicationMap::Dense {
            slots: vec![None; capacity],
            len: 0,
        }
    }

    fn sparse(capacity: usize) -> Self {
        DuplicationMap::Sparse(FxHashMap::with_capacity_and_hasher(capacity, Default::default()))
    }

    fn insert(&mut self, from: NodeRef, to: NodeRef) {
        match self {
            DuplicationMap::Dense { slots, len } => {
                if slots[from.index()].replace((from, to)).is_none() {
                    *len += 1;
                }
            }
            DuplicationMap::Sparse(map) => {
                map.insert(from, to);
            }
        }
    }

    /// Copy or replacement of `node`.
    pub fn get(&self, node: NodeRef) -> Option<NodeRef> {
        match self {
            DuplicationMap::Dense { slots, .. } => match slots.get(node.index()) {
                Some(Some((from, to))) if *from == node => Some(*to),
                _ => None,
            },
            DuplicationMap::Sparse(map) => map.get(&node).copied(),
        }
    }

    /// Number of mapped nodes.
    pub fn len(&self) -> usize {
        match self {
            DuplicationMap::Dense { len, .. } => *len,
            DuplicationMap::Sparse(map) => map.len(),
        }
    }

    /// Returns true if nothing was mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for the array-backed representation.
    pub fn is_dense(&self) -> bool {
        matches!(self, DuplicationMap::Dense { .. })
    }

    /// `(source, copy)` pairs. Dense maps yield them in slot order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (NodeRef, NodeRef)> + '_> {
        match self {
            DuplicationMap::Dense { slots, .. } => Box::new(slots.iter().flatten().copied()),
            DuplicationMap::Sparse(map) => Box::new(map.iter().map(|(from, to)| (*from, *to))),
        }
    }
}

enum SlotSnapshot {
    Direct(Option<NodeRef>),
    List(Vec<Option<NodeRef>>),
}

struct NodeSnapshot {
    node: NodeRef,
    ty: Arc<NodeType>,
    data: Vec<DataValue>,
    position: Option<SourcePosition>,
    inputs: Vec<SlotSnapshot>,
    successors: Vec<SlotSnapshot>,
}

impl NodeSnapshot {
    fn edges(&self, kind: EdgeKind) -> &[SlotSnapshot] {
        match kind {
            EdgeKind::Inputs => &self.inputs,
            EdgeKind::Successors => &self.successors,
        }
    }
}

struct Snapshot {
    graph: GraphUid,
    dense_capacity: usize,
    dense_threshold: usize,
    nodes: Vec<NodeSnapshot>,
}

impl Snapshot {
    fn take(source: &Graph, nodes: &[NodeRef]) -> Result<Self> {
        let mut taken = Vec::with_capacity(nodes.len());
        for &node in nodes {
            source.check_owned(node)?;
            if !source.is_alive(node) {
                return Err(GraphError::NotAlive(node));
            }
            let record = source.record(node);
            let slots = |kind: EdgeKind| -> Vec<SlotSnapshot> {
                record
                    .ty
                    .edges(kind)
                    .slots()
                    .iter()
                    .map(|slot| match record.cells(kind)[slot.storage()] {
                        EdgeCell::List(list) => {
                            SlotSnapshot::List(source.lists[list as usize].items.clone())
                        }
                        EdgeCell::Direct(value) => SlotSnapshot::Direct(value),
                        EdgeCell::Vacant => SlotSnapshot::Direct(None),
                    })
                    .collect()
            };
            taken.push(NodeSnapshot {
                node,
                ty: Arc::clone(&record.ty),
                data: record.data.clone(),
                position: record.source_position.clone(),
                inputs: slots(EdgeKind::Inputs),
                successors: slots(EdgeKind::Successors),
            });
        }
        Ok(Self {
            graph: source.uid(),
            dense_capacity: source.store.len(),
            dense_threshold: (source.node_count() + source.nodes_deleted_since_last_compression()) >> 4,
            nodes: taken,
        })
    }
}

impl Graph {
    /// Duplicates `nodes` within this graph.
    ///
    /// Inputs that point outside the duplicated set keep pointing at the
    /// original nodes; successors outside the set are dropped. `estimate` is
    /// the expected number of nodes and selects the map representation.
    pub fn duplicate(
        &mut self,
        nodes: &[NodeRef],
        replacement: Option<&mut dyn DuplicationReplacement>,
        estimate: usize,
    ) -> Result<DuplicationMap> {
        let snapshot = Snapshot::take(self, nodes)?;
        self.add_snapshot(snapshot, replacement, estimate)
    }

    /// Duplicates `nodes` of `source` into this graph. Edges leaving the
    /// duplicated set are dropped unless `replacement` maps their targets.
    pub fn add_duplicates(
        &mut self,
        source: &Graph,
        nodes: &[NodeRef],
        replacement: Option<&mut dyn DuplicationReplacement>,
        estimate: usize,
    ) -> Result<DuplicationMap> {
        if !Arc::ptr_eq(&source.registry, &self.registry) {
            return Err(GraphError::Config(
                "duplication requires graphs sharing one type registry".to_string(),
            ));
        }
        let snapshot = Snapshot::take(source, nodes)?;
        self.add_snapshot(snapshot, replacement, estimate)
    }

    /// Copies every live node into a fresh graph with the same registry and
    /// options.
    pub fn copy(&self) -> Result<(Graph, DuplicationMap)> {
        let mut copy = Graph::new(Arc::clone(&self.registry), self.options.clone());
        let nodes: Vec<NodeRef> = self.nodes().collect();
        let map = copy.add_duplicates(self, &nodes, None, nodes.len())?;
        Ok((copy, map))
    }

    fn add_snapshot(
        &mut self,
        snapshot: Snapshot,
        mut replacement: Option<&mut dyn DuplicationReplacement>,
        estimate: usize,
    ) -> Result<DuplicationMap> {
        self.check_mutable("duplicate")?;
        let start = Instant::now();
        let same_graph = snapshot.graph == self.uid;
        let mut map = if estimate > snapshot.dense_threshold {
            DuplicationMap::dense(snapshot.dense_capacity)
        } else {
            DuplicationMap::sparse(estimate)
        };

        let mut replaced = vec![false; snapshot.nodes.len()];
        for (i, node) in snapshot.nodes.iter().enumerate() {
            let target = match replacement.as_deref_mut().and_then(|r| r.replacement(node.node)) {
                Some(target) => {
                    self.check_owned(target)?;
                    replaced[i] = true;
                    target
                }
                None => self.clone_empty(node)?,
            };
            map.insert(node.node, target);
        }

        let mut resolve = |graph: &Graph, old: Option<NodeRef>, kind: EdgeKind| -> Option<NodeRef> {
            let old = old?;
            if let Some(target) = map.get(old) {
                return Some(target);
            }
            if let Some(target) = replacement.as_deref_mut().and_then(|r| r.replacement(old)) {
                return Some(target);
            }
            (same_graph && kind == EdgeKind::Inputs && graph.is_alive(old)).then_some(old)
        };

        for (i, node) in snapshot.nodes.iter().enumerate() {
            let Some(copy) = map.get(node.node) else {
                continue;
            };
            if replaced[i] {
                self.transfer_edges(node, copy, &mut resolve)?;
            } else if copy != node.node || !same_graph {
                self.wire_copy(node, copy, &mut resolve)?;
            }
        }

        let elapsed = start.elapsed();
        debug!(
            graph = ?self.options.name,
            nodes = snapshot.nodes.len(),
            dense = map.is_dense(),
            elapsed_us = elapsed.as_micros() as u64,
            "graph.duplicate"
        );
        self.metrics.duplication(snapshot.nodes.len(), elapsed);
        Ok(map)
    }

    /// Registers an edgeless copy of a snapshotted node. Leaf value-numbered
    /// types reuse an equal cached node.
    fn clone_empty(&mut self, node: &NodeSnapshot) -> Result<NodeRef> {
        let copy = self.alloc_record(Arc::clone(&node.ty), node.data.clone());
        self.store[copy.index()].source_position = node.position.clone();
        let leaf_gvn = node.ty.is_value_numberable() && node.ty.leaf_id().is_some();
        if leaf_gvn {
            if let Some(existing) = self.find_node_in_cache(copy) {
                self.discard_transient(copy);
                return Ok(existing);
            }
        }
        self.initialize(copy)?;
        if leaf_gvn {
            self.put_node_into_cache(copy);
        }
        Ok(copy)
    }

    /// Fills the edges of a fresh copy. The copy has no edges yet, so only
    /// the new usage and predecessor links are recorded and no events fire.
    fn wire_copy<R>(&mut self, node: &NodeSnapshot, copy: NodeRef, resolve: &mut R) -> Result<()>
    where
        R: FnMut(&Graph, Option<NodeRef>, EdgeKind) -> Option<NodeRef>,
    {
        let ty = Arc::clone(&node.ty);
        for kind in [EdgeKind::Inputs, EdgeKind::Successors] {
            for (slot, snapshot) in ty.edges(kind).slots().iter().zip(node.edges(kind)) {
                let targets: Vec<Option<NodeRef>> = match snapshot {
                    SlotSnapshot::Direct(old) => vec![resolve(self, *old, kind)],
                    SlotSnapshot::List(items) => {
                        items.iter().map(|old| resolve(self, *old, kind)).collect()
                    }
                };
                for target in targets.iter().flatten() {
                    self.link_quietly(copy, kind, *target)?;
                }
                match self.store[copy.index()].cells(kind)[slot.storage()] {
                    EdgeCell::List(list) => self.lists[list as usize].items = targets,
                    _ => {
                        self.store[copy.index()].cells_mut(kind)[slot.storage()] =
                            EdgeCell::Direct(targets[0]);
                    }
                }
            }
        }
        self.note_edge_write(copy);
        Ok(())
    }

    fn link_quietly(&mut self, copy: NodeRef, kind: EdgeKind, target: NodeRef) -> Result<()> {
        match kind {
            EdgeKind::Inputs => self.add_usage(target, copy),
            EdgeKind::Successors => {
                if let Some(existing) = self.predecessor(target) {
                    return Err(GraphError::incompatible(
                        copy,
                        format!("successor {target} already has predecessor {existing}"),
                    ));
                }
                self.store[target.index()].predecessor = Some(copy);
            }
        }
        Ok(())
    }

    /// Moves the edges of a duplicated node onto its replacement, position by
    /// position, skipping slots whose shape differs between the two types.
    fn transfer_edges<R>(&mut self, node: &NodeSnapshot, target: NodeRef, resolve: &mut R) -> Result<()>
    where
        R: FnMut(&Graph, Option<NodeRef>, EdgeKind) -> Option<NodeRef>,
    {
        let target_ty = Arc::clone(self.node_type(target));
        for kind in [EdgeKind::Inputs, EdgeKind::Successors] {
            for (slot, snapshot) in node.edges(kind).iter().enumerate() {
                if !target_ty.is_valid(Position::direct(kind, slot), &node.ty) {
                    continue;
                }
                match snapshot {
                    SlotSnapshot::Direct(old) => {
                        let new = resolve(self, *old, kind);
                        self.set_at(target, Position::direct(kind, slot), new)?;
                    }
                    SlotSnapshot::List(items) => {
                        let new: Vec<Option<NodeRef>> =
                            items.iter().map(|old| resolve(self, *old, kind)).collect();
                        let list = self.list(target, kind, slot)?;
                        self.list_assign(list, &new)?;
                    }
                }
            }
        }
        Ok(())
    }
}
