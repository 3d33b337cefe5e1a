use serde::Serialize;

use crate::types::GraphUid;

use super::Graph;

/// Mutability of a graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FreezeState {
    /// Mutations are allowed.
    #[default]
    Unfrozen,
    /// Read-only until [`Graph::unfreeze`] is called.
    TemporaryFreeze,
    /// Read-only for the rest of the graph's life.
    DeepFreeze,
}

/// Which edges a clone copies from its original.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EdgeSelector {
    /// Inputs and successors.
    #[default]
    All,
    /// Inputs only; successors start empty.
    InputsOnly,
    /// No edges; lists start empty.
    None,
}

impl EdgeSelector {
    pub(crate) fn copies_inputs(self) -> bool {
        matches!(self, EdgeSelector::All | EdgeSelector::InputsOnly)
    }

    pub(crate) fn copies_successors(self) -> bool {
        self == EdgeSelector::All
    }
}

/// Snapshot of a graph's id high-watermark.
///
/// Nodes registered after the mark have ids at or above its value until the
/// next compaction renumbers the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Mark {
    pub(crate) graph: GraphUid,
    pub(crate) value: u32,
    pub(crate) epoch: u32,
}

impl Mark {
    /// Id high-watermark captured by the mark.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Graph the mark was taken on.
    pub fn graph(&self) -> GraphUid {
        self.graph
    }

    /// Returns true if `graph` produced this mark and has not been compacted
    /// since.
    pub fn is_current(&self, graph: &Graph) -> bool {
        self.graph == graph.uid() && self.epoch == graph.compressions()
    }

    /// Returns true if nodes were registered after the mark was taken.
    pub fn has_new_nodes(&self, graph: &Graph) -> bool {
        self.is_current(graph) && graph.node_id_count() > self.value as usize
    }
}

/// Counters describing the state of a graph.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Graph name, if configured.
    pub name: Option<String>,
    /// Live nodes.
    pub live_nodes: usize,
    /// Size of the node table including dead slots.
    pub node_id_count: usize,
    /// Nodes deleted over the graph's life.
    pub total_deleted: usize,
    /// Compactions that renumbered the table.
    pub compressions: u32,
    /// Entries in the leaf value-numbering cache.
    pub gvn_cache_entries: usize,
    /// Edge writes performed.
    pub edge_modifications: u64,
    /// Registered listeners.
    pub listeners: usize,
}
