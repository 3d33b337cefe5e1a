//! Identifier types shared by the type registry, graph and worklists.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Handle to a node record inside one [`crate::Graph`].
///
/// A handle carries the identity of the graph that created it and the
/// generation of its arena slot. It never changes while the node exists,
/// even across compaction. Once a compaction reclaims a deleted node the
/// slot may be reused, but the old handle stays distinguishable: the graph
/// reports it as deleted. Passing a handle to another graph is rejected.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeRef {
    index: u32,
    generation: u32,
    graph: GraphUid,
}

/// Dense node id inside a graph's node table.
///
/// Ids are handed out in registration order and are renumbered by compaction;
/// use a [`crate::Mark`] to compare across compactions.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u32);

/// Identifier of a node type inside a [`crate::TypeRegistry`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);

/// Identity of a graph, unique within the process. Ties node handles and
/// marks to the graph that produced them.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct GraphUid(pub u32);

static NEXT_GRAPH_UID: AtomicU32 = AtomicU32::new(0);

impl GraphUid {
    pub(crate) fn fresh() -> Self {
        GraphUid(NEXT_GRAPH_UID.fetch_add(1, Ordering::Relaxed))
    }
}

impl NodeRef {
    #[inline]
    pub(crate) const fn new(graph: GraphUid, index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            graph,
        }
    }

    /// Index of the record in the graph's arena.
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Reuse count of the arena slot when the handle was created.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Graph that created the node.
    #[inline]
    pub const fn graph(self) -> GraphUid {
        self.graph
    }
}

impl NodeId {
    /// Position of the node in the dense table.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TypeId {
    /// Raw index of the type in its registry.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "@{}", self.index)
        } else {
            write!(f, "@{}.{}", self.index, self.generation)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

/// Opaque source location attached to nodes while positions are tracked.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    /// Name of the method or unit the node originates from.
    pub method: Arc<str>,
    /// Bytecode index or line number inside `method`.
    pub bci: i32,
}

impl SourcePosition {
    /// Creates a position.
    pub fn new(method: impl Into<Arc<str>>, bci: i32) -> Self {
        Self {
            method: method.into(),
            bci,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.method, self.bci)
    }
}
