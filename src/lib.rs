//! Nodegraph: a mutable, deduplicating graph IR for optimizing compilers.
//!
//! Nodes are typed by a [`NodeType`] registered once in a [`TypeRegistry`].
//! A [`Graph`] owns its nodes, keeps forward edges and their reverse usage
//! and predecessor links consistent, deduplicates value-numberable nodes,
//! compacts its node table and duplicates subgraphs. The [`worklist`] module
//! provides traversal helpers on top.

#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod metrics;
pub mod nodeclass;
pub mod options;
pub mod testkit;
pub mod types;
pub mod worklist;

pub use error::{GraphError, Result};
pub use graph::{
    DuplicationMap, DuplicationReplacement, EdgeCursor, EdgeIter, EdgeSelector, FreezeState,
    Graph, GraphStats, ListenerId, Mark, NewNodes, NodeBuilder, NodeEvent, NodeEventListener,
    NodeIter, NodeListRef, NodePredicate, NodeState, PositionIter, TypedNodes, ZeroUsagesAction,
};
pub use metrics::{CounterMetrics, GraphMetrics, NoopMetrics};
pub use nodeclass::{
    DataKind, DataValue, EdgeKind, InputType, NodeFlags, NodeType, NodeTypeDescriptor, Position,
    TypeRegistry,
};
pub use options::GraphOptions;
pub use types::{GraphUid, NodeId, NodeRef, SourcePosition, TypeId};
pub use worklist::{IterativeNodeWorkList, NodeBitMap, NodeFlood, SingletonNodeWorkList};
