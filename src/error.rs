use std::io;

use thiserror::Error;

use crate::types::{NodeRef, TypeId};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the graph substrate.
///
/// Apart from [`GraphError::Config`] and [`GraphError::Io`] every variant reports a
/// broken invariant. Mutations that fail are not rolled back, so callers are
/// expected to abandon the graph and propagate the error to their driver.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A type descriptor produced an invalid edge or data layout.
    #[error("layout error in {type_name}: {reason}")]
    Layout {
        /// Name of the offending type.
        type_name: String,
        /// What was wrong with the layout.
        reason: String,
    },
    /// An edge write targeted an unknown slot or a value of the wrong type.
    #[error("incompatible edge on {node}: {reason}")]
    IncompatibleEdge {
        /// Node whose edge was written.
        node: NodeRef,
        /// Why the write was rejected.
        reason: String,
    },
    /// A mutation was attempted on a frozen graph.
    #[error("graph is frozen: {0}")]
    Frozen(&'static str),
    /// A handle does not belong to the graph it was used with.
    #[error("node {0} does not belong to this graph")]
    ForeignNode(NodeRef),
    /// A node that had to be alive was detached or deleted.
    #[error("node {0} is not alive")]
    NotAlive(NodeRef),
    /// A node was registered twice.
    #[error("node {0} is already registered")]
    AlreadyRegistered(NodeRef),
    /// `add` was used for a value-numberable node.
    #[error("node {0} is value numberable; use unique or add_without_unique")]
    ValueNumberable(NodeRef),
    /// `unique` was used for a node whose type does not support GVN.
    #[error("node {0} is not value numberable")]
    NotValueNumberable(NodeRef),
    /// Usage bookkeeping lost track of an edge.
    #[error("usage {usage} missing from {node}")]
    MissingUsage {
        /// Node whose usage multiset was searched.
        node: NodeRef,
        /// Usage that was expected to be present.
        usage: NodeRef,
    },
    /// A safe delete found remaining usages or a predecessor.
    #[error("cannot delete {node}: {reason}")]
    DeletionBlocked {
        /// Node that was about to be deleted.
        node: NodeRef,
        /// What is still referencing it.
        reason: &'static str,
    },
    /// A data value did not match the declared data field kind.
    #[error("data field {field} of {type_name} expects {expected}")]
    DataMismatch {
        /// Name of the type.
        type_name: String,
        /// Index of the data field.
        field: usize,
        /// Expected value kind.
        expected: &'static str,
    },
    /// Instances of abstract types cannot be created.
    #[error("type {0} is abstract")]
    AbstractType(TypeId),
    /// A requested type id is not known to the registry.
    #[error("unknown type {0}")]
    UnknownType(TypeId),
    /// Graph verification failed.
    #[error("verification failed: {0}")]
    Verification(String),
    /// Options could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O failure while loading options.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GraphError {
    pub(crate) fn layout(type_name: &str, reason: impl Into<String>) -> Self {
        GraphError::Layout {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(node: NodeRef, reason: impl Into<String>) -> Self {
        GraphError::IncompatibleEdge {
            node,
            reason: reason.into(),
        }
    }
}
