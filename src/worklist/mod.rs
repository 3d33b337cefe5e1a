//! Traversal helpers built on the graph's node handles.
//!
//! All structures here key their membership on [`crate::NodeRef`], which is
//! stable across compaction, so a traversal may keep running while the graph
//! is rewritten underneath it.

mod bitmap;
mod flood;
mod queues;

pub use bitmap::NodeBitMap;
pub use flood::NodeFlood;
pub use queues::{IterativeNodeWorkList, SingletonNodeWorkList, EXPLICIT_BITMAP_THRESHOLD};
