//! Primitive identifiers shared by every layer.

use serde::{Deserialize, Serialize};

/// Value stored in a shared variable.
pub type Value = i64;

/// Position of an accepted update in a variable's total order.
pub type SeqNo = u64;

/// Unique, totally ordered node identifier.
///
/// The ordering matters: the sequencer of a variable is the smallest id in
/// its subscriber group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}
