//! Bus contract between nodes.
//!
//! Implementations must be reliable and FIFO per (sender, receiver) pair. No
//! ordering is promised across pairs, which is why every subscriber runs
//! the reorder buffer.

use dsm_core::{Message, NodeId, Result};

/// Point-to-point and multicast delivery. The sender travels inside the
/// message.
pub trait Transport: Send + Sync {
    /// Hand `message` to exactly one target. Never waits for the target to
    /// process it.
    fn send(&self, target: NodeId, message: Message) -> Result<()>;

    /// Hand the same message to every target as independent sends.
    ///
    /// A failed target does not stop the remaining sends; the first failure
    /// is returned once every target has been tried.
    fn multicast(&self, targets: &[NodeId], message: &Message) -> Result<()> {
        let mut first_error = None;
        for target in targets {
            if let Err(e) = self.send(*target, message.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
