//! Error types for the DSM layer.
//!
//! Only programming errors and transport failures are errors. Misrouted
//! requests, rejected compare-and-exchange and stale deliveries are normal
//! protocol outcomes and never surface here.

use crate::types::NodeId;
use thiserror::Error;

/// Errors that can occur in DSM operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DsmError {
    #[error("Variable '{variable}' is not subscribed on node {node}")]
    UnknownVariable { node: NodeId, variable: String },

    #[error("Subscriber group for variable '{0}' is empty")]
    EmptySubscriberGroup(String),

    #[error("Reorder buffer for variable '{variable}' is full ({capacity} pending updates)")]
    ReorderBufferOverflow { variable: String, capacity: usize },

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is already registered")]
    NodeAlreadyRegistered(NodeId),

    #[error("Node {0} is disconnected")]
    Disconnected(NodeId),
}

pub type Result<T> = std::result::Result<T, DsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_variable_message_names_node_and_variable() {
        let err = DsmError::UnknownVariable {
            node: NodeId(4),
            variable: "A".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("'A'"));
        assert!(text.contains("N4"));
    }

    #[test]
    fn test_overflow_message() {
        let err = DsmError::ReorderBufferOverflow {
            variable: "X".to_string(),
            capacity: 8,
        };
        assert!(err.to_string().contains("8 pending"));
    }
}
