//! Messages exchanged between nodes.

use crate::types::{NodeId, SeqNo, Value};
use serde::{Deserialize, Serialize};

/// Messages carried by the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Unconditional write, addressed to the variable's sequencer.
    WriteRequest {
        variable: String,
        value: Value,
        sender: NodeId,
    },
    /// Compare-and-exchange, addressed to the variable's sequencer.
    CasRequest {
        variable: String,
        expected: Value,
        value: Value,
        sender: NodeId,
    },
    /// Sequenced update multicast by the sequencer to the subscriber group.
    UpdateBroadcast {
        variable: String,
        value: Value,
        sequence: SeqNo,
        sender: NodeId,
    },
}

/// Discriminant of a [`Message`], handy for logs and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Write,
    Cas,
    Update,
}

impl Message {
    pub fn write(variable: impl Into<String>, value: Value, sender: NodeId) -> Self {
        Message::WriteRequest {
            variable: variable.into(),
            value,
            sender,
        }
    }

    pub fn cas(variable: impl Into<String>, expected: Value, value: Value, sender: NodeId) -> Self {
        Message::CasRequest {
            variable: variable.into(),
            expected,
            value,
            sender,
        }
    }

    pub fn update(
        variable: impl Into<String>,
        value: Value,
        sequence: SeqNo,
        sender: NodeId,
    ) -> Self {
        Message::UpdateBroadcast {
            variable: variable.into(),
            value,
            sequence,
            sender,
        }
    }

    /// Name of the variable this message refers to.
    pub fn variable(&self) -> &str {
        match self {
            Message::WriteRequest { variable, .. }
            | Message::CasRequest { variable, .. }
            | Message::UpdateBroadcast { variable, .. } => variable,
        }
    }

    /// Node that sent this message.
    pub fn sender(&self) -> NodeId {
        match self {
            Message::WriteRequest { sender, .. }
            | Message::CasRequest { sender, .. }
            | Message::UpdateBroadcast { sender, .. } => *sender,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::WriteRequest { .. } => MessageKind::Write,
            Message::CasRequest { .. } => MessageKind::Cas,
            Message::UpdateBroadcast { .. } => MessageKind::Update,
        }
    }

    /// True for messages that only the sequencer acts on.
    pub fn is_request(&self) -> bool {
        !matches!(self, Message::UpdateBroadcast { .. })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::WriteRequest { variable, value, sender } => {
                write!(f, "Write({}={}) from {}", variable, value, sender)
            }
            Message::CasRequest {
                variable,
                expected,
                value,
                sender,
            } => write!(f, "Cas({}: {}->{}) from {}", variable, expected, value, sender),
            Message::UpdateBroadcast {
                variable,
                value,
                sequence,
                sender,
            } => write!(f, "Update({}#{}={}) from {}", variable, sequence, value, sender),
        }
    }
}
