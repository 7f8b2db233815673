//! DSM Core - replica records and total-order delivery
//!
//! This crate holds the data model of the sequencer-based distributed shared
//! memory:
//! - [`NodeId`], [`Value`] and [`SeqNo`] primitives
//! - the [`Message`] union exchanged over the bus
//! - [`VariableReplica`], the per-node, per-variable record that carries both
//!   the sequencer state machine and the ordered-delivery state machine
//!
//! # Protocol
//!
//! ```text
//! caller ──Write/CAS──▶ sequencer = min(group)
//!                         value := v; seq := next++      (linearization point)
//!                         multicast UpdateBroadcast{seq} to group
//! subscriber:
//!   seq == cursor  → apply, cursor++, drain buffer while contiguous
//!   seq >  cursor  → buffer[seq] := value
//!   seq <  cursor  → discard (already delivered)
//! ```
//!
//! # Example
//!
//! ```rust
//! use dsm_core::{Delivery, NodeId, VariableReplica};
//!
//! let mut replica = VariableReplica::new("A", [NodeId(2), NodeId(0), NodeId(1)]).unwrap();
//! assert_eq!(replica.sequencer(), NodeId(0));
//!
//! // Sequence 1 arrives first and waits for 0.
//! assert_eq!(replica.deliver(1, 20).unwrap(), Delivery::Buffered);
//! let applied = replica.deliver(0, 10).unwrap().into_applied();
//! assert_eq!(applied.len(), 2);
//! assert_eq!(replica.value(), 20);
//! ```

pub mod error;
pub mod message;
pub mod replica;
pub mod types;

pub use error::{DsmError, Result};
pub use message::{Message, MessageKind};
pub use replica::{AppliedUpdate, Delivery, VariableReplica};
pub use types::{NodeId, SeqNo, Value};
