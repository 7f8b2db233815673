//! DSM Node - sequencer routing and ordered delivery over a message bus
//!
//! Each [`Node`] keeps a registry of [`VariableReplica`] records. Writes and
//! compare-and-exchange requests are routed to the variable's sequencer (the
//! smallest id of its subscriber group), which assigns gap-free sequence
//! numbers and multicasts the accepted update. Every subscriber delivers
//! updates strictly in sequence order and notifies its observers.
//!
//! # Quick Start
//!
//! ```rust
//! use dsm_node::{ChangeLog, Cluster, NetworkConfig, NodeId};
//!
//! let mut cluster = Cluster::with_nodes(3, NetworkConfig::interleaved(7)).unwrap();
//! let log = ChangeLog::new();
//! for id in cluster.ids() {
//!     cluster.add_observer(id, log.clone()).unwrap();
//! }
//! let group = [NodeId(0), NodeId(1), NodeId(2)];
//! cluster.subscribe_all("A", &group).unwrap();
//!
//! cluster.write(NodeId(1), "A", 1).unwrap();
//! cluster.run_until_idle().unwrap();
//!
//! assert!(cluster.is_converged("A"));
//! assert_eq!(log.values_for(NodeId(2), "A"), vec![1]);
//! ```
//!
//! # Architecture
//!
//! - [`node`] - registry, routing, sequencer logic, delivery path
//! - [`observer`] - change notification fan-out
//! - [`transport`] - the bus contract
//! - [`sim`] - deterministic simulated bus
//! - [`cluster`] - single-process driver over the simulated bus
//! - [`runtime`] - tokio actor runtime and channel bus
//! - [`config`] - node and network configuration
//!
//! [`VariableReplica`]: dsm_core::VariableReplica

pub mod cluster;
pub mod config;
pub mod node;
pub mod observer;
pub mod runtime;
pub mod sim;
pub mod transport;

// Re-exports for convenience
pub use cluster::Cluster;
pub use config::{DeliveryOrder, NetworkConfig, NetworkConfigBuilder, NodeConfig, NodeConfigBuilder};
pub use node::Node;
pub use observer::{ChangeLog, ObserverList, VariableChange, VariableObserver};
pub use runtime::{ChannelBus, Command, Envelope, NodeHandle};
pub use sim::{BusStats, SimulatedBus};
pub use transport::Transport;

pub use dsm_core::{Delivery, DsmError, Message, NodeId, Result, SeqNo, Value, VariableReplica};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cluster::Cluster;
    pub use crate::config::{NetworkConfig, NodeConfig};
    pub use crate::node::Node;
    pub use crate::observer::{ChangeLog, VariableChange, VariableObserver};
    pub use crate::runtime::{ChannelBus, NodeHandle};
    pub use crate::transport::Transport;
    pub use dsm_core::{DsmError, NodeId, Value};
}
