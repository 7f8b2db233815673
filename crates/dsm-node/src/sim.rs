//! Deterministic in-memory bus for simulation and testing.
//!
//! Sends never invoke the target directly. Messages wait in flight until a
//! driver pulls them with [`SimulatedBus::next_delivery`], so a node's
//! handling path is never re-entered and the driver fully controls the
//! interleaving. Every random choice comes from a seeded RNG, which makes a
//! run reproducible from its [`NetworkConfig`].

use crate::config::{DeliveryOrder, NetworkConfig};
use crate::transport::Transport;
use dsm_core::{DsmError, Message, NodeId, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeSet;

/// A message waiting for delivery.
#[derive(Clone, Debug)]
struct InFlight {
    target: NodeId,
    message: Message,
}

impl InFlight {
    fn link(&self) -> (NodeId, NodeId) {
        (self.message.sender(), self.target)
    }
}

/// Counters kept by the simulated bus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub sent: u64,
    pub delivered: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

#[derive(Debug)]
struct BusState {
    nodes: BTreeSet<NodeId>,
    /// In send order.
    in_flight: Vec<InFlight>,
    rng: StdRng,
    stats: BusStats,
}

/// Queue-based bus with configurable delivery order.
#[derive(Debug)]
pub struct SimulatedBus {
    config: NetworkConfig,
    state: Mutex<BusState>,
}

impl SimulatedBus {
    pub fn new(mut config: NetworkConfig) -> Self {
        config.reorder_rate = config.reorder_rate.clamp(0.0, 1.0);
        config.duplicate_rate = config.duplicate_rate.clamp(0.0, 1.0);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            state: Mutex::new(BusState {
                nodes: BTreeSet::new(),
                in_flight: Vec::new(),
                rng,
                stats: BusStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Bind `id` so that it can receive messages.
    pub fn register(&self, id: NodeId) -> Result<()> {
        if !self.state.lock().nodes.insert(id) {
            return Err(DsmError::NodeAlreadyRegistered(id));
        }
        Ok(())
    }

    pub fn is_registered(&self, id: NodeId) -> bool {
        self.state.lock().nodes.contains(&id)
    }

    /// Pull the next message to deliver, as `(target, message)`.
    pub fn next_delivery(&self) -> Option<(NodeId, Message)> {
        let mut state = self.state.lock();
        if state.in_flight.is_empty() {
            return None;
        }

        let reorder =
            self.config.reorder_rate > 0.0 && state.rng.gen_bool(self.config.reorder_rate);
        let index = if reorder {
            state.stats.reordered += 1;
            let len = state.in_flight.len();
            state.rng.gen_range(0..len)
        } else {
            match self.config.ordering {
                DeliveryOrder::Fifo => 0,
                DeliveryOrder::Interleaved => {
                    let links: Vec<(NodeId, NodeId)> = state
                        .in_flight
                        .iter()
                        .map(InFlight::link)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    let link = links[state.rng.gen_range(0..links.len())];
                    state
                        .in_flight
                        .iter()
                        .position(|m| m.link() == link)
                        .unwrap_or(0)
                }
            }
        };

        let next = state.in_flight.remove(index);
        state.stats.delivered += 1;
        Some((next.target, next.message))
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().in_flight.is_empty()
    }

    pub fn stats(&self) -> BusStats {
        self.state.lock().stats.clone()
    }
}

impl Transport for SimulatedBus {
    fn send(&self, target: NodeId, message: Message) -> Result<()> {
        let mut state = self.state.lock();
        if !state.nodes.contains(&target) {
            return Err(DsmError::UnknownNode(target));
        }

        state.stats.sent += 1;
        if self.config.duplicate_rate > 0.0 && state.rng.gen_bool(self.config.duplicate_rate) {
            state.stats.duplicated += 1;
            state.in_flight.push(InFlight {
                target,
                message: message.clone(),
            });
        }
        state.in_flight.push(InFlight { target, message });
        Ok(())
    }
}
