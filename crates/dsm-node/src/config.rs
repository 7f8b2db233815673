//! Configuration for nodes and the simulated network.

use serde::{Deserialize, Serialize};

/// Configuration for a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeConfig {
    /// Maximum number of out-of-order updates buffered per variable.
    /// `None` leaves the reorder buffer unbounded.
    pub max_pending_updates: Option<usize>,
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn max_pending_updates(mut self, limit: usize) -> Self {
        self.config.max_pending_updates = Some(limit);
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// How the simulated bus picks the next message to deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOrder {
    /// Global send order.
    Fifo,
    /// Random (sender, receiver) link, oldest message on that link first.
    Interleaved,
}

/// Network configuration for the simulated bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ordering: DeliveryOrder,
    /// Probability (0.0 - 1.0) of delivering an arbitrary in-flight message,
    /// breaking per-link FIFO.
    pub reorder_rate: f64,
    /// Probability (0.0 - 1.0) that a send is enqueued twice.
    pub duplicate_rate: f64,
    /// Seed for every random choice the bus makes.
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ordering: DeliveryOrder::Fifo,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 12345,
        }
    }
}

impl NetworkConfig {
    /// Deliver everything in global send order.
    pub fn fifo() -> Self {
        Self::default()
    }

    /// Per-link FIFO with arbitrary cross-link interleaving.
    pub fn interleaved(seed: u64) -> Self {
        Self {
            ordering: DeliveryOrder::Interleaved,
            seed,
            ..Default::default()
        }
    }

    /// Interleaving plus reordering and duplication.
    pub fn chaotic(seed: u64) -> Self {
        Self {
            ordering: DeliveryOrder::Interleaved,
            reorder_rate: 0.3,
            duplicate_rate: 0.2,
            seed,
        }
    }
}

/// Builder for network configuration.
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl NetworkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NetworkConfig::default(),
        }
    }

    pub fn ordering(mut self, ordering: DeliveryOrder) -> Self {
        self.config.ordering = ordering;
        self
    }

    pub fn reorder_rate(mut self, rate: f64) -> Self {
        self.config.reorder_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn duplicate_rate(mut self, rate: f64) -> Self {
        self.config.duplicate_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn build(self) -> NetworkConfig {
        self.config
    }
}

impl Default for NetworkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_builder() {
        let config = NodeConfigBuilder::new().max_pending_updates(16).build();
        assert_eq!(config.max_pending_updates, Some(16));
        assert_eq!(NodeConfig::default().max_pending_updates, None);
    }

    #[test]
    fn test_network_config_builder_clamps_rates() {
        let config = NetworkConfigBuilder::new()
            .ordering(DeliveryOrder::Interleaved)
            .reorder_rate(1.5)
            .duplicate_rate(-0.2)
            .seed(7)
            .build();

        assert_eq!(config.ordering, DeliveryOrder::Interleaved);
        assert_eq!(config.reorder_rate, 1.0);
        assert_eq!(config.duplicate_rate, 0.0);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_presets() {
        assert_eq!(NetworkConfig::fifo().ordering, DeliveryOrder::Fifo);
        let chaotic = NetworkConfig::chaotic(1);
        assert!(chaotic.reorder_rate > 0.0);
        assert!(chaotic.duplicate_rate > 0.0);
    }
}
