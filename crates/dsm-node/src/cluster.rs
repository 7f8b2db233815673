//! Single-process cluster driver over the simulated bus.
//!
//! The cluster owns every node and delivers one message at a time, so each
//! node's handling path runs strictly sequentially. The first handling error
//! stops the run and is returned to the caller.

use crate::config::{NetworkConfig, NodeConfig};
use crate::node::Node;
use crate::observer::VariableObserver;
use crate::sim::{BusStats, SimulatedBus};
use dsm_core::{DsmError, NodeId, Result, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A set of nodes sharing one [`SimulatedBus`].
#[derive(Debug)]
pub struct Cluster {
    bus: Arc<SimulatedBus>,
    nodes: BTreeMap<NodeId, Node>,
}

impl Cluster {
    /// Create a cluster with one node per id.
    pub fn new(ids: impl IntoIterator<Item = NodeId>, network: NetworkConfig) -> Result<Self> {
        Self::with_node_config(ids, network, NodeConfig::default())
    }

    pub fn with_node_config(
        ids: impl IntoIterator<Item = NodeId>,
        network: NetworkConfig,
        node_config: NodeConfig,
    ) -> Result<Self> {
        let bus = Arc::new(SimulatedBus::new(network));
        let mut nodes = BTreeMap::new();
        for id in ids {
            bus.register(id)?;
            nodes.insert(id, Node::with_config(id, bus.clone(), node_config.clone()));
        }
        Ok(Self { bus, nodes })
    }

    /// Create a cluster with nodes `0..n`.
    pub fn with_nodes(n: u32, network: NetworkConfig) -> Result<Self> {
        Self::new((0..n).map(NodeId), network)
    }

    pub fn bus(&self) -> &SimulatedBus {
        &self.bus
    }

    pub fn stats(&self) -> BusStats {
        self.bus.stats()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(DsmError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(DsmError::UnknownNode(id))
    }

    pub fn add_observer(
        &mut self,
        id: NodeId,
        observer: impl VariableObserver + 'static,
    ) -> Result<()> {
        self.node_mut(id)?.add_observer(observer);
        Ok(())
    }

    /// Subscribe every node of the cluster to `variable` with the same group.
    ///
    /// Every member must be a node of this cluster; otherwise nothing is
    /// subscribed and the first missing id is reported.
    pub fn subscribe_all(&mut self, variable: &str, group: &[NodeId]) -> Result<()> {
        if let Some(missing) = group.iter().find(|id| !self.nodes.contains_key(*id)) {
            return Err(DsmError::UnknownNode(*missing));
        }
        for node in self.nodes.values_mut() {
            node.subscribe(variable, group)?;
        }
        Ok(())
    }

    pub fn write(&self, id: NodeId, variable: &str, value: Value) -> Result<()> {
        self.node(id)?.write(variable, value)
    }

    pub fn compare_and_exchange(
        &self,
        id: NodeId,
        variable: &str,
        expected: Value,
        new_value: Value,
    ) -> Result<()> {
        self.node(id)?.compare_and_exchange(variable, expected, new_value)
    }

    /// Deliver one in-flight message. Returns `false` once the bus is idle.
    pub fn step(&mut self) -> Result<bool> {
        let Some((target, message)) = self.bus.next_delivery() else {
            return Ok(false);
        };
        let node = self
            .nodes
            .get_mut(&target)
            .ok_or(DsmError::UnknownNode(target))?;
        node.handle_message(message)?;
        Ok(true)
    }

    /// Deliver until nothing is in flight. Returns the number of deliveries.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while self.step()? {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Delivered value of `variable` on each node that subscribed to it.
    pub fn values(&self, variable: &str) -> BTreeMap<NodeId, Value> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| node.value(variable).ok().map(|v| (*id, v)))
            .collect()
    }

    /// True when every member of the variable's group holds the same value
    /// and has nothing buffered.
    pub fn is_converged(&self, variable: &str) -> bool {
        let mut members = self.nodes.values().filter_map(|node| {
            let replica = node.replica(variable).ok()?;
            replica.is_member(node.id()).then_some(replica)
        });

        let Some(first) = members.next() else {
            return true;
        };
        let (value, cursor) = (first.value(), first.next_expected_sequence());
        first.pending_count() == 0
            && members.all(|r| {
                r.value() == value && r.next_expected_sequence() == cursor && r.pending_count() == 0
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ChangeLog;

    fn three_nodes() -> (Cluster, ChangeLog) {
        let mut cluster = Cluster::with_nodes(3, NetworkConfig::fifo()).unwrap();
        let log = ChangeLog::new();
        for id in cluster.ids() {
            cluster.add_observer(id, log.clone()).unwrap();
        }
        cluster
            .subscribe_all("A", &[NodeId(0), NodeId(1), NodeId(2)])
            .unwrap();
        (cluster, log)
    }

    #[test]
    fn test_write_reaches_every_node() {
        let (mut cluster, log) = three_nodes();
        cluster.write(NodeId(2), "A", 11).unwrap();
        // request + three broadcasts
        assert_eq!(cluster.run_until_idle().unwrap(), 4);

        assert!(cluster.is_converged("A"));
        assert_eq!(log.len(), 3);
        for (_, value) in cluster.values("A") {
            assert_eq!(value, 11);
        }
    }

    #[test]
    fn test_rejected_cas_produces_no_traffic() {
        let (mut cluster, log) = three_nodes();
        cluster.compare_and_exchange(NodeId(1), "A", 5, 6).unwrap();
        // just the request
        assert_eq!(cluster.run_until_idle().unwrap(), 1);
        assert!(log.is_empty());
        assert_eq!(cluster.stats().sent, 1);
    }

    #[test]
    fn test_step_on_idle_bus() {
        let (mut cluster, _log) = three_nodes();
        assert!(!cluster.step().unwrap());
    }

    #[test]
    fn test_unknown_node() {
        let (cluster, _log) = three_nodes();
        assert_eq!(
            cluster.write(NodeId(7), "A", 1).unwrap_err(),
            DsmError::UnknownNode(NodeId(7))
        );
    }

    #[test]
    fn test_handling_error_stops_run() {
        let mut cluster = Cluster::with_nodes(2, NetworkConfig::fifo()).unwrap();
        // Only node 0 knows the variable, so node 1 fails on the broadcast.
        cluster
            .node_mut(NodeId(0))
            .unwrap()
            .subscribe("A", &[NodeId(0), NodeId(1)])
            .unwrap();
        cluster.write(NodeId(0), "A", 1).unwrap();

        let err = cluster.run_until_idle().unwrap_err();
        assert!(matches!(err, DsmError::UnknownVariable { node: NodeId(1), .. }));
    }

    #[test]
    fn test_subscribe_all_rejects_foreign_members() {
        let mut cluster = Cluster::with_nodes(2, NetworkConfig::fifo()).unwrap();
        let err = cluster
            .subscribe_all("A", &[NodeId(0), NodeId(5), NodeId(1)])
            .unwrap_err();

        assert_eq!(err, DsmError::UnknownNode(NodeId(5)));
        for id in cluster.ids() {
            assert!(!cluster.node(id).unwrap().is_subscribed("A"));
        }
    }

    #[test]
    fn test_unreachable_member_does_not_stall_the_rest() {
        let mut cluster = Cluster::new([NodeId(0), NodeId(2)], NetworkConfig::fifo()).unwrap();
        let log = ChangeLog::new();
        let group = [NodeId(0), NodeId(1), NodeId(2)];
        for id in cluster.ids() {
            cluster.add_observer(id, log.clone()).unwrap();
            // Bypasses the membership check of `subscribe_all`.
            cluster.node_mut(id).unwrap().subscribe("A", &group).unwrap();
        }

        cluster.write(NodeId(2), "A", 7).unwrap();
        let err = cluster.run_until_idle().unwrap_err();
        assert_eq!(err, DsmError::UnknownNode(NodeId(1)));

        // The broadcast still reached N2, behind the missing N1.
        cluster.run_until_idle().unwrap();
        assert_eq!(log.values_for(NodeId(0), "A"), vec![7]);
        assert_eq!(log.values_for(NodeId(2), "A"), vec![7]);
        assert_eq!(cluster.node(NodeId(2)).unwrap().value("A").unwrap(), 7);
        assert!(cluster.is_converged("A"));
    }
}
