//! A DSM node: variable registry, request routing, sequencer logic and the
//! ordered-delivery path.
//!
//! A node is a message-driven actor. Whoever drives it ([`Cluster`] for the
//! deterministic simulation, [`NodeHandle`] for the tokio runtime) must call
//! [`Node::handle_message`] for one message at a time; the registry is never
//! shared, so no locking happens here.
//!
//! [`Cluster`]: crate::cluster::Cluster
//! [`NodeHandle`]: crate::runtime::NodeHandle

use crate::config::NodeConfig;
use crate::observer::{ObserverList, VariableChange, VariableObserver};
use crate::transport::Transport;
use dsm_core::{Delivery, DsmError, Message, NodeId, Result, SeqNo, Value, VariableReplica};
use std::collections::HashMap;
use std::sync::Arc;

/// One participant of the shared memory.
pub struct Node {
    id: NodeId,
    variables: HashMap<String, VariableReplica>,
    transport: Arc<dyn Transport>,
    observers: ObserverList,
    config: NodeConfig,
}

impl Node {
    pub fn new(id: NodeId, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(id, transport, NodeConfig::default())
    }

    pub fn with_config(id: NodeId, transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        Self {
            id,
            variables: HashMap::new(),
            transport,
            observers: ObserverList::new(),
            config,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Register a listener for delivered updates.
    pub fn add_observer(&mut self, observer: impl VariableObserver + 'static) {
        self.observers.register(observer);
    }

    /// Register `variable` as replicated by `group`.
    ///
    /// The sequencer is `min(group)`. Every participant must subscribe with
    /// the same name and group before the first write; disagreement is not
    /// detected. Subscribing again resets the record.
    pub fn subscribe(&mut self, variable: impl Into<String>, group: &[NodeId]) -> Result<()> {
        let variable = variable.into();
        let replica = VariableReplica::new(variable.clone(), group.iter().copied())?
            .with_max_pending(self.config.max_pending_updates);

        if !replica.is_member(self.id) {
            tracing::debug!(
                node = %self.id,
                variable = %variable,
                "subscribed outside the group; updates will not be delivered here"
            );
        }
        tracing::debug!(
            node = %self.id,
            variable = %variable,
            sequencer = %replica.sequencer(),
            "subscribed"
        );

        self.variables.insert(variable, replica);
        Ok(())
    }

    /// Request an unconditional write. Fire-and-forget: the request always
    /// travels through the bus to the sequencer, even from the sequencer.
    pub fn write(&self, variable: &str, value: Value) -> Result<()> {
        let sequencer = self.replica(variable)?.sequencer();
        self.transport
            .send(sequencer, Message::write(variable, value, self.id))
    }

    /// Request a compare-and-exchange. Fire-and-forget: a rejected request
    /// is dropped silently and the caller only learns about acceptance by
    /// observing `new_value`.
    pub fn compare_and_exchange(
        &self,
        variable: &str,
        expected: Value,
        new_value: Value,
    ) -> Result<()> {
        let sequencer = self.replica(variable)?.sequencer();
        self.transport
            .send(sequencer, Message::cas(variable, expected, new_value, self.id))
    }

    /// Delivered value of `variable`.
    pub fn value(&self, variable: &str) -> Result<Value> {
        Ok(self.replica(variable)?.value())
    }

    pub fn replica(&self, variable: &str) -> Result<&VariableReplica> {
        self.variables
            .get(variable)
            .ok_or_else(|| self.unknown(variable))
    }

    pub fn is_subscribed(&self, variable: &str) -> bool {
        self.variables.contains_key(variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Process one inbound message.
    pub fn handle_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::WriteRequest { variable, value, sender } => {
                let id = self.id;
                let replica = self.replica_mut(&variable)?;
                if !replica.is_sequencer(id) {
                    tracing::debug!(
                        node = %id,
                        variable = %variable,
                        from = %sender,
                        "ignoring misrouted write"
                    );
                    return Ok(());
                }
                let sequence = replica.accept_write(value);
                tracing::debug!(
                    node = %id,
                    variable = %variable,
                    value,
                    sequence,
                    from = %sender,
                    "write accepted"
                );
                self.broadcast(variable, value, sequence)
            }
            Message::CasRequest {
                variable,
                expected,
                value,
                sender,
            } => {
                let id = self.id;
                let replica = self.replica_mut(&variable)?;
                if !replica.is_sequencer(id) {
                    tracing::debug!(
                        node = %id,
                        variable = %variable,
                        from = %sender,
                        "ignoring misrouted cas"
                    );
                    return Ok(());
                }
                match replica.accept_cas(expected, value) {
                    Some(sequence) => {
                        tracing::debug!(
                            node = %id,
                            variable = %variable,
                            value,
                            sequence,
                            from = %sender,
                            "cas accepted"
                        );
                        self.broadcast(variable, value, sequence)
                    }
                    None => {
                        tracing::debug!(
                            node = %id,
                            variable = %variable,
                            expected,
                            current = replica.sequenced_value(),
                            from = %sender,
                            "cas rejected"
                        );
                        Ok(())
                    }
                }
            }
            Message::UpdateBroadcast {
                variable,
                value,
                sequence,
                ..
            } => self.deliver(variable, value, sequence),
        }
    }

    fn broadcast(&self, variable: String, value: Value, sequence: SeqNo) -> Result<()> {
        let group = self.replica(&variable)?.group().to_vec();
        let update = Message::update(variable, value, sequence, self.id);
        self.transport.multicast(&group, &update)
    }

    fn deliver(&mut self, variable: String, value: Value, sequence: SeqNo) -> Result<()> {
        let id = self.id;
        let replica = self.replica_mut(&variable)?;
        let cursor = replica.next_expected_sequence();

        match replica.deliver(sequence, value)? {
            Delivery::Applied(updates) => {
                for update in updates {
                    tracing::trace!(
                        node = %id,
                        variable = %variable,
                        sequence = update.sequence,
                        value = update.value,
                        "applied"
                    );
                    self.observers.notify(&VariableChange {
                        node: id,
                        variable: variable.clone(),
                        value: update.value,
                        sequence: update.sequence,
                    });
                }
            }
            Delivery::Buffered => {
                tracing::debug!(
                    node = %id,
                    variable = %variable,
                    sequence,
                    cursor,
                    "buffered out-of-order update"
                );
            }
            Delivery::Stale => {
                tracing::trace!(
                    node = %id,
                    variable = %variable,
                    sequence,
                    cursor,
                    "discarded stale update"
                );
            }
        }
        Ok(())
    }

    fn replica_mut(&mut self, variable: &str) -> Result<&mut VariableReplica> {
        let node = self.id;
        self.variables
            .get_mut(variable)
            .ok_or_else(|| DsmError::UnknownVariable {
                node,
                variable: variable.to_string(),
            })
    }

    fn unknown(&self, variable: &str) -> DsmError {
        DsmError::UnknownVariable {
            node: self.id,
            variable: variable.to_string(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("variables", &self.variables)
            .field("observers", &self.observers)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ChangeLog;
    use parking_lot::Mutex;

    /// Transport that only records what a node sends.
    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(NodeId, Message)>>,
    }

    impl Outbox {
        fn take(&self) -> Vec<(NodeId, Message)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl Transport for Outbox {
        fn send(&self, target: NodeId, message: Message) -> Result<()> {
            self.sent.lock().push((target, message));
            Ok(())
        }
    }

    fn group() -> Vec<NodeId> {
        vec![NodeId(0), NodeId(1), NodeId(2)]
    }

    fn node(id: u32) -> (Node, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let mut node = Node::new(NodeId(id), outbox.clone());
        node.subscribe("A", &group()).unwrap();
        (node, outbox)
    }

    #[test]
    fn test_write_routes_to_sequencer() {
        let (node, outbox) = node(2);
        node.write("A", 7).unwrap();
        assert_eq!(outbox.take(), vec![(NodeId(0), Message::write("A", 7, NodeId(2)))]);
    }

    #[test]
    fn test_sequencer_write_still_goes_through_bus() {
        let (node, outbox) = node(0);
        node.write("A", 1).unwrap();
        assert_eq!(outbox.take(), vec![(NodeId(0), Message::write("A", 1, NodeId(0)))]);
    }

    #[test]
    fn test_cas_routes_to_sequencer() {
        let (node, outbox) = node(1);
        node.compare_and_exchange("A", 2, 5).unwrap();
        assert_eq!(outbox.take(), vec![(NodeId(0), Message::cas("A", 2, 5, NodeId(1)))]);
    }

    #[test]
    fn test_sequencer_multicasts_to_whole_group() {
        let (mut node, outbox) = node(0);
        node.handle_message(Message::write("A", 9, NodeId(2))).unwrap();

        let sent = outbox.take();
        let targets: Vec<_> = sent.iter().map(|(t, _)| *t).collect();
        assert_eq!(targets, group());
        for (_, msg) in sent {
            assert_eq!(msg, Message::update("A", 9, 0, NodeId(0)));
        }
        assert_eq!(node.replica("A").unwrap().next_sequence_to_assign(), 1);
    }

    #[test]
    fn test_non_sequencer_ignores_requests() {
        let (mut node, outbox) = node(1);
        node.handle_message(Message::write("A", 9, NodeId(2))).unwrap();
        node.handle_message(Message::cas("A", 0, 9, NodeId(2))).unwrap();
        assert!(outbox.take().is_empty());
        assert_eq!(node.replica("A").unwrap().next_sequence_to_assign(), 0);
    }

    #[test]
    fn test_cas_mismatch_is_silent() {
        let (mut node, outbox) = node(0);
        node.handle_message(Message::cas("A", 42, 5, NodeId(1))).unwrap();
        assert!(outbox.take().is_empty());

        // Current value is 0, so this one matches.
        node.handle_message(Message::cas("A", 0, 5, NodeId(1))).unwrap();
        assert_eq!(outbox.take().len(), 3);
    }

    #[test]
    fn test_out_of_order_broadcasts_notify_in_sequence() {
        let (mut node, _outbox) = node(2);
        let log = ChangeLog::new();
        node.add_observer(log.clone());

        node.handle_message(Message::update("A", 30, 2, NodeId(0))).unwrap();
        assert!(log.is_empty());
        node.handle_message(Message::update("A", 20, 1, NodeId(0))).unwrap();
        assert!(log.is_empty());
        node.handle_message(Message::update("A", 10, 0, NodeId(0))).unwrap();

        assert_eq!(log.sequences_for(NodeId(2), "A"), vec![0, 1, 2]);
        assert_eq!(log.values_for(NodeId(2), "A"), vec![10, 20, 30]);
        assert_eq!(node.value("A").unwrap(), 30);
        assert_eq!(node.replica("A").unwrap().pending_count(), 0);
    }

    #[test]
    fn test_unknown_variable_fails_fast() {
        let outbox = Arc::new(Outbox::default());
        let mut node = Node::new(NodeId(3), outbox.clone());

        let expected = DsmError::UnknownVariable {
            node: NodeId(3),
            variable: "B".to_string(),
        };
        assert_eq!(node.write("B", 1).unwrap_err(), expected);
        assert_eq!(node.compare_and_exchange("B", 0, 1).unwrap_err(), expected);
        assert_eq!(
            node.handle_message(Message::update("B", 1, 0, NodeId(0))).unwrap_err(),
            expected
        );
        assert_eq!(
            node.handle_message(Message::write("B", 1, NodeId(0))).unwrap_err(),
            expected
        );
        assert!(outbox.take().is_empty());
    }

    #[test]
    fn test_resubscribe_resets_record() {
        let (mut node, _outbox) = node(1);
        node.handle_message(Message::update("A", 4, 0, NodeId(0))).unwrap();
        node.handle_message(Message::update("A", 6, 2, NodeId(0))).unwrap();

        node.subscribe("A", &group()).unwrap();
        assert_eq!(node.variables().collect::<Vec<_>>(), vec!["A"]);
        let replica = node.replica("A").unwrap();
        assert_eq!(replica.value(), 0);
        assert_eq!(replica.next_expected_sequence(), 0);
        assert_eq!(replica.pending_count(), 0);
    }

    #[test]
    fn test_empty_group_rejected() {
        let outbox = Arc::new(Outbox::default());
        let mut node = Node::new(NodeId(0), outbox);
        assert_eq!(
            node.subscribe("A", &[]).unwrap_err(),
            DsmError::EmptySubscriberGroup("A".to_string())
        );
        assert!(!node.is_subscribed("A"));
    }

    #[test]
    fn test_reorder_bound_from_config() {
        let outbox = Arc::new(Outbox::default());
        let config = crate::config::NodeConfigBuilder::new().max_pending_updates(1).build();
        let mut node = Node::with_config(NodeId(1), outbox, config);
        assert_eq!(node.config().max_pending_updates, Some(1));
        node.subscribe("A", &group()).unwrap();

        node.handle_message(Message::update("A", 1, 1, NodeId(0))).unwrap();
        let err = node
            .handle_message(Message::update("A", 2, 2, NodeId(0)))
            .unwrap_err();
        assert!(matches!(err, DsmError::ReorderBufferOverflow { capacity: 1, .. }));
    }

    #[test]
    fn test_observer_panic_keeps_state_consistent() {
        let (mut node, _outbox) = node(1);
        node.add_observer(|_: &VariableChange| panic!("boom"));
        let log = ChangeLog::new();
        node.add_observer(log.clone());

        node.handle_message(Message::update("A", 5, 0, NodeId(0))).unwrap();
        node.handle_message(Message::update("A", 6, 1, NodeId(0))).unwrap();

        assert_eq!(node.value("A").unwrap(), 6);
        assert_eq!(node.replica("A").unwrap().next_expected_sequence(), 2);
        assert_eq!(log.values_for(NodeId(1), "A"), vec![5, 6]);
    }
}
