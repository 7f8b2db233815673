//! Per-node, per-variable replica record.
//!
//! A [`VariableReplica`] carries two small state machines:
//!
//! - **Sequencer side** (only meaningful on the node whose id is the minimum
//!   of the subscriber group): accepts writes and compare-and-exchange
//!   requests and hands out gap-free sequence numbers starting at 0.
//! - **Delivery side** (every subscriber, the sequencer included): turns
//!   possibly reordered broadcasts into an exactly-once, strictly increasing
//!   apply sequence using a delivery cursor and a reorder buffer.
//!
//! The sequencer keeps the value at its linearization point
//! (`sequenced_value`) apart from the delivered value. Compare-and-exchange
//! is decided against the former; readers only ever see the latter.

use crate::error::{DsmError, Result};
use crate::types::{NodeId, SeqNo, Value};
use std::collections::{BTreeMap, BTreeSet};

/// An update that became visible during a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub sequence: SeqNo,
    pub value: Value,
}

/// Outcome of handing one broadcast to the delivery side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The broadcast was at the cursor. Contains it plus every buffered
    /// update it unblocked, in sequence order.
    Applied(Vec<AppliedUpdate>),
    /// The broadcast is ahead of the cursor and waits in the reorder buffer.
    Buffered,
    /// The broadcast is below the cursor and was discarded.
    Stale,
}

impl Delivery {
    /// Updates that became visible, empty unless `Applied`.
    pub fn into_applied(self) -> Vec<AppliedUpdate> {
        match self {
            Delivery::Applied(updates) => updates,
            Delivery::Buffered | Delivery::Stale => Vec::new(),
        }
    }
}

/// Replica record for one variable on one node.
#[derive(Clone, Debug)]
pub struct VariableReplica {
    name: String,
    /// Smallest id of the group, fixed at subscribe time.
    sequencer: NodeId,
    /// Sorted, deduplicated subscriber ids.
    group: Vec<NodeId>,
    /// Delivered value.
    value: Value,
    /// Value at the sequencer's linearization point.
    sequenced_value: Value,
    next_to_assign: SeqNo,
    next_expected: SeqNo,
    /// Pending updates keyed by sequence, all strictly above `next_expected`.
    reorder: BTreeMap<SeqNo, Value>,
    max_pending: Option<usize>,
}

impl VariableReplica {
    /// Create a fresh record for `name` replicated by `group`.
    ///
    /// Repeated ids collapse. Fails if the group is empty.
    pub fn new(name: impl Into<String>, group: impl IntoIterator<Item = NodeId>) -> Result<Self> {
        let name = name.into();
        let group: Vec<NodeId> = group.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let sequencer = match group.first() {
            Some(id) => *id,
            None => return Err(DsmError::EmptySubscriberGroup(name)),
        };

        Ok(Self {
            name,
            sequencer,
            group,
            value: 0,
            sequenced_value: 0,
            next_to_assign: 0,
            next_expected: 0,
            reorder: BTreeMap::new(),
            max_pending: None,
        })
    }

    /// Bound the reorder buffer. `None` keeps it unbounded.
    pub fn with_max_pending(mut self, limit: Option<usize>) -> Self {
        self.max_pending = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequencer(&self) -> NodeId {
        self.sequencer
    }

    pub fn is_sequencer(&self, node: NodeId) -> bool {
        self.sequencer == node
    }

    pub fn group(&self) -> &[NodeId] {
        &self.group
    }

    pub fn is_member(&self, node: NodeId) -> bool {
        self.group.binary_search(&node).is_ok()
    }

    /// Last delivered value (0 before any delivery).
    pub fn value(&self) -> Value {
        self.value
    }

    /// Value the sequencer last accepted. Equal to `value()` on other nodes
    /// only once they have caught up, and never read by them.
    pub fn sequenced_value(&self) -> Value {
        self.sequenced_value
    }

    pub fn next_sequence_to_assign(&self) -> SeqNo {
        self.next_to_assign
    }

    /// The delivery cursor.
    pub fn next_expected_sequence(&self) -> SeqNo {
        self.next_expected
    }

    pub fn pending_count(&self) -> usize {
        self.reorder.len()
    }

    pub fn pending_sequences(&self) -> Vec<SeqNo> {
        self.reorder.keys().copied().collect()
    }

    /// Accept an unconditional write at the sequencer and return its sequence.
    pub fn accept_write(&mut self, value: Value) -> SeqNo {
        self.sequenced_value = value;
        let sequence = self.next_to_assign;
        self.next_to_assign += 1;
        sequence
    }

    /// Accept a compare-and-exchange at the sequencer.
    ///
    /// Returns `None` without touching any state when `expected` does not
    /// match the linearized value.
    pub fn accept_cas(&mut self, expected: Value, value: Value) -> Option<SeqNo> {
        if self.sequenced_value != expected {
            return None;
        }
        Some(self.accept_write(value))
    }

    /// Hand a broadcast to the ordered-delivery side.
    pub fn deliver(&mut self, sequence: SeqNo, value: Value) -> Result<Delivery> {
        use std::cmp::Ordering;

        match sequence.cmp(&self.next_expected) {
            Ordering::Equal => {
                let mut applied = vec![self.apply(sequence, value)];
                while let Some(next) = self.reorder.remove(&self.next_expected) {
                    let seq = self.next_expected;
                    applied.push(self.apply(seq, next));
                }
                Ok(Delivery::Applied(applied))
            }
            Ordering::Greater => {
                if let Some(capacity) = self.max_pending {
                    if !self.reorder.contains_key(&sequence) && self.reorder.len() >= capacity {
                        return Err(DsmError::ReorderBufferOverflow {
                            variable: self.name.clone(),
                            capacity,
                        });
                    }
                }
                self.reorder.insert(sequence, value);
                Ok(Delivery::Buffered)
            }
            Ordering::Less => Ok(Delivery::Stale),
        }
    }

    fn apply(&mut self, sequence: SeqNo, value: Value) -> AppliedUpdate {
        self.value = value;
        self.next_expected = sequence + 1;
        AppliedUpdate { sequence, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn test_sequencer_is_group_minimum() {
        let replica = VariableReplica::new("X", ids(&[3, 1, 4, 1, 5])).unwrap();
        assert_eq!(replica.sequencer(), NodeId(1));
        assert_eq!(replica.group(), ids(&[1, 3, 4, 5]).as_slice());
    }

    #[test]
    fn test_empty_group_rejected() {
        let err = VariableReplica::new("X", Vec::new()).unwrap_err();
        assert_eq!(err, DsmError::EmptySubscriberGroup("X".to_string()));
    }

    #[test]
    fn test_initial_state() {
        let replica = VariableReplica::new("A", ids(&[0, 1])).unwrap();
        assert_eq!(replica.value(), 0);
        assert_eq!(replica.next_sequence_to_assign(), 0);
        assert_eq!(replica.next_expected_sequence(), 0);
        assert_eq!(replica.pending_count(), 0);
    }

    #[test]
    fn test_sequence_assignment_is_gap_free() {
        let mut replica = VariableReplica::new("A", ids(&[0])).unwrap();
        assert_eq!(replica.accept_write(10), 0);
        assert_eq!(replica.accept_write(20), 1);
        assert_eq!(replica.accept_cas(20, 30), Some(2));
        assert_eq!(replica.next_sequence_to_assign(), 3);
        assert_eq!(replica.sequenced_value(), 30);
    }

    #[test]
    fn test_cas_mismatch_leaves_state_untouched() {
        let mut replica = VariableReplica::new("A", ids(&[0])).unwrap();
        replica.accept_write(7);
        assert_eq!(replica.accept_cas(8, 9), None);
        assert_eq!(replica.sequenced_value(), 7);
        assert_eq!(replica.next_sequence_to_assign(), 1);
    }

    #[test]
    fn test_in_order_delivery() {
        let mut replica = VariableReplica::new("A", ids(&[0, 1])).unwrap();
        let applied = replica.deliver(0, 4).unwrap().into_applied();
        assert_eq!(applied, vec![AppliedUpdate { sequence: 0, value: 4 }]);
        assert_eq!(replica.value(), 4);
        assert_eq!(replica.next_expected_sequence(), 1);
    }

    #[test]
    fn test_out_of_order_delivery_drains_buffer() {
        let mut replica = VariableReplica::new("A", ids(&[0, 1])).unwrap();

        assert_eq!(replica.deliver(2, 30).unwrap(), Delivery::Buffered);
        assert_eq!(replica.deliver(1, 20).unwrap(), Delivery::Buffered);
        assert_eq!(replica.value(), 0);
        assert_eq!(replica.pending_sequences(), vec![1, 2]);

        let applied = replica.deliver(0, 10).unwrap().into_applied();
        let order: Vec<_> = applied.iter().map(|u| (u.sequence, u.value)).collect();
        assert_eq!(order, vec![(0, 10), (1, 20), (2, 30)]);
        assert_eq!(replica.value(), 30);
        assert_eq!(replica.pending_count(), 0);
        assert_eq!(replica.next_expected_sequence(), 3);
    }

    #[test]
    fn test_drain_stops_at_gap() {
        let mut replica = VariableReplica::new("A", ids(&[0])).unwrap();
        replica.deliver(1, 1).unwrap();
        replica.deliver(3, 3).unwrap();

        let applied = replica.deliver(0, 0).unwrap().into_applied();
        assert_eq!(applied.len(), 2);
        assert_eq!(replica.next_expected_sequence(), 2);
        assert_eq!(replica.pending_sequences(), vec![3]);
    }

    #[test]
    fn test_stale_delivery_discarded() {
        let mut replica = VariableReplica::new("A", ids(&[0])).unwrap();
        replica.deliver(0, 1).unwrap();
        replica.deliver(1, 2).unwrap();

        assert_eq!(replica.deliver(0, 99).unwrap(), Delivery::Stale);
        assert_eq!(replica.value(), 2);
        assert_eq!(replica.next_expected_sequence(), 2);
    }

    #[test]
    fn test_duplicate_buffered_key_overwrites() {
        let mut replica = VariableReplica::new("A", ids(&[0])).unwrap();
        replica.deliver(1, 5).unwrap();
        replica.deliver(1, 6).unwrap();
        assert_eq!(replica.pending_count(), 1);

        replica.deliver(0, 0).unwrap();
        assert_eq!(replica.value(), 6);
    }

    #[test]
    fn test_bounded_buffer_overflow() {
        let mut replica = VariableReplica::new("A", ids(&[0])).unwrap().with_max_pending(Some(2));
        replica.deliver(1, 1).unwrap();
        replica.deliver(2, 2).unwrap();

        // Overwriting an existing key still fits.
        assert_eq!(replica.deliver(2, 22).unwrap(), Delivery::Buffered);

        let err = replica.deliver(3, 3).unwrap_err();
        assert_eq!(
            err,
            DsmError::ReorderBufferOverflow {
                variable: "A".to_string(),
                capacity: 2
            }
        );
        assert_eq!(replica.pending_sequences(), vec![1, 2]);
        assert_eq!(replica.next_expected_sequence(), 0);
    }

    #[test]
    fn test_membership() {
        let replica = VariableReplica::new("A", ids(&[4, 2])).unwrap();
        assert!(replica.is_member(NodeId(2)));
        assert!(!replica.is_member(NodeId(3)));
        assert!(replica.is_sequencer(NodeId(2)));
    }
}
