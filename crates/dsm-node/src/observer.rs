//! Change notification.
//!
//! A node keeps an explicit list of observers and fans out synchronously to
//! all of them whenever an update is delivered. Observers run inside the
//! node's handling path, after cursor and buffer state are final, so they
//! must not block or call back into the node.

use dsm_core::{NodeId, SeqNo, Value};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// One delivered update, as seen by a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableChange {
    pub node: NodeId,
    pub variable: String,
    pub value: Value,
    pub sequence: SeqNo,
}

/// Receives delivered updates.
pub trait VariableObserver: Send + Sync {
    fn on_variable_changed(&self, change: &VariableChange);
}

impl<F> VariableObserver for F
where
    F: Fn(&VariableChange) + Send + Sync,
{
    fn on_variable_changed(&self, change: &VariableChange) {
        self(change)
    }
}

/// Registered observers of a node, notified in registration order.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn VariableObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: impl VariableObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Notify every observer. A panicking observer is logged and skipped.
    pub fn notify(&self, change: &VariableChange) {
        for (index, observer) in self.observers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_variable_changed(change)));
            if outcome.is_err() {
                tracing::warn!(
                    node = %change.node,
                    variable = %change.variable,
                    sequence = change.sequence,
                    observer = index,
                    "observer panicked during change notification"
                );
            }
        }
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Recording observer with a cloneable handle.
///
/// Register one clone with a node and read the history through another.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    changes: Arc<Mutex<Vec<VariableChange>>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn changes(&self) -> Vec<VariableChange> {
        self.changes.lock().clone()
    }

    /// Values recorded for `variable` on `node`, in notification order.
    pub fn values_for(&self, node: NodeId, variable: &str) -> Vec<Value> {
        self.changes
            .lock()
            .iter()
            .filter(|c| c.node == node && c.variable == variable)
            .map(|c| c.value)
            .collect()
    }

    /// Sequences recorded for `variable` on `node`, in notification order.
    pub fn sequences_for(&self, node: NodeId, variable: &str) -> Vec<SeqNo> {
        self.changes
            .lock()
            .iter()
            .filter(|c| c.node == node && c.variable == variable)
            .map(|c| c.sequence)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }

    pub fn clear(&self) {
        self.changes.lock().clear();
    }
}

impl VariableObserver for ChangeLog {
    fn on_variable_changed(&self, change: &VariableChange) {
        self.changes.lock().push(change.clone());
    }
}
