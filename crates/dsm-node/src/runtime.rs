//! Tokio actor runtime.
//!
//! Every node runs as a task that owns its [`Node`] and reads a single
//! unbounded inbox. Bus messages and caller commands share that inbox, so
//! the variable registry is only ever touched from the task itself. An
//! unbounded mpsc channel keeps send order per sender, which gives the
//! FIFO-per-pair guarantee the protocol expects.
//!
//! A member whose task has stopped is skipped by later broadcasts; the
//! sequencer keeps running and the remaining members keep converging.

use crate::node::Node;
use crate::transport::Transport;
use dsm_core::{DsmError, Message, NodeId, Result, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Everything a node task can receive.
#[derive(Debug)]
pub enum Envelope {
    /// A protocol message from the bus.
    Deliver(Message),
    /// A request from the application holding the [`NodeHandle`].
    Command(Command),
}

/// Caller requests executed on the node task. Replies only carry local
/// validation results, never the outcome of a write or compare-and-exchange.
#[derive(Debug)]
pub enum Command {
    Subscribe {
        variable: String,
        group: Vec<NodeId>,
        reply: oneshot::Sender<Result<()>>,
    },
    Write {
        variable: String,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    CompareAndExchange {
        variable: String,
        expected: Value,
        new_value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        variable: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    Shutdown,
}

type Inbox = mpsc::UnboundedReceiver<Envelope>;

/// Bus backed by one tokio channel per node.
#[derive(Debug, Default)]
pub struct ChannelBus {
    inboxes: RwLock<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
}

impl ChannelBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind `id` and return its inbox.
    pub fn register(&self, id: NodeId) -> Result<Inbox> {
        let mut inboxes = self.inboxes.write();
        if inboxes.contains_key(&id) {
            return Err(DsmError::NodeAlreadyRegistered(id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inboxes.insert(id, tx);
        Ok(rx)
    }

    fn sender(&self, id: NodeId) -> Result<mpsc::UnboundedSender<Envelope>> {
        self.inboxes
            .read()
            .get(&id)
            .cloned()
            .ok_or(DsmError::UnknownNode(id))
    }
}

impl Transport for ChannelBus {
    fn send(&self, target: NodeId, message: Message) -> Result<()> {
        self.sender(target)?
            .send(Envelope::Deliver(message))
            .map_err(|_| DsmError::Disconnected(target))
    }
}

/// Application-side handle to a running node task.
#[derive(Debug)]
pub struct NodeHandle {
    id: NodeId,
    tx: mpsc::UnboundedSender<Envelope>,
    task: JoinHandle<Result<Node>>,
}

impl NodeHandle {
    /// Register a node on `bus` and start its task.
    ///
    /// Observers must be added to `node` before spawning.
    pub fn spawn(node: Node, bus: &ChannelBus) -> Result<Self> {
        let id = node.id();
        let inbox = bus.register(id)?;
        let tx = bus.sender(id)?;
        let task = tokio::spawn(run_node(node, inbox));
        Ok(Self { id, tx, task })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub async fn subscribe(&self, variable: impl Into<String>, group: &[NodeId]) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Subscribe {
            variable: variable.into(),
            group: group.to_vec(),
            reply,
        })?;
        rx.await.map_err(|_| DsmError::Disconnected(self.id))?
    }

    /// Fire-and-forget write. Resolves once the request has left this node.
    pub async fn write(&self, variable: impl Into<String>, value: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Write {
            variable: variable.into(),
            value,
            reply,
        })?;
        rx.await.map_err(|_| DsmError::Disconnected(self.id))?
    }

    /// Fire-and-forget compare-and-exchange. Resolves once the request has
    /// left this node; acceptance is only visible through observers.
    pub async fn compare_and_exchange(
        &self,
        variable: impl Into<String>,
        expected: Value,
        new_value: Value,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::CompareAndExchange {
            variable: variable.into(),
            expected,
            new_value,
            reply,
        })?;
        rx.await.map_err(|_| DsmError::Disconnected(self.id))?
    }

    /// Delivered value of `variable`.
    pub async fn value(&self, variable: impl Into<String>) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Read {
            variable: variable.into(),
            reply,
        })?;
        rx.await.map_err(|_| DsmError::Disconnected(self.id))?
    }

    /// Stop the task after everything already queued, and hand the node back.
    /// Returns the handling error if the task had stopped on one.
    pub async fn shutdown(self) -> Result<Node> {
        // The task may already be gone after an error; the join reports it.
        let _ = self.tx.send(Envelope::Command(Command::Shutdown));
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(node = %self.id, error = %e, "node task did not complete");
                Err(DsmError::Disconnected(self.id))
            }
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.tx
            .send(Envelope::Command(command))
            .map_err(|_| DsmError::Disconnected(self.id))
    }
}

async fn run_node(mut node: Node, mut inbox: Inbox) -> Result<Node> {
    tracing::debug!(node = %node.id(), "node task started");

    while let Some(envelope) = inbox.recv().await {
        match envelope {
            Envelope::Deliver(message) => match node.handle_message(message) {
                Ok(()) => {}
                // The update is committed and every reachable member got it.
                Err(e @ (DsmError::Disconnected(_) | DsmError::UnknownNode(_))) => {
                    tracing::warn!(
                        node = %node.id(),
                        error = %e,
                        "broadcast skipped an unreachable member"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        node = %node.id(),
                        error = %e,
                        "node stopped on handling error"
                    );
                    return Err(e);
                }
            },
            Envelope::Command(Command::Subscribe { variable, group, reply }) => {
                let _ = reply.send(node.subscribe(variable, &group));
            }
            Envelope::Command(Command::Write { variable, value, reply }) => {
                let _ = reply.send(node.write(&variable, value));
            }
            Envelope::Command(Command::CompareAndExchange {
                variable,
                expected,
                new_value,
                reply,
            }) => {
                let _ = reply.send(node.compare_and_exchange(&variable, expected, new_value));
            }
            Envelope::Command(Command::Read { variable, reply }) => {
                let _ = reply.send(node.value(&variable));
            }
            Envelope::Command(Command::Shutdown) => break,
        }
    }

    tracing::debug!(node = %node.id(), "node task stopped");
    Ok(node)
}
