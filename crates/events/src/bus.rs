//! Integration event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes integration events to consumers outside the aggregate
//! boundary. It is lightweight and makes minimal assumptions:
//!
//! - **Transport-agnostic**: in-memory channels, brokers, etc.
//! - **At-least-once delivery**: consumers must be idempotent
//! - **No persistence**: the event log is the source of truth, not the bus
//!
//! Messages are published only after the changes that produced them are
//! committed, so a failed commit never leaks an event.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;

/// A subscription to a bus (broadcast semantics: every subscriber gets every
/// message published after it subscribed).
///
/// Subscriptions are designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Publication failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Internal state of the bus is unusable (e.g. lock poisoning).
    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the message.
    #[error("event rejected by bus: {0}")]
    Rejected(String),
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail; failures are surfaced to the caller. Since the
/// changes are already committed, retrying publication is safe.
pub trait EventBus<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
