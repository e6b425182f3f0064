//! Event publishing/subscription abstraction (mechanics only).
//!
//! The ledger and the document workflow publish committed events through this
//! trait; low-stock alerting, exports and reporting consume them.
//!
//! - **Transport-agnostic**: in-memory channels here, a broker elsewhere.
//! - **At-least-once**: consumers must tolerate duplicates.
//! - **No persistence**: the inventory store is the source of truth.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};

/// A subscription to the stream of published messages.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Intended for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Next buffered message, without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(m) = self.receiver.try_recv() {
            out.push(m);
        }
        out
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// Workflow / Ledger → Store (atomic commit) → EventBus (publish) → Consumers
/// ```
///
/// Publishing happens strictly after the commit succeeded, so a failed publish
/// never means lost state; it is surfaced to the caller's logs.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
