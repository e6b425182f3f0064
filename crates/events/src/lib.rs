//! Domain events and the pub/sub mechanics used to distribute them.
//!
//! Events are published only after the store commit that produced them has
//! succeeded; the bus is for distribution, never the source of truth.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
