//! Broker abstraction and the ingestion wire format.

pub mod bus;
pub mod in_memory_bus;
pub mod message;

pub use bus::{BusError, Delivery, DeliveryTag, MessageBus, Subscription};
pub use in_memory_bus::{BusTotals, InMemoryMessageBus};
pub use message::{IngestionMessage, MessageDecodeError};
