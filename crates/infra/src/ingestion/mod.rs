//! Asynchronous ingestion: the producer half runs inside the HTTP service,
//! the consumer half drains the queue into the entity gateway.

pub mod consumer;
pub mod producer;

pub use consumer::{ConsumerStats, DeliveryOutcome, IngestionConsumer, SpawnError};
pub use producer::{IngestionProducer, SubmitError};
