//! Infrastructure layer: storage backends, brokers, ingestion workers, config.

pub mod broker;
pub mod config;
pub mod contracts;
pub mod gateway;
pub mod ingestion;
pub mod tokens;
pub mod workers;

pub use contracts::{AcceptError, ContractStore, ContractStoreError, accept_offer};
pub use config::{BrokerBackend, ConfigError, IntakeConfig, StorageBackend};
pub use gateway::{EntityGateway, GatewayError};
pub use ingestion::{DeliveryOutcome, IngestionConsumer, IngestionProducer, SubmitError};
pub use workers::WorkerHandle;
