use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::runtime::Handle;
use tracing::{info, warn};

use intake_auth::{FreshnessWindow, TokenResolver, TokenStore};
use intake_core::EntityKind;
use intake_events::{InMemoryMessageBus, MessageBus};
use intake_infra::{
    BrokerBackend, ContractStore, EntityGateway, IngestionConsumer, IngestionProducer, IntakeConfig,
    StorageBackend, WorkerHandle,
    broker::{RedisStreamsBus, RedisStreamsConfig},
    contracts::{InMemoryContractStore, PostgresContractStore, RedisContractStore},
    gateway::{InMemoryEntityGateway, PostgresEntityGateway, RedisEntityGateway},
    ingestion::{ConsumerStats, SpawnError},
    tokens::{InMemoryTokenStore, PostgresTokenStore, RedisTokenStore},
};

/// Everything the handlers need for one service (investor or client).
pub struct AppServices {
    kind: EntityKind,
    gateway: Arc<dyn EntityGateway>,
    tokens: TokenResolver<Arc<dyn TokenStore>>,
    contracts: Arc<dyn ContractStore>,
    bus: Arc<dyn MessageBus<String>>,
    producer: IngestionProducer,
    consumers: Mutex<Vec<RunningConsumer>>,
}

struct RunningConsumer {
    consumer: IngestionConsumer,
    worker: WorkerHandle,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("kind", &self.kind)
            .field("token_window", &self.tokens.window())
            .field("producer", &self.producer)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(
        gateway: Arc<dyn EntityGateway>,
        token_store: Arc<dyn TokenStore>,
        token_window: FreshnessWindow,
        bus: Arc<dyn MessageBus<String>>,
        producer: IngestionProducer,
    ) -> Self {
        Self {
            kind: gateway.kind(),
            gateway,
            tokens: TokenResolver::new(token_store, token_window),
            contracts: Arc::new(InMemoryContractStore::new()),
            bus,
            producer,
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// In-memory wiring (dev/test): gateway, token store and broker all in-process.
    pub fn in_memory(kind: EntityKind, token_window: FreshnessWindow) -> Self {
        let bus: Arc<dyn MessageBus<String>> = Arc::new(InMemoryMessageBus::<String>::new());
        Self::new(
            Arc::new(InMemoryEntityGateway::new(kind)),
            Arc::new(InMemoryTokenStore::new()),
            token_window,
            bus.clone(),
            IngestionProducer::new(bus, kind),
        )
    }

    /// Replace the default in-process contract store.
    pub fn with_contracts(mut self, contracts: Arc<dyn ContractStore>) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn gateway(&self) -> &Arc<dyn EntityGateway> {
        &self.gateway
    }

    pub fn tokens(&self) -> &TokenResolver<Arc<dyn TokenStore>> {
        &self.tokens
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        self.tokens.store()
    }

    pub fn contracts(&self) -> &Arc<dyn ContractStore> {
        &self.contracts
    }

    pub fn producer(&self) -> &IngestionProducer {
        &self.producer
    }

    /// Counters of each running consumer, in start order.
    pub fn consumer_stats(&self) -> Vec<ConsumerStats> {
        self.consumers
            .lock()
            .map(|running| running.iter().map(|r| r.consumer.stats()).collect())
            .unwrap_or_default()
    }

    /// Start `count` consumer workers draining the broker into the gateway.
    pub fn start_consumers(&self, count: usize, runtime: Handle) -> Result<(), SpawnError> {
        if count == 0 {
            info!(kind = %self.kind, "in-process consumers disabled");
            return Ok(());
        }

        let mut running = self
            .consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let first = running.len();
        for i in first..first + count {
            let consumer = IngestionConsumer::new(self.bus.clone(), self.gateway.clone());
            let worker = consumer.spawn(format!("{}-consumer-{i}", self.kind), runtime.clone())?;
            running.push(RunningConsumer { consumer, worker });
        }
        Ok(())
    }

    /// Stop consumer workers, letting each finish its current delivery.
    pub fn shutdown(&self) {
        let running: Vec<RunningConsumer> = self
            .consumers
            .lock()
            .map(|mut r| r.drain(..).collect())
            .unwrap_or_default();
        for RunningConsumer { consumer, worker } in running {
            let name = worker.name().to_string();
            worker.shutdown();
            info!(worker = %name, stats = ?consumer.stats(), "consumer stopped");
        }
    }
}

/// Wire services from configuration; backends are chosen once, here.
pub async fn build_services(config: &IntakeConfig) -> anyhow::Result<AppServices> {
    let kind = config.kind;

    let (gateway, token_store, contracts): (
        Arc<dyn EntityGateway>,
        Arc<dyn TokenStore>,
        Arc<dyn ContractStore>,
    ) = match &config.storage {
        StorageBackend::Memory => {
            warn!(kind = %kind, "using in-memory storage; records are lost on restart");
            (
                Arc::new(InMemoryEntityGateway::new(kind)),
                Arc::new(InMemoryTokenStore::new()),
                Arc::new(InMemoryContractStore::new()),
            )
        }
        StorageBackend::Postgres { database_url } => {
            let gateway = PostgresEntityGateway::connect(database_url, kind)
                .await
                .context("failed to connect to Postgres")?;
            gateway.ensure_schema().await.context("failed to create record table")?;

            let tokens = PostgresTokenStore::new(gateway.pool().clone(), kind);
            tokens.ensure_schema().await.context("failed to create token table")?;

            let contracts = PostgresContractStore::new(gateway.pool().clone());
            contracts.ensure_schema().await.context("failed to create contract table")?;
            (Arc::new(gateway), Arc::new(tokens), Arc::new(contracts))
        }
        StorageBackend::Redis { redis_url } => {
            let gateway = RedisEntityGateway::connect(redis_url, kind)
                .await
                .context("failed to connect to Redis (records)")?;
            let tokens = RedisTokenStore::connect(redis_url, kind)
                .await
                .context("failed to connect to Redis (tokens)")?;
            let contracts = RedisContractStore::connect(redis_url)
                .await
                .context("failed to connect to Redis (contracts)")?;
            (Arc::new(gateway), Arc::new(tokens), Arc::new(contracts))
        }
    };

    let bus: Arc<dyn MessageBus<String>> = match &config.broker {
        BrokerBackend::Memory => Arc::new(InMemoryMessageBus::<String>::new()),
        BrokerBackend::RedisStreams {
            redis_url,
            stream_key,
            group,
        } => {
            let bus = RedisStreamsBus::new(redis_url, RedisStreamsConfig::new(stream_key, group))
                .context("invalid Redis URL for broker")?;
            // Producers must come up even while the broker is down; they report 503.
            if let Err(e) = bus.ensure_consumer_group() {
                warn!(error = %e, stream = %stream_key, "broker not reachable at start-up");
            }
            Arc::new(bus)
        }
    };

    let producer = IngestionProducer::new(bus.clone(), kind).with_publish_timeout(config.publish_timeout);

    info!(
        kind = %kind,
        consumers = config.consumers,
        window_days = config.token_window.max_age_days(),
        "services wired"
    );

    Ok(AppServices::new(
        gateway,
        token_store,
        config.token_window,
        bus,
        producer,
    )
    .with_contracts(contracts))
}
