//! Process configuration, read once from the environment at start-up.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use intake_auth::FreshnessWindow;
use intake_core::EntityKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var} must be set when {because}")]
    Missing { var: &'static str, because: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// Where records and tokens are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres { database_url: String },
    Redis { redis_url: String },
}

/// Which broker carries ingestion messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerBackend {
    Memory,
    RedisStreams {
        redis_url: String,
        stream_key: String,
        group: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    pub kind: EntityKind,
    pub storage: StorageBackend,
    pub broker: BrokerBackend,
    pub publish_timeout: Duration,
    /// In-process consumer workers; 0 leaves draining to another process.
    pub consumers: usize,
    pub token_window: FreshnessWindow,
    pub bind_addr: SocketAddr,
}

impl IntakeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and empty values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let kind = match get("INTAKE_SERVICE") {
            Some(raw) => raw
                .parse::<EntityKind>()
                .map_err(|e| invalid("INTAKE_SERVICE", e.to_string()))?,
            None => EntityKind::Investor,
        };

        let redis_url = get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string());

        let storage = match get("INTAKE_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => StorageBackend::Memory,
            "postgres" => StorageBackend::Postgres {
                database_url: get("DATABASE_URL").ok_or_else(|| ConfigError::Missing {
                    var: "DATABASE_URL",
                    because: "INTAKE_BACKEND=postgres".to_string(),
                })?,
            },
            "redis" => StorageBackend::Redis {
                redis_url: redis_url.clone(),
            },
            other => return Err(invalid("INTAKE_BACKEND", format!("unknown backend `{other}`"))),
        };

        let broker = match get("INTAKE_BROKER").as_deref().unwrap_or("memory") {
            "memory" => BrokerBackend::Memory,
            "redis" => BrokerBackend::RedisStreams {
                redis_url,
                stream_key: get("INTAKE_STREAM").unwrap_or_else(|| format!("intake:{kind}")),
                group: get("INTAKE_GROUP").unwrap_or_else(|| format!("{kind}.saver")),
            },
            other => return Err(invalid("INTAKE_BROKER", format!("unknown broker `{other}`"))),
        };

        let publish_timeout = Duration::from_millis(parse_or(
            "PUBLISH_TIMEOUT_MS",
            get("PUBLISH_TIMEOUT_MS"),
            2000,
        )?);
        let consumers = parse_or("INTAKE_CONSUMERS", get("INTAKE_CONSUMERS"), 1)?;

        let max_age = parse_or(
            "TOKEN_MAX_AGE_DAYS",
            get("TOKEN_MAX_AGE_DAYS"),
            intake_auth::DEFAULT_MAX_AGE_DAYS,
        )?;
        let token_window = FreshnessWindow::new(max_age)
            .map_err(|e| invalid("TOKEN_MAX_AGE_DAYS", e.to_string()))?;

        let bind_addr = parse_or(
            "BIND_ADDR",
            get("BIND_ADDR"),
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )?;

        Ok(Self {
            kind,
            storage,
            broker,
            publish_timeout,
            consumers,
            token_window,
            bind_addr,
        })
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(var, format!("`{raw}`: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<IntakeConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IntakeConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_run_an_in_memory_investor_service() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.kind, EntityKind::Investor);
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.broker, BrokerBackend::Memory);
        assert_eq!(cfg.publish_timeout, Duration::from_secs(2));
        assert_eq!(cfg.consumers, 1);
        assert_eq!(cfg.token_window, FreshnessWindow::default());
        assert_eq!(cfg.bind_addr.port(), 8080);
    }

    #[test]
    fn redis_broker_names_follow_the_service_kind() {
        let cfg = load(&[("INTAKE_SERVICE", "clients"), ("INTAKE_BROKER", "redis")]).unwrap();
        assert_eq!(
            cfg.broker,
            BrokerBackend::RedisStreams {
                redis_url: "redis://localhost:6379".into(),
                stream_key: "intake:client".into(),
                group: "client.saver".into(),
            }
        );
    }

    #[test]
    fn postgres_requires_a_database_url() {
        assert_eq!(
            load(&[("INTAKE_BACKEND", "postgres")]),
            Err(ConfigError::Missing {
                var: "DATABASE_URL",
                because: "INTAKE_BACKEND=postgres".into(),
            })
        );

        let cfg = load(&[("INTAKE_BACKEND", "postgres"), ("DATABASE_URL", "postgres://db/intake")]).unwrap();
        assert_eq!(
            cfg.storage,
            StorageBackend::Postgres {
                database_url: "postgres://db/intake".into()
            }
        );
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = load(&[("PUBLISH_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PUBLISH_TIMEOUT_MS", .. }));

        let err = load(&[("TOKEN_MAX_AGE_DAYS", "-3")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "TOKEN_MAX_AGE_DAYS", .. }));

        let err = load(&[("INTAKE_BACKEND", "mongo")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "INTAKE_BACKEND", .. }));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("INTAKE_CONSUMERS", "  "), ("BIND_ADDR", "")]).unwrap();
        assert_eq!(cfg.consumers, 1);
        assert_eq!(cfg.bind_addr.port(), 8080);
    }
}
