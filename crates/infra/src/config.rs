//! Store configuration loaded from the environment.
//!
//! | Variable | Values | Default |
//! |----------|--------|---------|
//! | `EVENTSTORE_BACKEND` | `memory`, `postgres` | `memory` |
//! | `DATABASE_URL` | Postgres connection string | required for `postgres` |
//! | `DATABASE_MAX_CONNECTIONS` | positive integer | `5` |

use std::sync::Arc;

use thiserror::Error;

use crate::context::{ContextFactory, InMemoryStore, PostgresStore};
use crate::error::PersistenceError;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: Backend,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown EVENTSTORE_BACKEND `{0}` (expected `memory` or `postgres`)")]
    UnknownBackend(String),

    #[error("DATABASE_URL must be set when EVENTSTORE_BACKEND=postgres")]
    MissingDatabaseUrl,

    #[error("DATABASE_MAX_CONNECTIONS must be a positive integer, got `{0}`")]
    InvalidMaxConnections(String),

    #[error("failed to connect to the store: {0}")]
    Connect(#[from] PersistenceError),
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source (the process environment in
    /// [`from_env`](Self::from_env)).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = lookup("EVENTSTORE_BACKEND")
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "memory".to_string());

        let backend = match backend.as_str() {
            "" | "memory" => Backend::Memory,
            "postgres" => {
                let database_url = lookup("DATABASE_URL")
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?;
                let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
                    None => DEFAULT_MAX_CONNECTIONS,
                    Some(raw) => raw
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or(ConfigError::InvalidMaxConnections(raw))?,
                };
                Backend::Postgres {
                    database_url,
                    max_connections,
                }
            }
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        Ok(Self { backend })
    }

    /// Open the configured backend.
    ///
    /// For Postgres this creates the pool and makes sure the schema exists.
    pub async fn connect(&self) -> Result<Arc<dyn ContextFactory>, ConfigError> {
        match &self.backend {
            Backend::Memory => {
                tracing::info!(backend = "memory", "using in-memory store");
                Ok(Arc::new(InMemoryStore::new()))
            }
            Backend::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(database_url, *max_connections).await?;
                store.ensure_schema().await?;
                tracing::info!(backend = "postgres", max_connections, "connected to postgres store");
                Ok(Arc::new(store))
            }
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<StoreConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoreConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_memory() {
        assert_eq!(config(&[]).unwrap(), StoreConfig::memory());
        assert_eq!(
            config(&[("EVENTSTORE_BACKEND", "Memory")]).unwrap().backend,
            Backend::Memory
        );
    }

    #[test]
    fn postgres_requires_a_url() {
        assert!(matches!(
            config(&[("EVENTSTORE_BACKEND", "postgres")]),
            Err(ConfigError::MissingDatabaseUrl)
        ));
    }

    #[test]
    fn postgres_reads_pool_size() {
        let cfg = config(&[
            ("EVENTSTORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/events"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();

        assert_eq!(
            cfg.backend,
            Backend::Postgres {
                database_url: "postgres://localhost/events".into(),
                max_connections: 12,
            }
        );
    }

    #[test]
    fn postgres_pool_size_defaults() {
        let cfg = config(&[
            ("EVENTSTORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/events"),
        ])
        .unwrap();
        assert!(matches!(
            cfg.backend,
            Backend::Postgres { max_connections: DEFAULT_MAX_CONNECTIONS, .. }
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("EVENTSTORE_BACKEND", "mongo")]),
            Err(ConfigError::UnknownBackend(b)) if b == "mongo"
        ));
        assert!(matches!(
            config(&[
                ("EVENTSTORE_BACKEND", "postgres"),
                ("DATABASE_URL", "postgres://localhost/events"),
                ("DATABASE_MAX_CONNECTIONS", "0"),
            ]),
            Err(ConfigError::InvalidMaxConnections(_))
        ));
    }

    #[tokio::test]
    async fn memory_backend_connects_without_io() {
        let factory = StoreConfig::memory().connect().await.unwrap();
        let ctx = factory.create_context();
        assert!(ctx.changes().is_empty());
    }
}
