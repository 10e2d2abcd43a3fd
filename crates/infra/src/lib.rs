//! Infrastructure layer: persistence contexts, the aggregate repository,
//! cancellation and store configuration.

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod repository;


pub use cancel::Cancellation;
pub use config::{Backend, ConfigError, StoreConfig};
pub use context::{
    AggregateRow, ChangeSet, ContextFactory, InMemoryContext, InMemoryStore, PersistenceContext,
    PostgresContext, PostgresStore, RowFilter, RowOp,
};
pub use error::{PersistenceError, RepositoryError};
pub use repository::{IntegrationBus, Repository};
