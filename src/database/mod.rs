//! # Database Access Layer
//!
//! The queue core depends on a small set of primitives: execute-scalar,
//! execute-non-query, execute-reader inside a transaction, and explicit
//! begin/commit/rollback. [`QueueConnection`] captures exactly those, with one
//! implementation per provider family:
//!
//! - [`PgQueueConnection`]: Postgres via `sqlx`
//! - `MsQueueConnection`: SQL Server via `tiberius` (cargo feature `mssql`)
//!
//! Each producer, consumer and configurator owns a dedicated connection, so
//! transaction state lives on the connection itself.

pub mod configurator;
pub mod postgres;
#[cfg(feature = "mssql")]
pub mod sql_server;
pub mod value;

pub use configurator::{ProvisionOutcome, QueueConfigurator, QueueState};
pub use postgres::PgQueueConnection;
#[cfg(feature = "mssql")]
pub use sql_server::MsQueueConnection;
pub use value::{DataRow, SqlValue};

use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Supported database provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseProvider {
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mssql", alias = "sqlserver")]
    SqlServer,
}

impl fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseProvider::Postgres => f.write_str("postgres"),
            DatabaseProvider::SqlServer => f.write_str("sql_server"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

/// Connection primitives used by the configurator, producer and consumer
#[async_trait]
pub trait QueueConnection: Send {
    fn provider(&self) -> DatabaseProvider;

    /// First column of the first row, `None` when no row is returned
    async fn execute_scalar(&mut self, sql: &str) -> QueueResult<Option<SqlValue>>;

    /// Execute a statement and return the affected row count
    async fn execute_non_query(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<u64>;

    async fn query_rows(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<Vec<DataRow>>;

    async fn begin(&mut self, isolation: IsolationLevel) -> QueueResult<()>;

    async fn commit(&mut self) -> QueueResult<()>;

    async fn rollback(&mut self) -> QueueResult<()>;

    fn in_transaction(&self) -> bool;
}

/// Open a dedicated connection for the given provider
pub async fn connect(
    provider: DatabaseProvider,
    url: &str,
    command_timeout: Duration,
) -> QueueResult<Box<dyn QueueConnection>> {
    match provider {
        DatabaseProvider::Postgres => Ok(Box::new(
            PgQueueConnection::connect(url, command_timeout).await?,
        )),
        #[cfg(feature = "mssql")]
        DatabaseProvider::SqlServer => Ok(Box::new(
            MsQueueConnection::connect(url, command_timeout).await?,
        )),
        #[cfg(not(feature = "mssql"))]
        DatabaseProvider::SqlServer => Err(QueueError::UnsupportedProvider {
            provider: format!("{provider} (built without the mssql feature)"),
        }),
    }
}

/// Bound a database future by the connection's command timeout
pub(crate) async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &str,
    future: F,
) -> QueueResult<T>
where
    F: Future<Output = QueueResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::timeout(operation, timeout.as_secs())),
    }
}
