//! # Postgres Queue Connection
//!
//! [`QueueConnection`] over a dedicated `sqlx::PgConnection`.
//!
//! Transactions are driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK` statements so
//! the connection can be owned by a long-lived producer or consumer without
//! borrowing a `sqlx::Transaction`. Parameterless statements go through
//! `sqlx::raw_sql`, which allows multi-statement DDL and `$$` function bodies.

use super::{with_timeout, DataRow, DatabaseProvider, IsolationLevel, QueueConnection, SqlValue};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Executor, PgConnection, Postgres, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, error, instrument};

pub struct PgQueueConnection {
    connection: PgConnection,
    command_timeout: Duration,
    in_transaction: bool,
}

impl PgQueueConnection {
    #[instrument(skip(url))]
    pub async fn connect(url: &str, command_timeout: Duration) -> QueueResult<Self> {
        let connection = with_timeout(command_timeout, "connect", async {
            PgConnection::connect(url).await.map_err(|e| {
                error!(error = %e, "Failed to open Postgres connection");
                QueueError::from(e).in_operation("connect")
            })
        })
        .await?;

        debug!("Opened Postgres queue connection");
        Ok(Self::from_connection(connection, command_timeout))
    }

    pub fn from_connection(connection: PgConnection, command_timeout: Duration) -> Self {
        Self {
            connection,
            command_timeout,
            in_transaction: false,
        }
    }

    async fn run_control(&mut self, operation: &str, sql: &str) -> QueueResult<()> {
        let timeout = self.command_timeout;
        let connection = &mut self.connection;
        with_timeout(timeout, operation, async {
            (&mut *connection)
                .execute(sqlx::raw_sql(sql))
                .await
                .map_err(|e| QueueError::from(e).in_operation(operation))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl QueueConnection for PgQueueConnection {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::Postgres
    }

    async fn execute_scalar(&mut self, sql: &str) -> QueueResult<Option<SqlValue>> {
        let timeout = self.command_timeout;
        let connection = &mut self.connection;
        with_timeout(timeout, "execute_scalar", async {
            let row = sqlx::query(sql)
                .fetch_optional(&mut *connection)
                .await
                .map_err(|e| QueueError::from(e).in_operation("execute_scalar"))?;

            match row {
                Some(row) if !row.is_empty() => Ok(Some(decode_column(&row, 0)?)),
                _ => Ok(None),
            }
        })
        .await
    }

    async fn execute_non_query(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<u64> {
        let timeout = self.command_timeout;
        let connection = &mut self.connection;
        with_timeout(timeout, "execute_non_query", async {
            let result = if params.is_empty() {
                (&mut *connection).execute(sqlx::raw_sql(sql)).await
            } else {
                bind_params(sqlx::query(sql), params)
                    .execute(&mut *connection)
                    .await
            };

            result
                .map(|done| done.rows_affected())
                .map_err(|e| QueueError::from(e).in_operation("execute_non_query"))
        })
        .await
    }

    async fn query_rows(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<Vec<DataRow>> {
        let timeout = self.command_timeout;
        let connection = &mut self.connection;
        with_timeout(timeout, "query_rows", async {
            let rows = bind_params(sqlx::query(sql), params)
                .fetch_all(&mut *connection)
                .await
                .map_err(|e| QueueError::from(e).in_operation("query_rows"))?;

            rows.iter().map(decode_row).collect()
        })
        .await
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> QueueResult<()> {
        if self.in_transaction {
            return Err(QueueError::transaction("transaction already open"));
        }
        let sql = match isolation {
            IsolationLevel::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        };
        self.run_control("begin", sql).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> QueueResult<()> {
        if !self.in_transaction {
            return Err(QueueError::transaction("commit without an open transaction"));
        }
        // A failed COMMIT still ends the transaction on the server
        self.in_transaction = false;
        self.run_control("commit", "COMMIT").await
    }

    async fn rollback(&mut self) -> QueueResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.run_control("rollback", "ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(value) => query.bind(*value),
            SqlValue::BigInt(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.as_str()),
            SqlValue::Binary(value) => query.bind(value.as_slice()),
            SqlValue::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> QueueResult<DataRow> {
    let mut data = DataRow::new();
    for index in 0..row.len() {
        let name = row.columns()[index].name().to_string();
        data.push(name, decode_column(row, index)?);
    }
    Ok(data)
}

fn decode_column(row: &PgRow, index: usize) -> QueueResult<SqlValue> {
    let column = &row.columns()[index];
    let name = column.name();
    let type_name = column.type_info().name();
    let mapping_error = |e: sqlx::Error| QueueError::mapping(name, e.to_string());

    let value = match type_name {
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map_err(mapping_error)?
            .map(|v| SqlValue::Int(i32::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map_err(mapping_error)?
            .map(SqlValue::Int),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map_err(mapping_error)?
            .map(SqlValue::BigInt),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .map_err(mapping_error)?
            .map(SqlValue::Text),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map_err(mapping_error)?
            .map(SqlValue::Binary),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map_err(mapping_error)?
            .map(|v| SqlValue::Binary(v.as_bytes().to_vec())),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map_err(mapping_error)?
            .map(SqlValue::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map_err(mapping_error)?
            .map(|v| SqlValue::Timestamp(v.naive_utc())),
        other => {
            return Err(QueueError::mapping(
                name,
                format!("unsupported column type {other}"),
            ))
        }
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_connection() -> Option<PgQueueConnection> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        PgQueueConnection::connect(&url, Duration::from_secs(30))
            .await
            .ok()
    }

    #[tokio::test]
    async fn test_scalar_and_transaction_flags() {
        let Some(mut connection) = test_connection().await else {
            println!("Skipping Postgres connection test - TEST_DATABASE_URL not set");
            return;
        };

        let value = connection.execute_scalar("SELECT 1").await.unwrap();
        assert_eq!(value.and_then(|v| v.as_i64()), Some(1));

        assert!(connection.commit().await.is_err());
        connection.begin(IsolationLevel::Serializable).await.unwrap();
        assert!(connection.in_transaction());
        connection.rollback().await.unwrap();
        assert!(!connection.in_transaction());
    }

    #[tokio::test]
    async fn test_decodes_neutral_values() {
        let Some(mut connection) = test_connection().await else {
            println!("Skipping Postgres decode test - TEST_DATABASE_URL not set");
            return;
        };

        let rows = connection
            .query_rows(
                "SELECT CAST($1 AS bigint) AS n, CAST(NULL AS text) AS t, '\\x0102'::bytea AS b",
                &[SqlValue::BigInt(42)],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&SqlValue::BigInt(42)));
        assert_eq!(rows[0].get("t"), Some(&SqlValue::Null));
        assert_eq!(rows[0].get("b"), Some(&SqlValue::Binary(vec![1, 2])));
    }
}
