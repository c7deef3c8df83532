//! # SQL Server Queue Connection
//!
//! [`QueueConnection`] over a `tiberius` client. Parameterless statements are sent
//! as plain batches so session-scoped temporary tables survive between the
//! statements of one provisioning transaction; parameterized statements go through
//! `sp_executesql` with `@P1..@Pn` placeholders.

use super::{with_timeout, DataRow, DatabaseProvider, IsolationLevel, QueueConnection, SqlValue};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;
use tiberius::{Client, ColumnData, Config, FromSql, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, error, instrument};

pub struct MsQueueConnection {
    client: Client<Compat<TcpStream>>,
    command_timeout: Duration,
    in_transaction: bool,
}

impl MsQueueConnection {
    /// Connect with an ADO.NET style connection string
    #[instrument(skip(connection_string))]
    pub async fn connect(connection_string: &str, command_timeout: Duration) -> QueueResult<Self> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| QueueError::database("connect", e.to_string()))?;

        let client = with_timeout(command_timeout, "connect", async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| QueueError::database("connect", e.to_string()))?;
            tcp.set_nodelay(true)
                .map_err(|e| QueueError::database("connect", e.to_string()))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to open SQL Server connection");
                    QueueError::database("connect", e.to_string())
                })
        })
        .await?;

        debug!("Opened SQL Server queue connection");
        Ok(Self {
            client,
            command_timeout,
            in_transaction: false,
        })
    }

    async fn run_batch(&mut self, operation: &str, sql: &str) -> QueueResult<()> {
        let timeout = self.command_timeout;
        let client = &mut self.client;
        with_timeout(timeout, operation, async {
            client
                .simple_query(sql)
                .await
                .map_err(|e| QueueError::database(operation, e.to_string()))?
                .into_results()
                .await
                .map_err(|e| QueueError::database(operation, e.to_string()))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl QueueConnection for MsQueueConnection {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::SqlServer
    }

    async fn execute_scalar(&mut self, sql: &str) -> QueueResult<Option<SqlValue>> {
        let rows = self.query_rows(sql, &[]).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.iter().next().map(|(_, value)| value.clone())))
    }

    async fn execute_non_query(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<u64> {
        if params.is_empty() {
            self.run_batch("execute_non_query", sql).await?;
            return Ok(0);
        }

        let timeout = self.command_timeout;
        let client = &mut self.client;
        with_timeout(timeout, "execute_non_query", async {
            let bound: Vec<&dyn ToSql> = params.iter().map(as_sql_param).collect();
            let result = client
                .execute(sql, &bound)
                .await
                .map_err(|e| QueueError::database("execute_non_query", e.to_string()))?;
            Ok(result.total())
        })
        .await
    }

    async fn query_rows(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<Vec<DataRow>> {
        let timeout = self.command_timeout;
        let client = &mut self.client;
        with_timeout(timeout, "query_rows", async {
            let stream = if params.is_empty() {
                client.simple_query(sql).await
            } else {
                let bound: Vec<&dyn ToSql> = params.iter().map(as_sql_param).collect();
                client.query(sql, &bound).await
            }
            .map_err(|e| QueueError::database("query_rows", e.to_string()))?;

            let rows = stream
                .into_first_result()
                .await
                .map_err(|e| QueueError::database("query_rows", e.to_string()))?;

            rows.into_iter().map(decode_row).collect()
        })
        .await
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> QueueResult<()> {
        if self.in_transaction {
            return Err(QueueError::transaction("transaction already open"));
        }
        let sql = match isolation {
            IsolationLevel::ReadCommitted => {
                "SET TRANSACTION ISOLATION LEVEL READ COMMITTED; BEGIN TRANSACTION;"
            }
            IsolationLevel::Serializable => {
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE; BEGIN TRANSACTION;"
            }
        };
        self.run_batch("begin", sql).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> QueueResult<()> {
        if !self.in_transaction {
            return Err(QueueError::transaction("commit without an open transaction"));
        }
        self.in_transaction = false;
        self.run_batch(
            "commit",
            "COMMIT TRANSACTION; SET TRANSACTION ISOLATION LEVEL READ COMMITTED;",
        )
        .await
    }

    async fn rollback(&mut self) -> QueueResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.run_batch(
            "rollback",
            "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SET TRANSACTION ISOLATION LEVEL READ COMMITTED;",
        )
        .await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

const NULL_PARAM: Option<&str> = None;

fn as_sql_param(value: &SqlValue) -> &dyn ToSql {
    match value {
        SqlValue::Null => &NULL_PARAM,
        SqlValue::Int(v) => v,
        SqlValue::BigInt(v) => v,
        SqlValue::Text(v) => v,
        SqlValue::Binary(v) => v,
        SqlValue::Timestamp(v) => v,
    }
}

fn decode_row(row: Row) -> QueueResult<DataRow> {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let mut data = DataRow::new();
    for (name, cell) in names.into_iter().zip(row) {
        let value = decode_cell(&name, &cell)?;
        data.push(name, value);
    }
    Ok(data)
}

fn decode_cell(name: &str, cell: &ColumnData<'static>) -> QueueResult<SqlValue> {
    let value = match cell {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(i32::from(v))),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(i32::from(v))),
        ColumnData::I32(v) => v.map(SqlValue::Int),
        ColumnData::I64(v) => v.map(SqlValue::BigInt),
        ColumnData::Numeric(v) => match v {
            Some(numeric) if numeric.scale() == 0 => {
                let value = i64::try_from(numeric.value())
                    .map_err(|e| QueueError::mapping(name, e.to_string()))?;
                Some(SqlValue::BigInt(value))
            }
            Some(numeric) => {
                return Err(QueueError::mapping(
                    name,
                    format!("numeric with scale {} is not an integer", numeric.scale()),
                ))
            }
            None => None,
        },
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Binary(b.to_vec())),
        ColumnData::Guid(v) => v.map(|g| SqlValue::Binary(g.as_bytes().to_vec())),
        ColumnData::DateTime(_)
        | ColumnData::DateTime2(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTimeOffset(_) => NaiveDateTime::from_sql(cell)
            .map_err(|e| QueueError::mapping(name, e.to_string()))?
            .map(SqlValue::Timestamp),
        other => {
            return Err(QueueError::mapping(
                name,
                format!("unsupported column data {other:?}"),
            ))
        }
    };

    Ok(value.unwrap_or(SqlValue::Null))
}
