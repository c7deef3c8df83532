//! # Message Producer
//!
//! Enqueues one row per [`MessageProducer::insert`] call. The insert statement is
//! rendered once at construction; the ordinal is always sourced from the database
//! sequence inline (or the outgoing insert trigger), never computed here.
//!
//! Outside an explicit [`MessageProducer::tx_begin`]/[`MessageProducer::tx_commit`]
//! pair each insert auto-commits.

use super::mapper::insert_parameters;
use super::Message;
use crate::constants::defaults;
use crate::database::{IsolationLevel, QueueConnection};
use crate::error::{QueueError, QueueResult};
use crate::query_builder::builder_for;
use crate::schema::{QueueDirection, QueueTableSchema, SchemaVersion};
use crate::validation::{detect_version, MatchPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Years added to timestamps on insert
    pub year_offset: i32,
    pub match_policy: MatchPolicy,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            year_offset: defaults::YEAR_OFFSET,
            match_policy: MatchPolicy::default(),
        }
    }
}

pub struct MessageProducer {
    connection: Box<dyn QueueConnection>,
    table_name: String,
    version: SchemaVersion,
    insert_script: String,
    config: ProducerConfig,
}

impl MessageProducer {
    pub fn new(
        connection: Box<dyn QueueConnection>,
        schema: &QueueTableSchema,
        direction: QueueDirection,
    ) -> QueueResult<Self> {
        Self::with_config(connection, schema, direction, ProducerConfig::default())
    }

    /// Refused with [`QueueError::InterfaceVersion`] when the table matches no schema version
    pub fn with_config(
        connection: Box<dyn QueueConnection>,
        schema: &QueueTableSchema,
        direction: QueueDirection,
        config: ProducerConfig,
    ) -> QueueResult<Self> {
        let version = detect_version(schema, direction, config.match_policy)?;
        let scripts = builder_for(connection.provider()).build(schema, &version)?;

        info!(
            table = %schema.table_name(),
            version = %version,
            provider = %connection.provider(),
            "📤 Message producer ready"
        );

        Ok(Self {
            connection,
            table_name: schema.table_name().to_string(),
            version,
            insert_script: scripts.insert,
            config,
        })
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn in_transaction(&self) -> bool {
        self.connection.in_transaction()
    }

    /// Enqueue one message
    #[instrument(skip(self, message), fields(table = %self.table_name, message_type = %message.message_type))]
    pub async fn insert(&mut self, message: &Message) -> QueueResult<()> {
        let params = insert_parameters(message, &self.version, self.config.year_offset)?;

        let affected = self
            .connection
            .execute_non_query(&self.insert_script, &params)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to enqueue message");
                e
            })?;

        debug!(affected = affected, "Enqueued message");
        Ok(())
    }

    /// Start batching inserts in one transaction
    pub async fn tx_begin(&mut self) -> QueueResult<()> {
        self.connection.begin(IsolationLevel::ReadCommitted).await
    }

    pub async fn tx_commit(&mut self) -> QueueResult<()> {
        if !self.connection.in_transaction() {
            return Err(QueueError::transaction("tx_commit called without tx_begin"));
        }
        self.connection.commit().await
    }

    pub async fn tx_rollback(&mut self) -> QueueResult<()> {
        self.connection.rollback().await
    }
}
