//! # Message Consumer
//!
//! Drains a queue table in delivery order with at-least-once semantics.
//!
//! ## Batch protocol
//!
//! 1. Open a transaction.
//! 2. Run the dequeue statement: select the oldest N rows by (ordinal, uuid) with
//!    lock-skip semantics and delete them in the same statement, returning their
//!    values. A row can never be handed to two consumers.
//! 3. Map every row to a [`Message`](super::Message) and pass it through the [`HandlerChain`].
//! 4. If the batch was non-empty ask the chain to confirm: commit on `true`,
//!    roll back (restoring the rows) on `false`.
//!
//! Batches repeat until one comes back empty, is rejected, or cancellation is
//! requested. Cancellation is only observed between batches. Any error rolls the
//! current batch back and propagates to the caller.
//!
//! Several consumers may drain the same table concurrently; they split the work
//! between them, with FIFO order guaranteed only per consumer.

use super::cancellation::CancellationSignal;
use super::handler::HandlerChain;
use super::mapper::message_from_row;
use crate::constants::defaults;
use crate::database::{IsolationLevel, QueueConnection, SqlValue};
use crate::error::QueueResult;
use crate::query_builder::builder_for;
use crate::schema::{QueueDirection, QueueTableSchema, SchemaVersion};
use crate::validation::{detect_version, MatchPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for consumers and the consumer poll loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Rows dequeued per transaction
    pub batch_size: u32,
    /// Years subtracted from timestamps on read
    pub year_offset: i32,
    pub match_policy: MatchPolicy,
    /// Sleep after an empty pass
    pub poll_interval_ms: u64,
    /// Sleep after a failed pass
    pub retry_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            year_offset: defaults::YEAR_OFFSET,
            match_policy: MatchPolicy::default(),
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
        }
    }
}

/// Totals for one or more `consume` calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeSummary {
    /// Messages in committed batches
    pub messages: u64,
    /// Committed non-empty batches
    pub batches: u64,
    /// Batches rolled back because the chain vetoed the commit
    pub rejected_batches: u64,
}

impl ConsumeSummary {
    pub fn merge(&mut self, other: ConsumeSummary) {
        self.messages += other.messages;
        self.batches += other.batches;
        self.rejected_batches += other.rejected_batches;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    Empty,
    Committed(usize),
    Rejected(usize),
}

pub struct MessageConsumer {
    connection: Box<dyn QueueConnection>,
    table_name: String,
    version: SchemaVersion,
    dequeue_script: String,
    config: ConsumerConfig,
    last_committed: Option<i64>,
}

impl MessageConsumer {
    pub fn new(
        connection: Box<dyn QueueConnection>,
        schema: &QueueTableSchema,
        direction: QueueDirection,
    ) -> QueueResult<Self> {
        Self::with_config(connection, schema, direction, ConsumerConfig::default())
    }

    /// Refused with [`crate::QueueError::InterfaceVersion`] when the table matches no schema version
    pub fn with_config(
        connection: Box<dyn QueueConnection>,
        schema: &QueueTableSchema,
        direction: QueueDirection,
        config: ConsumerConfig,
    ) -> QueueResult<Self> {
        let version = detect_version(schema, direction, config.match_policy)?;
        let scripts = builder_for(connection.provider()).build(schema, &version)?;

        info!(
            table = %schema.table_name(),
            version = %version,
            provider = %connection.provider(),
            batch_size = config.batch_size,
            "📥 Message consumer ready"
        );

        Ok(Self {
            connection,
            table_name: schema.table_name().to_string(),
            version,
            dequeue_script: scripts.dequeue,
            config,
            last_committed: None,
        })
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Highest ordinal this instance has committed so far
    pub fn last_committed_number(&self) -> Option<i64> {
        self.last_committed
    }

    /// Consume batches until the queue is empty, a batch is rejected or cancellation is requested
    pub async fn consume(
        &mut self,
        chain: &HandlerChain,
        cancel: &CancellationSignal,
    ) -> QueueResult<ConsumeSummary> {
        let mut summary = ConsumeSummary::default();

        loop {
            let consumed = match self.consume_batch(chain).await? {
                BatchOutcome::Empty => 0,
                BatchOutcome::Committed(count) => {
                    summary.messages += count as u64;
                    summary.batches += 1;
                    count
                }
                BatchOutcome::Rejected(_) => {
                    summary.rejected_batches += 1;
                    0
                }
            };

            if consumed == 0 || cancel.is_cancelled() {
                break;
            }
        }

        Ok(summary)
    }

    #[instrument(skip(self, chain), fields(table = %self.table_name))]
    async fn consume_batch(&mut self, chain: &HandlerChain) -> QueueResult<BatchOutcome> {
        self.connection.begin(IsolationLevel::ReadCommitted).await?;

        let numbers = match self.deliver(chain).await {
            Ok(numbers) => numbers,
            Err(e) => {
                error!(error = %e, "Batch failed, rolling back");
                self.abort(chain).await;
                return Err(e);
            }
        };

        if numbers.is_empty() {
            self.connection.commit().await?;
            return Ok(BatchOutcome::Empty);
        }

        if !chain.confirm().await {
            warn!(
                count = numbers.len(),
                "Handler chain rejected batch, rows will be redelivered"
            );
            self.abort(chain).await;
            return Ok(BatchOutcome::Rejected(numbers.len()));
        }

        self.connection.commit().await?;
        self.record_committed(&numbers);

        debug!(count = numbers.len(), "Committed batch");
        Ok(BatchOutcome::Committed(numbers.len()))
    }

    /// Dequeue one batch and run it through the chain, returning delivered ordinals
    async fn deliver(&mut self, chain: &HandlerChain) -> QueueResult<Vec<i64>> {
        let batch_size = SqlValue::BigInt(i64::from(self.config.batch_size));
        let rows = self
            .connection
            .query_rows(&self.dequeue_script, &[batch_size])
            .await?;

        let mut numbers = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = message_from_row(row, &self.version, self.config.year_offset)?;
            chain.handle(&message).await?;
            numbers.push(message.message_number);
        }
        Ok(numbers)
    }

    async fn abort(&mut self, chain: &HandlerChain) {
        if let Err(e) = self.connection.rollback().await {
            warn!(error = %e, "Rollback failed");
        }
        chain.abort().await;
    }

    fn record_committed(&mut self, numbers: &[i64]) {
        if let (Some(previous), Some(first)) = (self.last_committed, numbers.first()) {
            if *first < previous {
                warn!(
                    previous = previous,
                    first = *first,
                    "Ordinal went backwards between batches"
                );
            }
        }
        if let Some(last) = numbers.iter().max() {
            self.last_committed = Some(self.last_committed.map_or(*last, |p| p.max(*last)));
        }
    }
}
