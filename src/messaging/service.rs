//! # Consumer Service
//!
//! Poll-sleep host loop around a [`MessageConsumer`]. Each pass drains the queue
//! until empty; the service then sleeps for the poll interval. Failed passes are
//! logged and retried after the retry delay. Cancellation interrupts the sleep but
//! never an in-flight batch.

use super::cancellation::CancellationSignal;
use super::consumer::{ConsumeSummary, MessageConsumer};
use super::handler::HandlerChain;
use crate::logging::log_error;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ConsumerService {
    consumer: MessageConsumer,
    chain: HandlerChain,
    poll_interval: Duration,
    retry_delay: Duration,
}

impl ConsumerService {
    pub fn new(consumer: MessageConsumer, chain: HandlerChain) -> Self {
        let poll_interval = Duration::from_millis(consumer.config().poll_interval_ms);
        let retry_delay = Duration::from_millis(consumer.config().retry_delay_ms);
        Self {
            consumer,
            chain,
            poll_interval,
            retry_delay,
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, retry_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.retry_delay = retry_delay;
        self
    }

    /// Run until cancelled, returning the accumulated totals
    pub async fn run(mut self, cancel: CancellationSignal) -> ConsumeSummary {
        let mut total = ConsumeSummary::default();
        info!(
            handlers = self.chain.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "🚀 Consumer service started"
        );

        while !cancel.is_cancelled() {
            let delay = match self.consumer.consume(&self.chain, &cancel).await {
                Ok(summary) => {
                    if summary.messages > 0 {
                        debug!(
                            messages = summary.messages,
                            batches = summary.batches,
                            "Consume pass finished"
                        );
                    }
                    total.merge(summary);
                    self.poll_interval
                }
                Err(e) => {
                    let context = format!(
                        "transient={} retry_in_ms={}",
                        e.is_transient(),
                        self.retry_delay.as_millis()
                    );
                    log_error("consumer_service", "consume", &e.to_string(), Some(&context));
                    self.retry_delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            messages = total.messages,
            batches = total.batches,
            rejected_batches = total.rejected_batches,
            "🛑 Consumer service stopped"
        );
        total
    }

    /// Run on a dedicated tokio task
    pub fn spawn(self, cancel: CancellationSignal) -> JoinHandle<ConsumeSummary> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseProvider;
    use crate::messaging::ConsumerConfig;
    use crate::schema::QueueDirection;
    use crate::test_helpers::{outgoing_v12_schema, MemoryDatabase, RecordingHandler, StatementKind};
    use std::sync::Arc;

    fn service(db: &MemoryDatabase, recorder: Arc<RecordingHandler>) -> ConsumerService {
        let consumer = MessageConsumer::with_config(
            Box::new(db.connect()),
            db.schema(),
            QueueDirection::Outgoing,
            ConsumerConfig {
                batch_size: 5,
                ..Default::default()
            },
        )
        .unwrap();
        let chain = HandlerChain::builder().with_shared(recorder).build();
        ConsumerService::new(consumer, chain)
            .with_intervals(Duration::from_millis(5), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_service_picks_up_rows_arriving_later() {
        let db = MemoryDatabase::new(DatabaseProvider::Postgres, outgoing_v12_schema());
        db.provision();
        db.seed_rows(7);

        let recorder = Arc::new(RecordingHandler::new("recorder"));
        let cancel = CancellationSignal::new();
        let handle = service(&db, recorder.clone()).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        db.seed_rows(3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let total = handle.await.unwrap();
        assert_eq!(total.messages, 10);
        assert_eq!(recorder.message_numbers(), (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_service_retries_after_failure() {
        let db = MemoryDatabase::new(DatabaseProvider::Postgres, outgoing_v12_schema());
        db.provision();
        db.seed_rows(2);
        db.fail_on(StatementKind::Dequeue);

        let recorder = Arc::new(RecordingHandler::new("recorder"));
        let cancel = CancellationSignal::new();
        let handle = service(&db, recorder.clone()).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        db.clear_failures();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let total = handle.await.unwrap();
        assert_eq!(total.messages, 2);
        assert!(db.snapshot().rows.is_empty());
    }
}
