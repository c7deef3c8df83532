//! # Handler Chain
//!
//! Ordered message processors invoked for every dequeued row. The chain is built
//! once and never mutated; `confirm` is the single signal the consumer uses to
//! commit or roll back the whole batch.
//!
//! Confirmation runs in two phases. Every handler first votes through
//! [`MessageHandler::confirm`], which must not have side effects. Only when all
//! of them agree does the chain call [`MessageHandler::commit`] on each, so a
//! handler late in the chain can still veto work buffered by an earlier one.
//!
//! ## Key Features
//!
//! - **Immutable composition**: [`HandlerChain::builder`] produces a fixed list of handlers
//! - **Veto**: any handler returning `false` from `confirm` rolls the batch back,
//!   so the same rows are redelivered on the next poll (at-least-once)
//! - **Abort hook**: handlers buffering side effects undo them in `abort` when a
//!   batch is rolled back
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let chain = HandlerChain::builder()
//!     .with(LoggingHandler::new("audit"))
//!     .with(ForwardingHandler::new("bridge", producer))
//!     .build();
//!
//! consumer.consume(&chain, &cancel).await?;
//! ```

use super::{Message, MessageProducer};
use crate::error::QueueResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A single message processor in a [`HandlerChain`]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Process one message in delivery order
    async fn handle(&self, message: &Message) -> QueueResult<()>;

    /// Whether the current batch may be committed
    async fn confirm(&self) -> bool {
        true
    }

    /// Every handler confirmed; make buffered side effects durable.
    /// Returning `false` still rolls the source batch back.
    async fn commit(&self) -> bool {
        true
    }

    /// The current batch is being rolled back
    async fn abort(&self) {}
}

/// Immutable ordered list of handlers
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerChain {
    pub fn builder() -> HandlerChainBuilder {
        HandlerChainBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Pass a message to every handler in order, stopping at the first error
    pub async fn handle(&self, message: &Message) -> QueueResult<()> {
        for handler in &self.handlers {
            handler.handle(message).await?;
        }
        Ok(())
    }

    /// Conjunction of every handler's confirmation, short-circuiting on the first veto,
    /// followed by the commit phase once all handlers agreed. An empty chain confirms.
    pub async fn confirm(&self) -> bool {
        for handler in &self.handlers {
            if !handler.confirm().await {
                debug!(handler = %handler.name(), "Handler vetoed batch commit");
                return false;
            }
        }
        for handler in &self.handlers {
            if !handler.commit().await {
                warn!(handler = %handler.name(), "Handler failed to commit its side effects");
                return false;
            }
        }
        true
    }

    pub async fn abort(&self) {
        for handler in &self.handlers {
            handler.abort().await;
        }
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerChainBuilder {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerChainBuilder {
    pub fn with<H: MessageHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Add a handler the caller keeps a reference to
    pub fn with_shared(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> HandlerChain {
        HandlerChain {
            handlers: self.handlers,
        }
    }
}

/// Writes a structured tracing event per message
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    name: String,
}

impl LoggingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &Message) -> QueueResult<()> {
        info!(
            handler = %self.name,
            message_number = message.message_number,
            uuid = %message.uuid,
            sender = %message.sender,
            message_type = %message.message_type,
            body_len = message.message_body.len(),
            "📨 Message received"
        );
        Ok(())
    }
}

/// Forwards every message into another queue table.
///
/// Inserts run inside a producer transaction opened at the first message of a
/// batch. The transaction is committed only in the commit phase, after every
/// handler in the chain confirmed, and `abort` rolls it back. A failed commit
/// vetoes the source batch, so both queues stay consistent up to redelivery.
pub struct ForwardingHandler {
    name: String,
    producer: Mutex<MessageProducer>,
}

impl ForwardingHandler {
    pub fn new(name: impl Into<String>, producer: MessageProducer) -> Self {
        Self {
            name: name.into(),
            producer: Mutex::new(producer),
        }
    }
}

#[async_trait]
impl MessageHandler for ForwardingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &Message) -> QueueResult<()> {
        let mut producer = self.producer.lock().await;
        if !producer.in_transaction() {
            producer.tx_begin().await?;
        }
        // The target queue assigns its own ordinal and id
        let forwarded = Message {
            message_number: 0,
            uuid: uuid::Uuid::nil(),
            ..message.clone()
        };
        producer.insert(&forwarded).await
    }

    async fn commit(&self) -> bool {
        let mut producer = self.producer.lock().await;
        if !producer.in_transaction() {
            return true;
        }
        match producer.tx_commit().await {
            Ok(()) => true,
            Err(e) => {
                warn!(handler = %self.name, error = %e, "Forwarding commit failed");
                false
            }
        }
    }

    async fn abort(&self) {
        let mut producer = self.producer.lock().await;
        if !producer.in_transaction() {
            return;
        }
        if let Err(e) = producer.tx_rollback().await {
            warn!(handler = %self.name, error = %e, "Forwarding rollback failed");
        }
    }
}
