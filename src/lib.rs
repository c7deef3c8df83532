#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TableQueue Core
//!
//! Durable, ordered message queues on top of ordinary relational tables, for
//! bridging with legacy platforms that can only read and write plain tables.
//!
//! ## Overview
//!
//! A queue is a table with an ordinal column and a unique id column. This crate
//! provisions the database-native ordering primitives for such a table (a sequence,
//! plus an insert trigger for tables the legacy side writes to), enqueues rows with
//! database-assigned ordinals, and drains rows in FIFO order with at-least-once
//! delivery. Postgres is supported out of the box; SQL Server behind the `mssql`
//! feature.
//!
//! ## Key Features
//!
//! - **Schema detection**: tables are matched against declarative schema versions
//! - **Idempotent provisioning**: all-or-nothing, serializable, safe to repeat
//! - **Lock-skip dequeue**: select and delete in one statement, so concurrent
//!   consumers never see the same row
//! - **Veto-able batches**: a handler chain decides whether each batch commits
//!
//! ## Module Organization
//!
//! - [`schema`] - Logical columns, queue tables, schema versions and catalog
//! - [`validation`] - Schema version detection and structural checks
//! - [`query_builder`] - Per-provider SQL rendering
//! - [`database`] - Connections and the queue configurator
//! - [`messaging`] - Messages, producer, consumer, handler chain and poll loop
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tablequeue_core::config::ConfigManager;
//! use tablequeue_core::database::QueueConfigurator;
//! use tablequeue_core::messaging::{
//!     CancellationSignal, ConsumerService, HandlerChain, LoggingHandler, MessageConsumer,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tablequeue_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! let queue = config.queue("orders_out").ok_or("unknown queue")?;
//!
//! let mut configurator = QueueConfigurator::new(
//!     config.database.connect().await?,
//!     queue.schema(),
//!     queue.direction,
//!     config.consumer.match_policy,
//! )?;
//! configurator.configure().await.map_err(|issues| format!("{issues:?}"))?;
//!
//! let consumer = MessageConsumer::with_config(
//!     config.database.connect().await?,
//!     &queue.schema(),
//!     queue.direction,
//!     config.consumer.clone(),
//! )?;
//! let chain = HandlerChain::builder().with(LoggingHandler::new("audit")).build();
//! let cancel = CancellationSignal::new();
//! let summary = ConsumerService::new(consumer, chain).spawn(cancel.clone()).await?;
//! println!("consumed {} messages", summary.messages);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod query_builder;
pub mod schema;
pub mod test_helpers;
pub mod validation;

pub use config::{ConfigManager, QueueConfig};
pub use database::{DatabaseProvider, QueueConfigurator, QueueConnection};
pub use error::{ConfigurationIssue, QueueError, QueueResult};
pub use messaging::{
    CancellationSignal, ConsumeSummary, ConsumerService, HandlerChain, Message, MessageConsumer,
    MessageHandler, MessageProducer,
};
pub use schema::{QueueDirection, QueueTableSchema, SchemaVersion};
pub use validation::MatchPolicy;
