//! # Messaging Module
//!
//! Producer and consumer sides of a table-backed message queue, plus the
//! handler chain that processes dequeued messages and the poll loop that hosts
//! a consumer.

pub mod cancellation;
pub mod consumer;
pub mod handler;
pub mod mapper;
pub mod message;
pub mod producer;
pub mod service;

pub use cancellation::CancellationSignal;
pub use consumer::{ConsumeSummary, ConsumerConfig, MessageConsumer};
pub use handler::{
    ForwardingHandler, HandlerChain, HandlerChainBuilder, LoggingHandler, MessageHandler,
};
pub use message::Message;
pub use producer::{MessageProducer, ProducerConfig};
pub use service::ConsumerService;
