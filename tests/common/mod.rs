//! Shared setup for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tablequeue_core::database::DatabaseProvider;
use tablequeue_core::messaging::{
    ConsumerConfig, HandlerChain, MessageConsumer, MessageHandler, MessageProducer,
};
use tablequeue_core::schema::{QueueDirection, QueueTableSchema};
use tablequeue_core::test_helpers::MemoryDatabase;

pub const PROVIDERS: [DatabaseProvider; 2] = [DatabaseProvider::Postgres, DatabaseProvider::SqlServer];

/// A database whose ordering objects already exist
pub fn provisioned(provider: DatabaseProvider, schema: QueueTableSchema) -> MemoryDatabase {
    let db = MemoryDatabase::new(provider, schema);
    db.provision();
    db
}

pub fn consumer(db: &MemoryDatabase, direction: QueueDirection, batch_size: u32) -> MessageConsumer {
    MessageConsumer::with_config(
        Box::new(db.connect()),
        db.schema(),
        direction,
        ConsumerConfig {
            batch_size,
            ..Default::default()
        },
    )
    .expect("consumer should accept fixture schema")
}

pub fn producer(db: &MemoryDatabase, direction: QueueDirection) -> MessageProducer {
    MessageProducer::new(Box::new(db.connect()), db.schema(), direction)
        .expect("producer should accept fixture schema")
}

pub fn chain_of(handler: Arc<dyn MessageHandler>) -> HandlerChain {
    HandlerChain::builder().with_shared(handler).build()
}
