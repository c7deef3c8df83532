//! Live Postgres checks. Skipped unless `TEST_DATABASE_URL` is set.

mod common;

use common::chain_of;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tablequeue_core::database::{
    connect, DatabaseProvider, ProvisionOutcome, QueueConfigurator, QueueConnection, QueueState,
    SqlValue,
};
use tablequeue_core::messaging::{
    CancellationSignal, ConsumerConfig, Message, MessageConsumer, MessageProducer,
};
use tablequeue_core::schema::{
    LogicalColumn, QueueDirection, QueueTableSchema, SchemaVersion, ValueKind,
};
use tablequeue_core::test_helpers::{schema_for, test_database_url, RecordingHandler};
use tablequeue_core::validation::MatchPolicy;

async fn open(url: &str) -> Box<dyn QueueConnection> {
    connect(DatabaseProvider::Postgres, url, Duration::from_secs(30))
        .await
        .expect("TEST_DATABASE_URL should be reachable")
}

fn create_table_sql(schema: &QueueTableSchema, version: &SchemaVersion) -> String {
    let columns = version
        .columns
        .iter()
        .map(|column| {
            let physical = schema.physical_name(*column).unwrap_or_default();
            let sql_type = match column.kind() {
                ValueKind::Ordinal => "numeric(19,0) NOT NULL",
                ValueKind::Identifier => "bytea NOT NULL",
                ValueKind::Text => "text",
                ValueKind::Timestamp => "timestamp",
                ValueKind::Counter => "numeric(2,0)",
            };
            format!("{physical} {sql_type}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({columns});", schema.table_name())
}

/// Create a fresh outgoing v12 table and return it with an admin connection
async fn fresh_outgoing_table(url: &str) -> (QueueTableSchema, Box<dyn QueueConnection>) {
    let version = SchemaVersion::find(QueueDirection::Outgoing, 12).unwrap();
    let table = format!("_tq_it_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let schema = schema_for(&table, &version);

    let mut admin = open(url).await;
    drop_objects(&mut admin, &schema).await;
    admin
        .execute_non_query(&create_table_sql(&schema, &version), &[])
        .await
        .unwrap();
    (schema, admin)
}

async fn configure_outgoing(url: &str, schema: &QueueTableSchema) {
    let mut configurator = QueueConfigurator::new(
        open(url).await,
        schema.clone(),
        QueueDirection::Outgoing,
        MatchPolicy::Exact,
    )
    .unwrap();
    assert_eq!(
        configurator.configure_outgoing().await.unwrap(),
        ProvisionOutcome::Provisioned
    );
}

async fn batch_consumer(url: &str, schema: &QueueTableSchema, batch_size: u32) -> MessageConsumer {
    MessageConsumer::with_config(
        open(url).await,
        schema,
        QueueDirection::Outgoing,
        ConsumerConfig {
            batch_size,
            ..Default::default()
        },
    )
    .unwrap()
}

async fn drop_objects(connection: &mut Box<dyn QueueConnection>, schema: &QueueTableSchema) {
    for sql in [
        format!("DROP TABLE IF EXISTS {};", schema.table_name()),
        format!("DROP FUNCTION IF EXISTS {}();", schema.function_name()),
        format!("DROP SEQUENCE IF EXISTS {};", schema.sequence_name()),
    ] {
        let _ = connection.execute_non_query(&sql, &[]).await;
    }
}

#[tokio::test]
async fn test_outgoing_queue_lifecycle() {
    let Some(url) = test_database_url() else {
        println!("Skipping Postgres queue lifecycle test - TEST_DATABASE_URL not set");
        return;
    };

    let version = SchemaVersion::find(QueueDirection::Outgoing, 12).unwrap();
    let table = format!("_tq_it_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let schema = schema_for(&table, &version);

    let mut admin = open(&url).await;
    drop_objects(&mut admin, &schema).await;
    admin
        .execute_non_query(&create_table_sql(&schema, &version), &[])
        .await
        .unwrap();

    let mut configurator = QueueConfigurator::new(
        open(&url).await,
        schema.clone(),
        QueueDirection::Outgoing,
        MatchPolicy::Exact,
    )
    .unwrap();
    assert_eq!(configurator.probe_state().await.unwrap(), QueueState::Unprovisioned);
    assert_eq!(configurator.configure().await.unwrap(), ProvisionOutcome::Provisioned);
    assert_eq!(
        configurator.configure().await.unwrap(),
        ProvisionOutcome::AlreadyProvisioned
    );

    // A legacy writer that omits the ordinal gets one from the trigger
    let legacy_insert = format!(
        "INSERT INTO {table} ({uuid}, {kind}, {body}, {sender}) VALUES ($1, $2, $3, $4);",
        uuid = schema.physical_name(LogicalColumn::Uuid).unwrap(),
        kind = schema.physical_name(LogicalColumn::MessageType).unwrap(),
        body = schema.physical_name(LogicalColumn::MessageBody).unwrap(),
        sender = schema.physical_name(LogicalColumn::Sender).unwrap(),
    );
    admin
        .execute_non_query(
            &legacy_insert,
            &[
                SqlValue::Binary(uuid::Uuid::new_v4().as_bytes().to_vec()),
                "Legacy".into(),
                "{}".into(),
                "1C".into(),
            ],
        )
        .await
        .unwrap();

    let mut producer =
        MessageProducer::new(open(&url).await, &schema, QueueDirection::Outgoing).unwrap();
    producer.tx_begin().await.unwrap();
    producer
        .insert(&Message::new("Order", "{\"id\":1}").with_sender("A"))
        .await
        .unwrap();
    producer
        .insert(&Message::new("Order", "{\"id\":2}").with_sender("A"))
        .await
        .unwrap();
    producer.tx_commit().await.unwrap();

    let recorder = Arc::new(RecordingHandler::new("recorder"));
    let mut consumer =
        MessageConsumer::new(open(&url).await, &schema, QueueDirection::Outgoing).unwrap();
    let summary = consumer
        .consume(&chain_of(recorder.clone()), &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(summary.messages, 3);
    assert_eq!(recorder.message_types(), vec!["Legacy", "Order", "Order"]);
    let numbers = recorder.message_numbers();
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(recorder.messages()[1].message_body, "{\"id\":1}");

    drop_objects(&mut admin, &schema).await;
}

#[tokio::test]
async fn test_two_consumers_drain_one_table_without_overlap() {
    let Some(url) = test_database_url() else {
        println!("Skipping Postgres concurrent consumer test - TEST_DATABASE_URL not set");
        return;
    };

    let (schema, mut admin) = fresh_outgoing_table(&url).await;
    configure_outgoing(&url, &schema).await;

    let mut producer =
        MessageProducer::new(open(&url).await, &schema, QueueDirection::Outgoing).unwrap();
    producer.tx_begin().await.unwrap();
    for i in 0..100 {
        producer
            .insert(&Message::new("Order", format!("{{\"n\":{i}}}")))
            .await
            .unwrap();
    }
    producer.tx_commit().await.unwrap();

    let left = Arc::new(RecordingHandler::new("left"));
    let right = Arc::new(RecordingHandler::new("right"));
    let mut left_consumer = batch_consumer(&url, &schema, 7).await;
    let mut right_consumer = batch_consumer(&url, &schema, 7).await;
    let (left_chain, right_chain) = (chain_of(left.clone()), chain_of(right.clone()));
    let cancel = CancellationSignal::new();

    let (left_summary, right_summary) = tokio::join!(
        left_consumer.consume(&left_chain, &cancel),
        right_consumer.consume(&right_chain, &cancel),
    );
    let total = left_summary.unwrap().messages + right_summary.unwrap().messages;
    assert_eq!(total, 100);

    let left_numbers: BTreeSet<i64> = left.message_numbers().into_iter().collect();
    let right_numbers: BTreeSet<i64> = right.message_numbers().into_iter().collect();
    assert!(left_numbers.is_disjoint(&right_numbers));
    let all: BTreeSet<i64> = left_numbers.union(&right_numbers).copied().collect();
    assert_eq!(all, (1..=100).collect::<BTreeSet<i64>>());

    let remaining = admin
        .execute_scalar(&format!("SELECT COUNT(*) FROM {};", schema.table_name()))
        .await
        .unwrap();
    assert_eq!(remaining, Some(SqlValue::BigInt(0)));

    drop_objects(&mut admin, &schema).await;
}

#[tokio::test]
async fn test_rejected_batch_is_redelivered_identically() {
    let Some(url) = test_database_url() else {
        println!("Skipping Postgres redelivery test - TEST_DATABASE_URL not set");
        return;
    };

    let (schema, mut admin) = fresh_outgoing_table(&url).await;
    configure_outgoing(&url, &schema).await;

    let mut producer =
        MessageProducer::new(open(&url).await, &schema, QueueDirection::Outgoing).unwrap();
    producer
        .insert(&Message::new("Order", "{\"id\":1}").with_sender("ERP"))
        .await
        .unwrap();
    producer
        .insert(&Message::new("Order", "{\"id\":2}").with_recipients("WMS"))
        .await
        .unwrap();

    let recorder = Arc::new(RecordingHandler::new("recorder"));
    recorder.reject_next_confirms(1);
    let chain = chain_of(recorder.clone());

    let rejected = batch_consumer(&url, &schema, 10)
        .await
        .consume(&chain, &CancellationSignal::new())
        .await
        .unwrap();
    assert_eq!(rejected.rejected_batches, 1);
    assert_eq!(rejected.messages, 0);

    let accepted = batch_consumer(&url, &schema, 10)
        .await
        .consume(&chain, &CancellationSignal::new())
        .await
        .unwrap();
    assert_eq!(accepted.messages, 2);

    let deliveries = recorder.messages();
    assert_eq!(deliveries.len(), 4);
    assert_eq!(deliveries[..2], deliveries[2..]);
    assert_eq!(deliveries[0].sender, "ERP");
    assert_eq!(deliveries[1].recipients, "WMS");

    drop_objects(&mut admin, &schema).await;
}

#[tokio::test]
async fn test_configure_outgoing_renumbers_existing_rows() {
    let Some(url) = test_database_url() else {
        println!("Skipping Postgres renumbering test - TEST_DATABASE_URL not set");
        return;
    };

    let (schema, mut admin) = fresh_outgoing_table(&url).await;
    let raw_insert = format!(
        "INSERT INTO {table} ({number}, {uuid}, {kind}, {body}) VALUES ($1, $2, $3, $4);",
        table = schema.table_name(),
        number = schema.physical_name(LogicalColumn::MessageNumber).unwrap(),
        uuid = schema.physical_name(LogicalColumn::Uuid).unwrap(),
        kind = schema.physical_name(LogicalColumn::MessageType).unwrap(),
        body = schema.physical_name(LogicalColumn::MessageBody).unwrap(),
    );
    for (ordinal, kind) in [(500, "Late"), (7, "Early"), (90, "Middle")] {
        admin
            .execute_non_query(
                &raw_insert,
                &[
                    SqlValue::BigInt(ordinal),
                    SqlValue::Binary(uuid::Uuid::new_v4().as_bytes().to_vec()),
                    kind.into(),
                    "{}".into(),
                ],
            )
            .await
            .unwrap();
    }

    configure_outgoing(&url, &schema).await;

    let mut producer =
        MessageProducer::new(open(&url).await, &schema, QueueDirection::Outgoing).unwrap();
    producer.insert(&Message::new("After", "{}")).await.unwrap();

    let recorder = Arc::new(RecordingHandler::new("recorder"));
    batch_consumer(&url, &schema, 10)
        .await
        .consume(&chain_of(recorder.clone()), &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(recorder.message_numbers(), vec![1, 2, 3, 4]);
    assert_eq!(
        recorder.message_types(),
        vec!["Early", "Middle", "Late", "After"]
    );

    drop_objects(&mut admin, &schema).await;
}
