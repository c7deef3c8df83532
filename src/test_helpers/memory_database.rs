//! # In-Memory Queue Database
//!
//! A [`QueueConnection`] double that understands exactly the statements rendered by
//! the script builders for one queue table. Statements are recognized by their
//! rendered text, so any drift between a builder and this model fails loudly.
//!
//! Modeled behavior:
//!
//! - sequence, trigger function and trigger objects with existence probes
//! - inserts that draw the ordinal from the sequence (sequence values are never
//!   returned on rollback)
//! - lock-skip dequeue: rows deleted by another open transaction are invisible,
//!   as are rows inserted by another open transaction
//! - transactional DDL: a rolled-back provisioning transaction restores objects
//!   and rows
//! - failure injection per [`StatementKind`]

use crate::database::{DataRow, DatabaseProvider, IsolationLevel, QueueConnection, SqlValue};
use crate::error::{QueueError, QueueResult};
use crate::query_builder::builder_for;
use crate::schema::{LogicalColumn, QueueTableSchema, SchemaVersion, ValueKind, SCHEMA_VERSIONS};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Statement classes recognized by [`MemoryDatabase`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Dequeue,
    SequenceExists,
    TriggerExists,
    CreateSequence,
    LockTable,
    Renumber,
    DropRenumberTable,
    CreateFunction,
    DropTrigger,
    CreateTrigger,
    EnableTrigger,
}

impl StatementKind {
    fn is_ddl(self) -> bool {
        !matches!(
            self,
            StatementKind::Insert
                | StatementKind::Dequeue
                | StatementKind::SequenceExists
                | StatementKind::TriggerExists
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One queue row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub message_number: i64,
    pub uuid: Uuid,
    pub values: BTreeMap<LogicalColumn, SqlValue>,
}

impl MemoryRow {
    pub fn value(&self, column: LogicalColumn) -> Option<&SqlValue> {
        self.values.get(&column)
    }

    pub fn text(&self, column: LogicalColumn) -> Option<&str> {
        match self.values.get(&column) {
            Some(SqlValue::Text(value)) => Some(value),
            _ => None,
        }
    }
}

/// Committed state of the table and its ordering objects
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    /// Last value handed out by the sequence, `None` when it does not exist
    pub sequence: Option<i64>,
    pub function: bool,
    pub trigger: bool,
    /// Committed rows ordered by (ordinal, uuid)
    pub rows: Vec<MemoryRow>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    row: MemoryRow,
    inserted_by: Option<u64>,
    deleted_by: Option<u64>,
}

impl StoredRow {
    fn sort_key(&self) -> (i64, [u8; 16]) {
        (self.row.message_number, *self.row.uuid.as_bytes())
    }
}

#[derive(Debug, Clone, Default)]
struct Objects {
    sequence: Option<i64>,
    function: bool,
    trigger: bool,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: Objects,
    failures: HashSet<StatementKind>,
    executed: Vec<StatementKind>,
    next_connection: u64,
}

#[derive(Debug, Clone, Copy)]
struct Classified {
    kind: StatementKind,
    version: Option<SchemaVersion>,
}

/// Shared in-memory database for one queue table
#[derive(Clone)]
pub struct MemoryDatabase {
    provider: DatabaseProvider,
    schema: QueueTableSchema,
    statements: Arc<HashMap<String, Classified>>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new(provider: DatabaseProvider, schema: QueueTableSchema) -> Self {
        let statements = Arc::new(classify_statements(provider, &schema));
        Self {
            provider,
            schema,
            statements,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub fn provider(&self) -> DatabaseProvider {
        self.provider
    }

    pub fn schema(&self) -> &QueueTableSchema {
        &self.schema
    }

    /// Open a new connection with its own transaction state
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut state = self.state.lock();
            state.next_connection += 1;
            state.next_connection
        };
        MemoryConnection {
            id,
            database: self.clone(),
            transaction: None,
        }
    }

    /// Create the sequence, function and trigger without running any statement
    pub fn provision(&self) {
        let mut state = self.state.lock();
        let objects = &mut state.objects;
        objects.sequence.get_or_insert(0);
        objects.function = true;
        objects.trigger = true;
    }

    /// Commit `count` rows of type `seed`.
    ///
    /// With a sequence the rows take the next ordinals. Without one they get
    /// sparse application-assigned ordinals, as a table written before
    /// provisioning would have.
    pub fn seed_rows(&self, count: usize) {
        let mut state = self.state.lock();
        let objects = &mut state.objects;
        let start = objects.rows.len();

        for i in start..start + count {
            let message_number = match objects.sequence.as_mut() {
                Some(last) => {
                    *last += 1;
                    *last
                }
                None => (i as i64 + 1) * 10,
            };
            let values = self
                .schema
                .logical_columns()
                .into_iter()
                .filter_map(|column| seed_value(column, i).map(|value| (column, value)))
                .collect();
            objects.rows.push(StoredRow {
                row: MemoryRow {
                    message_number,
                    uuid: Uuid::new_v4(),
                    values,
                },
                inserted_by: None,
                deleted_by: None,
            });
        }
    }

    /// Fail every later statement of this kind with a transient database error
    pub fn fail_on(&self, kind: StatementKind) {
        self.state.lock().failures.insert(kind);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Statement kinds executed so far, in order
    pub fn executed(&self) -> Vec<StatementKind> {
        self.state.lock().executed.clone()
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let state = self.state.lock();
        let mut rows: Vec<&StoredRow> = state
            .objects
            .rows
            .iter()
            .filter(|stored| stored.inserted_by.is_none())
            .collect();
        rows.sort_by_key(|stored| stored.sort_key());

        MemorySnapshot {
            sequence: state.objects.sequence,
            function: state.objects.function,
            trigger: state.objects.trigger,
            rows: rows.into_iter().map(|stored| stored.row.clone()).collect(),
        }
    }

    fn classify(&self, sql: &str) -> QueueResult<Classified> {
        self.statements
            .get(sql)
            .copied()
            .ok_or_else(|| QueueError::database("execute", format!("unrecognized statement: {sql}")))
    }
}

/// Every statement the builders render for this table, across matching versions
fn classify_statements(
    provider: DatabaseProvider,
    schema: &QueueTableSchema,
) -> HashMap<String, Classified> {
    use StatementKind::*;

    let (sequence_kinds, trigger_kinds) = match provider {
        DatabaseProvider::Postgres => (
            [CreateSequence, LockTable, Renumber],
            [CreateFunction, DropTrigger, CreateTrigger],
        ),
        DatabaseProvider::SqlServer => (
            [CreateSequence, Renumber, DropRenumberTable],
            [DropTrigger, CreateTrigger, EnableTrigger],
        ),
    };

    let available = schema.logical_columns();
    let builder = builder_for(provider);
    let mut statements = HashMap::new();

    for version in SCHEMA_VERSIONS
        .iter()
        .filter(|version| version.column_set().is_subset(&available))
    {
        let Ok(scripts) = builder.build(schema, version) else {
            continue;
        };
        let mut add = |sql: String, kind: StatementKind, version: Option<SchemaVersion>| {
            statements.insert(sql, Classified { kind, version });
        };

        add(scripts.insert, Insert, Some(*version));
        add(scripts.dequeue, Dequeue, Some(*version));
        add(scripts.sequence_exists, SequenceExists, None);
        add(scripts.trigger_exists, TriggerExists, None);
        for (sql, kind) in scripts.sequence_ddl.into_iter().zip(sequence_kinds) {
            add(sql, kind, None);
        }
        for (sql, kind) in scripts.trigger_ddl.into_iter().zip(trigger_kinds) {
            add(sql, kind, None);
        }
    }

    statements
}

fn seed_value(column: LogicalColumn, index: usize) -> Option<SqlValue> {
    let value = match column {
        LogicalColumn::MessageNumber | LogicalColumn::Uuid => return None,
        LogicalColumn::MessageType => SqlValue::Text("seed".to_string()),
        LogicalColumn::MessageBody => SqlValue::Text(format!("{{\"seq\":{index}}}")),
        LogicalColumn::Sender => SqlValue::Text("seeder".to_string()),
        _ => match column.kind() {
            ValueKind::Text => SqlValue::Text(String::new()),
            ValueKind::Counter => SqlValue::Int(0),
            ValueKind::Timestamp => SqlValue::Timestamp(seed_timestamp()),
            ValueKind::Ordinal | ValueKind::Identifier => return None,
        },
    };
    Some(value)
}

fn seed_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[derive(Debug)]
struct OpenTransaction {
    /// Objects as committed before the first DDL statement of this transaction
    ddl_backup: Option<Objects>,
}

/// A connection to a [`MemoryDatabase`]. Dropping it inside a transaction rolls back.
pub struct MemoryConnection {
    id: u64,
    database: MemoryDatabase,
    transaction: Option<OpenTransaction>,
}

impl MemoryConnection {
    fn run(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<StatementResult> {
        let classified = self.database.classify(sql)?;
        let mut state = self.database.state.lock();
        state.executed.push(classified.kind);

        if state.failures.contains(&classified.kind) {
            return Err(QueueError::database(
                classified.kind.to_string(),
                "injected failure",
            ));
        }

        if classified.kind.is_ddl() {
            if let Some(transaction) = self.transaction.as_mut() {
                if transaction.ddl_backup.is_none() {
                    transaction.ddl_backup = Some(state.objects.clone());
                }
            }
        }

        let owner = self.transaction.as_ref().map(|_| self.id);
        let objects = &mut state.objects;

        let result = match classified.kind {
            StatementKind::SequenceExists => StatementResult::Exists(objects.sequence.is_some()),
            StatementKind::TriggerExists => StatementResult::Exists(objects.trigger),
            StatementKind::CreateSequence => {
                objects.sequence.get_or_insert(0);
                StatementResult::Affected(0)
            }
            StatementKind::LockTable
            | StatementKind::DropRenumberTable
            | StatementKind::EnableTrigger => StatementResult::Affected(0),
            StatementKind::Renumber => StatementResult::Affected(renumber(objects)?),
            StatementKind::CreateFunction => {
                objects.function = true;
                StatementResult::Affected(0)
            }
            StatementKind::DropTrigger => {
                objects.trigger = false;
                StatementResult::Affected(0)
            }
            StatementKind::CreateTrigger => {
                objects.trigger = true;
                StatementResult::Affected(0)
            }
            StatementKind::Insert => {
                let version = classified.version.ok_or_else(|| {
                    QueueError::database("insert", "insert statement without a version")
                })?;
                insert(objects, &version, params, owner)?;
                StatementResult::Affected(1)
            }
            StatementKind::Dequeue => {
                let version = classified.version.ok_or_else(|| {
                    QueueError::database("dequeue", "dequeue statement without a version")
                })?;
                StatementResult::Rows(dequeue(objects, &version, params, self.id, owner.is_some())?)
            }
        };

        Ok(result)
    }

    fn undo(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };
        let mut state = self.database.state.lock();
        if let Some(backup) = transaction.ddl_backup {
            state.objects = backup;
        }
        let id = self.id;
        let rows = &mut state.objects.rows;
        rows.retain(|stored| stored.inserted_by != Some(id));
        for stored in rows.iter_mut() {
            if stored.deleted_by == Some(id) {
                stored.deleted_by = None;
            }
        }
    }
}

enum StatementResult {
    Exists(bool),
    Affected(u64),
    Rows(Vec<DataRow>),
}

fn renumber(objects: &mut Objects) -> QueueResult<u64> {
    let mut last = objects
        .sequence
        .ok_or_else(|| QueueError::database("renumber", "sequence does not exist"))?;

    objects.rows.sort_by_key(StoredRow::sort_key);
    for stored in objects.rows.iter_mut() {
        last += 1;
        stored.row.message_number = last;
    }
    objects.sequence = Some(last);
    Ok(objects.rows.len() as u64)
}

fn insert(
    objects: &mut Objects,
    version: &SchemaVersion,
    params: &[SqlValue],
    owner: Option<u64>,
) -> QueueResult<()> {
    let columns: Vec<LogicalColumn> = version.insert_columns().collect();
    if params.len() != columns.len() {
        return Err(QueueError::database(
            "insert",
            format!("expected {} parameters, got {}", columns.len(), params.len()),
        ));
    }

    let last = objects
        .sequence
        .as_mut()
        .ok_or_else(|| QueueError::database("insert", "sequence does not exist"))?;
    *last += 1;
    let message_number = *last;

    let mut uuid = Uuid::nil();
    let mut values = BTreeMap::new();
    for (column, value) in columns.into_iter().zip(params) {
        if column == LogicalColumn::Uuid {
            uuid = match value {
                SqlValue::Binary(bytes) => Uuid::from_slice(bytes)
                    .map_err(|e| QueueError::database("insert", e.to_string()))?,
                other => {
                    return Err(QueueError::database(
                        "insert",
                        format!("uuid parameter must be binary, got {}", other.type_name()),
                    ))
                }
            };
        } else {
            values.insert(column, value.clone());
        }
    }

    objects.rows.push(StoredRow {
        row: MemoryRow {
            message_number,
            uuid,
            values,
        },
        inserted_by: owner,
        deleted_by: None,
    });
    Ok(())
}

fn dequeue(
    objects: &mut Objects,
    version: &SchemaVersion,
    params: &[SqlValue],
    connection: u64,
    in_transaction: bool,
) -> QueueResult<Vec<DataRow>> {
    let limit = params
        .first()
        .and_then(SqlValue::as_i64)
        .ok_or_else(|| QueueError::database("dequeue", "missing batch size parameter"))?;
    let limit = usize::try_from(limit).unwrap_or(0);

    let mut visible: Vec<usize> = objects
        .rows
        .iter()
        .enumerate()
        .filter(|(_, stored)| {
            stored.deleted_by.is_none()
                && stored.inserted_by.map_or(true, |owner| owner == connection)
        })
        .map(|(index, _)| index)
        .collect();
    visible.sort_by_key(|&index| objects.rows[index].sort_key());
    visible.truncate(limit);

    let returned = if version.compacts_by_reference() {
        compact_by_reference(objects, &visible)
    } else {
        visible.clone()
    };
    let rows = returned
        .iter()
        .map(|&index| to_data_row(&objects.rows[index].row, version))
        .collect();

    if in_transaction {
        for &index in &visible {
            objects.rows[index].deleted_by = Some(connection);
        }
    } else {
        let taken: HashSet<usize> = visible.into_iter().collect();
        let mut index = 0;
        objects.rows.retain(|_| {
            let keep = !taken.contains(&index);
            index += 1;
            keep
        });
    }

    Ok(rows)
}

/// Rows with a body, plus the earliest row of every reference
fn compact_by_reference(objects: &Objects, selected: &[usize]) -> Vec<usize> {
    let reference_of = |row: &MemoryRow| match row.value(LogicalColumn::Reference) {
        Some(SqlValue::Binary(bytes)) => Some(bytes.clone()),
        _ => None,
    };

    let mut first: HashMap<Option<Vec<u8>>, i64> = HashMap::new();
    for &index in selected {
        let row = &objects.rows[index].row;
        let earliest = first.entry(reference_of(row)).or_insert(row.message_number);
        *earliest = (*earliest).min(row.message_number);
    }

    selected
        .iter()
        .copied()
        .filter(|&index| {
            let row = &objects.rows[index].row;
            let has_body = matches!(
                row.value(LogicalColumn::MessageBody),
                Some(SqlValue::Text(body)) if !body.is_empty()
            );
            has_body || first.get(&reference_of(row)) == Some(&row.message_number)
        })
        .collect()
}

fn to_data_row(row: &MemoryRow, version: &SchemaVersion) -> DataRow {
    version
        .columns
        .iter()
        .fold(DataRow::new(), |data, &column| {
            let value = match column {
                LogicalColumn::MessageNumber => SqlValue::BigInt(row.message_number),
                LogicalColumn::Uuid => SqlValue::Binary(row.uuid.as_bytes().to_vec()),
                other => row.values.get(&other).cloned().unwrap_or(SqlValue::Null),
            };
            data.with(column.name(), value)
        })
}

#[async_trait]
impl QueueConnection for MemoryConnection {
    fn provider(&self) -> DatabaseProvider {
        self.database.provider
    }

    async fn execute_scalar(&mut self, sql: &str) -> QueueResult<Option<SqlValue>> {
        match self.run(sql, &[])? {
            StatementResult::Exists(true) => Ok(Some(SqlValue::Int(1))),
            StatementResult::Exists(false) => Ok(None),
            StatementResult::Affected(count) => Ok(Some(SqlValue::BigInt(count as i64))),
            StatementResult::Rows(_) => Ok(None),
        }
    }

    async fn execute_non_query(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<u64> {
        match self.run(sql, params)? {
            StatementResult::Affected(count) => Ok(count),
            StatementResult::Rows(rows) => Ok(rows.len() as u64),
            StatementResult::Exists(_) => Ok(0),
        }
    }

    async fn query_rows(&mut self, sql: &str, params: &[SqlValue]) -> QueueResult<Vec<DataRow>> {
        // Let concurrent consumers interleave between batches
        tokio::task::yield_now().await;
        match self.run(sql, params)? {
            StatementResult::Rows(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    async fn begin(&mut self, _isolation: IsolationLevel) -> QueueResult<()> {
        if self.transaction.is_some() {
            return Err(QueueError::transaction("transaction already open"));
        }
        self.transaction = Some(OpenTransaction { ddl_backup: None });
        Ok(())
    }

    async fn commit(&mut self) -> QueueResult<()> {
        if self.transaction.take().is_none() {
            return Err(QueueError::transaction("no transaction to commit"));
        }
        let id = self.id;
        let mut state = self.database.state.lock();
        let rows = &mut state.objects.rows;
        rows.retain(|stored| stored.deleted_by != Some(id));
        for stored in rows.iter_mut() {
            if stored.inserted_by == Some(id) {
                stored.inserted_by = None;
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> QueueResult<()> {
        self.undo();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.undo();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::outgoing_v12_schema;

    #[tokio::test]
    async fn test_uncommitted_rows_are_invisible_to_other_connections() {
        let db = MemoryDatabase::new(DatabaseProvider::Postgres, outgoing_v12_schema());
        db.provision();
        db.seed_rows(4);
        let version = SchemaVersion::find(crate::schema::QueueDirection::Outgoing, 12).unwrap();
        let dequeue = builder_for(DatabaseProvider::Postgres)
            .build(db.schema(), &version)
            .unwrap()
            .dequeue;

        let mut first = db.connect();
        let mut second = db.connect();
        first.begin(IsolationLevel::ReadCommitted).await.unwrap();
        second.begin(IsolationLevel::ReadCommitted).await.unwrap();

        let a = first.query_rows(&dequeue, &[SqlValue::BigInt(3)]).await.unwrap();
        let b = second.query_rows(&dequeue, &[SqlValue::BigInt(3)]).await.unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 1);

        drop(first);
        second.commit().await.unwrap();
        assert_eq!(db.snapshot().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_statement_is_rejected() {
        let db = MemoryDatabase::new(DatabaseProvider::SqlServer, outgoing_v12_schema());
        let mut connection = db.connect();
        assert!(connection.execute_non_query("SELECT 1;", &[]).await.is_err());
    }

    #[test]
    fn test_seed_without_sequence_uses_sparse_ordinals() {
        let db = MemoryDatabase::new(DatabaseProvider::Postgres, outgoing_v12_schema());
        db.seed_rows(3);
        let numbers: Vec<i64> = db.snapshot().rows.iter().map(|r| r.message_number).collect();
        assert_eq!(numbers, vec![10, 20, 30]);
    }
}
