//! # Queue Script Builders
//!
//! Renders the literal SQL text used against a queue table: the enqueue insert,
//! the atomic dequeue, existence probes and the provisioning DDL.
//!
//! ## Overview
//!
//! Each provider family implements [`ScriptBuilder`] by supplying fixed structural
//! skeletons containing placeholder tokens. The shared [`render`] step substitutes
//! `{TABLE_NAME}`, `{SEQUENCE_NAME}`, `{TRIGGER_NAME}`, `{FUNCTION_NAME}` and every
//! `{LogicalName}` token with physical names from the [`QueueTableSchema`].
//!
//! - [`PgScriptBuilder`] - Postgres: `nextval`, `FOR UPDATE SKIP LOCKED`, BEFORE INSERT trigger function
//! - [`MsScriptBuilder`] - SQL Server: `NEXT VALUE FOR`, `ROWLOCK, READPAST`, INSTEAD OF INSERT trigger
//!
//! Rendering is pure: identical input always yields identical text, which the
//! configurator relies on for idempotent checks. Callers never branch on provider;
//! they ask [`builder_for`] for the right implementation.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use tablequeue_core::query_builder::builder_for;
//!
//! let scripts = builder_for(DatabaseProvider::Postgres).build(&schema, &version)?;
//! connection.query_rows(&scripts.dequeue, &[SqlValue::BigInt(1000)]).await?;
//! ```

pub mod postgres;
pub mod sql_server;

pub use postgres::PgScriptBuilder;
pub use sql_server::MsScriptBuilder;

use crate::constants::placeholders;
use crate::database::DatabaseProvider;
use crate::error::{QueueError, QueueResult};
use crate::schema::{LogicalColumn, QueueTableSchema, SchemaVersion};

/// Every rendered statement for one queue table and schema version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueScripts {
    /// Parameterized insert; ordinal comes from the sequence inline
    pub insert: String,
    /// Select-and-delete of the oldest rows; one parameter, the batch size
    pub dequeue: String,
    pub sequence_exists: String,
    pub trigger_exists: String,
    /// Sequence creation and renumbering of existing rows, in execution order
    pub sequence_ddl: Vec<String>,
    /// Insert trigger installation, in execution order
    pub trigger_ddl: Vec<String>,
}

impl QueueScripts {
    /// Provisioning statements for an incoming queue
    pub fn incoming_ddl(&self) -> Vec<String> {
        self.sequence_ddl.clone()
    }

    /// Provisioning statements for an outgoing queue
    pub fn outgoing_ddl(&self) -> Vec<String> {
        self.sequence_ddl
            .iter()
            .chain(self.trigger_ddl.iter())
            .cloned()
            .collect()
    }
}

/// Provider-specific SQL skeletons. Templates contain placeholder tokens only;
/// [`ScriptBuilder::build`] performs substitution.
pub trait ScriptBuilder: Send + Sync {
    fn provider(&self) -> DatabaseProvider;

    fn insert_template(&self, version: &SchemaVersion) -> String;

    fn dequeue_template(&self, version: &SchemaVersion) -> String;

    fn sequence_exists_template(&self) -> String;

    fn trigger_exists_template(&self) -> String;

    fn sequence_templates(&self) -> Vec<String>;

    fn trigger_templates(&self, version: &SchemaVersion) -> Vec<String>;

    /// Render every script for a table
    fn build(&self, schema: &QueueTableSchema, version: &SchemaVersion) -> QueueResult<QueueScripts> {
        Ok(QueueScripts {
            insert: render(&self.insert_template(version), schema)?,
            dequeue: render(&self.dequeue_template(version), schema)?,
            sequence_exists: render(&self.sequence_exists_template(), schema)?,
            trigger_exists: render(&self.trigger_exists_template(), schema)?,
            sequence_ddl: render_all(&self.sequence_templates(), schema)?,
            trigger_ddl: render_all(&self.trigger_templates(version), schema)?,
        })
    }
}

/// Script builder for a provider
pub fn builder_for(provider: DatabaseProvider) -> Box<dyn ScriptBuilder> {
    match provider {
        DatabaseProvider::Postgres => Box::new(PgScriptBuilder),
        DatabaseProvider::SqlServer => Box::new(MsScriptBuilder),
    }
}

/// Substitute object and column placeholders with physical names
pub fn render(template: &str, schema: &QueueTableSchema) -> QueueResult<String> {
    let mut sql = template
        .replace(placeholders::TABLE_NAME, schema.table_name())
        .replace(placeholders::SEQUENCE_NAME, &schema.sequence_name())
        .replace(placeholders::TRIGGER_NAME, &schema.trigger_name())
        .replace(placeholders::FUNCTION_NAME, &schema.function_name());

    for column in LogicalColumn::ALL {
        let placeholder = column.placeholder();
        if !sql.contains(&placeholder) {
            continue;
        }
        let physical = schema.physical_name(column).ok_or_else(|| {
            QueueError::script(format!(
                "table {} has no physical column for {column}",
                schema.table_name()
            ))
        })?;
        sql = sql.replace(&placeholder, physical);
    }

    Ok(sql)
}

fn render_all(templates: &[String], schema: &QueueTableSchema) -> QueueResult<Vec<String>> {
    templates.iter().map(|t| render(t, schema)).collect()
}

/// `{A}, {B}, ...` placeholder list, optionally qualified with a table alias
pub(crate) fn column_list(columns: &[LogicalColumn], qualifier: Option<&str>) -> String {
    columns
        .iter()
        .map(|column| match qualifier {
            Some(alias) => format!("{alias}.{}", column.placeholder()),
            None => column.placeholder(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
