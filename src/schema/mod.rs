//! # Queue Table Schema
//!
//! Describes a queue table as supplied by the schema catalog: the physical table
//! name plus an ordered mapping from logical column names to physical column names.
//!
//! ## Overview
//!
//! - [`LogicalColumn`]: the closed set of logical message columns, parsed from their
//!   canonical names or from the legacy platform aliases
//! - [`QueueTableSchema`]: immutable table description with derived object names
//!   for the ordering sequence, insert trigger and trigger function
//! - [`SchemaVersion`]: the declarative table of known message shapes
//! - [`SchemaCatalog`]: read-only lookup of queue tables by name

pub mod catalog;
pub mod version;

pub use catalog::{SchemaCatalog, StaticSchemaCatalog};
pub use version::{QueueDirection, SchemaVersion, SCHEMA_VERSIONS};

use crate::constants::object_names;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How a column's value travels between the database and a [`crate::Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Database assigned ordinal, numeric(19,0)
    Ordinal,
    /// binary(16) unique id
    Identifier,
    Text,
    Timestamp,
    /// Small integer counter, numeric(2,0)
    Counter,
}

/// Logical message columns known to the schema version table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogicalColumn {
    MessageNumber,
    Uuid,
    Headers,
    Sender,
    Recipients,
    MessageType,
    MessageBody,
    DateTimeStamp,
    OperationType,
    ErrorDescription,
    ErrorCount,
    /// Id of the business object a message describes; rows sharing it compact on dequeue
    Reference,
}

impl LogicalColumn {
    pub const ALL: [LogicalColumn; 12] = [
        LogicalColumn::MessageNumber,
        LogicalColumn::Uuid,
        LogicalColumn::Headers,
        LogicalColumn::Sender,
        LogicalColumn::Recipients,
        LogicalColumn::MessageType,
        LogicalColumn::MessageBody,
        LogicalColumn::DateTimeStamp,
        LogicalColumn::OperationType,
        LogicalColumn::ErrorDescription,
        LogicalColumn::ErrorCount,
        LogicalColumn::Reference,
    ];

    /// Canonical logical name, also used as the result column alias
    pub fn name(self) -> &'static str {
        match self {
            LogicalColumn::MessageNumber => "MessageNumber",
            LogicalColumn::Uuid => "Uuid",
            LogicalColumn::Headers => "Headers",
            LogicalColumn::Sender => "Sender",
            LogicalColumn::Recipients => "Recipients",
            LogicalColumn::MessageType => "MessageType",
            LogicalColumn::MessageBody => "MessageBody",
            LogicalColumn::DateTimeStamp => "DateTimeStamp",
            LogicalColumn::OperationType => "OperationType",
            LogicalColumn::ErrorDescription => "ErrorDescription",
            LogicalColumn::ErrorCount => "ErrorCount",
            LogicalColumn::Reference => "Reference",
        }
    }

    /// Names used by the legacy platform's metadata for the same column
    pub fn legacy_aliases(self) -> &'static [&'static str] {
        match self {
            LogicalColumn::MessageNumber => &["МоментВремени", "НомерСообщения"],
            LogicalColumn::Uuid => &["Идентификатор"],
            LogicalColumn::Headers => &["Заголовки"],
            LogicalColumn::Sender => &["Отправитель", "УдалитьОтправитель"],
            LogicalColumn::Recipients => &["Получатели", "УдалитьПолучатели"],
            LogicalColumn::MessageType => &["ТипСообщения"],
            LogicalColumn::MessageBody => &["ТелоСообщения"],
            LogicalColumn::DateTimeStamp => &["ДатаВремя"],
            LogicalColumn::OperationType => &["ТипОперации"],
            LogicalColumn::ErrorDescription => &["ОписаниеОшибки"],
            LogicalColumn::ErrorCount => &["КоличествоОшибок"],
            LogicalColumn::Reference => &["Ссылка", "ИдентификаторОбъекта"],
        }
    }

    /// Resolve a catalog logical name (canonical or legacy alias, case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        let needle = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|column| {
            column.name().to_lowercase() == needle
                || column
                    .legacy_aliases()
                    .iter()
                    .any(|alias| alias.to_lowercase() == needle)
        })
    }

    pub fn kind(self) -> ValueKind {
        match self {
            LogicalColumn::MessageNumber => ValueKind::Ordinal,
            LogicalColumn::Uuid | LogicalColumn::Reference => ValueKind::Identifier,
            LogicalColumn::DateTimeStamp => ValueKind::Timestamp,
            LogicalColumn::ErrorCount => ValueKind::Counter,
            _ => ValueKind::Text,
        }
    }

    /// `{Name}` token substituted by the script builders
    pub fn placeholder(self) -> String {
        format!("{{{}}}", self.name())
    }
}

impl fmt::Display for LogicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One logical to physical column pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub logical: String,
    pub physical: String,
}

impl ColumnMapping {
    pub fn new(logical: impl Into<String>, physical: impl Into<String>) -> Self {
        Self {
            logical: logical.into(),
            physical: physical.into(),
        }
    }

    pub fn logical_column(&self) -> Option<LogicalColumn> {
        LogicalColumn::parse(&self.logical)
    }
}

/// Table name plus ordered column mapping for one queue table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTableSchema {
    table_name: String,
    columns: Vec<ColumnMapping>,
}

impl QueueTableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnMapping>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    /// Append a column mapping while building a schema
    pub fn with_column(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping::new(logical, physical));
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    /// Physical name of a logical column, first mapping wins
    pub fn physical_name(&self, column: LogicalColumn) -> Option<&str> {
        self.columns
            .iter()
            .find(|mapping| mapping.logical_column() == Some(column))
            .map(|mapping| mapping.physical.as_str())
    }

    /// Set of recognized logical columns
    pub fn logical_columns(&self) -> BTreeSet<LogicalColumn> {
        self.columns
            .iter()
            .filter_map(ColumnMapping::logical_column)
            .collect()
    }

    /// Logical names that do not resolve to a [`LogicalColumn`]
    pub fn unknown_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|mapping| mapping.logical_column().is_none())
            .map(|mapping| mapping.logical.as_str())
            .collect()
    }

    pub fn sequence_name(&self) -> String {
        self.object_name(object_names::SEQUENCE_SUFFIX)
    }

    pub fn trigger_name(&self) -> String {
        self.object_name(object_names::TRIGGER_SUFFIX)
    }

    pub fn function_name(&self) -> String {
        self.object_name(object_names::FUNCTION_SUFFIX)
    }

    fn object_name(&self, suffix: &str) -> String {
        format!("{}{}", self.table_name, suffix).to_lowercase()
    }
}
