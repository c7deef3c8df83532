//! SQL Server script skeletons.
//!
//! Deleted rows are captured into a table variable with `OUTPUT ... INTO` and read
//! back with an explicit `ORDER BY`, since `DELETE ... OUTPUT` alone does not
//! guarantee row order.

use super::{column_list, ScriptBuilder};
use crate::constants::object_names::RENUMBER_TABLE_SUFFIX;
use crate::database::DatabaseProvider;
use crate::schema::{LogicalColumn, SchemaVersion, ValueKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct MsScriptBuilder;

impl ScriptBuilder for MsScriptBuilder {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::SqlServer
    }

    fn insert_template(&self, version: &SchemaVersion) -> String {
        let columns: Vec<LogicalColumn> = std::iter::once(LogicalColumn::MessageNumber)
            .chain(version.insert_columns())
            .collect();
        let params = (1..=version.insert_columns().count())
            .map(|i| format!("@P{i}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT {{TABLE_NAME}} ({}) SELECT NEXT VALUE FOR {{SEQUENCE_NAME}}, {params};",
            column_list(&columns, None)
        )
    }

    fn dequeue_template(&self, version: &SchemaVersion) -> String {
        let staging = version
            .columns
            .iter()
            .map(|column| format!("[{}] {}", column.name(), staging_type(*column)))
            .collect::<Vec<_>>()
            .join(", ");
        let source = column_list(version.columns, None);
        let deleted = column_list(version.columns, Some("deleted"));
        let projection = version
            .columns
            .iter()
            .map(|column| projection(*column))
            .collect::<Vec<_>>()
            .join(", ");

        let readback = if version.compacts_by_reference() {
            format!(
                "SELECT {projection} FROM (SELECT *, \
                 MIN([MessageNumber]) OVER (PARTITION BY [Reference]) AS [FirstNumber] FROM @messages) AS T \
                 WHERE [MessageBody] <> '' OR [MessageNumber] = [FirstNumber] \
                 ORDER BY [MessageNumber] ASC, [Uuid] ASC;"
            )
        } else {
            format!("SELECT {projection} FROM @messages ORDER BY [MessageNumber] ASC, [Uuid] ASC;")
        };

        format!(
            "SET NOCOUNT ON; DECLARE @messages TABLE ({staging}); \
             WITH cte AS (SELECT TOP (@P1) {source} FROM {{TABLE_NAME}} WITH (ROWLOCK, READPAST) \
             ORDER BY {{MessageNumber}} ASC, {{Uuid}} ASC) \
             DELETE cte OUTPUT {deleted} INTO @messages; \
             {readback}"
        )
    }

    fn sequence_exists_template(&self) -> String {
        "SELECT 1 FROM sys.sequences WHERE name = '{SEQUENCE_NAME}';".to_string()
    }

    fn trigger_exists_template(&self) -> String {
        "SELECT 1 FROM sys.triggers WHERE name = '{TRIGGER_NAME}';".to_string()
    }

    fn sequence_templates(&self) -> Vec<String> {
        let copy = format!("#{{TABLE_NAME}}{RENUMBER_TABLE_SUFFIX}");
        vec![
            "IF NOT EXISTS (SELECT 1 FROM sys.sequences WHERE name = '{SEQUENCE_NAME}') \
             BEGIN CREATE SEQUENCE {SEQUENCE_NAME} AS numeric(19,0) START WITH 1 INCREMENT BY 1; END;"
                .to_string(),
            format!(
                "SELECT {{MessageNumber}} AS [ordinal], {{Uuid}} AS [id], \
                 NEXT VALUE FOR {{SEQUENCE_NAME}} OVER (ORDER BY {{MessageNumber}} ASC, {{Uuid}} ASC) AS [msgno] \
                 INTO {copy} FROM {{TABLE_NAME}} WITH (TABLOCKX, HOLDLOCK); \
                 UPDATE T SET T.{{MessageNumber}} = C.[msgno] FROM {{TABLE_NAME}} AS T \
                 INNER JOIN {copy} AS C ON T.{{MessageNumber}} = C.[ordinal] AND T.{{Uuid}} = C.[id];"
            ),
            format!("DROP TABLE {copy};"),
        ]
    }

    fn trigger_templates(&self, version: &SchemaVersion) -> Vec<String> {
        let columns: Vec<LogicalColumn> = std::iter::once(LogicalColumn::MessageNumber)
            .chain(version.insert_columns())
            .collect();
        let inserted: Vec<LogicalColumn> = version.insert_columns().collect();

        vec![
            "IF OBJECT_ID('{TRIGGER_NAME}', 'TR') IS NOT NULL DROP TRIGGER {TRIGGER_NAME};"
                .to_string(),
            format!(
                "CREATE TRIGGER {{TRIGGER_NAME}} ON {{TABLE_NAME}} INSTEAD OF INSERT NOT FOR REPLICATION AS \
                 INSERT {{TABLE_NAME}} ({}) SELECT NEXT VALUE FOR {{SEQUENCE_NAME}}, {} FROM inserted AS i;",
                column_list(&columns, None),
                column_list(&inserted, Some("i"))
            ),
            "ENABLE TRIGGER {TRIGGER_NAME} ON {TABLE_NAME};".to_string(),
        ]
    }
}

fn staging_type(column: LogicalColumn) -> &'static str {
    match column.kind() {
        ValueKind::Ordinal => "numeric(19,0)",
        ValueKind::Identifier => "binary(16)",
        ValueKind::Text => "nvarchar(max)",
        ValueKind::Timestamp => "datetime2",
        ValueKind::Counter => "numeric(2,0)",
    }
}

fn projection(column: LogicalColumn) -> String {
    let name = column.name();
    match column.kind() {
        ValueKind::Ordinal => format!("CAST([{name}] AS bigint) AS [{name}]"),
        ValueKind::Counter => format!("CAST([{name}] AS int) AS [{name}]"),
        _ => format!("[{name}]"),
    }
}
