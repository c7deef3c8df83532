//! Postgres script skeletons.

use super::{column_list, ScriptBuilder};
use crate::database::DatabaseProvider;
use crate::schema::{LogicalColumn, SchemaVersion, ValueKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct PgScriptBuilder;

impl ScriptBuilder for PgScriptBuilder {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::Postgres
    }

    fn insert_template(&self, version: &SchemaVersion) -> String {
        let columns: Vec<LogicalColumn> = std::iter::once(LogicalColumn::MessageNumber)
            .chain(version.insert_columns())
            .collect();
        let params = (1..=version.insert_columns().count())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {{TABLE_NAME}} ({}) \
             SELECT CAST(nextval('{{SEQUENCE_NAME}}') AS numeric(19,0)), {params};",
            column_list(&columns, None)
        )
    }

    fn dequeue_template(&self, version: &SchemaVersion) -> String {
        let returning = column_list(version.columns, Some("t"));
        let source = if version.compacts_by_reference() { "ver" } else { "del" };
        let projection = version
            .columns
            .iter()
            .map(|column| projection(source, *column))
            .collect::<Vec<_>>()
            .join(", ");

        let delete = format!(
            "WITH cte AS (SELECT {{MessageNumber}}, {{Uuid}} FROM {{TABLE_NAME}} \
             ORDER BY {{MessageNumber}} ASC, {{Uuid}} ASC LIMIT $1 FOR UPDATE SKIP LOCKED), \
             del AS (DELETE FROM {{TABLE_NAME}} AS t USING cte \
             WHERE t.{{MessageNumber}} = cte.{{MessageNumber}} AND t.{{Uuid}} = cte.{{Uuid}} \
             RETURNING {returning})"
        );

        if version.compacts_by_reference() {
            // Every selected row is deleted; bodiless repeats of a reference are not returned
            format!(
                "{delete}, \
                 ver AS (SELECT del.*, MIN(del.{{MessageNumber}}) OVER (PARTITION BY del.{{Reference}}) \
                 AS first_number FROM del) \
                 SELECT {projection} FROM ver \
                 WHERE CAST(ver.{{MessageBody}} AS text) <> '' OR ver.{{MessageNumber}} = ver.first_number \
                 ORDER BY ver.{{MessageNumber}} ASC, ver.{{Uuid}} ASC;"
            )
        } else {
            format!(
                "{delete} \
                 SELECT {projection} FROM del ORDER BY del.{{MessageNumber}} ASC, del.{{Uuid}} ASC;"
            )
        }
    }

    fn sequence_exists_template(&self) -> String {
        "SELECT 1 FROM information_schema.sequences \
         WHERE LOWER(sequence_name) = LOWER('{SEQUENCE_NAME}');"
            .to_string()
    }

    fn trigger_exists_template(&self) -> String {
        "SELECT 1 FROM information_schema.triggers \
         WHERE LOWER(trigger_name) = LOWER('{TRIGGER_NAME}') \
         AND LOWER(event_object_table) = LOWER('{TABLE_NAME}');"
            .to_string()
    }

    fn sequence_templates(&self) -> Vec<String> {
        vec![
            "CREATE SEQUENCE IF NOT EXISTS {SEQUENCE_NAME} AS bigint INCREMENT BY 1 START WITH 1 CACHE 1;"
                .to_string(),
            "LOCK TABLE {TABLE_NAME} IN ACCESS EXCLUSIVE MODE;".to_string(),
            "WITH cte AS (SELECT ordered.{MessageNumber} AS ordinal, ordered.{Uuid} AS id, \
             nextval('{SEQUENCE_NAME}') AS msgno \
             FROM (SELECT {MessageNumber}, {Uuid} FROM {TABLE_NAME} \
             ORDER BY {MessageNumber} ASC, {Uuid} ASC) AS ordered) \
             UPDATE {TABLE_NAME} SET {MessageNumber} = CAST(cte.msgno AS numeric(19,0)) FROM cte \
             WHERE {TABLE_NAME}.{MessageNumber} = cte.ordinal AND {TABLE_NAME}.{Uuid} = cte.id;"
                .to_string(),
        ]
    }

    fn trigger_templates(&self, _version: &SchemaVersion) -> Vec<String> {
        vec![
            "CREATE OR REPLACE FUNCTION {FUNCTION_NAME}() RETURNS trigger AS $$ \
             BEGIN NEW.{MessageNumber} := CAST(nextval('{SEQUENCE_NAME}') AS numeric(19,0)); \
             RETURN NEW; END $$ LANGUAGE plpgsql;"
                .to_string(),
            "DROP TRIGGER IF EXISTS {TRIGGER_NAME} ON {TABLE_NAME};".to_string(),
            "CREATE TRIGGER {TRIGGER_NAME} BEFORE INSERT ON {TABLE_NAME} \
             FOR EACH ROW EXECUTE PROCEDURE {FUNCTION_NAME}();"
                .to_string(),
        ]
    }
}

/// Result column with the cast the neutral decoder expects, aliased to the logical name
fn projection(alias: &str, column: LogicalColumn) -> String {
    let source = format!("{alias}.{}", column.placeholder());
    let name = column.name();
    match column.kind() {
        ValueKind::Ordinal => format!("CAST({source} AS bigint) AS \"{name}\""),
        ValueKind::Counter => format!("CAST({source} AS integer) AS \"{name}\""),
        ValueKind::Text => format!("CAST({source} AS text) AS \"{name}\""),
        ValueKind::Identifier | ValueKind::Timestamp => format!("{source} AS \"{name}\""),
    }
}
