//! Queue table schemas mirroring the generated names of real deployments.

use crate::schema::{QueueDirection, QueueTableSchema, SchemaVersion};

/// Schema whose columns are exactly those of `version`, with `_fldN` physical names
pub fn schema_for(table_name: &str, version: &SchemaVersion) -> QueueTableSchema {
    version
        .columns
        .iter()
        .enumerate()
        .fold(QueueTableSchema::new(table_name, vec![]), |schema, (i, column)| {
            schema.with_column(column.name(), format!("_fld{}", 1000 + i))
        })
}

fn versioned(table_name: &str, direction: QueueDirection, number: u32) -> QueueTableSchema {
    match SchemaVersion::find(direction, number) {
        Some(version) => schema_for(table_name, &version),
        None => QueueTableSchema::new(table_name, vec![]),
    }
}

pub fn outgoing_v1_schema() -> QueueTableSchema {
    versioned("_inforg101", QueueDirection::Outgoing, 1)
}

pub fn outgoing_v11_schema() -> QueueTableSchema {
    versioned("_inforg111", QueueDirection::Outgoing, 11)
}

pub fn outgoing_v12_schema() -> QueueTableSchema {
    versioned("_inforg112", QueueDirection::Outgoing, 12)
}

pub fn incoming_v1_schema() -> QueueTableSchema {
    versioned("_inforg201", QueueDirection::Incoming, 1)
}

pub fn incoming_v12_schema() -> QueueTableSchema {
    versioned("_inforg212", QueueDirection::Incoming, 12)
}
