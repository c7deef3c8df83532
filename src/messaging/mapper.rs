//! Conversion between [`Message`] values and provider-neutral rows.
//!
//! NULL columns map to zero values. A missing column or a value of the wrong
//! type is a [`QueueError::Mapping`], which aborts the whole batch.
//!
//! Some legacy deployments store timestamps shifted by a fixed number of years;
//! `year_offset` is added on insert and subtracted on read.

use super::Message;
use crate::database::{DataRow, SqlValue};
use crate::error::{QueueError, QueueResult};
use crate::schema::{LogicalColumn, SchemaVersion};
use chrono::{Local, Months, NaiveDateTime};
use uuid::Uuid;

/// Map a dequeued row to a message
pub fn message_from_row(
    row: &DataRow,
    version: &SchemaVersion,
    year_offset: i32,
) -> QueueResult<Message> {
    let mut message = Message::default();

    for &column in version.columns {
        let name = column.name();
        let value = row
            .get(name)
            .ok_or_else(|| QueueError::mapping(name, "column missing from result"))?;

        match column {
            LogicalColumn::MessageNumber => message.message_number = integer(name, value)?,
            LogicalColumn::Uuid => message.uuid = identifier(name, value)?,
            LogicalColumn::Reference => message.reference = identifier(name, value)?,
            LogicalColumn::Headers => message.headers = text(name, value)?,
            LogicalColumn::Sender => message.sender = text(name, value)?,
            LogicalColumn::Recipients => message.recipients = text(name, value)?,
            LogicalColumn::MessageType => message.message_type = text(name, value)?,
            LogicalColumn::MessageBody => message.message_body = text(name, value)?,
            LogicalColumn::OperationType => message.operation_type = text(name, value)?,
            LogicalColumn::ErrorDescription => message.error_description = text(name, value)?,
            LogicalColumn::ErrorCount => {
                message.error_count = i32::try_from(integer(name, value)?)
                    .map_err(|e| QueueError::mapping(name, e.to_string()))?
            }
            LogicalColumn::DateTimeStamp => {
                message.date_time_stamp = match value {
                    SqlValue::Null => None,
                    SqlValue::Timestamp(ts) => Some(shift_years(name, *ts, -year_offset)?),
                    other => return Err(mismatch(name, "timestamp", other)),
                }
            }
        }
    }

    Ok(message)
}

/// Insert parameters in the order of [`SchemaVersion::insert_columns`]
pub fn insert_parameters(
    message: &Message,
    version: &SchemaVersion,
    year_offset: i32,
) -> QueueResult<Vec<SqlValue>> {
    version
        .insert_columns()
        .map(|column| {
            let value = match column {
                LogicalColumn::Uuid => {
                    let uuid = if message.uuid.is_nil() {
                        Uuid::new_v4()
                    } else {
                        message.uuid
                    };
                    SqlValue::Binary(uuid.as_bytes().to_vec())
                }
                LogicalColumn::Reference => SqlValue::Binary(message.reference.as_bytes().to_vec()),
                LogicalColumn::Headers => SqlValue::Text(message.headers.clone()),
                LogicalColumn::Sender => SqlValue::Text(message.sender.clone()),
                LogicalColumn::Recipients => SqlValue::Text(message.recipients.clone()),
                LogicalColumn::MessageType => SqlValue::Text(message.message_type.clone()),
                LogicalColumn::MessageBody => SqlValue::Text(message.message_body.clone()),
                LogicalColumn::OperationType => SqlValue::Text(message.operation_type.clone()),
                LogicalColumn::ErrorDescription => {
                    SqlValue::Text(message.error_description.clone())
                }
                LogicalColumn::ErrorCount => SqlValue::Int(message.error_count),
                LogicalColumn::DateTimeStamp => {
                    let stamp = message
                        .date_time_stamp
                        .unwrap_or_else(|| Local::now().naive_local());
                    SqlValue::Timestamp(shift_years(column.name(), stamp, year_offset)?)
                }
                LogicalColumn::MessageNumber => SqlValue::Null,
            };
            Ok(value)
        })
        .collect()
}

fn integer(name: &str, value: &SqlValue) -> QueueResult<i64> {
    match value {
        SqlValue::Null => Ok(0),
        other => other
            .as_i64()
            .ok_or_else(|| mismatch(name, "integer", other)),
    }
}

fn text(name: &str, value: &SqlValue) -> QueueResult<String> {
    match value {
        SqlValue::Null => Ok(String::new()),
        SqlValue::Text(s) => Ok(s.clone()),
        other => Err(mismatch(name, "text", other)),
    }
}

fn identifier(name: &str, value: &SqlValue) -> QueueResult<Uuid> {
    match value {
        SqlValue::Null => Ok(Uuid::nil()),
        SqlValue::Binary(bytes) => {
            Uuid::from_slice(bytes).map_err(|e| QueueError::mapping(name, e.to_string()))
        }
        SqlValue::Text(s) => Uuid::parse_str(s).map_err(|e| QueueError::mapping(name, e.to_string())),
        other => Err(mismatch(name, "binary(16)", other)),
    }
}

fn mismatch(name: &str, expected: &str, actual: &SqlValue) -> QueueError {
    QueueError::mapping(
        name,
        format!("expected {expected}, got {}", actual.type_name()),
    )
}

fn shift_years(name: &str, ts: NaiveDateTime, years: i32) -> QueueResult<NaiveDateTime> {
    let months = Months::new(years.unsigned_abs() * 12);
    let shifted = if years >= 0 {
        ts.checked_add_months(months)
    } else {
        ts.checked_sub_months(months)
    };
    shifted.ok_or_else(|| QueueError::mapping(name, format!("year offset {years} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::QueueDirection;
    use chrono::NaiveDate;

    fn outgoing_v1() -> SchemaVersion {
        SchemaVersion::find(QueueDirection::Outgoing, 1).unwrap()
    }

    fn stamp(year: i32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 26)
            .unwrap()
    }

    #[test]
    fn test_row_maps_to_message_with_null_defaults() {
        let id = Uuid::new_v4();
        let row = DataRow::new()
            .with("MessageNumber", SqlValue::BigInt(17))
            .with("Uuid", SqlValue::Binary(id.as_bytes().to_vec()))
            .with("Headers", SqlValue::Null)
            .with("MessageType", SqlValue::Text("Order".into()))
            .with("MessageBody", SqlValue::Text("{}".into()))
            .with("DateTimeStamp", SqlValue::Timestamp(stamp(4024)));

        let message = message_from_row(&row, &outgoing_v1(), 2000).unwrap();
        assert_eq!(message.message_number, 17);
        assert_eq!(message.uuid, id);
        assert_eq!(message.headers, "");
        assert_eq!(message.message_type, "Order");
        assert_eq!(message.date_time_stamp, Some(stamp(2024)));
        assert_eq!(message.sender, "");
    }

    #[test]
    fn test_type_mismatch_is_mapping_error() {
        let row = DataRow::new()
            .with("MessageNumber", SqlValue::Text("seventeen".into()))
            .with("Uuid", SqlValue::Null)
            .with("Headers", SqlValue::Null)
            .with("MessageType", SqlValue::Null)
            .with("MessageBody", SqlValue::Null)
            .with("DateTimeStamp", SqlValue::Null);

        match message_from_row(&row, &outgoing_v1(), 0) {
            Err(QueueError::Mapping { column, .. }) => assert_eq!(column, "MessageNumber"),
            other => panic!("expected mapping error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column_is_mapping_error() {
        let row = DataRow::new().with("MessageNumber", SqlValue::BigInt(1));
        assert!(matches!(
            message_from_row(&row, &outgoing_v1(), 0),
            Err(QueueError::Mapping { .. })
        ));
    }

    #[test]
    fn test_insert_parameters_follow_insert_columns() {
        let mut message = Message::new("Order", "{\"id\":1}");
        message.date_time_stamp = Some(stamp(2024));

        let params = insert_parameters(&message, &outgoing_v1(), 2000).unwrap();
        assert_eq!(params.len(), outgoing_v1().insert_columns().count());

        match &params[0] {
            SqlValue::Binary(bytes) => assert!(!Uuid::from_slice(bytes).unwrap().is_nil()),
            other => panic!("expected generated uuid, got {other:?}"),
        }
        assert_eq!(params[2], SqlValue::Text("Order".into()));
        assert_eq!(params[3], SqlValue::Text("{\"id\":1}".into()));
        assert_eq!(params[4], SqlValue::Timestamp(stamp(4024)));
    }

    #[test]
    fn test_reference_travels_both_ways() {
        let version = SchemaVersion::find(QueueDirection::Outgoing, 11).unwrap();
        let reference = Uuid::new_v4();
        let message = Message::new("Product", "{}").with_reference(reference);

        let params = insert_parameters(&message, &version, 0).unwrap();
        let position = version
            .insert_columns()
            .position(|column| column == LogicalColumn::Reference)
            .unwrap();
        assert_eq!(
            params[position],
            SqlValue::Binary(reference.as_bytes().to_vec())
        );

        let row = version.columns.iter().fold(DataRow::new(), |row, column| {
            let value = match column {
                LogicalColumn::Reference => SqlValue::Binary(reference.as_bytes().to_vec()),
                _ => SqlValue::Null,
            };
            row.with(column.name(), value)
        });
        let mapped = message_from_row(&row, &version, 0).unwrap();
        assert_eq!(mapped.reference, reference);
        assert!(mapped.uuid.is_nil());
    }
}
