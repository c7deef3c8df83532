//! Declarative schema version table.
//!
//! Each entry names the logical columns one supported message shape requires.
//! Versions are independent and may overlap; the interface validator resolves
//! overlaps deterministically.
//!
//! Versions that carry a [`LogicalColumn::Reference`] column dequeue with
//! compaction: within one batch, of the rows sharing a reference only those with
//! a body and the earliest one are delivered. The others are still deleted.

use super::LogicalColumn::{self, *};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which side of the bridge produces into a queue table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDirection {
    /// Written by this crate's producer, read by the legacy system
    Incoming,
    /// Written by the legacy system through the insert trigger, read by this crate's consumer
    Outgoing,
}

impl fmt::Display for QueueDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueDirection::Incoming => f.write_str("incoming"),
            QueueDirection::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// A named, fixed set of required logical columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    pub direction: QueueDirection,
    pub number: u32,
    pub columns: &'static [LogicalColumn],
}

impl SchemaVersion {
    pub fn column_set(&self) -> BTreeSet<LogicalColumn> {
        self.columns.iter().copied().collect()
    }

    pub fn contains(&self, column: LogicalColumn) -> bool {
        self.columns.contains(&column)
    }

    /// Columns bound as insert parameters; the ordinal always comes from the sequence
    pub fn insert_columns(&self) -> impl Iterator<Item = LogicalColumn> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(|column| *column != MessageNumber)
    }

    /// Whether dequeued batches are compacted by [`LogicalColumn::Reference`]
    pub fn compacts_by_reference(&self) -> bool {
        self.contains(Reference)
    }

    /// Look up a version by direction and number
    pub fn find(direction: QueueDirection, number: u32) -> Option<SchemaVersion> {
        SCHEMA_VERSIONS
            .iter()
            .find(|version| version.direction == direction && version.number == number)
            .copied()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.direction, self.number)
    }
}

pub static SCHEMA_VERSIONS: &[SchemaVersion] = &[
    SchemaVersion {
        direction: QueueDirection::Outgoing,
        number: 1,
        columns: &[
            MessageNumber,
            Uuid,
            Headers,
            MessageType,
            MessageBody,
            DateTimeStamp,
        ],
    },
    SchemaVersion {
        direction: QueueDirection::Outgoing,
        number: 3,
        columns: &[
            MessageNumber,
            Uuid,
            Sender,
            Recipients,
            MessageType,
            MessageBody,
            DateTimeStamp,
            OperationType,
            Reference,
        ],
    },
    SchemaVersion {
        direction: QueueDirection::Outgoing,
        number: 10,
        columns: &[
            MessageNumber,
            Uuid,
            Sender,
            Recipients,
            MessageType,
            MessageBody,
            DateTimeStamp,
            OperationType,
        ],
    },
    SchemaVersion {
        direction: QueueDirection::Outgoing,
        number: 11,
        columns: &[
            MessageNumber,
            Uuid,
            Headers,
            Sender,
            Recipients,
            MessageType,
            MessageBody,
            DateTimeStamp,
            OperationType,
            Reference,
        ],
    },
    SchemaVersion {
        direction: QueueDirection::Outgoing,
        number: 12,
        columns: &[
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
        ],
    },
    SchemaVersion {
        direction: QueueDirection::Incoming,
        number: 1,
        columns: &[
            MessageNumber,
            Uuid,
            Sender,
            MessageType,
            MessageBody,
            OperationType,
            DateTimeStamp,
            ErrorDescription,
            ErrorCount,
        ],
    },
    SchemaVersion {
        direction: QueueDirection::Incoming,
        number: 12,
        columns: &[
            MessageNumber,
            Uuid,
            Headers,
            Sender,
            MessageType,
            MessageBody,
            DateTimeStamp,
            ErrorDescription,
            ErrorCount,
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_version_has_ordinal_and_uuid() {
        for version in SCHEMA_VERSIONS {
            assert!(version.contains(MessageNumber), "{version} lacks ordinal");
            assert!(version.contains(Uuid), "{version} lacks uuid");
            assert_eq!(version.column_set().len(), version.columns.len());
        }
    }

    #[test]
    fn test_insert_columns_skip_ordinal() {
        let version = SchemaVersion::find(QueueDirection::Outgoing, 1).unwrap();
        let columns: Vec<_> = version.insert_columns().collect();
        assert_eq!(
            columns,
            vec![Uuid, Headers, MessageType, MessageBody, DateTimeStamp]
        );
    }

    #[test]
    fn test_compacting_versions_carry_a_body() {
        let compacting: Vec<u32> = SCHEMA_VERSIONS
            .iter()
            .filter(|version| version.compacts_by_reference())
            .map(|version| version.number)
            .collect();
        assert_eq!(compacting, vec![3, 11]);
        for version in SCHEMA_VERSIONS.iter().filter(|v| v.compacts_by_reference()) {
            assert!(version.contains(MessageBody), "{version}");
        }
    }

    #[test]
    fn test_version_numbers_are_unique_per_direction() {
        for version in SCHEMA_VERSIONS {
            assert_eq!(
                SchemaVersion::find(version.direction, version.number),
                Some(*version)
            );
        }
    }

    #[test]
    fn test_find_unknown_version() {
        assert!(SchemaVersion::find(QueueDirection::Incoming, 7).is_none());
    }
}
