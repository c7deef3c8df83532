//! # Interface Validation
//!
//! Matches a queue table's logical column set against the declarative
//! [`SCHEMA_VERSIONS`] table and reports structural schema problems.
//!
//! ## Matching policy
//!
//! - [`MatchPolicy::Exact`] (default): the table's column set must equal the
//!   template's set, and every catalog column must resolve to a known logical column.
//! - [`MatchPolicy::Subset`]: the template's columns must be present in the table;
//!   extra and unknown columns are ignored.
//!
//! When several templates match, the one with the most columns wins and the highest
//! version number breaks any remaining tie. Detection never touches the database.

use crate::error::{ConfigurationIssue, QueueError, QueueResult};
use crate::schema::{QueueDirection, QueueTableSchema, SchemaVersion, SCHEMA_VERSIONS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    Exact,
    Subset,
}

/// Detect which schema version a queue table implements
pub fn detect_version(
    schema: &QueueTableSchema,
    direction: QueueDirection,
    policy: MatchPolicy,
) -> QueueResult<SchemaVersion> {
    let table_columns = schema.logical_columns();
    let has_unknown = !schema.unknown_columns().is_empty();

    let best = SCHEMA_VERSIONS
        .iter()
        .filter(|version| version.direction == direction)
        .filter(|version| {
            let required = version.column_set();
            match policy {
                MatchPolicy::Exact => !has_unknown && required == table_columns,
                MatchPolicy::Subset => required.is_subset(&table_columns),
            }
        })
        .max_by_key(|version| (version.columns.len(), version.number))
        .copied();

    match best {
        Some(version) => {
            debug!(
                table = %schema.table_name(),
                version = %version,
                policy = ?policy,
                "Detected queue schema version"
            );
            Ok(version)
        }
        None => Err(QueueError::InterfaceVersion {
            table: schema.table_name().to_string(),
            direction: direction.to_string(),
            columns: schema
                .columns()
                .iter()
                .map(|mapping| mapping.logical.clone())
                .collect(),
        }),
    }
}

/// Collect every structural problem with a schema instead of stopping at the first.
///
/// Unknown logical names are only an issue under [`MatchPolicy::Exact`].
pub fn validate_schema(
    schema: &QueueTableSchema,
    policy: MatchPolicy,
) -> Result<(), Vec<ConfigurationIssue>> {
    let mut issues = Vec::new();

    if schema.table_name().trim().is_empty() {
        issues.push(ConfigurationIssue::MissingTableName);
    }

    let mut seen = HashSet::new();
    for mapping in schema.columns() {
        match mapping.logical_column() {
            Some(column) => {
                if !seen.insert(column) {
                    issues.push(ConfigurationIssue::DuplicateColumn {
                        logical: column.name().to_string(),
                    });
                }
            }
            None if policy == MatchPolicy::Exact => {
                issues.push(ConfigurationIssue::UnknownColumn {
                    logical: mapping.logical.clone(),
                })
            }
            None => {}
        }

        if mapping.physical.trim().is_empty() {
            issues.push(ConfigurationIssue::EmptyColumnName {
                logical: mapping.logical.clone(),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogicalColumn;

    fn schema_for(columns: &[LogicalColumn]) -> QueueTableSchema {
        columns
            .iter()
            .enumerate()
            .fold(QueueTableSchema::new("_inforg42", vec![]), |schema, (i, c)| {
                schema.with_column(c.name(), format!("_fld{}", i + 1))
            })
    }

    #[test]
    fn test_exact_match_returns_that_version() {
        let v12 = SchemaVersion::find(QueueDirection::Outgoing, 12).unwrap();
        let schema = schema_for(v12.columns);

        let detected = detect_version(&schema, QueueDirection::Outgoing, MatchPolicy::Exact).unwrap();
        assert_eq!(detected, v12);
    }

    #[test]
    fn test_exact_rejects_superset() {
        let v1 = SchemaVersion::find(QueueDirection::Outgoing, 1).unwrap();
        let schema = schema_for(v1.columns).with_column("Sender", "_fld99");

        let result = detect_version(&schema, QueueDirection::Outgoing, MatchPolicy::Exact);
        assert!(matches!(result, Err(QueueError::InterfaceVersion { .. })));
    }

    #[test]
    fn test_subset_prefers_largest_template() {
        let v12 = SchemaVersion::find(QueueDirection::Outgoing, 12).unwrap();
        let schema = schema_for(v12.columns).with_column("Payload", "_fld77");

        let detected = detect_version(&schema, QueueDirection::Outgoing, MatchPolicy::Subset).unwrap();
        assert_eq!(detected.number, 12);
    }

    #[test]
    fn test_unknown_column_breaks_exact_match() {
        let v1 = SchemaVersion::find(QueueDirection::Incoming, 1).unwrap();
        let schema = schema_for(v1.columns).with_column("Payload", "_fld77");

        assert!(detect_version(&schema, QueueDirection::Incoming, MatchPolicy::Exact).is_err());
        assert_eq!(
            detect_version(&schema, QueueDirection::Incoming, MatchPolicy::Subset)
                .unwrap()
                .number,
            1
        );
    }

    #[test]
    fn test_reference_column_selects_compacting_version() {
        for number in [3, 10, 11] {
            let version = SchemaVersion::find(QueueDirection::Outgoing, number).unwrap();
            let schema = schema_for(version.columns);
            let detected = detect_version(&schema, QueueDirection::Outgoing, MatchPolicy::Exact).unwrap();
            assert_eq!(detected.number, number);
        }

        let v3 = SchemaVersion::find(QueueDirection::Outgoing, 3).unwrap();
        let detected =
            detect_version(&schema_for(v3.columns), QueueDirection::Outgoing, MatchPolicy::Subset)
                .unwrap();
        assert_eq!(detected.number, 3);
    }

    #[test]
    fn test_direction_is_respected() {
        let outgoing_v1 = SchemaVersion::find(QueueDirection::Outgoing, 1).unwrap();
        let schema = schema_for(outgoing_v1.columns);
        assert!(detect_version(&schema, QueueDirection::Incoming, MatchPolicy::Exact).is_err());
    }

    #[test]
    fn test_validate_schema_collects_all_issues() {
        let schema = QueueTableSchema::new("  ", vec![])
            .with_column("MessageNumber", "_fld1")
            .with_column("MessageNumber", "_fld2")
            .with_column("Sender", "")
            .with_column("Bogus", "_fld4");

        let issues = validate_schema(&schema, MatchPolicy::Exact).unwrap_err();
        assert_eq!(
            issues,
            vec![
                ConfigurationIssue::MissingTableName,
                ConfigurationIssue::DuplicateColumn {
                    logical: "MessageNumber".to_string()
                },
                ConfigurationIssue::EmptyColumnName {
                    logical: "Sender".to_string()
                },
                ConfigurationIssue::UnknownColumn {
                    logical: "Bogus".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_validate_schema_accepts_clean_schema() {
        let v12 = SchemaVersion::find(QueueDirection::Incoming, 12).unwrap();
        assert!(validate_schema(&schema_for(v12.columns), MatchPolicy::Exact).is_ok());
    }

    #[test]
    fn test_subset_policy_tolerates_unknown_columns() {
        let schema = QueueTableSchema::new("_inforg42", vec![]).with_column("Payload", "_fld9");
        assert!(validate_schema(&schema, MatchPolicy::Subset).is_ok());
    }
}
