//! # Queue Error Types
//!
//! Structured error handling for queue provisioning, production and consumption
//! using thiserror instead of `Box<dyn Error>` patterns.
//!
//! Runtime errors (`QueueError`) abort the current transaction and propagate to the
//! owning poll loop. Provisioning problems are collected as a list of
//! [`ConfigurationIssue`] values so they can be fixed together.

use thiserror::Error;

/// Result alias used throughout the crate
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Runtime queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("No schema version matches queue table {table} ({direction}): columns [{}]", .columns.join(", "))]
    InterfaceVersion {
        table: String,
        direction: String,
        columns: Vec<String>,
    },

    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Mapping error: column {column}: {message}")]
    Mapping { column: String, message: String },

    #[error("Handler {handler} failed: {message}")]
    Handler { handler: String, message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Queue table {table} is not configured: {}", format_issues(.issues))]
    Configuration {
        table: String,
        issues: Vec<ConfigurationIssue>,
    },

    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Script rendering error: {message}")]
    Script { message: String },
}

impl QueueError {
    /// Create a database error
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create a row mapping error
    pub fn mapping(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings {
            message: message.into(),
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Name the operation a database error came from. Other variants pass through.
    pub fn in_operation(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Database { message, .. } => Self::Database {
                operation: operation.into(),
                message,
            },
            other => other,
        }
    }

    /// Connection and timeout failures; the poll loop retries these after a delay
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::Timeout { .. })
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::timeout("acquire_connection", 0),
            sqlx::Error::RowNotFound => Self::database("fetch", "row not found"),
            other => Self::database("sqlx", other.to_string()),
        }
    }
}

impl From<config::ConfigError> for QueueError {
    fn from(err: config::ConfigError) -> Self {
        Self::settings(err.to_string())
    }
}

/// A single provisioning problem. Configuration reports all of them at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationIssue {
    #[error("Queue table name is empty")]
    MissingTableName,

    #[error("Physical column name is empty for logical column {logical}")]
    EmptyColumnName { logical: String },

    #[error("Logical column {logical} is mapped more than once")]
    DuplicateColumn { logical: String },

    #[error("Unknown logical column {logical}")]
    UnknownColumn { logical: String },

    #[error("No schema version matches table {table}")]
    UnsupportedInterface { table: String },

    #[error("Existence probe for {object} failed: {message}")]
    ProbeFailed { object: String, message: String },

    #[error("Provisioning statement failed: {message}")]
    StatementFailed { message: String },

    #[error("Rollback failed: {message}")]
    RollbackFailed { message: String },
}

fn format_issues(issues: &[ConfigurationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(QueueError::database("dequeue", "connection reset").is_transient());
        assert!(QueueError::timeout("insert", 10).is_transient());
        assert!(!QueueError::mapping("MessageNumber", "expected integer").is_transient());
        assert!(!QueueError::handler("kafka", "broker down").is_transient());
    }

    #[test]
    fn test_sqlx_errors_keep_their_operation() {
        let error = QueueError::from(sqlx::Error::RowNotFound).in_operation("execute_scalar");
        match &error {
            QueueError::Database { operation, message } => {
                assert_eq!(operation, "execute_scalar");
                assert_eq!(message, "row not found");
            }
            other => panic!("expected database error, got {other:?}"),
        }
        assert!(error.is_transient());

        let pool = QueueError::from(sqlx::Error::PoolTimedOut).in_operation("query_rows");
        assert!(matches!(
            pool,
            QueueError::Timeout { ref operation, .. } if operation == "acquire_connection"
        ));

        let protocol = QueueError::from(sqlx::Error::Protocol("bad frame".to_string()))
            .in_operation("begin");
        assert!(protocol.to_string().contains("begin: "));
        assert!(protocol.to_string().contains("bad frame"));
    }

    #[test]
    fn test_configuration_error_lists_every_issue() {
        let error = QueueError::Configuration {
            table: "_inforg10".to_string(),
            issues: vec![
                ConfigurationIssue::MissingTableName,
                ConfigurationIssue::EmptyColumnName {
                    logical: "Sender".to_string(),
                },
            ],
        };

        let text = error.to_string();
        assert!(text.contains("Queue table name is empty"));
        assert!(text.contains("logical column Sender"));
    }

    #[test]
    fn test_interface_version_error_display() {
        let error = QueueError::InterfaceVersion {
            table: "_inforg10".to_string(),
            direction: "outgoing".to_string(),
            columns: vec!["Foo".to_string(), "Bar".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "No schema version matches queue table _inforg10 (outgoing): columns [Foo, Bar]"
        );
    }
}
