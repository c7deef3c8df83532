//! # Queue Message
//!
//! The in-flight record passed from the consumer through the handler chain, and
//! from callers into the producer. It carries the superset of fields across all
//! schema versions; fields a table does not have stay zero-valued.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Ordinal assigned by the database sequence; ignored on insert
    pub message_number: i64,
    /// Unique id, generated on insert when nil
    pub uuid: Uuid,
    /// Opaque header string, usually a JSON object
    pub headers: String,
    pub sender: String,
    pub recipients: String,
    pub message_type: String,
    pub message_body: String,
    /// Creation timestamp; the producer stamps the local time when unset
    pub date_time_stamp: Option<chrono::NaiveDateTime>,
    pub operation_type: String,
    pub error_description: String,
    pub error_count: i32,
    /// Business object the message describes; nil when the table has no such column
    pub reference: Uuid,
}

impl Message {
    /// Create a message with a type and body
    pub fn new(message_type: impl Into<String>, message_body: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            message_body: message_body.into(),
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_recipients(mut self, recipients: impl Into<String>) -> Self {
        self.recipients = recipients.into();
        self
    }

    pub fn with_operation_type(mut self, operation_type: impl Into<String>) -> Self {
        self.operation_type = operation_type.into();
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_reference(mut self, reference: Uuid) -> Self {
        self.reference = reference;
        self
    }

    /// Parse headers as a JSON object; empty headers give an empty map
    pub fn headers_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        if self.headers.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&self.headers)
    }

    /// Set one header key, keeping the others
    pub fn with_header(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, serde_json::Error> {
        let mut headers = self.headers_map()?;
        headers.insert(key.into(), value.into());
        self.headers = Value::Object(headers).to_string();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_are_zero_valued() {
        let message = Message::new("Order", "{}").with_sender("A");

        assert_eq!(message.message_number, 0);
        assert!(message.uuid.is_nil());
        assert_eq!(message.sender, "A");
        assert_eq!(message.message_type, "Order");
        assert_eq!(message.message_body, "{}");
        assert!(message.date_time_stamp.is_none());
        assert_eq!(message.error_count, 0);
    }

    #[test]
    fn test_headers_round_trip() {
        let message = Message::new("Order", "{}")
            .with_header("content-type", "application/json")
            .unwrap()
            .with_header("attempt", 2)
            .unwrap();

        let headers = message.headers_map().unwrap();
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["attempt"], 2);
    }

    #[test]
    fn test_non_json_headers_are_an_error() {
        let mut message = Message::new("Order", "{}");
        message.headers = "not json".to_string();
        assert!(message.headers_map().is_err());
        assert!(message.with_header("k", "v").is_err());
    }
}
