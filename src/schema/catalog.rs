//! Read-only schema catalog lookup.

use super::QueueTableSchema;
use std::collections::HashMap;

/// Supplies queue table descriptions by queue name
pub trait SchemaCatalog: Send + Sync {
    fn queue_table(&self, name: &str) -> Option<QueueTableSchema>;

    fn queue_names(&self) -> Vec<String>;
}

/// In-process catalog, usually built from the `queues` configuration section
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaCatalog {
    tables: HashMap<String, QueueTableSchema>,
}

impl StaticSchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, schema: QueueTableSchema) -> Self {
        self.tables.insert(name.into(), schema);
        self
    }
}

impl SchemaCatalog for StaticSchemaCatalog {
    fn queue_table(&self, name: &str) -> Option<QueueTableSchema> {
        self.tables.get(name).cloned()
    }

    fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let catalog = StaticSchemaCatalog::new()
            .with_table("orders-out", QueueTableSchema::new("_inforg10", vec![]))
            .with_table("orders-in", QueueTableSchema::new("_inforg11", vec![]));

        assert_eq!(
            catalog.queue_table("orders-out").map(|s| s.table_name().to_string()),
            Some("_inforg10".to_string())
        );
        assert!(catalog.queue_table("missing").is_none());
        assert_eq!(catalog.queue_names(), vec!["orders-in", "orders-out"]);
    }
}
