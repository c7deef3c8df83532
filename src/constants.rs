//! # System Constants
//!
//! Placeholder tokens, database object naming templates and operational defaults
//! shared by the script builders, configurator and runtime components.

/// Placeholder tokens substituted by the script builders
pub mod placeholders {
    pub const TABLE_NAME: &str = "{TABLE_NAME}";
    pub const SEQUENCE_NAME: &str = "{SEQUENCE_NAME}";
    pub const TRIGGER_NAME: &str = "{TRIGGER_NAME}";
    pub const FUNCTION_NAME: &str = "{FUNCTION_NAME}";
}

/// Naming suffixes for provisioned database objects, appended to the lowercased table name
pub mod object_names {
    pub const SEQUENCE_SUFFIX: &str = "_so";
    pub const TRIGGER_SUFFIX: &str = "_tr_insert";
    pub const FUNCTION_SUFFIX: &str = "_fn_insert";
    pub const RENUMBER_TABLE_SUFFIX: &str = "_EnumCopy";
}

/// Operational defaults
pub mod defaults {
    /// Rows dequeued per transaction
    pub const BATCH_SIZE: u32 = 1000;
    /// Upper bound for any single statement
    pub const COMMAND_TIMEOUT_SECONDS: u64 = 60;
    pub const POLL_INTERVAL_MS: u64 = 10_000;
    pub const RETRY_DELAY_MS: u64 = 10_000;
    pub const YEAR_OFFSET: i32 = 0;
}
