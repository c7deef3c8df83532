//! # Queue Configurator
//!
//! Idempotently provisions the database-native ordering primitives that turn a
//! plain table into an ordered queue.
//!
//! ## Overview
//!
//! State per table, driven by existence probes:
//!
//! ```text
//! Unprovisioned --configure--> Provisioning --commit--> Provisioned
//!                                   |
//!                                   +--any failure--> rollback, state unchanged
//! ```
//!
//! - **Incoming** queues need the ordering sequence. Provisioning creates it and
//!   renumbers existing rows by (ordinal, uuid) under an exclusive table lock.
//! - **Outgoing** queues additionally get an insert trigger that stamps each new
//!   row with the next sequence value, so producers outside this crate never race
//!   on an application-held counter.
//!
//! All provisioning statements run in one `SERIALIZABLE` transaction. Problems are
//! returned as a complete list of [`ConfigurationIssue`] values.
//!
//! ## Operational constraint
//!
//! Renumbering takes an exclusive table lock. Run configuration while no producers
//! or consumers are active against the same table; this is not enforced here.

use super::{IsolationLevel, QueueConnection};
use crate::error::{ConfigurationIssue, QueueError, QueueResult};
use crate::logging::log_queue_operation;
use crate::query_builder::{builder_for, QueueScripts};
use crate::schema::{QueueDirection, QueueTableSchema, SchemaVersion};
use crate::validation::{detect_version, validate_schema, MatchPolicy};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Unprovisioned,
    Provisioning,
    Provisioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Every ordering primitive already existed; nothing was executed
    AlreadyProvisioned,
    /// Provisioning transaction committed
    Provisioned,
}

pub struct QueueConfigurator {
    connection: Box<dyn QueueConnection>,
    schema: QueueTableSchema,
    direction: QueueDirection,
    version: SchemaVersion,
    scripts: QueueScripts,
}

impl QueueConfigurator {
    /// Validate the schema, detect its version and render scripts.
    ///
    /// Refused with [`QueueError::Configuration`] listing every structural problem,
    /// plus [`ConfigurationIssue::UnsupportedInterface`] when no schema version matches.
    pub fn new(
        connection: Box<dyn QueueConnection>,
        schema: QueueTableSchema,
        direction: QueueDirection,
        policy: MatchPolicy,
    ) -> QueueResult<Self> {
        let mut issues = validate_schema(&schema, policy).err().unwrap_or_default();
        let detected = detect_version(&schema, direction, policy);
        if let Err(e) = &detected {
            debug!(error = %e, "Schema version detection failed");
            issues.push(ConfigurationIssue::UnsupportedInterface {
                table: schema.table_name().to_string(),
            });
        }
        if !issues.is_empty() {
            return Err(QueueError::Configuration {
                table: schema.table_name().to_string(),
                issues,
            });
        }
        let version = detected?;
        let scripts = builder_for(connection.provider()).build(&schema, &version)?;

        Ok(Self {
            connection,
            schema,
            direction,
            version,
            scripts,
        })
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn scripts(&self) -> &QueueScripts {
        &self.scripts
    }

    pub fn into_connection(self) -> Box<dyn QueueConnection> {
        self.connection
    }

    /// Provision according to the queue's direction
    pub async fn configure(&mut self) -> Result<ProvisionOutcome, Vec<ConfigurationIssue>> {
        match self.direction {
            QueueDirection::Incoming => self.configure_incoming().await,
            QueueDirection::Outgoing => self.configure_outgoing().await,
        }
    }

    /// Ensure the ordering sequence exists, renumbering existing rows on first run
    #[instrument(skip(self), fields(table = %self.schema.table_name()))]
    pub async fn configure_incoming(&mut self) -> Result<ProvisionOutcome, Vec<ConfigurationIssue>> {
        let sequence_sql = self.scripts.sequence_exists.clone();
        let sequence_exists = self
            .probe("sequence", &sequence_sql)
            .await
            .map_err(|issue| vec![issue])?;

        if sequence_exists {
            debug!("Incoming queue already provisioned");
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }

        let statements = self.scripts.incoming_ddl();
        self.provision(&statements).await
    }

    /// Ensure the ordering sequence and the insert trigger exist
    #[instrument(skip(self), fields(table = %self.schema.table_name()))]
    pub async fn configure_outgoing(&mut self) -> Result<ProvisionOutcome, Vec<ConfigurationIssue>> {
        let sequence_sql = self.scripts.sequence_exists.clone();
        let trigger_sql = self.scripts.trigger_exists.clone();

        let mut issues = Vec::new();
        let sequence_exists = self
            .probe("sequence", &sequence_sql)
            .await
            .unwrap_or_else(|issue| {
                issues.push(issue);
                false
            });
        let trigger_exists = self
            .probe("trigger", &trigger_sql)
            .await
            .unwrap_or_else(|issue| {
                issues.push(issue);
                false
            });

        if !issues.is_empty() {
            return Err(issues);
        }

        if sequence_exists && trigger_exists {
            debug!("Outgoing queue already provisioned");
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }

        let statements = self.scripts.outgoing_ddl();
        self.provision(&statements).await
    }

    /// Current provisioning state from the existence probes
    pub async fn probe_state(&mut self) -> QueueResult<QueueState> {
        let sequence_sql = self.scripts.sequence_exists.clone();
        let trigger_sql = self.scripts.trigger_exists.clone();

        let sequence_exists = self.exists(&sequence_sql).await?;
        let provisioned = match self.direction {
            QueueDirection::Incoming => sequence_exists,
            QueueDirection::Outgoing => sequence_exists && self.exists(&trigger_sql).await?,
        };

        Ok(if provisioned {
            QueueState::Provisioned
        } else {
            QueueState::Unprovisioned
        })
    }

    async fn exists(&mut self, sql: &str) -> QueueResult<bool> {
        let value = self.connection.execute_scalar(sql).await?;
        Ok(value.is_some_and(|v| !v.is_null()))
    }

    async fn probe(&mut self, object: &str, sql: &str) -> Result<bool, ConfigurationIssue> {
        self.exists(sql).await.map_err(|e| {
            warn!(object = %object, error = %e, "Existence probe failed");
            ConfigurationIssue::ProbeFailed {
                object: object.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Run provisioning statements as one serializable transaction
    async fn provision(
        &mut self,
        statements: &[String],
    ) -> Result<ProvisionOutcome, Vec<ConfigurationIssue>> {
        info!(
            table = %self.schema.table_name(),
            version = %self.version,
            statements = statements.len(),
            state = ?QueueState::Provisioning,
            "🔧 Provisioning queue table"
        );

        if let Err(e) = self.connection.begin(IsolationLevel::Serializable).await {
            return Err(vec![ConfigurationIssue::StatementFailed {
                message: e.to_string(),
            }]);
        }

        let mut issues = Vec::new();
        for statement in statements {
            if let Err(e) = self.connection.execute_non_query(statement, &[]).await {
                error!(error = %e, statement = %statement, "Provisioning statement failed");
                issues.push(ConfigurationIssue::StatementFailed {
                    message: e.to_string(),
                });
                break;
            }
        }

        if issues.is_empty() {
            return match self.connection.commit().await {
                Ok(()) => {
                    log_queue_operation(
                        "provision",
                        self.schema.table_name(),
                        "provisioned",
                        Some(statements.len() as u64),
                        Some(&self.version.to_string()),
                    );
                    Ok(ProvisionOutcome::Provisioned)
                }
                Err(e) => Err(vec![ConfigurationIssue::StatementFailed {
                    message: e.to_string(),
                }]),
            };
        }

        if let Err(e) = self.connection.rollback().await {
            issues.push(ConfigurationIssue::RollbackFailed {
                message: e.to_string(),
            });
        }
        Err(issues)
    }
}
