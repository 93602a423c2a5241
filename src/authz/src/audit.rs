//! Audit trail for unscoped (escape hatch) operations
//!
//! Every use of [`crate::UnscopedOperation`] produces exactly one
//! [`AuditRecord`], written before any data is returned. A sink that fails
//! to write aborts the operation.

use crate::error::{Result, ScopeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresAuditSink;

/// Maximum records kept by [`InMemoryAuditSink`]
const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// One exercise of the escape hatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record ID
    pub id: String,

    /// Principal who invoked the operation
    pub actor: String,

    /// Qualified operation name
    pub operation: String,

    /// Justification declared at the call site
    pub reason: String,

    /// When the operation was invoked
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a record stamped with the current time
    pub fn new(
        actor: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor: actor.into(),
            operation: operation.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one record; must not return `Ok` unless the record is stored
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Bounded in-memory audit buffer
#[derive(Clone)]
pub struct InMemoryAuditSink {
    buffer: Arc<RwLock<Vec<AuditRecord>>>,
    capacity: usize,
}

impl InMemoryAuditSink {
    /// Create a sink with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a sink keeping at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of stored records, oldest first
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.buffer.read().await.clone()
    }

    /// Records written by `actor`
    pub async fn records_for_actor(&self, actor: &str) -> Vec<AuditRecord> {
        self.buffer
            .read()
            .await
            .iter()
            .filter(|r| r.actor == actor)
            .cloned()
            .collect()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Whether no records are stored
    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        buffer.push(record);

        if buffer.len() > self.capacity {
            let overflow = buffer.len() - self.capacity;
            buffer.drain(0..overflow);
        }

        Ok(())
    }
}

/// Writes audit records to the `rowscope::audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let payload = serde_json::to_string(&record)
            .map_err(|e| ScopeError::AuditFailed(format!("Failed to serialize audit record: {}", e)))?;

        info!(
            target: "rowscope::audit",
            actor = %record.actor,
            operation = %record.operation,
            timestamp = %record.timestamp.to_rfc3339(),
            record = %payload,
            "unscoped operation"
        );

        Ok(())
    }
}
