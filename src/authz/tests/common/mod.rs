//! Shared fixtures for integration tests

#![allow(dead_code)]

use rowscope_authz::{
    InMemoryAuditSink, ScopeConfig, ScopeError, ScopedQueryEnforcer, ScopedRecord,
    UnscopedOperation,
};
use std::sync::Arc;
use std::time::Duration;

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Benefit payment row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: u32,
    pub unit_id: String,
    pub owner_id: String,
    pub amount_cents: u64,
}

impl Payment {
    pub fn new(id: u32, unit_id: &str, owner_id: &str, amount_cents: u64) -> Self {
        Self {
            id,
            unit_id: unit_id.to_string(),
            owner_id: owner_id.to_string(),
            amount_cents,
        }
    }
}

impl ScopedRecord for Payment {
    fn unit_id(&self) -> Option<&str> {
        Some(&self.unit_id)
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.owner_id)
    }
}

/// Rows spread over units U1 and U2
pub fn payments() -> Vec<Payment> {
    vec![
        Payment::new(1, "U1", "u1", 10_000),
        Payment::new(2, "U1", "u3", 25_000),
        Payment::new(3, "U2", "u2", 5_000),
        Payment::new(4, "U2", "u4", 7_500),
        Payment::new(5, "U1", "u2", 1_000),
    ]
}

/// In-memory repository that applies the enforcer's filter like a storage
/// backend would
pub struct PaymentRepository {
    rows: Vec<Payment>,
    enforcer: ScopedQueryEnforcer,
}

impl PaymentRepository {
    pub fn new(enforcer: ScopedQueryEnforcer) -> Self {
        Self {
            rows: payments(),
            enforcer,
        }
    }

    pub fn enforcer(&self) -> &ScopedQueryEnforcer {
        &self.enforcer
    }

    /// Scoped listing with a suspension point inside the storage call
    pub async fn list(&self) -> Result<Vec<Payment>, ScopeError> {
        self.enforcer
            .scoped_read("payments.list", |filter| async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(self.rows.iter().filter(|r| filter.permits(*r)).cloned().collect())
            })
            .await
    }

    /// Scoped lookup of one payment by id
    pub async fn get(&self, id: u32) -> Result<Payment, ScopeError> {
        let payment = self
            .rows
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ScopeError::ScopeViolation(format!("payment {} not found", id)))?;

        self.enforcer.check_target("payments.get", &payment).await?;
        Ok(payment)
    }

    /// Cross-unit total without an opt-out
    pub async fn total_all_units(&self) -> Result<u64, ScopeError> {
        self.enforcer
            .global("payments.total_all_units", |_filter| async move {
                Ok(self.rows.iter().map(|r| r.amount_cents).sum())
            })
            .await
    }

    /// Cross-unit total through the audited escape hatch
    pub async fn total_all_units_audited(&self) -> Result<u64, ScopeError> {
        let op = UnscopedOperation::new("payments.total_all_units", "monthly reconciliation");
        self.enforcer
            .unscoped(&op, || async move { Ok(self.rows.iter().map(|r| r.amount_cents).sum()) })
            .await
    }
}

/// Repository with a strict enforcer and an in-memory audit sink
pub fn repository() -> (PaymentRepository, InMemoryAuditSink) {
    let sink = InMemoryAuditSink::new();
    let enforcer = ScopedQueryEnforcer::new(ScopeConfig::default(), Arc::new(sink.clone()));
    (PaymentRepository::new(enforcer), sink)
}
