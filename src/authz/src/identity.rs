//! Authoritative identity store boundary
//!
//! Used by the enforcer to confirm that the unit named in a request's claims
//! is still the unit the principal's account belongs to.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use rowscope_core::UnitId;
use std::sync::Arc;

/// Lookup of a principal's unit of record
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Unit the principal's account belongs to, `None` if it has no unit
    async fn unit_of(&self, principal_id: &str) -> Result<Option<UnitId>>;
}

/// In-memory identity store
#[derive(Clone, Default)]
pub struct InMemoryIdentityStore {
    units: Arc<DashMap<String, UnitId>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `principal_id` to `unit_id`
    pub fn assign(&self, principal_id: impl Into<String>, unit_id: impl Into<UnitId>) {
        self.units.insert(principal_id.into(), unit_id.into());
    }

    /// Remove the principal's unit assignment
    pub fn unassign(&self, principal_id: &str) -> Option<UnitId> {
        self.units.remove(principal_id).map(|(_, unit)| unit)
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn unit_of(&self, principal_id: &str) -> Result<Option<UnitId>> {
        Ok(self.units.get(principal_id).map(|u| u.value().clone()))
    }
}
