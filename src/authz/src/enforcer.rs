//! Scoped query enforcement
//!
//! Every scope-sensitive data operation goes through [`ScopedQueryEnforcer`].
//! It reads the request's [`ScopeContext`] and turns it into a
//! [`ScopeFilter`]:
//!
//! | context | predicate |
//! |---|---|
//! | `GLOBAL` | none |
//! | `UNIT` | `unit_id = context.unit_id` |
//! | `SELF` | `owner_id = context.principal_id` |
//!
//! Global operations (maintenance, cross-unit reporting) bypass the filter
//! only through an [`UnscopedOperation`], and each use is audited before any
//! data is returned.
//!
//! Each operation reads the task-local context. The `_for` variants take the
//! context as a parameter instead, for code that threads a
//! [`crate::RequestScopes`] request id rather than running inside the request
//! future.

use crate::audit::{AuditRecord, AuditSink};
use crate::config::ScopeConfig;
use crate::context::{RawScopeContext, ScopeContext};
use crate::error::{Result, ScopeError};
use crate::identity::IdentityStore;
use crate::propagator::ContextPropagator;
use rowscope_core::{PrincipalId, UnitId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tracing target for security events
pub const SECURITY_TARGET: &str = "rowscope::security";

/// A row that can be placed inside or outside a scope
pub trait ScopedRecord {
    /// Unit the row belongs to
    fn unit_id(&self) -> Option<&str>;

    /// Principal that owns the row
    fn owner_id(&self) -> Option<&str>;
}

/// Column names backing the scope predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeColumns {
    pub unit_id: &'static str,
    pub owner_id: &'static str,
}

impl Default for ScopeColumns {
    fn default() -> Self {
        Self {
            unit_id: "unit_id",
            owner_id: "owner_id",
        }
    }
}

/// Equality predicate a storage backend must add to its query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePredicate {
    pub column: &'static str,
    pub value: String,
}

impl ScopePredicate {
    /// Render as a positional SQL condition (`unit_id = $3`)
    pub fn to_sql(&self, param_index: usize) -> String {
        format!("{} = ${}", self.column, param_index)
    }
}

/// Row-level restriction derived from a scope context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeFilter {
    /// No restriction
    Unrestricted,
    /// Rows of one unit
    Unit(UnitId),
    /// Rows owned by one principal
    Owner(PrincipalId),
}

impl ScopeFilter {
    /// Derive the filter for a context
    pub fn from_context(context: &ScopeContext) -> Self {
        match context {
            ScopeContext::Global { .. } => Self::Unrestricted,
            ScopeContext::Unit { unit_id, .. } => Self::Unit(unit_id.clone()),
            ScopeContext::SelfOnly { principal_id } => Self::Owner(principal_id.clone()),
        }
    }

    /// Whether no predicate is injected
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Whether `record` is inside the scope
    pub fn permits<R: ScopedRecord + ?Sized>(&self, record: &R) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Unit(unit_id) => record.unit_id() == Some(unit_id.as_str()),
            Self::Owner(principal_id) => record.owner_id() == Some(principal_id.as_str()),
        }
    }

    /// Keep rows inside the scope, returning them and the number dropped
    pub fn retain<R: ScopedRecord>(&self, rows: Vec<R>) -> (Vec<R>, usize) {
        if self.is_unrestricted() {
            return (rows, 0);
        }

        let total = rows.len();
        let kept: Vec<R> = rows.into_iter().filter(|r| self.permits(r)).collect();
        let dropped = total - kept.len();
        (kept, dropped)
    }

    /// Predicate to inject into a query, `None` when unrestricted
    pub fn predicate(&self, columns: &ScopeColumns) -> Option<ScopePredicate> {
        match self {
            Self::Unrestricted => None,
            Self::Unit(unit_id) => Some(ScopePredicate {
                column: columns.unit_id,
                value: unit_id.clone(),
            }),
            Self::Owner(principal_id) => Some(ScopePredicate {
                column: columns.owner_id,
                value: principal_id.clone(),
            }),
        }
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => write!(f, "unrestricted"),
            Self::Unit(unit_id) => write!(f, "unit_id = {}", unit_id),
            Self::Owner(principal_id) => write!(f, "owner_id = {}", principal_id),
        }
    }
}

/// Explicit opt-out from scope enforcement
///
/// Constructing one is the only way to run a query without row-level
/// narrowing, and each use writes an audit record.
///
/// ```
/// use rowscope_authz::UnscopedOperation;
///
/// let op = UnscopedOperation::new("reports.cross_unit_totals", "monthly board report");
/// assert_eq!(op.name(), "reports.cross_unit_totals");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnscopedOperation {
    name: String,
    reason: String,
}

impl UnscopedOperation {
    /// Declare an unscoped operation with its qualified name and justification
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Qualified operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared justification
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Enforcement point for scope-sensitive data operations
#[derive(Clone)]
pub struct ScopedQueryEnforcer {
    config: ScopeConfig,
    audit: Arc<dyn AuditSink>,
    identity: Option<Arc<dyn IdentityStore>>,
}

impl ScopedQueryEnforcer {
    /// Create an enforcer writing escape-hatch records to `audit`
    pub fn new(config: ScopeConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            audit,
            identity: None,
        }
    }

    /// Attach the identity store used for unit integrity checks
    pub fn with_identity_store(mut self, identity: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Enforcement configuration
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Filter for the current request
    pub async fn filter(&self) -> Result<ScopeFilter> {
        let context = ContextPropagator::get()?;
        self.filter_for(&context).await
    }

    /// Filter for an explicitly threaded context
    pub async fn filter_for(&self, context: &ScopeContext) -> Result<ScopeFilter> {
        context.validate()?;
        self.verify_integrity(context).await?;
        Ok(ScopeFilter::from_context(context))
    }

    /// Filter for a context received in wire form (background jobs)
    pub async fn filter_for_raw(&self, raw: RawScopeContext) -> Result<ScopeFilter> {
        let context = ScopeContext::try_from(raw)?;
        self.filter_for(&context).await
    }

    /// Run a scoped read
    ///
    /// `fetch` receives the filter to apply. Rows it returns outside the scope
    /// are dropped and reported when `filter_returned_rows` is enabled.
    pub async fn scoped_read<R, E, F, Fut>(&self, operation: &str, fetch: F) -> std::result::Result<Vec<R>, E>
    where
        R: ScopedRecord,
        E: From<ScopeError>,
        F: FnOnce(ScopeFilter) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<R>, E>>,
    {
        let context = ContextPropagator::get()?;
        self.scoped_read_for(&context, operation, fetch).await
    }

    /// [`Self::scoped_read`] for an explicitly threaded context
    pub async fn scoped_read_for<R, E, F, Fut>(
        &self,
        context: &ScopeContext,
        operation: &str,
        fetch: F,
    ) -> std::result::Result<Vec<R>, E>
    where
        R: ScopedRecord,
        E: From<ScopeError>,
        F: FnOnce(ScopeFilter) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<R>, E>>,
    {
        let filter = self.filter_for(context).await?;
        debug!(operation, filter = %filter, "scoped read");

        let rows = fetch(filter.clone()).await?;
        if !self.config.filter_returned_rows {
            return Ok(rows);
        }

        let (rows, dropped) = filter.retain(rows);
        if dropped > 0 {
            warn!(
                target: SECURITY_TARGET,
                operation,
                filter = %filter,
                dropped,
                "storage returned rows outside the resolved scope"
            );
        }

        Ok(rows)
    }

    /// Reject a caller-supplied target outside the current scope
    pub async fn check_target<R: ScopedRecord + ?Sized>(&self, operation: &str, record: &R) -> Result<()> {
        let context = ContextPropagator::get()?;
        self.check_target_for(&context, operation, record).await
    }

    /// [`Self::check_target`] for an explicitly threaded context
    pub async fn check_target_for<R: ScopedRecord + ?Sized>(
        &self,
        context: &ScopeContext,
        operation: &str,
        record: &R,
    ) -> Result<()> {
        let filter = self.filter_for(context).await?;
        if filter.permits(record) {
            return Ok(());
        }

        warn!(
            target: SECURITY_TARGET,
            operation,
            filter = %filter,
            target_unit = record.unit_id().unwrap_or("-"),
            target_owner = record.owner_id().unwrap_or("-"),
            "target outside resolved scope"
        );
        Err(ScopeError::ScopeViolation(format!(
            "{}: target is outside scope ({})",
            operation, filter
        )))
    }

    /// Reject a caller-requested unit outside the current scope
    pub async fn check_unit(&self, unit_id: &str) -> Result<()> {
        let context = ContextPropagator::get()?;
        self.check_unit_for(&context, unit_id).await
    }

    /// [`Self::check_unit`] for an explicitly threaded context
    pub async fn check_unit_for(&self, context: &ScopeContext, unit_id: &str) -> Result<()> {
        match self.filter_for(context).await? {
            ScopeFilter::Unrestricted => Ok(()),
            ScopeFilter::Unit(own) if own == unit_id => Ok(()),
            filter => {
                warn!(
                    target: SECURITY_TARGET,
                    requested_unit = %unit_id,
                    filter = %filter,
                    "requested unit outside resolved scope"
                );
                Err(ScopeError::ScopeViolation(format!(
                    "unit {} is outside scope ({})",
                    unit_id, filter
                )))
            }
        }
    }

    /// Run a global operation without an opt-out
    ///
    /// In strict mode this always fails with `StrictModeViolation`. Otherwise
    /// the operation is narrowed to the caller's own scope.
    pub async fn global<T, E, F, Fut>(&self, operation: &str, run: F) -> std::result::Result<T, E>
    where
        E: From<ScopeError>,
        F: FnOnce(ScopeFilter) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.reject_in_strict_mode(operation)?;
        let context = ContextPropagator::get()?;
        self.global_for(&context, operation, run).await
    }

    /// [`Self::global`] for an explicitly threaded context
    pub async fn global_for<T, E, F, Fut>(
        &self,
        context: &ScopeContext,
        operation: &str,
        run: F,
    ) -> std::result::Result<T, E>
    where
        E: From<ScopeError>,
        F: FnOnce(ScopeFilter) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.reject_in_strict_mode(operation)?;

        let filter = self.filter_for(context).await?;
        warn!(operation, filter = %filter, "global operation narrowed to caller scope");
        run(filter).await
    }

    /// Run an operation with no row-level narrowing, audited
    ///
    /// Exactly one audit record is written before `run` executes. If the sink
    /// fails, the operation does not run.
    pub async fn unscoped<T, E, F, Fut>(&self, operation: &UnscopedOperation, run: F) -> std::result::Result<T, E>
    where
        E: From<ScopeError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let context = ContextPropagator::get()?;
        self.unscoped_for(&context, operation, run).await
    }

    /// [`Self::unscoped`] for an explicitly threaded context
    pub async fn unscoped_for<T, E, F, Fut>(
        &self,
        context: &ScopeContext,
        operation: &UnscopedOperation,
        run: F,
    ) -> std::result::Result<T, E>
    where
        E: From<ScopeError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        context.validate()?;
        let Some(actor) = context.principal_id() else {
            return Err(ScopeError::ScopeContextRequired(format!(
                "{} needs an identified principal to audit",
                operation.name()
            ))
            .into());
        };

        let record = AuditRecord::new(actor, operation.name(), operation.reason());
        if let Err(e) = self.audit.record(record).await {
            error!(
                target: SECURITY_TARGET,
                actor = %actor,
                operation = %operation.name(),
                error = %e,
                "audit sink failed, unscoped operation blocked"
            );
            return Err(ScopeError::AuditFailed(format!("{}: {}", operation.name(), e)).into());
        }

        info!(actor = %actor, operation = %operation.name(), "running unscoped operation");
        run().await
    }

    fn reject_in_strict_mode(&self, operation: &str) -> Result<()> {
        if !self.config.strict_mode {
            return Ok(());
        }

        error!(operation, "global operation invoked without an unscoped opt-out");
        Err(ScopeError::StrictModeViolation(format!(
            "{} requires an explicit UnscopedOperation",
            operation
        )))
    }

    async fn verify_integrity(&self, context: &ScopeContext) -> Result<()> {
        let ScopeContext::Unit { principal_id, unit_id } = context else {
            return Ok(());
        };
        if !self.config.verify_unit_integrity {
            return Ok(());
        }

        let identity = self.identity.as_ref().ok_or_else(|| {
            ScopeError::Configuration(
                "unit integrity verification enabled without an identity store".to_string(),
            )
        })?;

        let actual = identity.unit_of(principal_id).await?;
        if actual.as_deref() == Some(unit_id.as_str()) {
            return Ok(());
        }

        error!(
            target: SECURITY_TARGET,
            principal_id = %principal_id,
            claimed_unit = %unit_id,
            actual_unit = actual.as_deref().unwrap_or("-"),
            "claimed unit does not match unit of record"
        );
        Err(ScopeError::ScopeIntegrityViolation(format!(
            "principal {} does not belong to unit {}",
            principal_id, unit_id
        )))
    }
}
