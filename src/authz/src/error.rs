//! Error types for scope resolution and enforcement

use thiserror::Error;

/// Scope enforcement errors
///
/// None of these are transient: they are authorization decisions and are
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// An operation needs a scope context and none is installed
    #[error("Scope context required: {0}")]
    ScopeContextRequired(String),

    /// Caller-supplied target falls outside the resolved scope
    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    /// Context fails basic shape validation
    #[error("Invalid scope context: {0}")]
    InvalidScopeContext(String),

    /// Unrecognized scope kind reached enforcement
    #[error("Invalid scope type: {0}")]
    InvalidScopeType(String),

    /// Unit in the context does not match the principal's unit of record
    #[error("Scope integrity violation: {0}")]
    ScopeIntegrityViolation(String),

    /// Global operation invoked without an explicit opt-out
    #[error("Strict mode violation: {0}")]
    StrictModeViolation(String),

    /// Audit record for an unscoped operation could not be written
    #[error("Audit failed: {0}")]
    AuditFailed(String),

    /// Identity store lookup failed
    #[error("Identity store error: {0}")]
    IdentityStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ScopeError {
    /// HTTP status the edge should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ScopeContextRequired(_) => 401,
            Self::ScopeViolation(_) | Self::ScopeIntegrityViolation(_) => 403,
            Self::InvalidScopeContext(_) => 400,
            Self::InvalidScopeType(_)
            | Self::StrictModeViolation(_)
            | Self::AuditFailed(_)
            | Self::IdentityStore(_)
            | Self::Configuration(_) => 500,
        }
    }

    /// Whether the error must be reported as a security event
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::ScopeViolation(_) | Self::ScopeIntegrityViolation(_) | Self::AuditFailed(_)
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ScopeContextRequired(_) => "scope_context_required",
            Self::ScopeViolation(_) => "scope_violation",
            Self::InvalidScopeContext(_) => "invalid_scope_context",
            Self::InvalidScopeType(_) => "invalid_scope_type",
            Self::ScopeIntegrityViolation(_) => "scope_integrity_violation",
            Self::StrictModeViolation(_) => "strict_mode_violation",
            Self::AuditFailed(_) => "audit_failed",
            Self::IdentityStore(_) => "identity_store_error",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Result type for scope operations
pub type Result<T> = std::result::Result<T, ScopeError>;
