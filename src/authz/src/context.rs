//! Scope context for one request
//!
//! The context is a closed tagged union. Every constructor rejects blank
//! principals and units, and the propagator and enforcer re-check
//! [`ScopeContext::validate`] before a context is used, so a UNIT scope
//! without a unit or a non-global scope without a principal never reaches a
//! query. Raw string kinds only exist at the serialization boundary
//! ([`RawScopeContext`]) and are rejected there.

use crate::error::{Result, ScopeError};
use rowscope_core::{PrincipalId, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Scope kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Unrestricted
    #[serde(rename = "GLOBAL")]
    Global,
    /// Restricted to one organizational unit
    #[serde(rename = "UNIT")]
    Unit,
    /// Restricted to records owned by the principal
    #[serde(rename = "SELF")]
    SelfOnly,
}

impl ScopeKind {
    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Unit => "UNIT",
            Self::SelfOnly => "SELF",
        }
    }

    /// Parse a canonical wire name
    ///
    /// Unlike claim decoding this is strict: an unknown kind at this point
    /// means a context was built or transported incorrectly.
    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "GLOBAL" => Ok(Self::Global),
            "UNIT" => Ok(Self::Unit),
            "SELF" => Ok(Self::SelfOnly),
            other => {
                error!(kind = %other, "unrecognized scope kind reached enforcement");
                Err(ScopeError::InvalidScopeType(other.to_string()))
            }
        }
    }

    /// Breadth rank, wider scopes rank higher
    pub fn breadth(&self) -> u8 {
        match self {
            Self::SelfOnly => 0,
            Self::Unit => 1,
            Self::Global => 2,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable access scope of one request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawScopeContext", into = "RawScopeContext")]
pub enum ScopeContext {
    /// No row-level restriction. `principal_id` is `None` for anonymous
    /// requests on public endpoints.
    Global { principal_id: Option<PrincipalId> },

    /// Rows belonging to `unit_id`
    Unit { principal_id: PrincipalId, unit_id: UnitId },

    /// Rows owned by `principal_id`
    SelfOnly { principal_id: PrincipalId },
}

impl ScopeContext {
    /// Context for an unauthenticated request on a public endpoint
    pub fn anonymous() -> Self {
        Self::Global { principal_id: None }
    }

    /// Global context for an authenticated principal or a background job
    pub fn system(principal_id: impl Into<PrincipalId>) -> Result<Self> {
        let principal_id = required(principal_id.into(), ScopeKind::Global, "principal_id")?;
        Ok(Self::Global {
            principal_id: Some(principal_id),
        })
    }

    /// Unit-scoped context
    pub fn unit(principal_id: impl Into<PrincipalId>, unit_id: impl Into<UnitId>) -> Result<Self> {
        Ok(Self::Unit {
            principal_id: required(principal_id.into(), ScopeKind::Unit, "principal_id")?,
            unit_id: required(unit_id.into(), ScopeKind::Unit, "unit_id")?,
        })
    }

    /// Owner-scoped context
    pub fn self_only(principal_id: impl Into<PrincipalId>) -> Result<Self> {
        Ok(Self::SelfOnly {
            principal_id: required(principal_id.into(), ScopeKind::SelfOnly, "principal_id")?,
        })
    }

    /// Check the shape invariants of a context built directly from its variants
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();

        match self {
            Self::Global { principal_id: Some(p) } if p.trim().is_empty() => {
                Err(blank_field(kind, "principal_id"))
            }
            Self::Unit { principal_id, .. } | Self::SelfOnly { principal_id }
                if principal_id.trim().is_empty() =>
            {
                Err(blank_field(kind, "principal_id"))
            }
            Self::Unit { unit_id, .. } if unit_id.trim().is_empty() => Err(blank_field(kind, "unit_id")),
            _ => Ok(()),
        }
    }

    /// Build a context from loose parts, validating the shape invariants
    pub fn from_parts(
        kind: ScopeKind,
        principal_id: Option<PrincipalId>,
        unit_id: Option<UnitId>,
    ) -> Result<Self> {
        let principal_id = principal_id.filter(|p| !p.trim().is_empty());
        let unit_id = unit_id.filter(|u| !u.trim().is_empty());

        match (kind, principal_id, unit_id) {
            (ScopeKind::Global, principal_id, None) => Ok(Self::Global { principal_id }),
            (ScopeKind::Global, _, Some(_)) => Err(ScopeError::InvalidScopeContext(
                "GLOBAL scope must not name a unit".to_string(),
            )),
            (ScopeKind::Unit, Some(principal_id), Some(unit_id)) => {
                Ok(Self::Unit { principal_id, unit_id })
            }
            (ScopeKind::Unit, _, None) => Err(ScopeError::InvalidScopeContext(
                "UNIT scope requires a unit_id".to_string(),
            )),
            (ScopeKind::SelfOnly, Some(principal_id), None) => Ok(Self::SelfOnly { principal_id }),
            (ScopeKind::SelfOnly, Some(_), Some(_)) => Err(ScopeError::InvalidScopeContext(
                "SELF scope must not name a unit".to_string(),
            )),
            (kind, None, _) => Err(ScopeError::InvalidScopeContext(format!(
                "{} scope requires a principal_id",
                kind
            ))),
        }
    }

    /// Scope kind
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Global { .. } => ScopeKind::Global,
            Self::Unit { .. } => ScopeKind::Unit,
            Self::SelfOnly { .. } => ScopeKind::SelfOnly,
        }
    }

    /// Principal the request runs on behalf of
    pub fn principal_id(&self) -> Option<&str> {
        match self {
            Self::Global { principal_id } => principal_id.as_deref(),
            Self::Unit { principal_id, .. } | Self::SelfOnly { principal_id } => Some(principal_id),
        }
    }

    /// Unit boundary, only present for UNIT scopes
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            Self::Unit { unit_id, .. } => Some(unit_id),
            _ => None,
        }
    }

    /// Whether the request carries no principal
    pub fn is_anonymous(&self) -> bool {
        self.principal_id().is_none()
    }
}

fn required(value: String, kind: ScopeKind, field: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(blank_field(kind, field));
    }
    Ok(value)
}

fn blank_field(kind: ScopeKind, field: &str) -> ScopeError {
    ScopeError::InvalidScopeContext(format!("{} scope requires a non-blank {}", kind, field))
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global { principal_id: None } => write!(f, "GLOBAL(anonymous)"),
            Self::Global { principal_id: Some(p) } => write!(f, "GLOBAL({})", p),
            Self::Unit { principal_id, unit_id } => write!(f, "UNIT({}@{})", principal_id, unit_id),
            Self::SelfOnly { principal_id } => write!(f, "SELF({})", principal_id),
        }
    }
}

/// Flat wire form of a [`ScopeContext`]
///
/// Used when a context rides along with a background job or crosses a
/// process boundary. Converting back re-validates everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScopeContext {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

impl TryFrom<RawScopeContext> for ScopeContext {
    type Error = ScopeError;

    fn try_from(raw: RawScopeContext) -> Result<Self> {
        let kind = ScopeKind::parse(&raw.kind)?;
        ScopeContext::from_parts(kind, raw.principal_id, raw.unit_id)
    }
}

impl From<ScopeContext> for RawScopeContext {
    fn from(context: ScopeContext) -> Self {
        let kind = context.kind().as_str().to_string();
        match context {
            ScopeContext::Global { principal_id } => Self {
                kind,
                principal_id,
                unit_id: None,
            },
            ScopeContext::Unit { principal_id, unit_id } => Self {
                kind,
                principal_id: Some(principal_id),
                unit_id: Some(unit_id),
            },
            ScopeContext::SelfOnly { principal_id } => Self {
                kind,
                principal_id: Some(principal_id),
                unit_id: None,
            },
        }
    }
}
