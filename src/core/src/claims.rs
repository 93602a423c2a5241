//! Verified identity claims
//!
//! Produced by the authentication subsystem after credential verification and
//! handed to the scope resolver as read-only input.

use crate::error::{CoreError, Result};
use serde::de::{Deserializer, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Data scope a principal's account declares
///
/// Decoding is lenient: anything that is not a known scope name (including a
/// missing field, `null` or a non-string value) becomes
/// [`DeclaredScope::Unrecognized`] instead of failing, so the resolver can
/// pick the strictest interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum DeclaredScope {
    /// Unrestricted access across all units
    Global,
    /// Access limited to one organizational unit
    Unit,
    /// Access limited to records the principal owns
    SelfOnly,
    /// Anything else the identity provider sent
    Unrecognized,
}

impl DeclaredScope {
    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Unit => "UNIT",
            Self::SelfOnly => "SELF",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl Default for DeclaredScope {
    fn default() -> Self {
        Self::Unrecognized
    }
}

impl<'de> Deserialize<'de> for DeclaredScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Name(String),
            Other(IgnoredAny),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Name(name) => Self::from(name),
            Wire::Other(_) => Self::Unrecognized,
        })
    }
}

impl FromStr for DeclaredScope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let scope = match s.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Self::Global,
            "UNIT" => Self::Unit,
            "SELF" => Self::SelfOnly,
            _ => Self::Unrecognized,
        };
        Ok(scope)
    }
}

impl From<String> for DeclaredScope {
    fn from(s: String) -> Self {
        match s.parse::<DeclaredScope>() {
            Ok(scope) => scope,
            Err(never) => match never {},
        }
    }
}

impl From<DeclaredScope> for String {
    fn from(scope: DeclaredScope) -> Self {
        scope.as_str().to_string()
    }
}

impl fmt::Display for DeclaredScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity attributes for the current principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identifier
    #[serde(default)]
    pub principal_id: String,

    /// Role names
    #[serde(default)]
    pub roles: HashSet<String>,

    /// Permission tokens (`module.action`, `module.*`, `*.*`)
    #[serde(default)]
    pub permissions: HashSet<String>,

    /// Scope declared for the principal's account
    #[serde(default)]
    pub declared_scope: DeclaredScope,

    /// Organizational unit, when the account belongs to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

impl Claims {
    /// Create claims for a principal with the given declared scope
    pub fn new(principal_id: impl Into<String>, declared_scope: DeclaredScope) -> Self {
        Self {
            principal_id: principal_id.into(),
            roles: HashSet::new(),
            permissions: HashSet::new(),
            declared_scope,
            unit_id: None,
        }
    }

    /// Set the organizational unit
    pub fn with_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.unit_id = Some(unit_id.into());
        self
    }

    /// Add a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Add a permission token
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Decode claims from a JSON payload
    pub fn from_json(payload: &str) -> Result<Self> {
        let claims: Claims = serde_json::from_str(payload)?;
        if claims.roles.iter().any(|r| r.trim().is_empty()) {
            return Err(CoreError::invalid_claims("role names must not be blank"));
        }
        Ok(claims)
    }

    /// Principal identifier, `None` when blank
    pub fn principal(&self) -> Option<&str> {
        non_blank(&self.principal_id)
    }

    /// Unit identifier, `None` when absent or blank
    pub fn unit(&self) -> Option<&str> {
        self.unit_id.as_deref().and_then(non_blank)
    }

    /// Whether the principal holds a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_declared_scope_parsing() {
        assert_eq!("GLOBAL".parse::<DeclaredScope>().unwrap(), DeclaredScope::Global);
        assert_eq!("unit".parse::<DeclaredScope>().unwrap(), DeclaredScope::Unit);
        assert_eq!(" Self ".parse::<DeclaredScope>().unwrap(), DeclaredScope::SelfOnly);
        assert_eq!("REGIONAL".parse::<DeclaredScope>().unwrap(), DeclaredScope::Unrecognized);
        assert_eq!("".parse::<DeclaredScope>().unwrap(), DeclaredScope::Unrecognized);
    }

    #[test]
    fn test_claims_from_json() {
        let claims = Claims::from_json(
            r#"{
                "principal_id": "u1",
                "roles": ["operator"],
                "permissions": ["pagamento.ler", "beneficio.*"],
                "declared_scope": "UNIT",
                "unit_id": "U1"
            }"#,
        )
        .unwrap();

        assert_eq!(claims.principal(), Some("u1"));
        assert_eq!(claims.declared_scope, DeclaredScope::Unit);
        assert_eq!(claims.unit(), Some("U1"));
        assert!(claims.has_role("operator"));
        assert_eq!(claims.permissions.len(), 2);
    }

    #[test]
    fn test_claims_unknown_scope_does_not_fail() {
        let claims = Claims::from_json(r#"{"principal_id": "u9", "declared_scope": "everything"}"#)
            .unwrap();
        assert_eq!(claims.declared_scope, DeclaredScope::Unrecognized);
        assert!(claims.roles.is_empty());
        assert!(claims.unit().is_none());
    }

    #[test]
    fn test_malformed_scope_declaration_is_unrecognized() {
        let missing = Claims::from_json(r#"{"principal_id": "u1", "unit_id": "U1"}"#).unwrap();
        assert_eq!(missing.declared_scope, DeclaredScope::Unrecognized);
        assert_eq!(missing.unit(), Some("U1"));

        let null = Claims::from_json(r#"{"principal_id": "u1", "declared_scope": null}"#).unwrap();
        assert_eq!(null.declared_scope, DeclaredScope::Unrecognized);

        let numeric = Claims::from_json(r#"{"principal_id": "u1", "declared_scope": 3}"#).unwrap();
        assert_eq!(numeric.declared_scope, DeclaredScope::Unrecognized);

        let nested =
            Claims::from_json(r#"{"principal_id": "u1", "declared_scope": {"kind": "GLOBAL"}}"#).unwrap();
        assert_eq!(nested.declared_scope, DeclaredScope::Unrecognized);
    }

    #[test]
    fn test_blank_identifiers_read_as_absent() {
        let claims = Claims::new("   ", DeclaredScope::Unit).with_unit("");
        assert!(claims.principal().is_none());
        assert!(claims.unit().is_none());
    }

    #[test]
    fn test_blank_role_rejected() {
        let result = Claims::from_json(r#"{"principal_id": "u1", "roles": [" "], "declared_scope": "SELF"}"#);
        assert!(matches!(result, Err(CoreError::InvalidClaims(_))));
    }

    #[test]
    fn test_serializes_canonical_scope_name() {
        let claims = Claims::new("u1", DeclaredScope::SelfOnly);
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["declared_scope"], "SELF");
        assert!(json.get("unit_id").is_none());
    }

    proptest! {
        #[test]
        fn prop_declared_scope_parse_never_fails(s in ".*") {
            let scope: DeclaredScope = s.parse().unwrap();
            let known = matches!(
                s.trim().to_ascii_uppercase().as_str(),
                "GLOBAL" | "UNIT" | "SELF"
            );
            prop_assert_eq!(scope == DeclaredScope::Unrecognized, !known);
        }
    }
}
