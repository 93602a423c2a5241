//! Wildcard permission matching
//!
//! A requirement is a comma-separated list of alternatives (logical OR). Each
//! alternative is satisfied by:
//! - a super-admin token (`*.*` or `*.*.*`)
//! - the exact token
//! - a module wildcard `prefix.*` where `prefix` is a dot-delimited prefix of
//!   the alternative (`pagamento.*` covers `pagamento.ler` and
//!   `pagamento.escrever.lote`, but not `pagamentos.ler`)
//!
//! Matching is pure: no I/O and no dependency on the request scope.

use rowscope_core::Claims;
use std::collections::HashSet;

/// Tokens that grant every permission
const SUPER_ADMIN_TOKENS: [&str; 2] = ["*.*", "*.*.*"];

/// Suffix marking a module wildcard
const WILDCARD_SUFFIX: &str = ".*";

/// Check whether `permissions` satisfy the `required` expression
///
/// # Examples
///
/// ```
/// use rowscope_authz::permission::has_permission;
///
/// assert!(has_permission(&["pagamento.*"], "pagamento.ler"));
/// assert!(has_permission(&["reports.read"], "reports.write,reports.read"));
/// assert!(!has_permission(&["pagamento.ler"], "pagamento.escrever"));
/// ```
pub fn has_permission<S: AsRef<str>>(permissions: &[S], required: &str) -> bool {
    alternatives(required).any(|alt| permissions.iter().any(|p| grants(p.as_ref(), alt)))
}

/// Split a requirement into its non-empty alternatives
fn alternatives(required: &str) -> impl Iterator<Item = &str> {
    required.split(',').map(str::trim).filter(|alt| !alt.is_empty())
}

/// Whether a single held token grants a single required alternative
fn grants(held: &str, required: &str) -> bool {
    let held = held.trim();

    if SUPER_ADMIN_TOKENS.contains(&held) || held == required {
        return true;
    }

    match held.strip_suffix(WILDCARD_SUFFIX) {
        Some(prefix) if !prefix.is_empty() => required
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1),
        _ => false,
    }
}

fn normalize(token: String) -> Option<String> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Permission tokens held by a principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    tokens: HashSet<String>,
}

impl PermissionSet {
    /// Create an empty permission set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token, trimmed; blank tokens are ignored
    pub fn with(mut self, token: impl Into<String>) -> Self {
        if let Some(token) = normalize(token.into()) {
            self.tokens.insert(token);
        }
        self
    }

    /// Number of held tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are held
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether the set holds a super-admin token
    pub fn is_super_admin(&self) -> bool {
        SUPER_ADMIN_TOKENS.iter().any(|t| self.tokens.contains(*t))
    }

    /// Check a single requirement expression
    pub fn satisfies(&self, required: &str) -> bool {
        if self.is_super_admin() {
            return alternatives(required).next().is_some();
        }

        alternatives(required).any(|alt| {
            self.tokens.contains(alt) || self.tokens.iter().any(|held| grants(held, alt))
        })
    }

    /// Check that every requirement expression is satisfied
    pub fn satisfies_all(&self, required: &[&str]) -> bool {
        required.iter().all(|r| self.satisfies(r))
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().filter_map(|t| normalize(t.into())).collect(),
        }
    }
}

impl From<&Claims> for PermissionSet {
    fn from(claims: &Claims) -> Self {
        claims.permissions.iter().cloned().collect()
    }
}
