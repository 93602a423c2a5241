//! Claims to scope context resolution
//!
//! Resolution picks the minimum-privilege reading of incomplete or
//! inconsistent claims:
//!
//! | claims | context |
//! |---|---|
//! | none (public endpoint) | `GLOBAL`, no principal |
//! | `GLOBAL` | `GLOBAL` |
//! | `UNIT` with unit | `UNIT` |
//! | `UNIT` without unit | `SELF` (downgrade) |
//! | `SELF` | `SELF` |
//! | unrecognized | `SELF` (downgrade) |
//! | blank principal | no context installed |
//!
//! Downgrades never fail the request. A blank principal is an integration
//! error: nothing is installed, so the first scoped operation fails with
//! `ScopeContextRequired`.

use crate::context::ScopeContext;
use crate::error::Result;
use crate::propagator::{ContextPropagator, RequestScopes};
use rowscope_core::{Claims, DeclaredScope, RequestId};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Resolution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Contexts produced (including anonymous)
    pub resolved: u64,
    /// Anonymous contexts produced
    pub anonymous: u64,
    /// Declarations narrowed to SELF
    pub downgraded: u64,
    /// Claims rejected for missing identity
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    resolved: AtomicU64,
    anonymous: AtomicU64,
    downgraded: AtomicU64,
    rejected: AtomicU64,
}

/// Builds and installs scope contexts from claims
#[derive(Debug, Clone, Default)]
pub struct ScopeContextResolver {
    counters: Arc<Counters>,
}

impl ScopeContextResolver {
    /// Create a resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve claims into a context without installing it
    ///
    /// Returns `None` when the claims carry no principal.
    pub fn resolve(&self, claims: Option<&Claims>) -> Option<ScopeContext> {
        let Some(claims) = claims else {
            self.counters.anonymous.fetch_add(1, Ordering::Relaxed);
            self.counters.resolved.fetch_add(1, Ordering::Relaxed);
            debug!("resolved anonymous scope context");
            return Some(ScopeContext::anonymous());
        };

        let Some(principal_id) = claims.principal() else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            error!(
                declared = %claims.declared_scope,
                "claims carry no principal_id, no scope context installed"
            );
            return None;
        };

        let context = match (claims.declared_scope, claims.unit()) {
            (DeclaredScope::Global, _) => ScopeContext::system(principal_id),
            (DeclaredScope::Unit, Some(unit_id)) => ScopeContext::unit(principal_id, unit_id),
            (DeclaredScope::Unit, None) => {
                self.downgrade(principal_id, claims.declared_scope, "unit_id missing")
            }
            (DeclaredScope::SelfOnly, _) => ScopeContext::self_only(principal_id),
            (DeclaredScope::Unrecognized, _) => {
                self.downgrade(principal_id, claims.declared_scope, "unrecognized scope")
            }
        };

        match context {
            Ok(context) => {
                self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                debug!(principal_id = %principal_id, scope = %context, "resolved scope context");
                Some(context)
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                error!(principal_id = %principal_id, error = %e, "no scope context installed");
                None
            }
        }
    }

    /// Resolve claims and run `fut` with the context installed
    ///
    /// When resolution yields no context `fut` still runs, with nothing
    /// installed.
    pub async fn install<F: Future>(&self, claims: Option<&Claims>, fut: F) -> Result<F::Output> {
        match self.resolve(claims) {
            Some(context) => ContextPropagator::scope(context, fut).await,
            None => Ok(fut.await),
        }
    }

    /// Resolve claims into the explicit arena under `request_id`
    ///
    /// Returns whether a context was installed.
    pub fn install_in(
        &self,
        scopes: &RequestScopes,
        request_id: RequestId,
        claims: Option<&Claims>,
    ) -> Result<bool> {
        match self.resolve(claims) {
            Some(context) => {
                scopes.set(request_id, context)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Snapshot of the resolution counters
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            anonymous: self.counters.anonymous.load(Ordering::Relaxed),
            downgraded: self.counters.downgraded.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    fn downgrade(&self, principal_id: &str, declared: DeclaredScope, reason: &str) -> Result<ScopeContext> {
        self.counters.downgraded.fetch_add(1, Ordering::Relaxed);
        warn!(
            principal_id = %principal_id,
            declared = %declared,
            resolved = "SELF",
            reason,
            "scope declaration downgraded"
        );
        ScopeContext::self_only(principal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopeKind;
    use proptest::prelude::*;

    #[test]
    fn test_anonymous() {
        let resolver = ScopeContextResolver::new();
        assert_eq!(resolver.resolve(None), Some(ScopeContext::anonymous()));
        assert_eq!(resolver.stats().anonymous, 1);
    }

    #[test]
    fn test_unit_with_unit_id() {
        let resolver = ScopeContextResolver::new();
        let claims = Claims::new("u1", DeclaredScope::Unit).with_unit("U1");
        assert_eq!(resolver.resolve(Some(&claims)), Some(ScopeContext::unit("u1", "U1").unwrap()));
        assert_eq!(resolver.stats().downgraded, 0);
    }

    #[test]
    fn test_unit_without_unit_id_downgrades() {
        let resolver = ScopeContextResolver::new();
        let claims = Claims::new("u2", DeclaredScope::Unit);
        assert_eq!(resolver.resolve(Some(&claims)), Some(ScopeContext::self_only("u2").unwrap()));

        let blank = Claims::new("u3", DeclaredScope::Unit).with_unit("  ");
        assert_eq!(resolver.resolve(Some(&blank)), Some(ScopeContext::self_only("u3").unwrap()));
        assert_eq!(resolver.stats().downgraded, 2);
    }

    #[test]
    fn test_unrecognized_scope_downgrades() {
        let resolver = ScopeContextResolver::new();
        let claims = Claims::new("u4", DeclaredScope::Unrecognized).with_unit("U1");
        assert_eq!(resolver.resolve(Some(&claims)), Some(ScopeContext::self_only("u4").unwrap()));
        assert_eq!(resolver.stats().downgraded, 1);
    }

    #[test]
    fn test_global_and_self() {
        let resolver = ScopeContextResolver::new();
        let admin = Claims::new("admin", DeclaredScope::Global).with_unit("U1");
        assert_eq!(resolver.resolve(Some(&admin)), Some(ScopeContext::system("admin").unwrap()));

        let citizen = Claims::new("c1", DeclaredScope::SelfOnly).with_unit("U1");
        assert_eq!(resolver.resolve(Some(&citizen)), Some(ScopeContext::self_only("c1").unwrap()));
    }

    #[test]
    fn test_missing_principal_installs_nothing() {
        let resolver = ScopeContextResolver::new();
        let claims = Claims::new("", DeclaredScope::Unit).with_unit("U1");
        assert_eq!(resolver.resolve(Some(&claims)), None);

        let stats = resolver.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.resolved, 0);
    }

    #[tokio::test]
    async fn test_install_without_principal_leaves_slot_empty() {
        let resolver = ScopeContextResolver::new();
        let claims = Claims::new(" ", DeclaredScope::SelfOnly);
        let installed = resolver
            .install(Some(&claims), async { ContextPropagator::is_installed() })
            .await
            .unwrap();
        assert!(!installed);
    }

    #[test]
    fn test_install_in_arena() {
        let resolver = ScopeContextResolver::new();
        let scopes = RequestScopes::new();
        let id = RequestId::new_v4();
        let claims = Claims::new("u1", DeclaredScope::Unit).with_unit("U1");

        assert!(resolver.install_in(&scopes, id, Some(&claims)).unwrap());
        assert_eq!(scopes.get(&id).unwrap().unit_id(), Some("U1"));
        assert!(resolver.install_in(&scopes, id, Some(&claims)).is_err());
    }

    fn declared_scope() -> impl Strategy<Value = DeclaredScope> {
        prop_oneof![
            Just(DeclaredScope::Global),
            Just(DeclaredScope::Unit),
            Just(DeclaredScope::SelfOnly),
            Just(DeclaredScope::Unrecognized),
        ]
    }

    proptest! {
        #[test]
        fn prop_never_broader_than_declared(
            declared in declared_scope(),
            unit in proptest::option::of("[A-Z0-9 ]{0,4}"),
        ) {
            let resolver = ScopeContextResolver::new();
            let mut claims = Claims::new("p1", declared);
            claims.unit_id = unit;

            let context = resolver.resolve(Some(&claims)).unwrap();
            let ceiling = match declared {
                DeclaredScope::Global => ScopeKind::Global,
                DeclaredScope::Unit => ScopeKind::Unit,
                DeclaredScope::SelfOnly | DeclaredScope::Unrecognized => ScopeKind::SelfOnly,
            };
            prop_assert!(context.kind().breadth() <= ceiling.breadth());
            prop_assert_eq!(context.principal_id(), Some("p1"));
            if context.kind() == ScopeKind::Unit {
                prop_assert!(context.unit_id().is_some_and(|u| !u.trim().is_empty()));
            }
        }
    }
}
