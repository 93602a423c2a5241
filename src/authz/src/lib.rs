//! # Rowscope Authorization
//!
//! Request-scoped authorization and data scoping.
//!
//! ## Features
//!
//! - **Wildcard permissions**: `module.action`, `module.*`, `*.*`, OR-lists
//! - **Scope resolution**: claims become a GLOBAL / UNIT / SELF context,
//!   always at the narrowest safe reading
//! - **Task-local propagation**: the context follows the request across
//!   every `.await` and never leaks into concurrent requests
//! - **Row-level enforcement**: scope predicates for every data operation
//! - **Audited escape hatch**: unscoped operations are explicit and logged
//!
//! ## Example
//!
//! ```rust
//! use rowscope_authz::{
//!     Claims, DeclaredScope, InMemoryAuditSink, ScopeConfig, ScopeContextResolver,
//!     ScopeFilter, ScopedQueryEnforcer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = ScopeContextResolver::new();
//!     let enforcer = ScopedQueryEnforcer::new(
//!         ScopeConfig::default(),
//!         Arc::new(InMemoryAuditSink::new()),
//!     );
//!
//!     let claims = Claims::new("u1", DeclaredScope::Unit).with_unit("U1");
//!     let filter = resolver
//!         .install(Some(&claims), async { enforcer.filter().await })
//!         .await??;
//!
//!     assert_eq!(filter, ScopeFilter::Unit("U1".to_string()));
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod enforcer;
pub mod error;
pub mod http;
pub mod identity;
pub mod permission;
pub mod propagator;
pub mod resolver;

// Re-export commonly used types
pub use audit::{AuditRecord, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::ScopeConfig;
pub use context::{RawScopeContext, ScopeContext, ScopeKind};
pub use enforcer::{
    ScopeColumns, ScopeFilter, ScopePredicate, ScopedQueryEnforcer, ScopedRecord,
    UnscopedOperation,
};
pub use error::{Result, ScopeError};
pub use identity::{IdentityStore, InMemoryIdentityStore};
pub use permission::{has_permission, PermissionSet};
pub use propagator::{ContextPropagator, RequestScopeGuard, RequestScopes};
pub use resolver::{ResolverStats, ScopeContextResolver};
pub use rowscope_core::{Claims, DeclaredScope, PrincipalId, RequestId, UnitId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
