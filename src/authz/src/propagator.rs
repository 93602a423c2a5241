//! Request-scoped context propagation
//!
//! Two mechanisms with the same isolation guarantee:
//!
//! - [`ContextPropagator`] binds the context to tokio task-local storage. The
//!   context follows the request future across every `.await`, and is dropped
//!   when that future completes or is cancelled.
//! - [`RequestScopes`] is an explicit arena keyed by [`RequestId`]. The id is
//!   threaded as a parameter through code that runs outside the request
//!   future (blocking pools, worker threads).

use crate::context::ScopeContext;
use crate::error::{Result, ScopeError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rowscope_core::RequestId;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

tokio::task_local! {
    static CURRENT_SCOPE: Arc<ScopeContext>;
}

/// Task-local scope context access
///
/// # Example
///
/// ```
/// use rowscope_authz::{ContextPropagator, ScopeContext};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> rowscope_authz::Result<()> {
/// let unit = ContextPropagator::scope(ScopeContext::unit("u1", "U1")?, async {
///     ContextPropagator::get().map(|ctx| ctx.unit_id().map(str::to_string))
/// })
/// .await??;
///
/// assert_eq!(unit.as_deref(), Some("U1"));
/// assert!(ContextPropagator::get().is_err());
/// # Ok(())
/// # }
/// ```
pub struct ContextPropagator;

impl ContextPropagator {
    /// Run `fut` with `context` installed
    ///
    /// The slot is released when `fut` completes or is dropped. Installing a
    /// second context inside a request that already has one is rejected, as
    /// is a context that fails [`ScopeContext::validate`].
    pub async fn scope<F: Future>(context: ScopeContext, fut: F) -> Result<F::Output> {
        context.validate()?;
        if Self::is_installed() {
            return Err(ScopeError::InvalidScopeContext(
                "scope context already installed for this request".to_string(),
            ));
        }

        trace!(scope = %context, "installing scope context");
        Ok(CURRENT_SCOPE.scope(Arc::new(context), fut).await)
    }

    /// Run a synchronous closure with `context` installed
    pub fn sync_scope<F, R>(context: ScopeContext, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        context.validate()?;
        if Self::is_installed() {
            return Err(ScopeError::InvalidScopeContext(
                "scope context already installed for this request".to_string(),
            ));
        }

        Ok(CURRENT_SCOPE.sync_scope(Arc::new(context), f))
    }

    /// Context of the current request
    pub fn get() -> Result<Arc<ScopeContext>> {
        CURRENT_SCOPE.try_with(Arc::clone).map_err(|_| {
            ScopeError::ScopeContextRequired("no scope context installed for this request".to_string())
        })
    }

    /// Context of the current request, if any
    pub fn try_get() -> Option<Arc<ScopeContext>> {
        CURRENT_SCOPE.try_with(Arc::clone).ok()
    }

    /// Whether a context is installed for the current request
    pub fn is_installed() -> bool {
        CURRENT_SCOPE.try_with(|_| ()).is_ok()
    }

    /// Spawn a task that inherits the current request's context
    ///
    /// `tokio::spawn` starts tasks with empty task-local storage, so fan-out
    /// inside a request must go through here to stay scoped.
    pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Self::try_get() {
            Some(context) => tokio::spawn(CURRENT_SCOPE.scope(context, fut)),
            None => tokio::spawn(fut),
        }
    }
}

/// Arena of scope contexts keyed by request identity
#[derive(Clone, Default)]
pub struct RequestScopes {
    slots: Arc<DashMap<RequestId, Arc<ScopeContext>>>,
}

impl RequestScopes {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the context for `request_id`, exactly once
    pub fn set(&self, request_id: RequestId, context: ScopeContext) -> Result<()> {
        context.validate()?;
        match self.slots.entry(request_id) {
            Entry::Occupied(_) => Err(ScopeError::InvalidScopeContext(format!(
                "scope context already installed for request {}",
                request_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(context));
                Ok(())
            }
        }
    }

    /// Context installed for `request_id`
    pub fn get(&self, request_id: &RequestId) -> Result<Arc<ScopeContext>> {
        self.slots
            .get(request_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| {
                ScopeError::ScopeContextRequired(format!(
                    "no scope context installed for request {}",
                    request_id
                ))
            })
    }

    /// Release the slot for `request_id`
    pub fn clear(&self, request_id: &RequestId) -> bool {
        self.slots.remove(request_id).is_some()
    }

    /// Allocate a request id, install `context`, and clear it when the guard drops
    pub fn enter(&self, context: ScopeContext) -> Result<RequestScopeGuard> {
        let request_id = RequestId::new_v4();
        self.set(request_id, context)?;
        Ok(RequestScopeGuard {
            scopes: self.clone(),
            request_id,
        })
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no request holds a slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Clears its request's slot on drop
pub struct RequestScopeGuard {
    scopes: RequestScopes,
    request_id: RequestId,
}

impl RequestScopeGuard {
    /// Request id to thread through calls
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Context installed for this request
    pub fn context(&self) -> Result<Arc<ScopeContext>> {
        self.scopes.get(&self.request_id)
    }
}

impl Drop for RequestScopeGuard {
    fn drop(&mut self) {
        self.scopes.clear(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_without_context() {
        let err = ContextPropagator::get().unwrap_err();
        assert!(matches!(err, ScopeError::ScopeContextRequired(_)));
        assert!(!ContextPropagator::is_installed());
    }

    #[tokio::test]
    async fn test_context_survives_await() {
        let ctx = ScopeContext::self_only("u1").unwrap();
        let seen = ContextPropagator::scope(ctx.clone(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tokio::task::yield_now().await;
            ContextPropagator::get().unwrap()
        })
        .await
        .unwrap();

        assert_eq!(*seen, ctx);
        assert!(ContextPropagator::try_get().is_none());
    }

    #[tokio::test]
    async fn test_double_install_rejected() {
        let result = ContextPropagator::scope(ScopeContext::self_only("u1").unwrap(), async {
            ContextPropagator::scope(ScopeContext::anonymous(), async {}).await
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(ScopeError::InvalidScopeContext(_))));
    }

    #[tokio::test]
    async fn test_spawn_inherits_context() {
        let ctx = ScopeContext::unit("u1", "U1").unwrap();
        let handle = ContextPropagator::scope(ctx.clone(), async {
            ContextPropagator::spawn(async { ContextPropagator::get() })
        })
        .await
        .unwrap();

        let inherited = handle.await.unwrap().unwrap();
        assert_eq!(*inherited, ctx);

        let bare = tokio::spawn(async { ContextPropagator::is_installed() });
        assert!(!bare.await.unwrap());
    }

    #[test]
    fn test_sync_scope() {
        let unit = ContextPropagator::sync_scope(ScopeContext::unit("u1", "U7").unwrap(), || {
            ContextPropagator::get().map(|c| c.unit_id().map(str::to_string))
        })
        .unwrap()
        .unwrap();
        assert_eq!(unit.as_deref(), Some("U7"));
    }

    #[test]
    fn test_arena_set_once() {
        let scopes = RequestScopes::new();
        let id = RequestId::new_v4();

        scopes.set(id, ScopeContext::self_only("u1").unwrap()).unwrap();
        assert!(scopes.set(id, ScopeContext::anonymous()).is_err());
        assert_eq!(scopes.get(&id).unwrap().principal_id(), Some("u1"));

        assert!(scopes.clear(&id));
        assert!(!scopes.clear(&id));
        assert!(matches!(scopes.get(&id), Err(ScopeError::ScopeContextRequired(_))));
    }

    #[tokio::test]
    async fn test_blank_context_is_not_installed() {
        let blank = ScopeContext::Unit {
            principal_id: "u1".to_string(),
            unit_id: "".to_string(),
        };

        let result = ContextPropagator::scope(blank.clone(), async {}).await;
        assert!(matches!(result, Err(ScopeError::InvalidScopeContext(_))));

        let scopes = RequestScopes::new();
        assert!(scopes.set(RequestId::new_v4(), blank).is_err());
        assert!(scopes.is_empty());
    }

    #[test]
    fn test_arena_guard_clears_on_drop() {
        let scopes = RequestScopes::new();
        let id = {
            let guard = scopes.enter(ScopeContext::unit("u1", "U1").unwrap()).unwrap();
            assert_eq!(scopes.len(), 1);
            assert_eq!(guard.context().unwrap().unit_id(), Some("U1"));
            guard.request_id()
        };

        assert!(scopes.is_empty());
        assert!(scopes.get(&id).is_err());
    }
}
