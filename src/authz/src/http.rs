//! Axum integration
//!
//! [`scope_middleware`] runs after the authentication layer has placed
//! verified [`Claims`] in the request extensions. It resolves the scope
//! context and installs it for the rest of the request, so handlers,
//! services and repositories below it read it through
//! [`ContextPropagator::get`] or the [`CurrentScope`] extractor.
//!
//! ```no_run
//! use axum::{middleware, routing::get, Router};
//! use rowscope_authz::http::{scope_middleware, CurrentScope, ScopeLayerState};
//! use rowscope_authz::{ScopeConfig, ScopeContextResolver};
//!
//! async fn whoami(CurrentScope(scope): CurrentScope) -> String {
//!     scope.to_string()
//! }
//!
//! let state = ScopeLayerState::new(ScopeContextResolver::new(), ScopeConfig::default());
//! let app: Router = Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(middleware::from_fn_with_state(state, scope_middleware));
//! ```

use crate::config::ScopeConfig;
use crate::context::ScopeContext;
use crate::error::ScopeError;
use crate::propagator::ContextPropagator;
use crate::resolver::ScopeContextResolver;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use rowscope_core::Claims;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Shared state for [`scope_middleware`]
#[derive(Clone)]
pub struct ScopeLayerState {
    pub resolver: ScopeContextResolver,
    pub config: Arc<ScopeConfig>,
}

impl ScopeLayerState {
    /// Create middleware state
    pub fn new(resolver: ScopeContextResolver, config: ScopeConfig) -> Self {
        Self {
            resolver,
            config: Arc::new(config),
        }
    }
}

/// Resolve claims and install the scope context for the request
///
/// Requests without claims are only let through on configured public paths,
/// where they run with the anonymous GLOBAL context.
pub async fn scope_middleware(
    State(state): State<ScopeLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let claims = request.extensions().get::<Claims>().cloned();
    let path = request.uri().path().to_string();

    if claims.is_none() && !state.config.is_public_path(&path) {
        debug!(path = %path, "anonymous request on protected path");
        return ScopeError::ScopeContextRequired("authentication required".to_string()).into_response();
    }

    match state.resolver.install(claims.as_ref(), next.run(request)).await {
        Ok(response) => response,
        Err(e) => {
            warn!(path = %path, error = %e, "failed to install scope context");
            e.into_response()
        }
    }
}

/// Extractor for the current request's scope context
pub struct CurrentScope(pub Arc<ScopeContext>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentScope
where
    S: Send + Sync,
{
    type Rejection = ScopeError;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        ContextPropagator::get().map(CurrentScope)
    }
}

impl IntoResponse for ScopeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status.is_server_error() {
            error!(code = self.code(), error = %self, "authorization fault");
            "internal authorization error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}
