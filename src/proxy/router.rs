//! HTTP routing
//!
//! A single fallback handler covers the whole proxied surface; only the
//! health probe gets a named route. The admission middleware wraps
//! everything, so the handler only ever sees requests whose credential,
//! if present, already resolved to an identity.

use std::sync::Arc;

use axum::Json;
use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Router, middleware as axum_middleware};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::dispatch::{AuthzOutcome, Dispatcher, RequestContext};
use super::forward::Forwarder;
use super::middleware::auth_middleware;
use crate::auth::{TokenValidator, UserProfile};

/// Shared state for the request pipeline
pub struct AppState {
    /// Token admission
    pub validator: Arc<TokenValidator>,
    /// Per-domain authorization
    pub dispatcher: Dispatcher,
    /// Backend forwarding
    pub forwarder: Forwarder,
    /// Path prefixes forwarded without authorization checks
    pub public_paths: Vec<String>,
    /// Prefix the proxy is mounted under, stripped before matching
    pub mount_prefix: String,
    /// Cap on buffered request bodies, in bytes
    pub max_body_size: usize,
}

impl AppState {
    /// Whether the path is configured as public. Matching is on whole
    /// path segments, both for the mount prefix (`/proxyfoo` is not under
    /// `/proxy`) and for the public entry itself, so `/static` covers
    /// `/static/logo.png` but not `/staticfiles`.
    fn is_public(&self, path: &str) -> bool {
        let relative = match path.strip_prefix(self.mount_prefix.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        };
        self.public_paths.iter().any(|public| {
            relative == public
                || relative
                    .strip_prefix(public.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Build the router with the admission middleware and tracing layers
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(pep_handler)
        .layer(axum_middleware::from_fn_with_state(
            state.validator.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// The proxied surface: buffer the body, authorize, forward
async fn pep_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());
    let profile = parts.extensions.get::<UserProfile>().cloned();

    // Handlers need the whole body to make permission decisions, so it
    // is buffered here rather than streamed through. A transport failure
    // mid-body (client gone) lands here too and gets the same response;
    // the error does not distinguish the two causes.
    let Ok(body) = to_bytes(body, state.max_body_size).await else {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "The request body exceeds the maximum allowed size",
        );
    };

    if state.is_public(&path) {
        debug!(%path, "Public path, skipping authorization");
        return state
            .forwarder
            .forward(parts.method, &path_and_query, &parts.headers, body, profile.as_ref())
            .await;
    }

    let ctx = RequestContext {
        method: parts.method.clone(),
        path,
        profile,
        body,
    };

    match state.dispatcher.authorize(&ctx).await {
        AuthzOutcome::Allowed => {
            state
                .forwarder
                .forward(
                    ctx.method,
                    &path_and_query,
                    &parts.headers,
                    ctx.body,
                    ctx.profile.as_ref(),
                )
                .await
        }
        AuthzOutcome::Denied { status, message } => error_response(status, &message),
    }
}

/// Uniform error body shape for everything the proxy refuses itself
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
