//! Token admission middleware
//!
//! Runs before routing and authorization. Every request passes through
//! the validator exactly once; the resulting identity travels to the
//! handler as a request extension. Bad credentials are rejected here even
//! on public paths, so a malformed header never reaches the backend.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::router::error_response;
use crate::auth::validator::INVALID_TOKEN_MSG;
use crate::auth::{AuthOutcome, TokenValidator};

/// Validate the request's credential and attach the identity, if any.
///
/// Requests without an Authorization header pass through anonymously;
/// whether anonymous access is acceptable is decided later, per domain.
pub async fn auth_middleware(
    State(validator): State<Arc<TokenValidator>>,
    mut request: Request,
    next: Next,
) -> Response {
    // A header that is present but not readable as a string is a malformed
    // credential, not an absent one; it must never fall through to Anonymous.
    let auth_header = match request.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(value) => Some(value.to_owned()),
            Err(_) => {
                debug!("Unreadable Authorization header");
                return error_response(StatusCode::UNAUTHORIZED, INVALID_TOKEN_MSG);
            }
        },
    };

    match validator.validate(auth_header.as_deref()).await {
        AuthOutcome::Anonymous => {}
        AuthOutcome::Authenticated(profile) => {
            debug!(user = %profile.id, "Request authenticated");
            request.extensions_mut().insert(profile);
        }
        AuthOutcome::Rejected { status, message } => {
            debug!(%status, %message, "Request rejected");
            return error_response(status, &message);
        }
    }

    next.run(request).await
}
