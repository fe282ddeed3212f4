//! Upstream forwarding
//!
//! Builds the backend request from the inbound one (method, path, query
//! and body unchanged), strips hop-by-hop and spoofable identity headers,
//! injects the proxy's own identity claims, and streams the backend
//! response back verbatim.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use super::router::error_response;
use crate::Error;
use crate::auth::UserProfile;

/// Identity header carrying the authenticated user id
pub const NICKNAME_HEADER: &str = "x-nick-name";
/// Identity header carrying the OAuth2 client the token belongs to
pub const APP_ID_HEADER: &str = "x-app-id";

/// Hop-by-hop and proxy-unsafe headers, never forwarded in either
/// direction. Host and content-length are recomputed by the HTTP client.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Forwards authorized requests to the single configured backend
pub struct Forwarder {
    http_client: Client,
    base_url: String,
}

impl Forwarder {
    /// Create a forwarder for the given backend base URL
    /// (e.g. `http://localhost:8080`)
    #[must_use]
    pub fn new(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Forward a request and stream the backend response to the caller.
    ///
    /// Backend failures are fatal to the request: an unreachable backend
    /// yields a 502, a timeout a 504. Requests are never retried.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        profile: Option<&UserProfile>,
    ) -> Response {
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut outbound = proxied_request_headers(headers);
        if let Some(profile) = profile {
            attach_identity_headers(&mut outbound, profile);
        }

        debug!(%method, %url, authenticated = profile.is_some(), "Forwarding to backend");

        let result = self
            .http_client
            .request(method, &url)
            .headers(outbound)
            .body(body)
            .send()
            .await;

        let upstream = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "Backend request failed");
                return match Error::from_upstream(&e) {
                    Error::UpstreamTimeout(_) => error_response(
                        StatusCode::GATEWAY_TIMEOUT,
                        "The application did not respond in time",
                    ),
                    _ => error_response(
                        StatusCode::BAD_GATEWAY,
                        "The application is not responding",
                    ),
                };
            }
        };

        let status = upstream.status();
        let response_headers = filter_headers(upstream.headers());

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        response
    }
}

/// Copy inbound headers minus the stripped set, the caller-supplied
/// credential, and any identity headers a caller might try to spoof.
fn proxied_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = filter_headers(headers);
    filtered.remove(header::AUTHORIZATION);
    filtered.remove(NICKNAME_HEADER);
    filtered.remove(APP_ID_HEADER);
    filtered
}

/// Copy headers minus the hop-by-hop set
fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !STRIPPED_HEADERS.contains(&name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Inject the proxy's authentication decision so the backend can trust it
/// without re-validating tokens itself. The Authorization header carries
/// the resolved *platform* token, never the delegated one.
fn attach_identity_headers(headers: &mut HeaderMap, profile: &UserProfile) {
    if let Ok(value) = HeaderValue::from_str(&profile.id) {
        headers.insert(NICKNAME_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&profile.app_id) {
        headers.insert(APP_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", profile.access_token)) {
        headers.insert(header::AUTHORIZATION, value);
    }
}
