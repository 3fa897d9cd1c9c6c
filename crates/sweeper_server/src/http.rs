//! # HTTP Surface
//!
//! Thin axum adapter over [`SubmissionOrchestrator`].
//!
//! ```text
//! GET  /leaderboard/:difficulty   200 board | 304 not modified | error
//! POST /leaderboard/:difficulty   200 receipt | error
//! *                               404 NOT_FOUND
//! other methods on the route      405 METHOD_NOT_ALLOWED
//! ```
//!
//! Storage is synchronous, so every orchestrator call runs on the blocking
//! pool.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sweeper_core::{Difficulty, ErrorCode, LeaderboardRecord, StoreError};
use sweeper_security::{secure_compare, ClientMeta};
use tracing::{debug, error, warn};

use crate::orchestrator::{SubmissionError, SubmissionOrchestrator, SubmissionResult};

/// Correlation id length.
pub const REQUEST_ID_LEN: usize = 16;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const NO_STORE: &str = "no-cache, no-store, must-revalidate";

type Shared = Arc<SubmissionOrchestrator>;

/// Builds the application router.
pub fn router(orchestrator: Shared) -> Router {
    Router::new()
        .route(
            "/leaderboard/:difficulty",
            get(get_leaderboard)
                .post(post_leaderboard)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(orchestrator)
}

// =============================================================================
// ENVELOPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitMeta {
    remaining: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BoardMeta {
    count: usize,
    difficulty: Difficulty,
    rate_limit: RateLimitMeta,
    server_time: DateTime<Utc>,
}

#[derive(Serialize)]
struct BoardEnvelope<'a> {
    success: bool,
    data: &'a [LeaderboardRecord],
    meta: BoardMeta,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Submitted<'a> {
    username: &'a str,
    time: f64,
    difficulty: Difficulty,
    timestamp: DateTime<Utc>,
    rank: Option<usize>,
    improved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_best: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitMeta<'a> {
    submitted: Submitted<'a>,
    rate_limit: RateLimitMeta,
}

#[derive(Serialize)]
struct SubmitEnvelope<'a> {
    success: bool,
    data: &'a [LeaderboardRecord],
    meta: SubmitMeta<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
    timestamp: DateTime<Utc>,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

// =============================================================================
// ERRORS
// =============================================================================

/// A failed request, rendered as the error envelope.
///
/// The internal `detail` is logged, never sent.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    detail: String,
    request_id: String,
}

impl ApiError {
    fn new(code: ErrorCode, detail: impl Into<String>, request_id: String) -> Self {
        Self {
            code,
            detail: detail.into(),
            request_id,
        }
    }

    fn from_submission(err: &SubmissionError, request_id: String) -> Self {
        Self::new(err.code(), err.to_string(), request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.code {
            ErrorCode::ServerError => {
                error!(request_id = %self.request_id, detail = %self.detail, "Request failed");
            }
            ErrorCode::NotFound | ErrorCode::MethodNotAllowed => {
                debug!(request_id = %self.request_id, code = self.code.as_str(), "Unrouted request");
            }
            code => {
                warn!(request_id = %self.request_id, code = code.as_str(), detail = %self.detail, "Request rejected");
            }
        }

        let status = StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let request_id = self.request_id.clone();
        let envelope = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code.as_str(),
                message: self.code.public_message(),
                timestamp: Utc::now(),
                request_id: self.request_id,
            },
        };
        harden((status, Json(envelope)).into_response(), &request_id, NO_STORE)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn get_leaderboard(
    State(orchestrator): State<Shared>,
    Path(route): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = request_id();
    let client = client_meta(&headers, peer);
    let now = Utc::now();

    let worker = Arc::clone(&orchestrator);
    let view = blocking(move || worker.board(&route, &client, now))
        .await
        .map_err(|err| ApiError::from_submission(&err, request_id.clone()))?;

    let data = serde_json::to_vec(&view.records)
        .map_err(|err| ApiError::new(ErrorCode::ServerError, err.to_string(), request_id.clone()))?;
    let tag = orchestrator.entity_tag(&data);
    let cache_control = format!("public, max-age={}", orchestrator.cache_ttl().as_secs());

    if if_none_match(&headers, &tag) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        set_etag(&mut response, &tag);
        return Ok(harden(response, &request_id, &cache_control));
    }

    let envelope = BoardEnvelope {
        success: true,
        data: &view.records,
        meta: BoardMeta {
            count: view.records.len(),
            difficulty: view.difficulty,
            rate_limit: RateLimitMeta {
                remaining: view.remaining,
            },
            server_time: now,
        },
    };
    let mut response = Json(envelope).into_response();
    set_etag(&mut response, &tag);
    Ok(harden(response, &request_id, &cache_control))
}

async fn post_leaderboard(
    State(orchestrator): State<Shared>,
    Path(route): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = request_id();
    let client = client_meta(&headers, peer);
    let now = Utc::now();

    let receipt = blocking(move || orchestrator.submit(&route, &body, &client, now))
        .await
        .map_err(|err| ApiError::from_submission(&err, request_id.clone()))?;

    let envelope = SubmitEnvelope {
        success: true,
        data: &receipt.board.records,
        meta: SubmitMeta {
            submitted: Submitted {
                username: &receipt.username,
                time: receipt.time,
                difficulty: receipt.board.difficulty,
                timestamp: receipt.timestamp,
                rank: receipt.rank,
                improved: receipt.improved,
                current_best: receipt.current_best,
            },
            rate_limit: RateLimitMeta {
                remaining: receipt.board.remaining,
            },
        },
    };
    Ok(harden(Json(envelope).into_response(), &request_id, NO_STORE))
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(ErrorCode::MethodNotAllowed, "method not allowed", request_id())
}

async fn not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "no route", request_id())
}

// =============================================================================
// HELPERS
// =============================================================================

/// Runs `job` on the blocking pool. A panicked job is a dependency failure.
async fn blocking<T, F>(job: F) -> SubmissionResult<T>
where
    F: FnOnce() -> SubmissionResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .unwrap_or_else(|err| Err(SubmissionError::Dependency(StoreError::Backend(format!("worker failed: {err}")))))
}

/// Fresh alphanumeric correlation id.
fn request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LEN)
        .map(char::from)
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address: edge proxy header, then forwarded chain, then the peer.
fn client_ip(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> String {
    header_str(headers, "cf-connecting-ip")
        .or_else(|| header_str(headers, "x-forwarded-for"))
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn client_meta(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> ClientMeta {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    ClientMeta {
        ip: client_ip(headers, peer),
        user_agent: text(header::USER_AGENT),
        accept_language: text(header::ACCEPT_LANGUAGE),
        accept_encoding: text(header::ACCEPT_ENCODING),
    }
}

/// Whether any tag in `If-None-Match` matches `tag`.
fn if_none_match(headers: &HeaderMap, tag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    value.split(',').any(|candidate| {
        let candidate = candidate.trim();
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        secure_compare(candidate.trim_matches('"'), tag)
    })
}

fn set_etag(response: &mut Response, tag: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{tag}\"")) {
        response.headers_mut().insert(header::ETAG, value);
    }
}

/// Adds the headers every response carries.
fn harden(mut response: Response, request_id: &str, cache_control: &str) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn peer() -> Option<ConnectInfo<SocketAddr>> {
        Some(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))))
    }

    #[test]
    fn test_client_ip_precedence() {
        let both = headers(&[("cf-connecting-ip", "203.0.113.1"), ("x-forwarded-for", "198.51.100.2")]);
        assert_eq!(client_ip(&both, peer()), "203.0.113.1");

        let chain = headers(&[("x-forwarded-for", " 198.51.100.2 , 10.0.0.1")]);
        assert_eq!(client_ip(&chain, peer()), "198.51.100.2");

        assert_eq!(client_ip(&HeaderMap::new(), peer()), "10.0.0.7");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_if_none_match_forms() {
        let tag = "0123456789abcdef";
        assert!(if_none_match(&headers(&[("if-none-match", "\"0123456789abcdef\"")]), tag));
        assert!(if_none_match(&headers(&[("if-none-match", "W/\"0123456789abcdef\"")]), tag));
        assert!(if_none_match(&headers(&[("if-none-match", "\"zz\", \"0123456789abcdef\"")]), tag));
        assert!(!if_none_match(&headers(&[("if-none-match", "\"fedcba9876543210\"")]), tag));
        assert!(!if_none_match(&HeaderMap::new(), tag));
    }

    #[test]
    fn test_request_ids_are_alphanumeric() {
        let a = request_id();
        let b = request_id();
        assert_eq!(a.len(), REQUEST_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_error_response_is_hardened() {
        let response = ApiError::new(ErrorCode::DuplicateGame, "game g1 already scored", "abc".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let headers = response.headers();
        assert_eq!(headers[X_REQUEST_ID], "abc");
        assert_eq!(headers[header::CACHE_CONTROL], NO_STORE);
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }
}
