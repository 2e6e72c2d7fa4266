#![allow(clippy::missing_errors_doc)]

//! HTTP surface for lead capture and advisor triage.
//!
//! Every handler returns `Result<_, ServiceFailure>`; failures render as
//! `{"ok": false, "error", "code", "details"}`. Blocking document I/O runs on
//! the blocking pool through [`ServiceState::with_store`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use fleet_leads_core::{CrmOutbound, LeadError, MockCrm, Role, ScoringRuleset};
use fleet_leads_store_json::JsonDocumentStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
mod handlers;
pub mod rate_limit;

use crate::auth::{AuthManager, Identity, API_KEY_HEADER};
use crate::config::ServiceConfig;
use crate::rate_limit::{RateLimiter, RoutePolicy};

#[derive(Clone)]
pub struct ServiceState {
    store: Arc<JsonDocumentStore>,
    auth: Arc<AuthManager>,
    limiter: Arc<RateLimiter>,
    telemetry: Arc<ServiceTelemetry>,
    outbound: Arc<dyn CrmOutbound>,
    ruleset: Arc<ScoringRuleset>,
    max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ServiceFailure {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody<'a> {
    ok: bool,
    error: &'a str,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

/// Marks a response as a failure so the telemetry middleware can count it
/// by code.
#[derive(Debug, Clone, Copy)]
struct FailureCode(&'static str);

/// `{"ok": true, ...data}` success body.
#[derive(Debug, Clone, Serialize)]
struct Accepted<T>
where
    T: Serialize,
{
    ok: bool,
    #[serde(flatten)]
    data: T,
}

fn accepted<T>(data: T) -> Json<Accepted<T>>
where
    T: Serialize,
{
    Json(Accepted { ok: true, data })
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    invalid_json_total: AtomicU64,
    payload_too_large_total: AtomicU64,
    validation_error_total: AtomicU64,
    unauthorized_total: AtomicU64,
    forbidden_total: AtomicU64,
    not_found_total: AtomicU64,
    rate_limited_total: AtomicU64,
    store_unavailable_total: AtomicU64,
    internal_error_total: AtomicU64,
    other_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
pub struct ServiceTelemetrySnapshot {
    pub requests_total: u64,
    pub requests_success_total: u64,
    pub requests_failure_total: u64,
    pub invalid_json_total: u64,
    pub payload_too_large_total: u64,
    pub validation_error_total: u64,
    pub unauthorized_total: u64,
    pub forbidden_total: u64,
    pub not_found_total: u64,
    pub rate_limited_total: u64,
    pub store_unavailable_total: u64,
    pub internal_error_total: u64,
    pub other_error_total: u64,
}

impl ServiceTelemetry {
    fn record_success(&self) {
        self.requests_success_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, code: &str) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        let counter = match code {
            "invalid_json" => &self.invalid_json_total,
            "payload_too_large" => &self.payload_too_large_total,
            "validation_error" | "spam_detected" => &self.validation_error_total,
            "unauthorized" | "invalid_credentials" => &self.unauthorized_total,
            "forbidden" => &self.forbidden_total,
            "not_found" => &self.not_found_total,
            "rate_limited" => &self.rate_limited_total,
            "store_unavailable" => &self.store_unavailable_total,
            "internal_error" => &self.internal_error_total,
            _ => &self.other_error_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            invalid_json_total: self.invalid_json_total.load(Ordering::Relaxed),
            payload_too_large_total: self.payload_too_large_total.load(Ordering::Relaxed),
            validation_error_total: self.validation_error_total.load(Ordering::Relaxed),
            unauthorized_total: self.unauthorized_total.load(Ordering::Relaxed),
            forbidden_total: self.forbidden_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            rate_limited_total: self.rate_limited_total.load(Ordering::Relaxed),
            store_unavailable_total: self.store_unavailable_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
            other_error_total: self.other_error_total.load(Ordering::Relaxed),
        }
    }
}

impl ServiceFailure {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self { status, code, message: message.into(), details }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized advisor request.", None)
    }

    fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", "Insufficient permissions.", None)
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Not found", None)
    }

    fn rate_limited(policy: &RoutePolicy) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            policy.message,
            Some(json!({ "route": policy.route, "limit": policy.limit })),
        )
    }

    fn invalid_json(reason: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            "Invalid JSON",
            Some(json!({ "reason": reason.into() })),
        )
    }

    fn classify_store_error(err: &anyhow::Error, operation_label: &'static str) -> Self {
        if let Some(lead_error) = err.downcast_ref::<LeadError>() {
            return Self::from(lead_error.clone());
        }

        tracing::error!(operation = operation_label, error = %format!("{err:#}"), "store operation failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_unavailable",
            "Document store unavailable.",
            Some(json!({ "operation": operation_label })),
        )
    }
}

impl From<LeadError> for ServiceFailure {
    fn from(err: LeadError) -> Self {
        let message = err.to_string();
        match err {
            LeadError::Validation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "validation_error", message, None)
            }
            LeadError::Spam => Self::new(StatusCode::BAD_REQUEST, "spam_detected", message, None),
            LeadError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message, None),
            LeadError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "forbidden", message, None),
            LeadError::Outbound(_) | LeadError::Configuration(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message, None)
            }
        }
    }
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            error: &self.message,
            code: self.code,
            details: self.details.as_ref(),
        };
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(FailureCode(self.code));
        response
    }
}

impl ServiceState {
    #[must_use]
    pub fn new(store: JsonDocumentStore, config: &ServiceConfig) -> Self {
        Self {
            store: Arc::new(store),
            auth: Arc::new(AuthManager::new(
                config.advisor_api_key.clone(),
                config.users.clone(),
                config.session_ttl,
            )),
            limiter: Arc::new(RateLimiter::new()),
            telemetry: Arc::new(ServiceTelemetry::default()),
            outbound: Arc::new(MockCrm),
            ruleset: Arc::new(ScoringRuleset::v1()),
            max_body_bytes: config.max_body_bytes,
        }
    }

    #[must_use]
    pub fn with_outbound(mut self, outbound: Arc<dyn CrmOutbound>) -> Self {
        self.outbound = outbound;
        self
    }

    #[must_use]
    pub fn telemetry(&self) -> ServiceTelemetrySnapshot {
        self.telemetry.snapshot()
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ServiceFailure> {
        self.auth.authenticate(headers).ok_or_else(ServiceFailure::unauthorized)
    }

    fn require_admin(identity: &Identity) -> Result<(), ServiceFailure> {
        if identity.role == Role::Admin {
            Ok(())
        } else {
            Err(ServiceFailure::forbidden())
        }
    }

    fn check_rate(&self, client: &str, policy: &RoutePolicy) -> Result<(), ServiceFailure> {
        if self.limiter.allow(client, policy) {
            Ok(())
        } else {
            Err(ServiceFailure::rate_limited(policy))
        }
    }

    /// Runs a store operation on the blocking pool and classifies its error.
    async fn with_store<T, F>(
        &self,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(&JsonDocumentStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let joined = tokio::task::spawn_blocking(move || op(&store)).await.map_err(|err| {
            ServiceFailure::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;
        joined.map_err(|err| ServiceFailure::classify_store_error(&err, operation_label))
    }
}

/// Decodes a JSON body. An empty body is treated as `{}`.
fn decode_body<T>(body: Result<Bytes, BytesRejection>) -> Result<T, ServiceFailure>
where
    T: DeserializeOwned,
{
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServiceFailure::new(StatusCode::BAD_REQUEST, "payload_too_large", "Payload too large", None)
        } else {
            ServiceFailure::invalid_json(rejection.body_text())
        }
    })?;

    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) { b"{}" } else { &bytes };
    serde_json::from_slice(bytes).map_err(|err| ServiceFailure::invalid_json(err.to_string()))
}

/// Unwraps a query string extracted after authentication, so a malformed
/// query from an anonymous caller still answers 401.
fn decode_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ServiceFailure> {
    query.map(|Query(value)| value).map_err(|rejection| {
        ServiceFailure::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Invalid query string.",
            Some(json!({ "reason": rejection.body_text() })),
        )
    })
}

/// First `x-forwarded-for` entry, else the peer address, else `unknown`.
fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(ConnectInfo(addr))) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

async fn track_requests(
    State(telemetry): State<Arc<ServiceTelemetry>>,
    request: Request,
    next: Next,
) -> Response {
    telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
    let response = next.run(request).await;
    match response.extensions().get::<FailureCode>() {
        Some(FailureCode(code)) => telemetry.record_failure(code),
        None => telemetry.record_success(),
    }
    response
}

async fn fallback() -> ServiceFailure {
    ServiceFailure::not_found()
}

pub fn app(state: ServiceState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, HeaderName::from_static(API_KEY_HEADER)]);
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    let telemetry = Arc::clone(&state.telemetry);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/me", get(handlers::me))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/leads", post(handlers::create_lead))
        .route("/api/leads/:id", get(handlers::show_lead))
        .route("/api/leads/:id/status", patch(handlers::update_lead_status))
        .route("/api/dashboard", get(handlers::dashboard))
        .route("/api/analytics/funnel", get(handlers::funnel))
        .route("/api/recommendations/:lead_id", get(handlers::recommendations))
        .route("/api/outreach/draft", post(handlers::outreach_draft))
        .route("/api/audit", get(handlers::audit))
        .route("/api/crm-sync/mock", post(handlers::crm_sync))
        .route("/api/events", post(handlers::ingest_event))
        .route("/api/estimator-snapshot", post(handlers::ingest_snapshot))
        .method_not_allowed_fallback(fallback)
        .fallback(fallback)
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(telemetry, track_requests))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
