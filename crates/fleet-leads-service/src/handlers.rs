use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use fleet_leads_core::{
    audit_limit, authorize_status_change, change_lead_status, create_outreach_draft,
    dashboard_summary, funnel_analytics, now_utc, recent_audit_events, recommend_for_lead,
    record_lead, sync_crm_queue, AuditEvent, DashboardSummary, EventSubmission, FunnelReport,
    Grade, Lead, LeadError, LeadFilter, LeadStatus, LeadSubmission, OutreachDraft,
    Recommendation, SnapshotSubmission,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{bearer_token, Identity, LoginGrant};
use crate::rate_limit::{EVENTS_POLICY, LEADS_POLICY, LOGIN_POLICY, SNAPSHOT_POLICY};
use crate::{
    accepted, client_ip, decode_body, decode_query, Accepted, ServiceFailure, ServiceState,
    ServiceTelemetrySnapshot,
};

type Peer = Option<ConnectInfo<SocketAddr>>;
type Body = Result<Bytes, BytesRejection>;
type QueryParams<T> = Result<Query<T>, QueryRejection>;

#[derive(Debug, Deserialize)]
pub(crate) struct FilterQuery {
    status: Option<String>,
    grade: Option<String>,
}

impl FilterQuery {
    fn filter(&self) -> LeadFilter {
        LeadFilter::from_query(self.status.as_deref(), self.grade.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuditQuery {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthReport {
    status: &'static str,
    active_sessions: usize,
    rate_limit_buckets: usize,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct CurrentUser {
    user: Identity,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LeadCreated {
    lead_id: String,
    score: u32,
    grade: Grade,
}

#[derive(Debug, Serialize)]
pub(crate) struct LeadBody {
    lead: Lead,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LeadRecommendation {
    lead_id: String,
    recommendation: Recommendation,
}

#[derive(Debug, Serialize)]
pub(crate) struct DraftBody {
    draft: OutreachDraft,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuditBody {
    events: Vec<AuditEvent>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SyncBody {
    synced: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct Empty {}

/// Reads a trimmed string field; anything other than a string counts as
/// absent.
fn text_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

pub(crate) async fn health(State(state): State<ServiceState>) -> Json<Accepted<HealthReport>> {
    accepted(HealthReport {
        status: "ok",
        active_sessions: state.auth.active_sessions(),
        rate_limit_buckets: state.limiter.tracked_buckets(),
        telemetry: state.telemetry.snapshot(),
    })
}

pub(crate) async fn login(
    State(state): State<ServiceState>,
    peer: Peer,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Accepted<LoginGrant>>, ServiceFailure> {
    let client = client_ip(&headers, peer.as_ref());
    state.check_rate(&client, &LOGIN_POLICY)?;

    let body: Value = decode_body(body)?;
    let username = text_field(&body, "username");
    let password = text_field(&body, "password");

    match state.auth.login(&username, &password) {
        Some(grant) => {
            tracing::info!(username = %grant.user.username, role = grant.user.role.as_str(), "advisor logged in");
            Ok(accepted(grant))
        }
        None => {
            tracing::warn!(%username, %client, "login rejected");
            Err(ServiceFailure::new(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid credentials.",
                None,
            ))
        }
    }
}

pub(crate) async fn me(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<Accepted<CurrentUser>>, ServiceFailure> {
    let user = state.authenticate(&headers)?;
    Ok(accepted(CurrentUser { user }))
}

pub(crate) async fn logout(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Json<Accepted<Empty>> {
    if let Some(token) = bearer_token(&headers) {
        if state.auth.logout(token) {
            tracing::info!("advisor session ended");
        }
    }
    accepted(Empty {})
}

pub(crate) async fn create_lead(
    State(state): State<ServiceState>,
    peer: Peer,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ServiceFailure> {
    let client = client_ip(&headers, peer.as_ref());
    state.check_rate(&client, &LEADS_POLICY)?;

    let submission: LeadSubmission = decode_body(body)?;
    let now = now_utc();
    let lead = match submission.into_lead(now) {
        Ok(lead) => lead,
        Err(LeadError::Spam) => {
            tracing::warn!(%client, "honeypot submission rejected");
            return Err(LeadError::Spam.into());
        }
        Err(err) => return Err(err.into()),
    };

    let ruleset = Arc::clone(&state.ruleset);
    let stored = state
        .with_store("lead_create", move |store| {
            store.update(|document| Ok(record_lead(document, lead, &ruleset, now)))
        })
        .await?;

    tracing::info!(lead_id = %stored.id, score = stored.score, grade = %stored.grade, "lead captured");
    Ok((
        StatusCode::CREATED,
        accepted(LeadCreated {
            lead_id: stored.id,
            score: stored.score,
            grade: stored.grade,
        }),
    ))
}

pub(crate) async fn show_lead(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
) -> Result<Json<LeadBody>, ServiceFailure> {
    state.authenticate(&headers)?;
    let lead = state
        .with_store("lead_show", move |store| {
            let document = store.load()?;
            match document.find_lead(&lead_id) {
                Some(lead) => Ok(lead.clone()),
                None => Err(LeadError::lead_not_found().into()),
            }
        })
        .await?;
    Ok(Json(LeadBody { lead }))
}

pub(crate) async fn update_lead_status(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
    body: Body,
) -> Result<Json<Accepted<LeadBody>>, ServiceFailure> {
    let identity = state.authenticate(&headers)?;
    let body: Value = decode_body(body)?;

    let Some(status) = LeadStatus::parse(&text_field(&body, "status")) else {
        return Err(ServiceFailure::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Invalid status value.",
            Some(json!({ "allowed": LeadStatus::ALL })),
        ));
    };
    authorize_status_change(identity.role, status)?;

    let actor = identity.actor();
    let now = now_utc();
    let lead = state
        .with_store("lead_status", move |store| {
            store.update(|document| Ok(change_lead_status(document, &lead_id, status, &actor, now)?))
        })
        .await?;

    tracing::info!(lead_id = %lead.id, status = status.as_str(), actor = %identity.username, "lead status changed");
    Ok(accepted(LeadBody { lead }))
}

pub(crate) async fn dashboard(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    query: QueryParams<FilterQuery>,
) -> Result<Json<DashboardSummary>, ServiceFailure> {
    state.authenticate(&headers)?;
    let filter = decode_query(query)?.filter();
    let summary = state
        .with_store("dashboard", move |store| {
            Ok(dashboard_summary(&store.load()?, &filter))
        })
        .await?;
    Ok(Json(summary))
}

pub(crate) async fn funnel(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    query: QueryParams<FilterQuery>,
) -> Result<Json<FunnelReport>, ServiceFailure> {
    state.authenticate(&headers)?;
    let filter = decode_query(query)?.filter();
    let report = state
        .with_store("funnel", move |store| Ok(funnel_analytics(&store.load()?, &filter)))
        .await?;
    Ok(Json(report))
}

pub(crate) async fn recommendations(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
) -> Result<Json<LeadRecommendation>, ServiceFailure> {
    state.authenticate(&headers)?;
    let recommendation = state
        .with_store("recommendations", move |store| {
            let document = store.load()?;
            match document.find_lead(&lead_id) {
                Some(lead) => Ok(LeadRecommendation {
                    lead_id: lead.id.clone(),
                    recommendation: recommend_for_lead(lead),
                }),
                None => Err(LeadError::lead_not_found().into()),
            }
        })
        .await?;
    Ok(Json(recommendation))
}

pub(crate) async fn outreach_draft(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ServiceFailure> {
    let identity = state.authenticate(&headers)?;
    let body: Value = decode_body(body)?;
    let lead_id = text_field(&body, "leadId");
    if lead_id.is_empty() {
        return Err(LeadError::Validation("leadId is required".to_string()).into());
    }

    let actor = identity.actor();
    let now = now_utc();
    let draft = state
        .with_store("outreach_draft", move |store| {
            store.update(|document| Ok(create_outreach_draft(document, &lead_id, &actor, now)?))
        })
        .await?;

    tracing::info!(lead_id = %draft.lead_id, draft_id = %draft.id, "outreach draft created");
    Ok((StatusCode::CREATED, accepted(DraftBody { draft })))
}

pub(crate) async fn audit(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    query: QueryParams<AuditQuery>,
) -> Result<Json<AuditBody>, ServiceFailure> {
    state.authenticate(&headers)?;
    let query = decode_query(query)?;
    let limit = audit_limit(query.limit.as_deref());
    let events = state
        .with_store("audit", move |store| {
            Ok(recent_audit_events(&store.load()?, limit))
        })
        .await?;
    Ok(Json(AuditBody { events }))
}

pub(crate) async fn crm_sync(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<Accepted<SyncBody>>, ServiceFailure> {
    let identity = state.authenticate(&headers)?;
    ServiceState::require_admin(&identity)?;

    let actor = identity.actor();
    let outbound = Arc::clone(&state.outbound);
    let now = now_utc();
    let synced = state
        .with_store("crm_sync", move |store| {
            store.update(|document| Ok(sync_crm_queue(document, outbound.as_ref(), &actor, now)?))
        })
        .await?;

    tracing::info!(synced, outbound = state.outbound.name(), "crm queue synced");
    Ok(accepted(SyncBody { synced }))
}

/// Telemetry is best effort: once the payload is valid the caller gets 202
/// even if the write fails.
pub(crate) async fn ingest_event(
    State(state): State<ServiceState>,
    peer: Peer,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ServiceFailure> {
    let client = client_ip(&headers, peer.as_ref());
    state.check_rate(&client, &EVENTS_POLICY)?;

    let submission: EventSubmission = decode_body(body)?;
    let event = submission.into_event(now_utc())?;
    let event_type = event.event_type.clone();

    let stored = state
        .with_store("event_ingest", move |store| {
            store.update(|document| {
                document.events.push(event);
                Ok(())
            })
        })
        .await;
    if let Err(failure) = stored {
        tracing::warn!(%event_type, code = failure.code, "dropped client event");
    }

    Ok((StatusCode::ACCEPTED, accepted(Empty {})))
}

pub(crate) async fn ingest_snapshot(
    State(state): State<ServiceState>,
    peer: Peer,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ServiceFailure> {
    let client = client_ip(&headers, peer.as_ref());
    state.check_rate(&client, &SNAPSHOT_POLICY)?;

    let submission: SnapshotSubmission = decode_body(body)?;
    let snapshot = submission.into_snapshot(now_utc());
    let session_id = snapshot.session_id.clone();

    let stored = state
        .with_store("snapshot_ingest", move |store| {
            store.update(|document| {
                document.estimator_snapshots.push(snapshot);
                Ok(())
            })
        })
        .await;
    if let Err(failure) = stored {
        tracing::warn!(%session_id, code = failure.code, "dropped estimator snapshot");
    }

    Ok((StatusCode::ACCEPTED, accepted(Empty {})))
}
