//! Domain model and pure lead-intelligence rules for the fleet advisory
//! backend.
//!
//! Everything in this crate is free of I/O. Persistence lives in
//! `fleet-leads-store-json` and the HTTP surface in `fleet-leads-service`;
//! both operate on the [`Document`] defined here.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod analytics;
pub mod audit;
pub mod crm;
pub mod intake;
pub mod recommend;
pub mod scoring;
pub mod workflow;

pub use analytics::{
    dashboard_summary, funnel_analytics, DashboardSummary, DashboardTotals, FunnelRates,
    FunnelReport, LeadFilter, PriorityCount, StatusCounts, RECENT_LEADS_LIMIT,
};
pub use audit::{append_audit, audit_limit, recent_audit_events, AUDIT_DEFAULT_LIMIT, AUDIT_MAX_LIMIT};
pub use crm::{sync_crm_queue, CrmOutbound, MockCrm};
pub use intake::{is_valid_email, parse_fleet_size, EventSubmission, LeadSubmission, SnapshotSubmission};
pub use recommend::{compose_outreach_draft, recommend_for_lead, DraftContent, Recommendation};
pub use scoring::{score_lead, LeadScore, ScoringRuleset};
pub use workflow::{authorize_status_change, change_lead_status, create_outreach_draft, record_lead};

/// Schema version written by this build. Version 1 is the untyped legacy
/// layout that carried no `schemaVersion` key at all.
pub const DOCUMENT_SCHEMA_VERSION: u32 = 2;

pub const DEFAULT_SESSION_ID: &str = "anonymous";
pub const LEAD_SOURCE_WEBSITE: &str = "website";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LeadError {
    #[error("{0}")]
    Validation(String),
    #[error("Spam detected.")]
    Spam,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("outbound CRM error: {0}")]
    Outbound(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LeadError {
    #[must_use]
    pub fn lead_not_found() -> Self {
        Self::NotFound("Lead not found.".to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Qualified,
    Contacted,
    ProposalSent,
    Won,
    Lost,
}

impl LeadStatus {
    pub const ALL: [Self; 6] = [
        Self::New,
        Self::Qualified,
        Self::Contacted,
        Self::ProposalSent,
        Self::Won,
        Self::Lost,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Qualified => "qualified",
            Self::Contacted => "contacted",
            Self::ProposalSent => "proposal_sent",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "qualified" => Some(Self::Qualified),
            "contacted" => Some(Self::Contacted),
            "proposal_sent" => Some(Self::ProposalSent),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    /// Target statuses that only an `admin` may set.
    #[must_use]
    pub fn requires_admin(self) -> bool {
        matches!(self, Self::ProposalSent | Self::Won | Self::Lost)
    }
}

impl Display for LeadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Grade {
    A,
    B,
    C,
}

impl Grade {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            _ => None,
        }
    }
}

impl Display for Grade {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Advisor,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advisor => "advisor",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Actor {
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Actor {
    #[must_use]
    pub fn system(username: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            username: username.into(),
            role: None,
        }
    }

    #[must_use]
    pub fn user(username: impl Into<String>, role: Role) -> Self {
        Self {
            kind: ActorKind::User,
            username: username.into(),
            role: Some(role),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub fleet_size: String,
    pub priority: String,
    pub message: String,
    pub session_id: String,
    pub source: String,
    pub status: LeadStatus,
    pub score: u32,
    pub grade: Grade,
    pub score_reasons: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorSnapshot {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub total_units: f64,
    #[serde(default, alias = "idleShare")]
    pub idle_share_percent: f64,
    #[serde(default, alias = "carryingCost")]
    pub monthly_carrying_cost: f64,
    #[serde(default)]
    pub annual_burden: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrmPayload {
    pub name: String,
    pub email: String,
    pub priority: String,
    pub score: u32,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrmQueueItem {
    pub id: String,
    pub lead_id: String,
    pub payload: CrmPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutreachDraft {
    pub id: String,
    pub lead_id: String,
    pub subject: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub actor: Actor,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    #[serde(default)]
    pub details: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Browser telemetry record. No relational constraints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    pub id: String,
    pub event_type: String,
    pub session_id: String,
    pub page: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The single persisted document. Collections are parallel top-level arrays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub leads: Vec<Lead>,
    #[serde(default)]
    pub events: Vec<ClientEvent>,
    #[serde(default)]
    pub estimator_snapshots: Vec<EstimatorSnapshot>,
    #[serde(default)]
    pub crm_queue: Vec<CrmQueueItem>,
    #[serde(default)]
    pub outreach_drafts: Vec<OutreachDraft>,
    #[serde(default)]
    pub audit_events: Vec<AuditEvent>,
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

impl Document {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            leads: Vec::new(),
            events: Vec::new(),
            estimator_snapshots: Vec::new(),
            crm_queue: Vec::new(),
            outreach_drafts: Vec::new(),
            audit_events: Vec::new(),
        }
    }

    #[must_use]
    pub fn find_lead(&self, lead_id: &str) -> Option<&Lead> {
        self.leads.iter().find(|lead| lead.id == lead_id)
    }

    pub fn find_lead_mut(&mut self, lead_id: &str) -> Option<&mut Lead> {
        self.leads.iter_mut().find(|lead| lead.id == lead_id)
    }

    /// Most recently appended snapshot for `session_id`.
    #[must_use]
    pub fn latest_snapshot_for_session(&self, session_id: &str) -> Option<&EstimatorSnapshot> {
        self.estimator_snapshots
            .iter()
            .rev()
            .find(|snapshot| snapshot.session_id == session_id)
    }

    #[must_use]
    pub fn pending_crm_count(&self) -> usize {
        self.crm_queue
            .iter()
            .filter(|item| item.synced_at.is_none())
            .count()
    }
}

#[must_use]
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Parses an RFC3339 timestamp and normalizes it to UTC.
///
/// # Errors
/// Returns [`LeadError::Validation`] when parsing fails.
pub fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, LeadError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
        .map_err(|err| LeadError::Validation(format!("invalid RFC3339 timestamp: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`LeadError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, LeadError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| LeadError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
