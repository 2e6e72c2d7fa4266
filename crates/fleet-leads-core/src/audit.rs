//! Append-only audit trail. Events are only ever pushed; nothing here
//! edits or removes an existing entry.

use serde_json::Value;
use time::OffsetDateTime;

use crate::{new_id, Actor, AuditEvent, Document};

pub const AUDIT_DEFAULT_LIMIT: usize = 25;
pub const AUDIT_MAX_LIMIT: usize = 100;

pub fn append_audit(
    document: &mut Document,
    actor: &Actor,
    action: &str,
    target_type: &str,
    target_id: &str,
    details: Value,
    now: OffsetDateTime,
) -> AuditEvent {
    let event = AuditEvent {
        id: new_id(),
        actor: actor.clone(),
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id: target_id.to_string(),
        details,
        created_at: now,
    };
    document.audit_events.push(event.clone());
    event
}

/// Resolves the `limit` query parameter: unparsable or non-positive values
/// fall back to the default, and the result never exceeds the cap.
#[must_use]
pub fn audit_limit(raw: Option<&str>) -> usize {
    raw.map(str::trim)
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(AUDIT_DEFAULT_LIMIT)
        .min(AUDIT_MAX_LIMIT)
}

/// Newest first. Events sharing a timestamp keep reverse append order.
#[must_use]
pub fn recent_audit_events(document: &Document, limit: usize) -> Vec<AuditEvent> {
    let mut events: Vec<&AuditEvent> = document.audit_events.iter().rev().collect();
    events.sort_by(|lhs, rhs| rhs.created_at.cmp(&lhs.created_at));
    events.into_iter().take(limit).cloned().collect()
}
