//! Load-time migration of the raw JSON document.
//!
//! Runs on `serde_json::Value` before the typed decode so that legacy files
//! (no `schemaVersion`, leads without workflow fields, snapshots with the old
//! field names, queue items written before scoring existed) still load.
//! Missing fields are defaulted; records are never removed. An entry that
//! still cannot be decoded fails the migration. Every step is idempotent:
//! migrating an already migrated document reports no change.

use anyhow::{anyhow, Context};
use fleet_leads_core::{
    format_rfc3339, new_id, parse_rfc3339, Actor, AuditEvent, ClientEvent, CrmQueueItem,
    EstimatorSnapshot, Grade, Lead, LeadStatus, OutreachDraft, DEFAULT_SESSION_ID,
    DOCUMENT_SCHEMA_VERSION, LEAD_SOURCE_WEBSITE,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use time::OffsetDateTime;

const LEGACY_SCHEMA_VERSION: u32 = 1;

/// `leads` comes first: queue items are backfilled from the migrated leads.
pub(crate) const COLLECTIONS: [&str; 6] = [
    "leads",
    "events",
    "estimatorSnapshots",
    "crmQueue",
    "outreachDrafts",
    "auditEvents",
];

const LEAD_TEXT_FIELDS: [&str; 5] = ["name", "email", "fleetSize", "priority", "message"];

const CRM_PAYLOAD_TEXT_FIELDS: [&str; 3] = ["name", "email", "priority"];

/// Attributed to audit events written before actors were recorded.
const UNKNOWN_ACTOR: &str = "unknown";

/// Legacy names first, canonical second.
const SNAPSHOT_RENAMES: [(&str, &str); 2] = [
    ("idleShare", "idleSharePercent"),
    ("carryingCost", "monthlyCarryingCost"),
];

const SNAPSHOT_NUMBERS: [&str; 4] = [
    "totalUnits",
    "idleSharePercent",
    "monthlyCarryingCost",
    "annualBurden",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub collections_reset: Vec<String>,
    pub records_backfilled: usize,
}

impl MigrationReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from_version != self.to_version
            || !self.collections_reset.is_empty()
            || self.records_backfilled > 0
    }
}

/// Brings `raw` up to [`DOCUMENT_SCHEMA_VERSION`].
///
/// # Errors
/// Fails if `now` cannot be rendered as RFC3339, or if a collection holds an
/// entry that is not an object or still does not decode after backfill.
pub fn migrate_value(raw: Value, now: OffsetDateTime) -> anyhow::Result<(Value, MigrationReport)> {
    let now_text = format_rfc3339(now)?;
    let mut root = match raw {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let from_version = root
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .and_then(|version| u32::try_from(version).ok())
        .unwrap_or(LEGACY_SCHEMA_VERSION);
    let to_version = from_version.max(DOCUMENT_SCHEMA_VERSION);
    let mut report = MigrationReport {
        from_version,
        to_version,
        ..MigrationReport::default()
    };
    root.insert("schemaVersion".to_string(), json!(to_version));

    for collection in COLLECTIONS {
        let entries = match root.remove(collection) {
            Some(Value::Array(entries)) => entries,
            _ => {
                report.collections_reset.push(collection.to_string());
                Vec::new()
            }
        };

        let migrated = match collection {
            "leads" => migrate_records::<Lead>(collection, entries, &now_text, &mut report, |lead| {
                backfill_lead(lead, &now_text)
            }),
            "events" => {
                migrate_records::<ClientEvent>(collection, entries, &now_text, &mut report, backfill_event)
            }
            "estimatorSnapshots" => migrate_records::<EstimatorSnapshot>(
                collection,
                entries,
                &now_text,
                &mut report,
                backfill_snapshot,
            ),
            "crmQueue" => {
                let leads = root
                    .get("leads")
                    .and_then(Value::as_array)
                    .map_or(&[][..], Vec::as_slice);
                migrate_records::<CrmQueueItem>(collection, entries, &now_text, &mut report, |item| {
                    backfill_crm_item(item, leads)
                })
            }
            "outreachDrafts" => {
                migrate_records::<OutreachDraft>(collection, entries, &now_text, &mut report, backfill_draft)
            }
            _ => migrate_records::<AuditEvent>(collection, entries, &now_text, &mut report, backfill_audit),
        }?;
        root.insert(collection.to_string(), Value::Array(migrated));
    }

    Ok((Value::Object(root), report))
}

fn backfill_lead(lead: &mut Map<String, Value>, now_text: &str) -> bool {
    let mut changed = ensure_id(lead);
    for field in LEAD_TEXT_FIELDS {
        changed |= ensure_text(lead, field, "");
    }
    changed |= ensure_text(lead, "sessionId", DEFAULT_SESSION_ID);
    changed |= ensure_text(lead, "source", LEAD_SOURCE_WEBSITE);

    let status_ok = lead
        .get("status")
        .and_then(Value::as_str)
        .and_then(LeadStatus::parse)
        .is_some();
    if !status_ok {
        lead.insert("status".to_string(), json!(LeadStatus::New));
        changed = true;
    }

    let grade_ok = lead
        .get("grade")
        .and_then(Value::as_str)
        .and_then(Grade::parse)
        .is_some();
    if !grade_ok {
        lead.insert("grade".to_string(), json!(Grade::C));
        changed = true;
    }

    let score = lead.get("score").map_or(0, score_from_value);
    if lead.get("score").and_then(Value::as_u64) != Some(u64::from(score)) {
        lead.insert("score".to_string(), json!(score));
        changed = true;
    }

    changed |= ensure_reasons(lead);
    changed |= ensure_timestamp(lead, "createdAt", now_text);

    let created_at = lead
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(|text| parse_rfc3339(text).ok());
    let updated_at = lead
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|text| parse_rfc3339(text).ok());
    let updated_ok = match (created_at, updated_at) {
        (Some(created), Some(updated)) => updated >= created,
        _ => false,
    };
    if !updated_ok {
        let created = lead.get("createdAt").cloned().unwrap_or_else(|| json!(now_text));
        lead.insert("updatedAt".to_string(), created);
        changed = true;
    }

    changed
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn score_from_value(value: &Value) -> u32 {
    if let Some(score) = value.as_u64() {
        return u32::try_from(score).unwrap_or(u32::MAX);
    }
    match value.as_f64() {
        Some(score) if score.is_finite() && score >= 0.0 => score.round().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

fn ensure_reasons(lead: &mut Map<String, Value>) -> bool {
    match lead.get("scoreReasons") {
        Some(Value::Array(reasons)) if reasons.iter().all(Value::is_string) => false,
        Some(Value::Array(reasons)) => {
            let kept: Vec<Value> = reasons.iter().filter(|reason| reason.is_string()).cloned().collect();
            lead.insert("scoreReasons".to_string(), Value::Array(kept));
            true
        }
        _ => {
            lead.insert("scoreReasons".to_string(), json!([]));
            true
        }
    }
}

/// Backfills the shared `id`/`createdAt` pair plus the per-collection
/// defaults, then checks that the record decodes as `T`.
fn migrate_records<T: DeserializeOwned>(
    collection: &str,
    entries: Vec<Value>,
    now_text: &str,
    report: &mut MigrationReport,
    backfill: impl Fn(&mut Map<String, Value>) -> bool,
) -> anyhow::Result<Vec<Value>> {
    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Value::Object(mut record) = entry else {
            return Err(anyhow!("{collection}[{index}] is not a JSON object"));
        };
        let mut changed = ensure_id(&mut record);
        changed |= ensure_timestamp(&mut record, "createdAt", now_text);
        changed |= backfill(&mut record);

        let record = Value::Object(record);
        serde_json::from_value::<T>(record.clone())
            .with_context(|| format!("{collection}[{index}] does not decode after backfill"))?;
        if changed {
            report.records_backfilled += 1;
        }
        records.push(record);
    }
    Ok(records)
}

fn backfill_event(event: &mut Map<String, Value>) -> bool {
    let mut changed = ensure_text(event, "eventType", "");
    changed |= ensure_text(event, "sessionId", DEFAULT_SESSION_ID);
    changed |= ensure_text(event, "page", "/");
    if !event
        .get("payload")
        .is_some_and(|payload| payload.is_object() || payload.is_array())
    {
        event.insert("payload".to_string(), json!({}));
        changed = true;
    }
    changed
}

fn backfill_snapshot(snapshot: &mut Map<String, Value>) -> bool {
    let mut changed = ensure_text(snapshot, "sessionId", DEFAULT_SESSION_ID);
    for (legacy, canonical) in SNAPSHOT_RENAMES {
        if let Some(value) = snapshot.remove(legacy) {
            snapshot.entry(canonical.to_string()).or_insert(value);
            changed = true;
        }
    }
    for field in SNAPSHOT_NUMBERS {
        let current = snapshot.get(field);
        if current.is_some_and(|value| value.as_f64().is_some_and(f64::is_finite)) {
            continue;
        }
        let coerced = current
            .and_then(Value::as_str)
            .and_then(|text| text.trim().parse::<f64>().ok())
            .filter(|number| number.is_finite())
            .unwrap_or(0.0);
        snapshot.insert(field.to_string(), json!(coerced));
        changed = true;
    }
    changed
}

/// Payload fields missing from a queue item are taken from the lead it
/// points at, or from the lead defaults when that lead is gone.
fn backfill_crm_item(item: &mut Map<String, Value>, leads: &[Value]) -> bool {
    let mut changed = ensure_text(item, "leadId", "");
    let synced_ok = match item.get("syncedAt") {
        None | Some(Value::Null) => true,
        Some(value) => value.as_str().is_some_and(|text| parse_rfc3339(text).is_ok()),
    };
    if !synced_ok {
        item.insert("syncedAt".to_string(), Value::Null);
        changed = true;
    }

    let lead = item
        .get("leadId")
        .and_then(Value::as_str)
        .and_then(|lead_id| leads.iter().find(|lead| lead["id"].as_str() == Some(lead_id)))
        .cloned()
        .unwrap_or(Value::Null);

    if !item.get("payload").is_some_and(Value::is_object) {
        item.insert("payload".to_string(), json!({}));
        changed = true;
    }
    let Some(Value::Object(payload)) = item.get_mut("payload") else {
        return changed;
    };

    for field in CRM_PAYLOAD_TEXT_FIELDS {
        let fallback = lead[field].as_str().unwrap_or_default();
        changed |= ensure_text(payload, field, fallback);
    }

    let score_ok = payload
        .get("score")
        .and_then(Value::as_u64)
        .is_some_and(|score| u32::try_from(score).is_ok());
    if !score_ok {
        let score = payload
            .get("score")
            .filter(|score| score.is_number())
            .or_else(|| lead.get("score"))
            .map_or(0, score_from_value);
        payload.insert("score".to_string(), json!(score));
        changed = true;
    }

    let grade_ok = payload
        .get("grade")
        .and_then(Value::as_str)
        .and_then(Grade::parse)
        .is_some();
    if !grade_ok {
        let grade = lead["grade"].as_str().and_then(Grade::parse).unwrap_or(Grade::C);
        payload.insert("grade".to_string(), json!(grade));
        changed = true;
    }

    changed
}

fn backfill_draft(draft: &mut Map<String, Value>) -> bool {
    let mut changed = ensure_text(draft, "leadId", "");
    changed |= ensure_text(draft, "subject", "");
    changed |= ensure_text(draft, "body", "");
    changed
}

fn backfill_audit(event: &mut Map<String, Value>) -> bool {
    let actor_ok = event
        .get("actor")
        .is_some_and(|actor| serde_json::from_value::<Actor>(actor.clone()).is_ok());
    let mut changed = !actor_ok;
    if !actor_ok {
        event.insert("actor".to_string(), json!(Actor::system(UNKNOWN_ACTOR)));
    }
    changed |= ensure_text(event, "action", "");
    changed |= ensure_text(event, "targetType", "");
    changed |= ensure_text(event, "targetId", "");
    if !event.get("details").is_some_and(Value::is_object) {
        event.insert("details".to_string(), json!({}));
        changed = true;
    }
    changed
}

fn ensure_id(record: &mut Map<String, Value>) -> bool {
    match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => false,
        Some(Value::Number(id)) => {
            let id = id.to_string();
            record.insert("id".to_string(), json!(id));
            true
        }
        _ => {
            record.insert("id".to_string(), json!(new_id()));
            true
        }
    }
}

/// Strings are kept, numbers become their decimal text, anything else is
/// replaced by `default`.
fn ensure_text(record: &mut Map<String, Value>, field: &str, default: &str) -> bool {
    let replacement = match record.get(field) {
        Some(Value::String(_)) => return false,
        Some(Value::Number(number)) => number.to_string(),
        _ => default.to_string(),
    };
    record.insert(field.to_string(), Value::String(replacement));
    true
}

fn ensure_timestamp(record: &mut Map<String, Value>, field: &str, now_text: &str) -> bool {
    let valid = record
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|text| parse_rfc3339(text).is_ok());
    if valid {
        return false;
    }
    record.insert(field.to_string(), json!(now_text));
    true
}
