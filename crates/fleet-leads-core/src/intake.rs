//! Validation and coercion of public form, telemetry and estimator payloads.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
    new_id, ClientEvent, EstimatorSnapshot, Grade, Lead, LeadError, LeadStatus,
    DEFAULT_SESSION_ID, LEAD_SOURCE_WEBSITE,
};

/// Raw public lead form. Non-string values degrade to empty text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub fleet_size: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub priority: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: String,
    /// Honeypot. Humans never see the field, so any content marks a bot.
    #[serde(default, deserialize_with = "lenient_text")]
    pub website: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub session_id: String,
}

impl LeadSubmission {
    /// Validates the form and builds an unscored `new` lead.
    ///
    /// # Errors
    /// Returns [`LeadError::Spam`] when the honeypot is filled and
    /// [`LeadError::Validation`] for missing fields or a malformed email.
    pub fn into_lead(self, now: OffsetDateTime) -> Result<Lead, LeadError> {
        if !self.website.is_empty() {
            return Err(LeadError::Spam);
        }

        if self.name.is_empty()
            || self.email.is_empty()
            || self.fleet_size.is_empty()
            || self.message.is_empty()
            || self.priority.is_empty()
        {
            return Err(LeadError::Validation("Missing required fields.".to_string()));
        }

        if !is_valid_email(&self.email) {
            return Err(LeadError::Validation("Invalid email address.".to_string()));
        }

        Ok(Lead {
            id: new_id(),
            name: self.name,
            email: self.email.to_lowercase(),
            fleet_size: self.fleet_size,
            priority: self.priority,
            message: self.message,
            session_id: session_or_default(self.session_id),
            source: LEAD_SOURCE_WEBSITE.to_string(),
            status: LeadStatus::New,
            score: 0,
            grade: Grade::C,
            score_reasons: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubmission {
    #[serde(default, deserialize_with = "lenient_text")]
    pub event_type: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub session_id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub page: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventSubmission {
    /// # Errors
    /// Returns [`LeadError::Validation`] when `eventType` is blank.
    pub fn into_event(self, now: OffsetDateTime) -> Result<ClientEvent, LeadError> {
        if self.event_type.is_empty() {
            return Err(LeadError::Validation("eventType is required".to_string()));
        }

        let payload = match self.payload {
            payload @ (Value::Object(_) | Value::Array(_)) => payload,
            _ => Value::Object(Map::new()),
        };

        Ok(ClientEvent {
            id: new_id(),
            event_type: self.event_type,
            session_id: session_or_default(self.session_id),
            page: if self.page.is_empty() {
                "/".to_string()
            } else {
                self.page
            },
            payload,
            created_at: now,
        })
    }
}

/// Estimator snapshot as posted by the browser. The caller computes
/// `annualBurden`; the server only coerces and stores it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSubmission {
    #[serde(default, deserialize_with = "lenient_text")]
    pub session_id: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_units: f64,
    #[serde(default, alias = "idleShare", deserialize_with = "lenient_number")]
    pub idle_share_percent: f64,
    #[serde(default, alias = "carryingCost", deserialize_with = "lenient_number")]
    pub monthly_carrying_cost: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub annual_burden: f64,
}

impl SnapshotSubmission {
    #[must_use]
    pub fn into_snapshot(self, now: OffsetDateTime) -> EstimatorSnapshot {
        EstimatorSnapshot {
            id: new_id(),
            session_id: session_or_default(self.session_id),
            total_units: self.total_units,
            idle_share_percent: self.idle_share_percent,
            monthly_carrying_cost: self.monthly_carrying_cost,
            annual_burden: self.annual_burden,
            created_at: now,
        }
    }
}

/// `local@domain.tld` shape: one `@`, no whitespace, and a dot inside the
/// domain with text on both sides.
#[must_use]
pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    domain
        .char_indices()
        .any(|(index, ch)| ch == '.' && index > 0 && index + 1 < domain.len())
}

/// Extracts the numeric portion of a free-text fleet size (`"200 trucks"`
/// is 200). Anything that does not reduce to a finite number is 0.
#[must_use]
pub fn parse_fleet_size(raw: &str) -> f64 {
    let digits: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    if digits.is_empty() {
        return 0.0;
    }

    match digits.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

fn session_or_default(session_id: String) -> String {
    if session_id.is_empty() {
        DEFAULT_SESSION_ID.to_string()
    } else {
        session_id
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => text.trim().to_string(),
        _ => String::new(),
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_number(&value))
}

fn coerce_number(value: &Value) -> f64 {
    let coerced = match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(0.0)
            }
        }
        _ => 0.0,
    };

    if coerced.is_finite() {
        coerced
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{must_ok, must_utc};
    use serde_json::json;

    fn submission(value: Value) -> LeadSubmission {
        must_ok(serde_json::from_value(value))
    }

    fn valid_form() -> Value {
        json!({
            "name": "  Dana Fleet ",
            "email": "Dana@Example.COM",
            "fleetSize": "120 units",
            "priority": "Acquire units",
            "message": "Looking to grow",
            "website": ""
        })
    }

    #[test]
    fn valid_form_builds_new_lead_with_lowercase_email() {
        let lead = must_ok(submission(valid_form()).into_lead(must_utc("2026-02-07T12:00:00Z")));

        assert_eq!(lead.name, "Dana Fleet");
        assert_eq!(lead.email, "dana@example.com");
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.session_id, DEFAULT_SESSION_ID);
        assert_eq!(lead.source, LEAD_SOURCE_WEBSITE);
        assert_eq!(lead.created_at, lead.updated_at);
    }

    #[test]
    fn honeypot_is_rejected_before_other_validation() {
        let result = submission(json!({ "website": "http://spam.example" }))
            .into_lead(must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(result, Err(LeadError::Spam));
        assert_eq!(LeadError::Spam.to_string(), "Spam detected.");
    }

    #[test]
    fn missing_or_non_string_fields_are_rejected() {
        let mut form = valid_form();
        form["message"] = json!(42);
        let result = submission(form).into_lead(must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(
            result,
            Err(LeadError::Validation("Missing required fields.".to_string()))
        );
    }

    #[test]
    fn malformed_email_is_rejected() {
        let mut form = valid_form();
        form["email"] = json!("dana@example");
        let result = submission(form).into_lead(must_utc("2026-02-07T12:00:00Z"));
        assert_eq!(
            result,
            Err(LeadError::Validation("Invalid email address.".to_string()))
        );
    }

    #[test]
    fn email_shape_checks() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("a@.co"));
        assert!(!is_valid_email("a@b."));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("a@b@c.de"));
        assert!(!is_valid_email("plain"));
    }

    #[test]
    fn fleet_size_extracts_numeric_portion() {
        assert!((parse_fleet_size("200 trucks") - 200.0).abs() < f64::EPSILON);
        assert!((parse_fleet_size("~85 units") - 85.0).abs() < f64::EPSILON);
        assert!((parse_fleet_size("approx. 85") - 0.85).abs() < f64::EPSILON);
        assert!(parse_fleet_size("lots").abs() < f64::EPSILON);
        assert!(parse_fleet_size("").abs() < f64::EPSILON);
        assert!(parse_fleet_size("1.2.3").abs() < f64::EPSILON);
    }

    #[test]
    fn event_defaults_page_session_and_payload() {
        let submission: EventSubmission =
            must_ok(serde_json::from_value(json!({ "eventType": "cta_click", "payload": "hero" })));
        let event = must_ok(submission.into_event(must_utc("2026-02-07T12:00:00Z")));

        assert_eq!(event.page, "/");
        assert_eq!(event.session_id, DEFAULT_SESSION_ID);
        assert_eq!(event.payload, json!({}));
    }

    #[test]
    fn event_payload_keeps_objects_and_arrays() {
        let now = must_utc("2026-02-07T12:00:00Z");
        for (payload, expected) in [
            (json!([1, 2]), json!([1, 2])),
            (json!({ "cta": "hero" }), json!({ "cta": "hero" })),
            (json!(null), json!({})),
            (json!(7), json!({})),
        ] {
            let submission: EventSubmission =
                must_ok(serde_json::from_value(json!({ "eventType": "cta_click", "payload": payload })));
            let event = must_ok(submission.into_event(now));
            assert_eq!(event.payload, expected);
        }
    }

    #[test]
    fn event_requires_event_type() {
        let submission: EventSubmission = must_ok(serde_json::from_value(json!({ "page": "/x" })));
        assert!(matches!(
            submission.into_event(must_utc("2026-02-07T12:00:00Z")),
            Err(LeadError::Validation(_))
        ));
    }

    #[test]
    fn snapshot_numbers_are_coerced() {
        let submission: SnapshotSubmission = must_ok(serde_json::from_value(json!({
            "sessionId": "sess-9",
            "totalUnits": "150",
            "idleShare": "n/a",
            "carryingCost": null,
            "annualBurden": 540000
        })));
        let snapshot = submission.into_snapshot(must_utc("2026-02-07T12:00:00Z"));

        assert_eq!(snapshot.session_id, "sess-9");
        assert!((snapshot.total_units - 150.0).abs() < f64::EPSILON);
        assert!(snapshot.idle_share_percent.abs() < f64::EPSILON);
        assert!(snapshot.monthly_carrying_cost.abs() < f64::EPSILON);
        assert!((snapshot.annual_burden - 540_000.0).abs() < f64::EPSILON);
    }
}
