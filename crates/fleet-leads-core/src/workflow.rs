//! State-changing lead operations. Each one mutates the document in place
//! and appends its audit event; the caller persists the result.

use serde_json::json;
use time::OffsetDateTime;

use crate::audit::append_audit;
use crate::recommend::compose_outreach_draft;
use crate::scoring::{score_lead, ScoringRuleset};
use crate::{
    new_id, Actor, CrmPayload, CrmQueueItem, Document, Lead, LeadError, LeadStatus,
    OutreachDraft, Role,
};

pub const PUBLIC_FORM_ACTOR: &str = "public-form";

/// Any status may move to any other; only the target status is gated.
///
/// # Errors
/// Returns [`LeadError::Forbidden`] when a non-admin targets a closing
/// status.
pub fn authorize_status_change(role: Role, target: LeadStatus) -> Result<(), LeadError> {
    if target.requires_admin() && role != Role::Admin {
        return Err(LeadError::Forbidden("Insufficient permissions.".to_string()));
    }
    Ok(())
}

/// Scores a freshly validated lead, stores it, queues it for CRM delivery
/// and audits the creation. Returns the stored lead.
pub fn record_lead(
    document: &mut Document,
    mut lead: Lead,
    ruleset: &ScoringRuleset,
    now: OffsetDateTime,
) -> Lead {
    let scored = score_lead(
        &lead,
        document.latest_snapshot_for_session(&lead.session_id),
        ruleset,
    );
    lead.score = scored.score;
    lead.grade = scored.grade;
    lead.score_reasons = scored.reasons;

    document.crm_queue.push(CrmQueueItem {
        id: new_id(),
        lead_id: lead.id.clone(),
        payload: CrmPayload {
            name: lead.name.clone(),
            email: lead.email.clone(),
            priority: lead.priority.clone(),
            score: lead.score,
            grade: lead.grade,
        },
        created_at: now,
        synced_at: None,
    });
    append_audit(
        document,
        &Actor::system(PUBLIC_FORM_ACTOR),
        "lead.created",
        "lead",
        &lead.id,
        json!({ "priority": lead.priority, "grade": lead.grade }),
        now,
    );
    document.leads.push(lead.clone());

    lead
}

/// # Errors
/// Returns [`LeadError::NotFound`] for an unknown lead id.
pub fn change_lead_status(
    document: &mut Document,
    lead_id: &str,
    status: LeadStatus,
    actor: &Actor,
    now: OffsetDateTime,
) -> Result<Lead, LeadError> {
    let lead = document
        .find_lead_mut(lead_id)
        .ok_or_else(LeadError::lead_not_found)?;

    let from = lead.status;
    lead.status = status;
    lead.updated_at = now.max(lead.created_at);
    let updated = lead.clone();

    append_audit(
        document,
        actor,
        "lead.status_changed",
        "lead",
        lead_id,
        json!({ "from": from, "to": status }),
        now,
    );

    Ok(updated)
}

/// # Errors
/// Returns [`LeadError::NotFound`] for an unknown lead id.
pub fn create_outreach_draft(
    document: &mut Document,
    lead_id: &str,
    actor: &Actor,
    now: OffsetDateTime,
) -> Result<OutreachDraft, LeadError> {
    let lead = document
        .find_lead(lead_id)
        .ok_or_else(LeadError::lead_not_found)?;
    let content = compose_outreach_draft(lead);

    let draft = OutreachDraft {
        id: new_id(),
        lead_id: lead_id.to_string(),
        subject: content.subject,
        body: content.body,
        created_at: now,
    };
    document.outreach_drafts.push(draft.clone());

    append_audit(
        document,
        actor,
        "outreach.draft_created",
        "lead",
        lead_id,
        json!({ "draftId": draft.id }),
        now,
    );

    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixture_lead, fixture_snapshot, must_ok, must_utc};
    use crate::scoring::PRIORITY_BOTH;
    use crate::Grade;

    #[test]
    fn advisor_cannot_target_closing_statuses() {
        for status in [LeadStatus::ProposalSent, LeadStatus::Won, LeadStatus::Lost] {
            assert!(matches!(
                authorize_status_change(Role::Advisor, status),
                Err(LeadError::Forbidden(_))
            ));
            assert!(authorize_status_change(Role::Admin, status).is_ok());
        }
        for status in [LeadStatus::New, LeadStatus::Qualified, LeadStatus::Contacted] {
            assert!(authorize_status_change(Role::Advisor, status).is_ok());
        }
    }

    #[test]
    fn record_lead_uses_latest_session_snapshot_and_queues_once() {
        let mut document = Document::empty();
        document.estimator_snapshots.push(fixture_snapshot("sess-1", 100_000.0));
        document.estimator_snapshots.push(fixture_snapshot("sess-1", 600_000.0));
        let lead = fixture_lead("lead-1", PRIORITY_BOTH, "200 trucks", "please help asap");

        let stored = record_lead(&mut document, lead, &ScoringRuleset::v1(), must_utc("2026-02-07T12:00:00Z"));

        assert_eq!(stored.score, 61);
        assert_eq!(stored.grade, Grade::A);
        assert_eq!(document.leads.len(), 1);
        assert_eq!(document.crm_queue.len(), 1);
        assert_eq!(document.crm_queue[0].lead_id, "lead-1");
        assert_eq!(document.crm_queue[0].payload.score, 61);
        assert!(document.crm_queue[0].synced_at.is_none());
        assert_eq!(document.audit_events[0].action, "lead.created");
        assert_eq!(document.audit_events[0].actor, Actor::system(PUBLIC_FORM_ACTOR));
    }

    #[test]
    fn status_change_allows_any_transition_and_audits_from_to() {
        let mut document = Document::empty();
        let mut lead = fixture_lead("lead-1", "Acquire units", "10", "hi");
        lead.status = LeadStatus::Won;
        document.leads.push(lead);
        let actor = Actor::user("admin", Role::Admin);

        let updated = must_ok(change_lead_status(
            &mut document,
            "lead-1",
            LeadStatus::New,
            &actor,
            must_utc("2026-02-08T12:00:00Z"),
        ));

        assert_eq!(updated.status, LeadStatus::New);
        assert_eq!(updated.updated_at, must_utc("2026-02-08T12:00:00Z"));
        let event = &document.audit_events[0];
        assert_eq!(event.action, "lead.status_changed");
        assert_eq!(event.details, json!({ "from": "won", "to": "new" }));
    }

    #[test]
    fn status_change_on_unknown_lead_is_not_found() {
        let mut document = Document::empty();
        let result = change_lead_status(
            &mut document,
            "missing",
            LeadStatus::Qualified,
            &Actor::user("advisor", Role::Advisor),
            must_utc("2026-02-08T12:00:00Z"),
        );
        assert_eq!(result, Err(LeadError::lead_not_found()));
        assert!(document.audit_events.is_empty());
    }

    #[test]
    fn drafts_are_append_only_per_lead() {
        let mut document = Document::empty();
        document.leads.push(fixture_lead("lead-1", "Acquire units", "10", "hi"));
        let actor = Actor::user("advisor", Role::Advisor);

        let first = must_ok(create_outreach_draft(&mut document, "lead-1", &actor, must_utc("2026-02-08T12:00:00Z")));
        let second = must_ok(create_outreach_draft(&mut document, "lead-1", &actor, must_utc("2026-02-08T12:05:00Z")));

        assert_ne!(first.id, second.id);
        assert_eq!(document.outreach_drafts.len(), 2);
        assert_eq!(document.audit_events.len(), 2);
        assert_eq!(document.audit_events[1].details, json!({ "draftId": second.id }));
    }
}
