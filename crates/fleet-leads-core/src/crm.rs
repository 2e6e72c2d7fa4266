//! Outbound CRM queue. The queueing and audit rules are fixed here; the
//! actual delivery sits behind [`CrmOutbound`].

use serde_json::json;
use time::OffsetDateTime;

use crate::audit::append_audit;
use crate::{Actor, CrmQueueItem, Document, LeadError};

pub trait CrmOutbound: Send + Sync {
    fn name(&self) -> &'static str;

    /// Delivers pending items. Items are only stamped as synced after this
    /// returns `Ok`.
    ///
    /// # Errors
    /// Returns [`LeadError::Outbound`] when delivery fails.
    fn push(&self, items: &[CrmQueueItem]) -> Result<(), LeadError>;
}

/// Local stand-in that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCrm;

impl CrmOutbound for MockCrm {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn push(&self, _items: &[CrmQueueItem]) -> Result<(), LeadError> {
        Ok(())
    }
}

/// Pushes every unsynced queue item and stamps it with `now`.
///
/// Returns the number of items synced. A second call with nothing pending
/// returns 0 and leaves the document untouched, audit trail included.
///
/// # Errors
/// Propagates [`CrmOutbound::push`] failures; nothing is stamped then.
pub fn sync_crm_queue(
    document: &mut Document,
    outbound: &dyn CrmOutbound,
    actor: &Actor,
    now: OffsetDateTime,
) -> Result<usize, LeadError> {
    let pending: Vec<CrmQueueItem> = document
        .crm_queue
        .iter()
        .filter(|item| item.synced_at.is_none())
        .cloned()
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    outbound.push(&pending)?;

    let mut synced = 0_usize;
    for item in &mut document.crm_queue {
        if item.synced_at.is_none() {
            item.synced_at = Some(now);
            synced += 1;
        }
    }

    append_audit(
        document,
        actor,
        "crm.sync_mock",
        "crmQueue",
        "all",
        json!({ "synced": synced, "outbound": outbound.name() }),
        now,
    );

    Ok(synced)
}
