//! Dashboard and funnel aggregation over a filtered lead collection.

use serde::{Deserialize, Serialize};

use crate::{round2, Document, Lead, LeadStatus};

pub const RECENT_LEADS_LIMIT: usize = 12;
const TOP_PRIORITIES_LIMIT: usize = 5;

/// Optional exact-match filters. Blank values mean "no filter"; the grade is
/// compared upper-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilter {
    pub status: Option<String>,
    pub grade: Option<String>,
}

impl LeadFilter {
    #[must_use]
    pub fn from_query(status: Option<&str>, grade: Option<&str>) -> Self {
        let status = status
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        let grade = grade
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_uppercase);
        Self { status, grade }
    }

    #[must_use]
    pub fn matches(&self, lead: &Lead) -> bool {
        let status_ok = self
            .status
            .as_deref()
            .map_or(true, |status| lead.status.as_str() == status);
        let grade_ok = self
            .grade
            .as_deref()
            .map_or(true, |grade| lead.grade.as_str() == grade);
        status_ok && grade_ok
    }

    fn apply<'a>(&self, leads: &'a [Lead]) -> Vec<&'a Lead> {
        leads.iter().filter(|lead| self.matches(lead)).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub new: usize,
    pub qualified: usize,
    pub contacted: usize,
    pub proposal_sent: usize,
    pub won: usize,
    pub lost: usize,
}

impl StatusCounts {
    fn tally<'a>(leads: impl IntoIterator<Item = &'a Lead>) -> Self {
        let mut counts = Self::default();
        for lead in leads {
            *counts.slot(lead.status) += 1;
        }
        counts
    }

    fn slot(&mut self, status: LeadStatus) -> &mut usize {
        match status {
            LeadStatus::New => &mut self.new,
            LeadStatus::Qualified => &mut self.qualified,
            LeadStatus::Contacted => &mut self.contacted,
            LeadStatus::ProposalSent => &mut self.proposal_sent,
            LeadStatus::Won => &mut self.won,
            LeadStatus::Lost => &mut self.lost,
        }
    }

    #[must_use]
    pub fn get(&self, status: LeadStatus) -> usize {
        match status {
            LeadStatus::New => self.new,
            LeadStatus::Qualified => self.qualified,
            LeadStatus::Contacted => self.contacted,
            LeadStatus::ProposalSent => self.proposal_sent,
            LeadStatus::Won => self.won,
            LeadStatus::Lost => self.lost,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        LeadStatus::ALL.into_iter().map(|status| self.get(status)).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityCount {
    pub priority: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTotals {
    pub leads: usize,
    pub events: usize,
    pub estimator_snapshots: usize,
    pub pending_crm_sync: usize,
    pub outreach_drafts: usize,
    pub avg_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub totals: DashboardTotals,
    pub status_counts: StatusCounts,
    pub top_priorities: Vec<PriorityCount>,
    pub recent_leads: Vec<Lead>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunnelRates {
    pub qualified_rate: f64,
    pub contacted_rate: f64,
    pub proposal_rate: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunnelReport {
    pub counts: StatusCounts,
    pub rates: FunnelRates,
    pub total: usize,
}

/// Lead figures follow `filter`; events, snapshots, drafts and the CRM
/// backlog are always counted over the whole document.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn dashboard_summary(document: &Document, filter: &LeadFilter) -> DashboardSummary {
    let leads = filter.apply(&document.leads);

    let total_score: u64 = leads.iter().map(|lead| u64::from(lead.score)).sum();
    let avg_score = if leads.is_empty() {
        0.0
    } else {
        round2(total_score as f64 / leads.len() as f64)
    };

    DashboardSummary {
        totals: DashboardTotals {
            leads: leads.len(),
            events: document.events.len(),
            estimator_snapshots: document.estimator_snapshots.len(),
            pending_crm_sync: document.pending_crm_count(),
            outreach_drafts: document.outreach_drafts.len(),
            avg_score,
        },
        status_counts: StatusCounts::tally(leads.iter().copied()),
        top_priorities: top_priorities(&leads),
        recent_leads: most_recent(&leads, RECENT_LEADS_LIMIT),
    }
}

#[must_use]
pub fn funnel_analytics(document: &Document, filter: &LeadFilter) -> FunnelReport {
    let leads = filter.apply(&document.leads);
    let counts = StatusCounts::tally(leads.iter().copied());
    let base = leads.len().max(1);

    FunnelReport {
        counts,
        rates: FunnelRates {
            qualified_rate: rate(counts.qualified, base),
            contacted_rate: rate(counts.contacted, base),
            proposal_rate: rate(counts.proposal_sent, base),
            win_rate: rate(counts.won, base),
        },
        total: leads.len(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(count: usize, base: usize) -> f64 {
    round2(count as f64 / base as f64 * 100.0)
}

/// Descending frequency; ties keep first-seen order.
fn top_priorities(leads: &[&Lead]) -> Vec<PriorityCount> {
    let mut counts: Vec<PriorityCount> = Vec::new();
    for lead in leads {
        match counts.iter_mut().find(|entry| entry.priority == lead.priority) {
            Some(entry) => entry.count += 1,
            None => counts.push(PriorityCount {
                priority: lead.priority.clone(),
                count: 1,
            }),
        }
    }

    counts.sort_by(|lhs, rhs| rhs.count.cmp(&lhs.count));
    counts.truncate(TOP_PRIORITIES_LIMIT);
    counts
}

fn most_recent(leads: &[&Lead], limit: usize) -> Vec<Lead> {
    let mut ordered: Vec<&Lead> = leads.iter().rev().copied().collect();
    ordered.sort_by(|lhs, rhs| rhs.created_at.cmp(&lhs.created_at));
    ordered.into_iter().take(limit).map(Lead::clone).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixture_lead, must_ok};
    use crate::{Grade, LeadStatus};
    use proptest::prelude::*;
    use time::Duration;

    fn lead_with(index: usize, status: LeadStatus, grade: Grade, priority: &str, score: u32) -> Lead {
        let mut lead = fixture_lead(&format!("lead-{index}"), priority, "10", "hi");
        lead.status = status;
        lead.grade = grade;
        lead.score = score;
        lead.created_at += Duration::minutes(i64::try_from(index).unwrap_or(0));
        lead.updated_at = lead.created_at;
        lead
    }

    fn fixture_document() -> Document {
        let mut document = Document::empty();
        document.leads = vec![
            lead_with(0, LeadStatus::New, Grade::C, "Acquire units", 10),
            lead_with(1, LeadStatus::Qualified, Grade::B, "Sell off units", 30),
            lead_with(2, LeadStatus::Won, Grade::A, "Sell off units", 45),
            lead_with(3, LeadStatus::Qualified, Grade::A, "Acquire units", 41),
        ];
        document
    }

    #[test]
    fn empty_document_has_zero_rates_and_zero_filled_counts() {
        let document = Document::empty();
        let funnel = funnel_analytics(&document, &LeadFilter::default());
        assert_eq!(funnel.total, 0);
        assert_eq!(funnel.counts, StatusCounts::default());
        assert!(funnel.rates.qualified_rate.abs() < f64::EPSILON);
        assert!(funnel.rates.win_rate.abs() < f64::EPSILON);

        let summary = dashboard_summary(&document, &LeadFilter::default());
        assert!(summary.totals.avg_score.abs() < f64::EPSILON);
        let value = must_ok(serde_json::to_value(summary.status_counts));
        assert_eq!(value.as_object().map(serde_json::Map::len), Some(6));
    }

    #[test]
    fn summary_counts_average_and_ties() {
        let summary = dashboard_summary(&fixture_document(), &LeadFilter::default());

        assert_eq!(summary.totals.leads, 4);
        assert!((summary.totals.avg_score - 31.5).abs() < 1e-9);
        assert_eq!(summary.status_counts.qualified, 2);
        assert_eq!(summary.status_counts.total(), summary.totals.leads);
        assert_eq!(
            summary.top_priorities,
            vec![
                PriorityCount { priority: "Acquire units".to_string(), count: 2 },
                PriorityCount { priority: "Sell off units".to_string(), count: 2 },
            ]
        );
        let recent: Vec<&str> = summary.recent_leads.iter().map(|lead| lead.id.as_str()).collect();
        assert_eq!(recent, vec!["lead-3", "lead-2", "lead-1", "lead-0"]);
    }

    #[test]
    fn filters_apply_to_lead_figures_only() {
        let document = fixture_document();
        let filter = LeadFilter::from_query(Some(" qualified "), Some("a"));

        let summary = dashboard_summary(&document, &filter);
        assert_eq!(summary.totals.leads, 1);
        assert_eq!(summary.recent_leads[0].id, "lead-3");

        let funnel = funnel_analytics(&document, &filter);
        assert_eq!(funnel.total, 1);
        assert!((funnel.rates.qualified_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn funnel_rates_are_percentages_of_total() {
        let funnel = funnel_analytics(&fixture_document(), &LeadFilter::default());
        assert!((funnel.rates.qualified_rate - 50.0).abs() < f64::EPSILON);
        assert!((funnel.rates.win_rate - 25.0).abs() < f64::EPSILON);
        assert!(funnel.rates.contacted_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn recent_leads_are_capped() {
        let mut document = Document::empty();
        document.leads = (0..20)
            .map(|index| lead_with(index, LeadStatus::New, Grade::C, "Acquire units", 0))
            .collect();
        let summary = dashboard_summary(&document, &LeadFilter::default());
        assert_eq!(summary.recent_leads.len(), RECENT_LEADS_LIMIT);
        assert_eq!(summary.recent_leads[0].id, "lead-19");
    }

    fn status_from_code(code: u8) -> LeadStatus {
        LeadStatus::ALL[usize::from(code % 6)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_status_counts_sum_to_total_and_rates_bounded(codes in prop::collection::vec(0u8..6, 0..60)) {
            let mut document = Document::empty();
            document.leads = codes
                .iter()
                .enumerate()
                .map(|(index, code)| lead_with(index, status_from_code(*code), Grade::C, "Acquire units", 0))
                .collect();

            let summary = dashboard_summary(&document, &LeadFilter::default());
            prop_assert_eq!(summary.status_counts.total(), summary.totals.leads);

            let funnel = funnel_analytics(&document, &LeadFilter::default());
            for rate in [
                funnel.rates.qualified_rate,
                funnel.rates.contacted_rate,
                funnel.rates.proposal_rate,
                funnel.rates.win_rate,
            ] {
                prop_assert!((0.0..=100.0).contains(&rate));
            }
        }
    }
}
