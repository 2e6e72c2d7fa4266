use serde::{Deserialize, Serialize};

use crate::intake::parse_fleet_size;
use crate::scoring::{PRIORITY_ACQUIRE, PRIORITY_BOTH, PRIORITY_SELL_OFF};
use crate::{Grade, Lead};

const SEGMENTATION_MIN_UNITS: f64 = 150.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub next_best_action: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
}

/// Priority guidance first, then fleet segmentation, then the grade cadence.
#[must_use]
pub fn recommend_for_lead(lead: &Lead) -> Recommendation {
    let mut recommendations = Vec::new();

    match lead.priority.as_str() {
        PRIORITY_BOTH => {
            recommendations.push("Run a combined keep/replace/divest workshop in week 1.".to_string());
            recommendations
                .push("Build a phased acquisition + liquidation schedule over 90 days.".to_string());
        }
        PRIORITY_ACQUIRE => {
            recommendations.push(
                "Prioritize specification alignment and total-cost vendor shortlist.".to_string(),
            );
        }
        PRIORITY_SELL_OFF => {
            recommendations.push(
                "Start with high-carry-cost and low-utilization units for sell-off.".to_string(),
            );
        }
        _ => {}
    }

    if parse_fleet_size(&lead.fleet_size) >= SEGMENTATION_MIN_UNITS {
        recommendations
            .push("Create region-based fleet segmentation to speed decision cycles.".to_string());
    }

    recommendations.push(
        match lead.grade {
            Grade::A => "Route to senior advisor and schedule discovery call within 24 hours.",
            Grade::B => "Schedule advisor call within 72 hours and send pre-call questionnaire.",
            Grade::C => "Assign nurture sequence with estimator follow-up and case examples.",
        }
        .to_string(),
    );

    let next_best_action = match lead.grade {
        Grade::A => "Immediate senior discovery call",
        Grade::B | Grade::C => "Advisor qualification call",
    };

    Recommendation {
        next_best_action: next_best_action.to_string(),
        recommendations,
    }
}

/// Composes an outreach email from the lead's current recommendation, so the
/// numbered focus areas always match what advisors see on screen.
#[must_use]
pub fn compose_outreach_draft(lead: &Lead) -> DraftContent {
    let recommendation = recommend_for_lead(lead);

    let mut lines = vec![
        format!("Hi {},", lead.name),
        String::new(),
        "Thanks for reaching out regarding your fleet strategy priorities.".to_string(),
        format!(
            "Based on your request ({}) and profile, our suggested first move is: {}.",
            lead.priority, recommendation.next_best_action
        ),
        String::new(),
        "Proposed immediate focus areas:".to_string(),
    ];
    lines.extend(
        recommendation
            .recommendations
            .iter()
            .enumerate()
            .map(|(index, item)| format!("{}. {item}", index + 1)),
    );
    lines.extend([
        String::new(),
        "Would you be available for a 30-minute strategy call this week?".to_string(),
        String::new(),
        "Best,".to_string(),
        "Fleet Advisory Group".to_string(),
    ]);

    DraftContent {
        subject: format!("Fleet Strategy Next Steps for {}", lead.name),
        body: lines.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fixture_lead;

    #[test]
    fn grade_a_combined_large_fleet_gets_full_plan() {
        let mut lead = fixture_lead("lead-1", PRIORITY_BOTH, "200", "asap");
        lead.grade = Grade::A;

        let recommendation = recommend_for_lead(&lead);

        assert_eq!(recommendation.next_best_action, "Immediate senior discovery call");
        assert_eq!(recommendation.recommendations.len(), 4);
        assert!(recommendation.recommendations[2].contains("segmentation"));
        assert!(recommendation.recommendations[3].contains("24 hours"));
    }

    #[test]
    fn grade_b_and_c_cadence() {
        let mut lead = fixture_lead("lead-1", PRIORITY_ACQUIRE, "20", "hi");
        lead.grade = Grade::B;
        let b = recommend_for_lead(&lead);
        assert_eq!(b.next_best_action, "Advisor qualification call");
        assert!(b.recommendations.last().is_some_and(|item| item.contains("72 hours")));

        lead.grade = Grade::C;
        let c = recommend_for_lead(&lead);
        assert_eq!(c.next_best_action, "Advisor qualification call");
        assert!(c.recommendations.last().is_some_and(|item| item.contains("nurture")));
    }

    #[test]
    fn unknown_priority_still_gets_cadence_directive() {
        let lead = fixture_lead("lead-1", "Something else", "10", "hi");
        let recommendation = recommend_for_lead(&lead);
        assert_eq!(recommendation.recommendations.len(), 1);
    }

    #[test]
    fn draft_numbers_the_current_recommendations() {
        let mut lead = fixture_lead("lead-1", PRIORITY_SELL_OFF, "175 trailers", "hi");
        lead.grade = Grade::B;

        let draft = compose_outreach_draft(&lead);
        let recommendation = recommend_for_lead(&lead);

        assert_eq!(draft.subject, "Fleet Strategy Next Steps for Dana Fleet");
        for (index, item) in recommendation.recommendations.iter().enumerate() {
            assert!(
                draft.body.contains(&format!("{}. {item}", index + 1)),
                "draft body missing item {index}: {}",
                draft.body
            );
        }
        assert!(draft.body.contains("(Sell off units)"));
        assert!(draft.body.ends_with("Fleet Advisory Group"));
    }
}
