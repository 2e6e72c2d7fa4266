use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::intake::parse_fleet_size;
use crate::{EstimatorSnapshot, Grade, Lead, LeadError};

pub const PRIORITY_BOTH: &str = "Need both acquisition and sell-off";
pub const PRIORITY_ACQUIRE: &str = "Acquire units";
pub const PRIORITY_SELL_OFF: &str = "Sell off units";

const URGENCY_KEYWORDS: [&str; 3] = ["urgent", "asap", "immediately"];

/// Point weights and tier thresholds for lead scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringRuleset {
    pub ruleset_version: u32,
    pub combined_priority_points: u32,
    pub single_track_priority_points: u32,
    pub large_fleet_min_units: f64,
    pub large_fleet_points: u32,
    pub mid_fleet_min_units: f64,
    pub mid_fleet_points: u32,
    pub high_burden_min: f64,
    pub high_burden_points: u32,
    pub elevated_burden_min: f64,
    pub elevated_burden_points: u32,
    pub urgency_points: u32,
    pub grade_a_min_score: u32,
    pub grade_b_min_score: u32,
}

impl ScoringRuleset {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            combined_priority_points: 20,
            single_track_priority_points: 10,
            large_fleet_min_units: 150.0,
            large_fleet_points: 15,
            mid_fleet_min_units: 80.0,
            mid_fleet_points: 8,
            high_burden_min: 500_000.0,
            high_burden_points: 20,
            elevated_burden_min: 200_000.0,
            elevated_burden_points: 12,
            urgency_points: 6,
            grade_a_min_score: 40,
            grade_b_min_score: 25,
        }
    }

    /// Validates tier ordering so the higher tier always wins its category.
    ///
    /// # Errors
    /// Returns [`LeadError::Configuration`] when a lower tier threshold is
    /// not strictly below its upper tier.
    pub fn validate(&self) -> Result<(), LeadError> {
        if self.ruleset_version == 0 {
            return Err(LeadError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        if self.mid_fleet_min_units.partial_cmp(&self.large_fleet_min_units) != Some(Ordering::Less) {
            return Err(LeadError::Configuration(
                "mid_fleet_min_units MUST be below large_fleet_min_units".to_string(),
            ));
        }

        if self.elevated_burden_min.partial_cmp(&self.high_burden_min) != Some(Ordering::Less) {
            return Err(LeadError::Configuration(
                "elevated_burden_min MUST be below high_burden_min".to_string(),
            ));
        }

        if self.grade_b_min_score >= self.grade_a_min_score {
            return Err(LeadError::Configuration(
                "grade_b_min_score MUST be below grade_a_min_score".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn grade_for(&self, score: u32) -> Grade {
        if score >= self.grade_a_min_score {
            Grade::A
        } else if score >= self.grade_b_min_score {
            Grade::B
        } else {
            Grade::C
        }
    }
}

impl Default for ScoringRuleset {
    fn default() -> Self {
        Self::v1()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeadScore {
    pub score: u32,
    pub grade: Grade,
    pub reasons: Vec<String>,
}

/// Scores a lead against the latest estimator snapshot for its session.
///
/// Categories add independently; inside a category only the highest tier
/// fires. Reasons are listed in evaluation order. Missing or malformed
/// inputs contribute nothing.
#[must_use]
pub fn score_lead(
    lead: &Lead,
    snapshot: Option<&EstimatorSnapshot>,
    ruleset: &ScoringRuleset,
) -> LeadScore {
    let mut score = 0_u32;
    let mut reasons = Vec::new();

    match lead.priority.as_str() {
        PRIORITY_BOTH => {
            score = score.saturating_add(ruleset.combined_priority_points);
            reasons.push("Combined acquisition + divestment priority".to_string());
        }
        PRIORITY_ACQUIRE | PRIORITY_SELL_OFF => {
            score = score.saturating_add(ruleset.single_track_priority_points);
            reasons.push("Single-track priority selected".to_string());
        }
        _ => {}
    }

    let fleet = parse_fleet_size(&lead.fleet_size);
    if fleet >= ruleset.large_fleet_min_units {
        score = score.saturating_add(ruleset.large_fleet_points);
        reasons.push(format!("Fleet size >= {}", ruleset.large_fleet_min_units));
    } else if fleet >= ruleset.mid_fleet_min_units {
        score = score.saturating_add(ruleset.mid_fleet_points);
        reasons.push(format!("Fleet size >= {}", ruleset.mid_fleet_min_units));
    }

    let burden = snapshot.map_or(0.0, |snapshot| snapshot.annual_burden);
    if burden >= ruleset.high_burden_min {
        score = score.saturating_add(ruleset.high_burden_points);
        reasons.push(format!(
            "High annual burden >= {}",
            dollars_short(ruleset.high_burden_min)
        ));
    } else if burden >= ruleset.elevated_burden_min {
        score = score.saturating_add(ruleset.elevated_burden_points);
        reasons.push(format!(
            "Annual burden >= {}",
            dollars_short(ruleset.elevated_burden_min)
        ));
    }

    let message = lead.message.to_lowercase();
    if URGENCY_KEYWORDS.iter().any(|keyword| message.contains(keyword)) {
        score = score.saturating_add(ruleset.urgency_points);
        reasons.push("Urgency signal in message".to_string());
    }

    LeadScore {
        score,
        grade: ruleset.grade_for(score),
        reasons,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn dollars_short(amount: f64) -> String {
    if amount >= 1_000.0 && amount % 1_000.0 == 0.0 {
        format!("${}K", (amount / 1_000.0) as i64)
    } else {
        format!("${amount}")
    }
}
