use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::traffic::{CongestionLevel, TrafficLevel};

pub const CONFIDENCE_FLOOR: f64 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

impl ConfidenceLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            Self::High
        } else if score >= 0.60 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceInput {
    pub traffic_level: Option<TrafficLevel>,
    pub congestion_level: Option<CongestionLevel>,
    pub gps_accuracy_m: Option<f64>,
    /// Seconds since the owning driver reconnected, when known.
    pub reconnected_secs_ago: Option<i64>,
    pub current_speed_kmh: f64,
    pub historical_samples: usize,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceScore {
    pub score: f64,
    pub label: ConfidenceLabel,
    pub penalties: Vec<String>,
}

/// How much an ETA should be trusted. Starts at 1.0 and subtracts a penalty
/// per known degradation; the floor keeps even a blind guess presentable.
pub fn confidence_score(input: &ConfidenceInput) -> ConfidenceScore {
    let mut score = 1.0_f64;
    let mut penalties = Vec::new();

    if input.traffic_level == Some(TrafficLevel::High) {
        score -= 0.25;
        penalties.push("heavy traffic on route".to_owned());
    }
    match input.congestion_level {
        Some(CongestionLevel::Heavy) => {
            score -= 0.20;
            penalties.push("heavy congestion ahead".to_owned());
        }
        Some(CongestionLevel::Moderate) => {
            score -= 0.10;
            penalties.push("moderate congestion ahead".to_owned());
        }
        _ => {}
    }
    if input.gps_accuracy_m.is_some_and(|accuracy| accuracy > 80.0) {
        score -= 0.10;
        penalties.push("poor GPS accuracy".to_owned());
    }
    if input
        .reconnected_secs_ago
        .is_some_and(|elapsed| elapsed <= 120)
    {
        score -= 0.10;
        penalties.push("driver recently reconnected".to_owned());
    }
    if input.current_speed_kmh <= 0.0 {
        score -= 0.05;
        penalties.push("bus is stationary".to_owned());
    }
    if input.historical_samples < 5 {
        score -= 0.05;
        penalties.push("little recent speed history".to_owned());
    }

    if !score.is_finite() {
        score = CONFIDENCE_FLOOR;
    }
    let score = score.clamp(CONFIDENCE_FLOOR, 1.0);
    ConfidenceScore {
        score,
        label: ConfidenceLabel::from_score(score),
        penalties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_signal_scores_high() {
        let result = confidence_score(&ConfidenceInput {
            traffic_level: Some(TrafficLevel::Low),
            congestion_level: Some(CongestionLevel::None),
            current_speed_kmh: 30.0,
            historical_samples: 12,
            ..Default::default()
        });
        assert_eq!(result.score, 1.0);
        assert_eq!(result.label, ConfidenceLabel::High);
        assert!(result.penalties.is_empty());
    }

    #[test]
    fn stacked_penalties_hit_the_floor() {
        let result = confidence_score(&ConfidenceInput {
            traffic_level: Some(TrafficLevel::High),
            congestion_level: Some(CongestionLevel::Heavy),
            gps_accuracy_m: Some(95.0),
            reconnected_secs_ago: Some(30),
            current_speed_kmh: 0.0,
            historical_samples: 0,
        });
        // 1.0 - 0.25 - 0.20 - 0.10 - 0.10 - 0.05 - 0.05 = 0.25 -> floored
        assert_eq!(result.score, CONFIDENCE_FLOOR);
        assert_eq!(result.label, ConfidenceLabel::Low);
        assert_eq!(result.penalties.len(), 6);
    }

    #[test]
    fn nan_accuracy_stays_in_range() {
        let result = confidence_score(&ConfidenceInput {
            gps_accuracy_m: Some(f64::NAN),
            current_speed_kmh: f64::NAN,
            historical_samples: 10,
            ..Default::default()
        });
        assert!((CONFIDENCE_FLOOR..=1.0).contains(&result.score));
    }

    #[test]
    fn labels_at_boundaries() {
        assert_eq!(ConfidenceLabel::from_score(0.80), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_score(0.79), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(0.60), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(0.59), ConfidenceLabel::Low);
    }

    #[test]
    fn old_reconnect_is_not_penalized() {
        let result = confidence_score(&ConfidenceInput {
            reconnected_secs_ago: Some(600),
            current_speed_kmh: 25.0,
            historical_samples: 9,
            ..Default::default()
        });
        assert_eq!(result.score, 1.0);
    }
}
