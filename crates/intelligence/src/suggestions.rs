use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct SuggestionCandidate {
    pub bus_id: String,
    pub eta_minutes: f64,
    pub distance_meters: f64,
    pub occupancy_percent: f64,
    pub traffic_factor: f64,
    pub confidence: f64,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub rank: u32,
    pub bus_id: String,
    pub score: f64,
    pub reason: String,
    pub eta_minutes: f64,
    pub distance_meters: f64,
    pub occupancy_percent: f64,
}

fn score(candidate: &SuggestionCandidate) -> f64 {
    let raw = 0.4 * (candidate.eta_minutes * 60.0)
        + 0.2 * candidate.distance_meters
        + 0.15 * candidate.occupancy_percent
        + 0.15 * (candidate.traffic_factor * 100.0)
        - 120.0 * candidate.confidence;
    if raw.is_finite() {
        raw
    } else {
        f64::INFINITY
    }
}

fn reason(rank: u32, candidate: &SuggestionCandidate) -> String {
    if rank == 1 {
        if candidate.eta_minutes <= 3.0 && candidate.occupancy_percent < 50.0 {
            "Arriving soon with plenty of seats"
        } else if candidate.eta_minutes <= 3.0 {
            "Arriving soon"
        } else if candidate.occupancy_percent < 30.0 {
            "Fastest option with empty seats"
        } else if candidate.distance_meters < 200.0 {
            "Very close by"
        } else {
            "Best overall option"
        }
    } else if candidate.occupancy_percent < 30.0 {
        "Less crowded alternative"
    } else if candidate.distance_meters < 300.0 {
        "Close alternative"
    } else {
        "Alternative option"
    }
    .to_owned()
}

/// Ranks candidate buses for a passenger, lower score first, top three only.
pub fn rank_suggestions(candidates: Vec<SuggestionCandidate>) -> Vec<Suggestion> {
    let mut scored: Vec<(f64, SuggestionCandidate)> = candidates
        .into_iter()
        .map(|candidate| (score(&candidate), candidate))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(3)
        .enumerate()
        .map(|(index, (score, candidate))| {
            let rank = index as u32 + 1;
            Suggestion {
                rank,
                reason: reason(rank, &candidate),
                bus_id: candidate.bus_id.clone(),
                score,
                eta_minutes: candidate.eta_minutes,
                distance_meters: candidate.distance_meters,
                occupancy_percent: candidate.occupancy_percent,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(bus_id: &str) -> SuggestionCandidate {
        SuggestionCandidate {
            bus_id: bus_id.to_owned(),
            eta_minutes: 5.0,
            distance_meters: 400.0,
            occupancy_percent: 40.0,
            traffic_factor: 1.0,
            confidence: 0.8,
        }
    }

    #[test]
    fn crowded_fast_bus_loses_to_comfortable_one() {
        let a = SuggestionCandidate {
            eta_minutes: 2.0,
            distance_meters: 500.0,
            occupancy_percent: 95.0,
            traffic_factor: 1.30,
            confidence: 0.6,
            ..candidate("a")
        };
        let b = SuggestionCandidate {
            eta_minutes: 4.0,
            distance_meters: 500.0,
            occupancy_percent: 20.0,
            traffic_factor: 1.00,
            confidence: 0.9,
            ..candidate("b")
        };
        let ranked = rank_suggestions(vec![a, b]);
        assert_eq!(ranked[0].bus_id, "b");
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn scores_ascend_and_cap_at_three() {
        let ranked = rank_suggestions(vec![
            candidate("a"),
            SuggestionCandidate {
                eta_minutes: 1.0,
                ..candidate("b")
            },
            SuggestionCandidate {
                eta_minutes: 20.0,
                ..candidate("c")
            },
            SuggestionCandidate {
                eta_minutes: 30.0,
                ..candidate("d")
            },
        ]);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|pair| pair[0].score <= pair[1].score));
    }

    #[test]
    fn empty_input_empty_output() {
        assert!(rank_suggestions(vec![]).is_empty());
    }

    #[test]
    fn non_finite_scores_sink_to_the_bottom() {
        let ranked = rank_suggestions(vec![
            SuggestionCandidate {
                eta_minutes: f64::NAN,
                ..candidate("broken")
            },
            candidate("fine"),
        ]);
        assert_eq!(ranked[0].bus_id, "fine");
    }

    #[test]
    fn reason_strings() {
        let ranked = rank_suggestions(vec![
            SuggestionCandidate {
                eta_minutes: 2.0,
                occupancy_percent: 20.0,
                ..candidate("soon-empty")
            },
            SuggestionCandidate {
                occupancy_percent: 10.0,
                eta_minutes: 6.0,
                ..candidate("empty-alt")
            },
        ]);
        assert_eq!(ranked[0].reason, "Arriving soon with plenty of seats");
        assert_eq!(ranked[1].reason, "Less crowded alternative");
    }
}
