use std::collections::HashMap;

use model::graph::TRANSFER_ROUTE_ID;

use crate::dijkstra::RawPath;

const UNKNOWN_RELIABILITY: f64 = 70.0;
const UNKNOWN_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct ScoredPath {
    pub path: RawPath,
    pub score: f64,
}

/// Drops paths beaten on both time and transfers. Kept paths are the
/// (time, transfers) Pareto frontier of the candidate set.
pub fn pareto_filter(paths: Vec<RawPath>) -> Vec<RawPath> {
    let snapshot: Vec<(f64, u32)> = paths
        .iter()
        .map(|path| (path.total_time_min, path.transfer_count))
        .collect();
    paths
        .into_iter()
        .enumerate()
        .filter(|(index, path)| {
            !snapshot.iter().enumerate().any(|(other, &(time, transfers))| {
                other != *index
                    && time <= path.total_time_min
                    && transfers <= path.transfer_count
                    && (time < path.total_time_min || transfers < path.transfer_count)
            })
        })
        .map(|(_, path)| path)
        .collect()
}

fn distinct_routes(path: &RawPath) -> Vec<&str> {
    let mut routes = Vec::new();
    for edge in &path.edges {
        if edge.route_id == TRANSFER_ROUTE_ID {
            continue;
        }
        if !routes.contains(&edge.route_id.as_str()) {
            routes.push(edge.route_id.as_str());
        }
    }
    routes
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        return None;
    }
    Some(collected.iter().sum::<f64>() / collected.len() as f64)
}

/// Scores paths, lower is better; reliability and confidence are averaged
/// across the distinct routes the path rides.
pub fn score_paths(
    paths: Vec<RawPath>,
    reliability_by_route: &HashMap<String, f64>,
    confidence_by_route: &HashMap<String, f64>,
) -> Vec<ScoredPath> {
    let mut scored: Vec<ScoredPath> = paths
        .into_iter()
        .map(|path| {
            let routes = distinct_routes(&path);
            let avg_reliability = average(routes.iter().map(|route| {
                reliability_by_route
                    .get(*route)
                    .copied()
                    .unwrap_or(UNKNOWN_RELIABILITY)
            }))
            .unwrap_or(UNKNOWN_RELIABILITY);
            let avg_confidence = average(routes.iter().map(|route| {
                confidence_by_route
                    .get(*route)
                    .copied()
                    .unwrap_or(UNKNOWN_CONFIDENCE)
            }))
            .unwrap_or(UNKNOWN_CONFIDENCE);

            let score = path.total_time_min * 0.5 + path.transfer_count as f64 * 10.0
                - (avg_reliability / 100.0) * 3.0
                - avg_confidence * 5.0;
            ScoredPath { path, score }
        })
        .collect();
    scored.sort_by(|a, b| a.score.total_cmp(&b.score));
    scored
}

#[cfg(test)]
mod tests {
    use model::graph::GraphEdge;
    use utility::id::Id;

    use super::*;

    fn path(minutes: f64, transfers: u32, routes: &[&str]) -> RawPath {
        RawPath {
            edges: routes
                .iter()
                .map(|route| GraphEdge {
                    from: Id::new("x".to_owned()),
                    to: Id::new("y".to_owned()),
                    route_id: (*route).to_owned(),
                    route_number: (*route).to_owned(),
                    distance_km: 1.0,
                    avg_travel_time_min: minutes / routes.len() as f64,
                    transfer_cost_min: 0.0,
                    stop_order: 0,
                })
                .collect(),
            total_time_min: minutes,
            transfer_count: transfers,
        }
    }

    #[test]
    fn dominated_path_is_dropped() {
        let kept = pareto_filter(vec![
            path(20.0, 0, &["r1"]),
            path(25.0, 1, &["r1", "r2"]), // slower and more transfers
            path(15.0, 2, &["r1", "r2", "r3"]),
        ]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|p| p.transfer_count != 1));
    }

    #[test]
    fn equal_paths_both_survive() {
        let kept = pareto_filter(vec![path(20.0, 1, &["r1"]), path(20.0, 1, &["r2"])]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn faster_path_scores_lower() {
        let scored = score_paths(
            vec![path(30.0, 0, &["r1"]), path(20.0, 0, &["r1"])],
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(scored[0].path.total_time_min < scored[1].path.total_time_min);
        assert!(scored[0].score < scored[1].score);
    }

    #[test]
    fn transfers_cost_ten_points_each() {
        let scored = score_paths(
            vec![path(20.0, 0, &["r1"]), path(20.0, 2, &["r1", "r2", "r3"])],
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!((scored[1].score - scored[0].score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn reliable_route_beats_unreliable_twin() {
        let mut reliability = HashMap::new();
        reliability.insert("good".to_owned(), 95.0);
        reliability.insert("bad".to_owned(), 20.0);
        let scored = score_paths(
            vec![path(20.0, 0, &["bad"]), path(20.0, 0, &["good"])],
            &reliability,
            &HashMap::new(),
        );
        assert_eq!(scored[0].path.edges[0].route_id, "good");
    }
}
