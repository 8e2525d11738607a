use model::{route::Route, stop::Stop, WithId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::geo;

use intelligence::traffic::time_of_day_factor;

/// Name resolution falls back to the nearest stop within this radius.
const NEAREST_STOP_RADIUS_KM: f64 = 2.0;
/// Rough per-stop pace for the stop-count estimate, minutes.
const MINUTES_PER_STOP: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct DirectEndpoint {
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectRouteMatch {
    pub route_id: String,
    pub route_number: String,
    pub route_name: String,
    pub origin_stop: String,
    pub destination_stop: String,
    /// Stops ridden through, destination included.
    pub stop_count: u32,
    pub distance_km: f64,
    pub eta_minutes: f64,
}

fn resolve_stop_key(routes: &[WithId<Route>], endpoint: &DirectEndpoint) -> Option<String> {
    let all_stops = || routes.iter().flat_map(|route| route.content.stops.iter());

    if let Some(name) = &endpoint.name {
        let query = name.trim().to_lowercase();
        if !query.is_empty() {
            // exact name
            if let Some(stop) = all_stops().find(|stop| stop.node_key() == query) {
                return Some(stop.node_key());
            }
            // fuzzy: contains either way
            if let Some(stop) = all_stops().find(|stop| {
                let key = stop.node_key();
                key.contains(&query) || query.contains(&key)
            }) {
                return Some(stop.node_key());
            }
        }
    }

    // nearest stop to the endpoint coordinates
    all_stops()
        .map(|stop| {
            (
                stop,
                stop.distance_km_to(endpoint.latitude, endpoint.longitude),
            )
        })
        .filter(|(_, distance)| *distance <= NEAREST_STOP_RADIUS_KM)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(stop, _)| stop.node_key())
}

fn leg_distance_km(route: &Route, origin: &Stop, destination: &Stop) -> f64 {
    let span = destination.stop_order.saturating_sub(origin.stop_order) as f64;
    let segments = route.stops.len().saturating_sub(1) as f64;
    if route.total_distance_km > 0.0 && segments > 0.0 {
        route.total_distance_km * (span / segments)
    } else {
        geo::haversine_distance(
            origin.latitude,
            origin.longitude,
            destination.latitude,
            destination.longitude,
        )
    }
}

/// The primary trip-planning strategy: a single bus that passes both stops
/// in order. A non-empty result here means Dijkstra never runs.
pub fn find_direct_routes(
    routes: &[WithId<Route>],
    origin: &DirectEndpoint,
    destination: &DirectEndpoint,
    hour: u32,
) -> Vec<DirectRouteMatch> {
    let Some(origin_key) = resolve_stop_key(routes, origin) else {
        return Vec::new();
    };
    let Some(destination_key) = resolve_stop_key(routes, destination) else {
        return Vec::new();
    };
    if origin_key == destination_key {
        return Vec::new();
    }

    let factor = time_of_day_factor(hour);
    let mut matches: Vec<DirectRouteMatch> = routes
        .iter()
        .filter_map(|route| {
            let origin_stop = route
                .content
                .stops
                .iter()
                .find(|stop| stop.node_key() == origin_key)?;
            let destination_stop = route
                .content
                .stops
                .iter()
                .find(|stop| stop.node_key() == destination_key)?;
            if origin_stop.stop_order >= destination_stop.stop_order {
                return None;
            }

            let stop_count = destination_stop.stop_order - origin_stop.stop_order;
            let distance_km = leg_distance_km(&route.content, origin_stop, destination_stop);
            let speed_based =
                distance_km / route.content.avg_speed_kmh.max(5.0) * 60.0;
            let stop_based = stop_count as f64 * MINUTES_PER_STOP;
            let eta_minutes = speed_based.max(0.7 * stop_based) * factor;

            Some(DirectRouteMatch {
                route_id: route.id.raw(),
                route_number: route.content.number.clone(),
                route_name: route.content.name.clone(),
                origin_stop: origin_stop.name.clone(),
                destination_stop: destination_stop.name.clone(),
                stop_count,
                distance_km,
                eta_minutes,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.eta_minutes
            .total_cmp(&b.eta_minutes)
            .then(a.stop_count.cmp(&b.stop_count))
    });
    matches
}

#[cfg(test)]
mod tests {
    use model::route::RouteKind;
    use utility::id::Id;

    use super::*;

    fn route(
        id: &str,
        number: &str,
        avg_speed: f64,
        total_km: f64,
        stops: &[(&str, f64, f64)],
    ) -> WithId<Route> {
        WithId::new(
            Id::new(id.to_owned()),
            Route {
                number: number.to_owned(),
                name: format!("Route {number}"),
                kind: RouteKind::Major,
                polyline: vec![],
                avg_speed_kmh: avg_speed,
                total_distance_km: total_km,
                stops: stops
                    .iter()
                    .enumerate()
                    .map(|(order, (name, lat, lng))| Stop {
                        name: (*name).to_owned(),
                        latitude: *lat,
                        longitude: *lng,
                        stop_order: order as u32,
                    })
                    .collect(),
            },
        )
    }

    fn fixtures() -> Vec<WithId<Route>> {
        vec![
            route(
                "r1",
                "10",
                30.0,
                9.0,
                &[
                    ("Central", 17.00, 78.00),
                    ("Market", 17.01, 78.00),
                    ("Lake", 17.02, 78.00),
                    ("Depot", 17.03, 78.00),
                ],
            ),
            route(
                "r2",
                "20",
                20.0,
                6.0,
                &[("Central", 17.00, 78.00), ("Lake", 17.02, 78.00)],
            ),
            route(
                "r3",
                "30",
                30.0,
                9.0,
                &[("Depot", 17.03, 78.00), ("Central", 17.00, 78.00)],
            ),
        ]
    }

    fn endpoint(name: Option<&str>, lat: f64, lng: f64) -> DirectEndpoint {
        DirectEndpoint {
            name: name.map(str::to_owned),
            latitude: lat,
            longitude: lng,
        }
    }

    #[test]
    fn finds_routes_passing_both_stops_in_order() {
        let matches = find_direct_routes(
            &fixtures(),
            &endpoint(Some("Central"), 17.0, 78.0),
            &endpoint(Some("Lake"), 17.02, 78.0),
            3,
        );
        // r1 and r2 serve Central -> Lake; r3 runs the wrong direction
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.route_id != "r3"));
        // ranked by ETA ascending
        assert!(matches[0].eta_minutes <= matches[1].eta_minutes);
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let matches = find_direct_routes(
            &fixtures(),
            &endpoint(Some("Depot"), 17.03, 78.0),
            &endpoint(Some("Market"), 17.01, 78.0),
            3,
        );
        assert!(matches.is_empty());
    }

    #[test]
    fn fuzzy_name_resolution() {
        let matches = find_direct_routes(
            &fixtures(),
            &endpoint(Some("central station"), 0.0, 0.0),
            &endpoint(Some("lake"), 0.0, 0.0),
            3,
        );
        assert!(!matches.is_empty());
    }

    #[test]
    fn nearest_stop_resolution_within_two_km() {
        let matches = find_direct_routes(
            &fixtures(),
            &endpoint(None, 17.001, 78.001),
            &endpoint(None, 17.021, 78.001),
            3,
        );
        assert!(!matches.is_empty());
        assert_eq!(matches[0].origin_stop, "Central");
    }

    #[test]
    fn unresolvable_endpoint_yields_empty() {
        let matches = find_direct_routes(
            &fixtures(),
            &endpoint(None, 45.0, 10.0),
            &endpoint(Some("Lake"), 17.02, 78.0),
            3,
        );
        assert!(matches.is_empty());
    }

    #[test]
    fn peak_hour_scales_eta() {
        let off_peak = find_direct_routes(
            &fixtures(),
            &endpoint(Some("Central"), 17.0, 78.0),
            &endpoint(Some("Lake"), 17.02, 78.0),
            3,
        );
        let peak = find_direct_routes(
            &fixtures(),
            &endpoint(Some("Central"), 17.0, 78.0),
            &endpoint(Some("Lake"), 17.02, 78.0),
            18,
        );
        assert!(peak[0].eta_minutes > off_peak[0].eta_minutes);
    }

    #[test]
    fn tie_broken_by_fewer_stops() {
        // two routes with identical ETA but different stop counts
        let routes = vec![
            route(
                "a",
                "1",
                30.0,
                6.0,
                &[
                    ("X", 17.0, 78.0),
                    ("M", 17.01, 78.0),
                    ("Y", 17.02, 78.0),
                ],
            ),
            route("b", "2", 30.0, 6.0, &[("X", 17.0, 78.0), ("Y", 17.02, 78.0)]),
        ];
        let matches = find_direct_routes(
            &routes,
            &endpoint(Some("X"), 17.0, 78.0),
            &endpoint(Some("Y"), 17.02, 78.0),
            3,
        );
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].route_id, "b");
    }
}
