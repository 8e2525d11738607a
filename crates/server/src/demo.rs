use std::sync::Arc;

use database::{Result, Store};
use model::{
    route::{Route, RouteKind},
    stop::Stop,
    WithId,
};
use utility::id::Id;

/// Seeds a small demo network when the store has no routes at all, so a
/// fresh checkout shows moving buses immediately.
pub async fn seed_if_empty<S: Store>(store: &Arc<S>) -> Result<bool> {
    if !store.routes_with_stops().await?.is_empty() {
        return Ok(false);
    }
    log::info!("store has no routes, seeding the demo network");

    let routes = vec![
        route(
            "demo-10",
            "10",
            RouteKind::Major,
            30.0,
            &[
                ("Central Station", 17.385, 78.4867),
                ("Assembly", 17.3937, 78.4804),
                ("Lakdikapul", 17.4043, 78.4652),
                ("Khairatabad", 17.4106, 78.4584),
                ("Panjagutta", 17.4256, 78.4494),
                ("Ameerpet", 17.4375, 78.4483),
            ],
        ),
        route(
            "demo-20",
            "20",
            RouteKind::Minor,
            24.0,
            &[
                ("Ameerpet", 17.4375, 78.4483),
                ("Begumpet", 17.4440, 78.4620),
                ("Secunderabad", 17.4399, 78.4983),
            ],
        ),
        route(
            "demo-30",
            "30",
            RouteKind::Major,
            28.0,
            &[
                ("Central Station", 17.385, 78.4867),
                ("Koti", 17.3825, 78.4800),
                ("Abids", 17.3890, 78.4750),
                ("Nampally", 17.3920, 78.4690),
            ],
        ),
    ];

    for route in routes {
        store.put_route(route).await?;
    }
    Ok(true)
}

fn route(
    id: &str,
    number: &str,
    kind: RouteKind,
    avg_speed_kmh: f64,
    stops: &[(&str, f64, f64)],
) -> WithId<Route> {
    let stops: Vec<Stop> = stops
        .iter()
        .enumerate()
        .map(|(order, (name, latitude, longitude))| Stop {
            name: (*name).to_owned(),
            latitude: *latitude,
            longitude: *longitude,
            stop_order: order as u32,
        })
        .collect();
    let total_distance_km = stops
        .windows(2)
        .map(|pair| pair[0].distance_km_to(pair[1].latitude, pair[1].longitude))
        .sum();
    WithId::new(
        Id::new(id.to_owned()),
        Route {
            number: number.to_owned(),
            name: format!("Route {number}"),
            kind,
            polyline: vec![],
            avg_speed_kmh,
            total_distance_km,
            stops,
        },
    )
}
