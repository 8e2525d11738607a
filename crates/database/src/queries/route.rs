use std::collections::HashMap;

use model::{route::Route, stop::Stop, WithId};
use sqlx::{Executor, Postgres};
use utility::id::Id;

use crate::{
    rows::{RouteRow, RouteStopRow},
    store::{Result, StoreError},
};

use super::convert_error;

pub async fn get<'c, E>(executor: E, id: &Id<Route>) -> Result<Option<WithId<Route>>>
where
    E: Executor<'c, Database = Postgres> + Copy,
{
    let row: Option<RouteRow> = sqlx::query_as(
        "
        SELECT
            id, number, name, kind, polyline, avg_speed_kmh, total_distance_km
        FROM
            routes
        WHERE id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let stops = stops_for(executor, id).await?;
    row.into_route(stops).map(Some)
}

pub async fn get_all_with_stops<'c, E>(executor: E) -> Result<Vec<WithId<Route>>>
where
    E: Executor<'c, Database = Postgres> + Copy,
{
    let rows: Vec<RouteRow> = sqlx::query_as(
        "
        SELECT
            id, number, name, kind, polyline, avg_speed_kmh, total_distance_km
        FROM
            routes
        ORDER BY number;
        ",
    )
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;

    let stop_rows: Vec<RouteStopRow> = sqlx::query_as(
        "
        SELECT
            route_id, name, latitude, longitude, stop_order
        FROM
            route_stops
        ORDER BY route_id, stop_order;
        ",
    )
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;

    let mut by_route: HashMap<String, Vec<Stop>> = HashMap::new();
    for stop in stop_rows {
        by_route
            .entry(stop.route_id.clone())
            .or_default()
            .push(stop.into());
    }

    rows.into_iter()
        .map(|row| {
            let stops = by_route.remove(&row.id).unwrap_or_default();
            row.into_route(stops)
        })
        .collect()
}

async fn stops_for<'c, E>(executor: E, route_id: &Id<Route>) -> Result<Vec<Stop>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows: Vec<RouteStopRow> = sqlx::query_as(
        "
        SELECT
            route_id, name, latitude, longitude, stop_order
        FROM
            route_stops
        WHERE route_id = $1
        ORDER BY stop_order;
        ",
    )
    .bind(route_id.raw_ref::<str>())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    Ok(rows.into_iter().map(Stop::from).collect())
}

/// Upsert of the route row. Stops are replaced wholesale, which is how
/// administrative route edits arrive.
pub async fn put(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    route: &WithId<Route>,
) -> Result<()> {
    let polyline = serde_json::to_string(&route.content.polyline)
        .map_err(|why| StoreError::Other(Box::new(why)))?;

    sqlx::query(
        "
        INSERT INTO routes(
            id, number, name, kind, polyline, avg_speed_kmh, total_distance_km
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id)
        DO UPDATE SET
            number = EXCLUDED.number,
            name = EXCLUDED.name,
            kind = EXCLUDED.kind,
            polyline = EXCLUDED.polyline,
            avg_speed_kmh = EXCLUDED.avg_speed_kmh,
            total_distance_km = EXCLUDED.total_distance_km;
        ",
    )
    .bind(route.id.raw_ref::<str>())
    .bind(&route.content.number)
    .bind(&route.content.name)
    .bind(route.content.kind.as_str())
    .bind(&polyline)
    .bind(route.content.avg_speed_kmh)
    .bind(route.content.total_distance_km)
    .execute(&mut **tx)
    .await
    .map_err(convert_error)?;

    sqlx::query("DELETE FROM route_stops WHERE route_id = $1;")
        .bind(route.id.raw_ref::<str>())
        .execute(&mut **tx)
        .await
        .map_err(convert_error)?;

    for stop in &route.content.stops {
        sqlx::query(
            "
            INSERT INTO route_stops(route_id, name, latitude, longitude, stop_order)
            VALUES ($1, $2, $3, $4, $5);
            ",
        )
        .bind(route.id.raw_ref::<str>())
        .bind(&stop.name)
        .bind(stop.latitude)
        .bind(stop.longitude)
        .bind(stop.stop_order as i32)
        .execute(&mut **tx)
        .await
        .map_err(convert_error)?;
    }
    Ok(())
}
