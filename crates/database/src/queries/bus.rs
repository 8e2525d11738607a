use model::{
    bus::{Bus, BusPosition, BusStatus},
    route::Route,
    WithDistance, WithId,
};
use sqlx::{Executor, Postgres};
use utility::{
    geo::{self, EARTH_RADIUS_KM},
    id::Id,
};

use crate::{rows::BusRow, store::Result};

use super::convert_error;

const BUS_COLUMNS: &str = "id, registration_no, capacity, latitude, longitude, \
     heading, speed_kmh, passenger_count, status, route_id, simulated, updated_at";

pub async fn get<'c, E>(executor: E, id: &Id<Bus>) -> Result<Option<WithId<Bus>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<BusRow> = sqlx::query_as(
        "
        SELECT
            id, registration_no, capacity, latitude, longitude,
            heading, speed_kmh, passenger_count, status, route_id,
            simulated, updated_at
        FROM
            buses
        WHERE id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(WithId::try_from).transpose()
}

pub async fn get_all<'c, E>(executor: E) -> Result<Vec<WithId<Bus>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows: Vec<BusRow> = sqlx::query_as(&format!(
        "SELECT {BUS_COLUMNS} FROM buses;"
    ))
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    rows.into_iter().map(WithId::try_from).collect()
}

/// Active buses inside `radius_km`, closest first. Bounding-box prefilter
/// plus the spherical-law-of-cosines distance, the same shape the stop
/// lookup uses; PostGIS is not required.
pub async fn get_nearby_active<'c, E>(
    executor: E,
    center_latitude: f64,
    center_longitude: f64,
    radius_km: f64,
    limit: usize,
) -> Result<Vec<WithDistance<WithId<Bus>>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let ((min_lat, min_lon), (max_lat, max_lon)) =
        geo::calculate_bounding_box(center_latitude, center_longitude, radius_km);

    let rows: Vec<BusRow> = sqlx::query_as(
        "
        SELECT
            id, registration_no, capacity, latitude, longitude,
            heading, speed_kmh, passenger_count, status, route_id,
            simulated, updated_at
        FROM
            buses
        WHERE
            status = 'ACTIVE'
            AND latitude BETWEEN $4 AND $5
            AND longitude BETWEEN $6 AND $7
        ORDER BY
            ($1 * ACOS(LEAST(1.0,
                COS(RADIANS($2)) * COS(RADIANS(latitude)) *
                COS(RADIANS(longitude) - RADIANS($3)) +
                SIN(RADIANS($2)) * SIN(RADIANS(latitude))
            ))) ASC
        LIMIT $8;
        ",
    )
    .bind(EARTH_RADIUS_KM)
    .bind(center_latitude)
    .bind(center_longitude)
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lon)
    .bind(max_lon)
    .bind(limit as i64)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;

    let mut buses = Vec::with_capacity(rows.len());
    for row in rows {
        let bus = WithId::<Bus>::try_from(row)?;
        let distance = geo::haversine_distance(
            center_latitude,
            center_longitude,
            bus.content.position.latitude,
            bus.content.position.longitude,
        );
        // the box prefilter lets corner buses through, drop them here
        if distance <= radius_km {
            buses.push(WithDistance::new(distance, bus));
        }
    }
    Ok(buses)
}

pub async fn get_active_on_route<'c, E>(
    executor: E,
    route_id: &Id<Route>,
) -> Result<Vec<WithId<Bus>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows: Vec<BusRow> = sqlx::query_as(&format!(
        "SELECT {BUS_COLUMNS} FROM buses WHERE route_id = $1 AND status = 'ACTIVE';"
    ))
    .bind(route_id.raw_ref::<str>())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    rows.into_iter().map(WithId::try_from).collect()
}

pub async fn put<'c, E>(executor: E, bus: &WithId<Bus>) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO buses(
            id, registration_no, capacity, latitude, longitude,
            heading, speed_kmh, passenger_count, status, route_id,
            simulated, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id)
        DO UPDATE SET
            registration_no = EXCLUDED.registration_no,
            capacity = EXCLUDED.capacity,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            heading = EXCLUDED.heading,
            speed_kmh = EXCLUDED.speed_kmh,
            passenger_count = EXCLUDED.passenger_count,
            status = EXCLUDED.status,
            route_id = EXCLUDED.route_id,
            simulated = EXCLUDED.simulated,
            updated_at = EXCLUDED.updated_at;
        ",
    )
    .bind(bus.id.raw_ref::<str>())
    .bind(&bus.content.registration_no)
    .bind(bus.content.capacity as i32)
    .bind(bus.content.position.latitude)
    .bind(bus.content.position.longitude)
    .bind(bus.content.position.heading)
    .bind(bus.content.position.speed_kmh)
    .bind(bus.content.passenger_count as i32)
    .bind(bus.content.status.as_str())
    .bind(bus.content.route_id.as_ref().map(|id| id.raw()))
    .bind(bus.content.simulated)
    .bind(bus.content.updated_at)
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}

pub async fn update_position<'c, E>(
    executor: E,
    id: &Id<Bus>,
    position: BusPosition,
    passenger_count: Option<u32>,
    timestamp: i64,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE buses
        SET latitude = $2,
            longitude = $3,
            heading = $4,
            speed_kmh = $5,
            passenger_count = COALESCE($6, passenger_count),
            updated_at = $7
        WHERE id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(position.latitude)
    .bind(position.longitude)
    .bind(position.heading)
    .bind(position.speed_kmh)
    .bind(passenger_count.map(|count| count as i32))
    .bind(timestamp)
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}

pub async fn set_control<'c, E>(
    executor: E,
    id: &Id<Bus>,
    status: BusStatus,
    simulated: bool,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("UPDATE buses SET status = $2, simulated = $3 WHERE id = $1;")
        .bind(id.raw_ref::<str>())
        .bind(status.as_str())
        .bind(simulated)
        .execute(executor)
        .await
        .map_err(convert_error)?;
    Ok(())
}

pub async fn release_to_simulation<'c, E>(
    executor: E,
    id: &Id<Bus>,
    last_position: Option<(f64, f64)>,
    timestamp: i64,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE buses
        SET status = 'ACTIVE',
            simulated = TRUE,
            speed_kmh = 0,
            latitude = COALESCE($2, latitude),
            longitude = COALESCE($3, longitude),
            updated_at = $4
        WHERE id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(last_position.map(|(lat, _)| lat))
    .bind(last_position.map(|(_, lng)| lng))
    .bind(timestamp)
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}

pub async fn delete_simulated<'c, E>(executor: E) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("DELETE FROM buses WHERE simulated = TRUE;")
        .execute(executor)
        .await
        .map_err(convert_error)
        .map(|result| result.rows_affected())
}
