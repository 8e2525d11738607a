use model::{
    bus::Bus,
    trip::{Trip, TripStatus},
    WithId,
};
use sqlx::{Executor, Postgres};
use utility::id::Id;

use crate::{rows::TripRow, store::Result};

use super::convert_error;

pub async fn insert<'c, E>(executor: E, id: &Id<Trip>, trip: &Trip) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO trips(id, bus_id, driver_id, start_time, end_time, status)
        VALUES ($1, $2, $3, $4, $5, $6);
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(trip.bus_id.raw_ref::<str>())
    .bind(trip.driver_id.as_ref().map(|id| id.raw()))
    .bind(trip.start_time)
    .bind(trip.end_time)
    .bind(trip.status.as_str())
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}

pub async fn finish<'c, E>(
    executor: E,
    id: &Id<Trip>,
    status: TripStatus,
    end_time: i64,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE trips
        SET status = $2, end_time = $3
        WHERE id = $1 AND status = 'IN_PROGRESS';
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(status.as_str())
    .bind(end_time)
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}

pub async fn active_for_bus<'c, E>(
    executor: E,
    bus_id: &Id<Bus>,
) -> Result<Option<WithId<Trip>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<TripRow> = sqlx::query_as(
        "
        SELECT
            id, bus_id, driver_id, start_time, end_time, status
        FROM
            trips
        WHERE bus_id = $1 AND status = 'IN_PROGRESS'
        ORDER BY start_time DESC
        LIMIT 1;
        ",
    )
    .bind(bus_id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(WithId::try_from).transpose()
}
