use model::{
    driver::{Driver, DriverState, DriverStateLog},
    WithId,
};
use sqlx::{Executor, Postgres};
use utility::id::Id;

use crate::{rows::DriverRow, store::Result};

use super::convert_error;

pub async fn get<'c, E>(executor: E, id: &Id<Driver>) -> Result<Option<WithId<Driver>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<DriverRow> = sqlx::query_as(
        "
        SELECT
            id, user_id, license_no, approved, bus_id, state
        FROM
            drivers
        WHERE id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(WithId::try_from).transpose()
}

pub async fn get_by_user<'c, E>(
    executor: E,
    user_id: &str,
) -> Result<Option<WithId<Driver>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<DriverRow> = sqlx::query_as(
        "
        SELECT
            id, user_id, license_no, approved, bus_id, state
        FROM
            drivers
        WHERE user_id = $1;
        ",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(WithId::try_from).transpose()
}

pub async fn set_state<'c, E>(
    executor: E,
    id: &Id<Driver>,
    state: DriverState,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("UPDATE drivers SET state = $2 WHERE id = $1;")
        .bind(id.raw_ref::<str>())
        .bind(state.as_str())
        .execute(executor)
        .await
        .map_err(convert_error)?;
    Ok(())
}

pub async fn append_state_log<'c, E>(executor: E, entry: &DriverStateLog) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO driver_state_logs(
            driver_id, from_state, to_state, accepted, reason, timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6);
        ",
    )
    .bind(&entry.driver_id)
    .bind(entry.from_state.as_str())
    .bind(entry.to_state.as_str())
    .bind(entry.accepted)
    .bind(&entry.reason)
    .bind(entry.timestamp)
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}
