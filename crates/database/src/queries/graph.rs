use model::{
    graph::{GraphEdge, StopNode},
    WithId,
};
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::{
    rows::{GraphEdgeRow, StopNodeRow},
    store::Result,
};

use super::convert_error;

/// Postgres caps bind parameters at 65535; stay well below it.
const INSERT_CHUNK: usize = 500;

/// Clears and refills both graph tables. Runs inside the caller's
/// transaction so readers never see a half-written snapshot.
pub async fn replace(
    tx: &mut Transaction<'_, Postgres>,
    nodes: &[WithId<StopNode>],
    edges: &[GraphEdge],
) -> Result<()> {
    sqlx::query("DELETE FROM graph_edges;")
        .execute(&mut **tx)
        .await
        .map_err(convert_error)?;
    sqlx::query("DELETE FROM stop_nodes;")
        .execute(&mut **tx)
        .await
        .map_err(convert_error)?;

    for chunk in nodes.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO stop_nodes(id, name, latitude, longitude) ");
        builder.push_values(chunk, |mut row, node| {
            row.push_bind(node.id.raw())
                .push_bind(&node.content.name)
                .push_bind(node.content.latitude)
                .push_bind(node.content.longitude);
        });
        builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(convert_error)?;
    }

    for chunk in edges.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO graph_edges(\
             from_node_id, to_node_id, route_id, route_number, \
             distance_km, avg_travel_time_min, transfer_cost_min, stop_order) ",
        );
        builder.push_values(chunk, |mut row, edge| {
            row.push_bind(edge.from.raw())
                .push_bind(edge.to.raw())
                .push_bind(&edge.route_id)
                .push_bind(&edge.route_number)
                .push_bind(edge.distance_km)
                .push_bind(edge.avg_travel_time_min)
                .push_bind(edge.transfer_cost_min)
                .push_bind(edge.stop_order as i32);
        });
        builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(convert_error)?;
    }
    Ok(())
}

pub async fn load_all<'c, E>(
    executor: E,
) -> Result<(Vec<WithId<StopNode>>, Vec<GraphEdge>)>
where
    E: sqlx::Executor<'c, Database = Postgres> + Copy,
{
    let node_rows: Vec<StopNodeRow> = sqlx::query_as(
        "
        SELECT
            id, name, latitude, longitude
        FROM
            stop_nodes;
        ",
    )
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;

    let edge_rows: Vec<GraphEdgeRow> = sqlx::query_as(
        "
        SELECT
            from_node_id, to_node_id, route_id, route_number,
            distance_km, avg_travel_time_min, transfer_cost_min, stop_order
        FROM
            graph_edges;
        ",
    )
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;

    Ok((
        node_rows.into_iter().map(WithId::from).collect(),
        edge_rows.into_iter().map(GraphEdge::from).collect(),
    ))
}
