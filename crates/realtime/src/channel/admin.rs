use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use cache::Cache;
use database::Store;
use futures::{SinkExt, StreamExt};

use crate::{
    channel::{unauthorized, RealtimeState, WsQuery},
    events::ServerEvent,
};

/// `GET /ws/admin` upgrade; admin role required.
pub async fn ws_handler<S: Store, C: Cache>(
    State(state): State<Arc<RealtimeState<S, C>>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(why) = state.auth.admin(query.token.as_deref()) {
        log::debug!("admin ws auth failed: {why}");
        return unauthorized();
    }
    ws.on_upgrade(move |socket| handle_admin(socket, state))
        .into_response()
}

/// Admin sockets are read-mostly: a full fleet snapshot on connect, then
/// the admin broadcast feed until close.
async fn handle_admin<S: Store, C: Cache>(socket: WebSocket, state: Arc<RealtimeState<S, C>>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut feed = state.hub.subscribe_admin();

    let snapshot = state.bus_snapshot().await;
    if ws_tx
        .send(Message::Text(ServerEvent::BusesAll(snapshot).to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            broadcast = feed.recv() => {
                match broadcast {
                    Ok(frame) => {
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("admin feed lagged, skipped {skipped} frames");
                        continue;
                    }
                    Err(_) => break,
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
