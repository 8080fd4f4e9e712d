use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use futures::future;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WatchQuery {
    /// Only stream notifications addressed to this driver.
    pub driver_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WatchQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.driver_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, driver_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    // Lagged receivers skip what they missed.
    let mut notifications = BroadcastStream::new(state.notifications_tx.subscribe())
        .filter_map(|result| future::ready(result.ok()))
        .filter(move |notification| {
            future::ready(
                driver_id
                    .as_deref()
                    .is_none_or(|wanted| notification.driver_id == wanted),
            )
        })
        .boxed();

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize driver notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
