//! WebSocket event streaming (spec §6 "Operator surface").

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, error, info};

use e84_core::ControllerFacade;

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(facade): State<Arc<ControllerFacade>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, facade))
}

async fn handle_socket(mut socket: WebSocket, facade: Arc<ControllerFacade>) {
    info!("event stream client connected");
    let mut rx = facade.subscribe();
    let mut dropped_count: usize = 0;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if dropped_count > 0 {
                            let notice = serde_json::json!({
                                "type": "backpressure",
                                "droppedCount": dropped_count,
                            });
                            if let Ok(json) = serde_json::to_string(&notice) {
                                let _ = socket.send(Message::Text(json)).await;
                            }
                            dropped_count = 0;
                        }

                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if let Err(e) = socket.send(Message::Text(json)).await {
                                    error!("failed to send event to client: {e}");
                                    break;
                                }
                            }
                            Err(e) => error!("failed to serialize event: {e}"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        dropped_count += n as usize;
                        debug!("client lagging, dropped {n} events (total {dropped_count})");
                    }
                    Err(e) => {
                        error!("event channel error: {e}");
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) => {
                        debug!("client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("websocket error: {e}");
                        break;
                    }
                    None => {
                        debug!("websocket closed");
                        break;
                    }
                }
            }
        }
    }

    info!("event stream client disconnected");
}
