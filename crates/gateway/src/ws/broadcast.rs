//! Domain-event broadcast sink.
//!
//! A wildcard bus subscriber serializes every domain event into the
//! shared broadcast channel; each connected client receives the frames
//! whose scope passes its allow-list.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use prizm_events::{DomainEvent, EventBus};

use crate::state::{AppState, WsFrame};

/// Wire the bus → broadcast-channel bridge. Called once at startup.
pub fn register_bridge(bus: &EventBus, ws_tx: tokio::sync::broadcast::Sender<WsFrame>) {
    bus.subscribe_all(
        "ws-bridge",
        Arc::new(move |event: DomainEvent| {
            let ws_tx = ws_tx.clone();
            async move {
                if let Ok(json) = serde_json::to_string(&event) {
                    let _ = ws_tx.send(WsFrame {
                        scope: event.scope().to_owned(),
                        json,
                    });
                }
                Ok(())
            }
        }),
    );
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    /// Comma-separated scope allow-list; absent means all scopes.
    pub scopes: Option<String>,
}

/// GET <websocket_path>?apiKey=…&scopes=a,b
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| client_loop(state, query, socket))
}

async fn client_loop(state: AppState, query: ConnectQuery, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    if query.api_key.is_none() && state.api_key_hash.is_some() {
        let _ = sink.close().await;
        return;
    }
    if !state.key_valid(query.api_key.as_deref()) {
        let _ = sink.close().await;
        return;
    }

    let allow_list: Option<Vec<String>> = query.scopes.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    });

    let mut rx = state.ws_tx.subscribe();
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let allowed = allow_list
                            .as_ref()
                            .map_or(true, |list| list.iter().any(|s| s == &frame.scope));
                        if allowed && sink.send(Message::Text(frame.json)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "ws client lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {} // the sink is broadcast-only
                }
            }
        }
    }
}
