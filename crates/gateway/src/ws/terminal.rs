//! Terminal WebSocket protocol.
//!
//! Client → server: `terminal:attach|input|resize|detach|ping`.
//! Server → client: `terminal:attached|output|exit|error|pong`.
//! Close codes: 4001 missing API key, 4003 invalid key.

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use prizm_terminal::TerminalEvent;

use crate::state::AppState;

const CLOSE_MISSING_KEY: u16 = 4001;
const CLOSE_INVALID_KEY: u16 = 4003;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
enum ClientMsg {
    #[serde(rename = "terminal:attach")]
    Attach { terminal_id: String },
    #[serde(rename = "terminal:input")]
    Input { terminal_id: String, data: String },
    #[serde(rename = "terminal:resize")]
    Resize {
        terminal_id: String,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "terminal:detach")]
    Detach { terminal_id: String },
    #[serde(rename = "terminal:ping")]
    Ping { terminal_id: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
enum ServerMsg {
    #[serde(rename = "terminal:attached")]
    Attached { terminal_id: String },
    #[serde(rename = "terminal:output")]
    Output { terminal_id: String, data: String },
    #[serde(rename = "terminal:exit")]
    Exit {
        terminal_id: String,
        exit_code: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },
    #[serde(rename = "terminal:error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal_id: Option<String>,
        message: String,
    },
    #[serde(rename = "terminal:pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

/// GET /ws/terminal?apiKey=…
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| session_loop(state, query, socket))
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn session_loop(state: AppState, query: ConnectQuery, socket: WebSocket) {
    if state.api_key_hash.is_some() {
        match &query.api_key {
            None => return close_with(socket, CLOSE_MISSING_KEY, "missing api key").await,
            Some(key) if !state.key_valid(Some(key)) => {
                return close_with(socket, CLOSE_INVALID_KEY, "invalid api key").await
            }
            _ => {}
        }
    }

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMsg>(256);
    // terminal_id → live-output forwarder task
    let mut attachments: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(msg) = outgoing else { break };
                let Ok(json) = serde_json::to_string(&msg) else { continue };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                let msg = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let parsed: ClientMsg = match serde_json::from_str(&msg) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = out_tx.send(ServerMsg::Error {
                            terminal_id: None,
                            message: format!("bad message: {e}"),
                        }).await;
                        continue;
                    }
                };
                handle_client_msg(&state, &out_tx, &mut attachments, parsed).await;
            }
        }
    }

    for (_, task) in attachments {
        task.abort();
    }
}

async fn handle_client_msg(
    state: &AppState,
    out_tx: &mpsc::Sender<ServerMsg>,
    attachments: &mut HashMap<String, tokio::task::JoinHandle<()>>,
    msg: ClientMsg,
) {
    match msg {
        ClientMsg::Attach { terminal_id } => {
            let replay = match state.runtime.ctx.terminals.attach(&terminal_id) {
                Ok(replay) => replay,
                Err(e) => {
                    let _ = out_tx
                        .send(ServerMsg::Error {
                            terminal_id: Some(terminal_id),
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            // Full scrollback as one output frame, then `attached`, then
            // (for dead terminals) the exit notification.
            if !replay.buffered.is_empty() {
                let _ = out_tx
                    .send(ServerMsg::Output {
                        terminal_id: terminal_id.clone(),
                        data: replay.buffered.clone(),
                    })
                    .await;
            }
            let _ = out_tx
                .send(ServerMsg::Attached {
                    terminal_id: terminal_id.clone(),
                })
                .await;
            if let Some(exit_code) = replay.exited {
                let _ = out_tx
                    .send(ServerMsg::Exit {
                        terminal_id: terminal_id.clone(),
                        exit_code,
                        signal: None,
                    })
                    .await;
                return;
            }

            // Forward live events until detach or exit.
            let forward_tx = out_tx.clone();
            let mut receiver = replay.receiver;
            let forward_id = terminal_id.clone();
            let task = tokio::spawn(async move {
                while let Ok(event) = receiver.recv().await {
                    let msg = match event {
                        TerminalEvent::Output { data } => ServerMsg::Output {
                            terminal_id: forward_id.clone(),
                            data,
                        },
                        TerminalEvent::Exit { exit_code } => {
                            let _ = forward_tx
                                .send(ServerMsg::Exit {
                                    terminal_id: forward_id.clone(),
                                    exit_code,
                                    signal: None,
                                })
                                .await;
                            break;
                        }
                    };
                    if forward_tx.send(msg).await.is_err() {
                        break;
                    }
                }
            });
            if let Some(previous) = attachments.insert(terminal_id, task) {
                previous.abort();
            }
        }
        ClientMsg::Input { terminal_id, data } => {
            if let Err(e) = state.runtime.ctx.terminals.write(&terminal_id, &data) {
                let _ = out_tx
                    .send(ServerMsg::Error {
                        terminal_id: Some(terminal_id),
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        ClientMsg::Resize {
            terminal_id,
            cols,
            rows,
        } => {
            if let Err(e) = state.runtime.ctx.terminals.resize(&terminal_id, cols, rows) {
                let _ = out_tx
                    .send(ServerMsg::Error {
                        terminal_id: Some(terminal_id),
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        ClientMsg::Detach { terminal_id } => {
            if let Some(task) = attachments.remove(&terminal_id) {
                task.abort();
            }
        }
        ClientMsg::Ping { terminal_id } => {
            let _ = out_tx.send(ServerMsg::Pong { terminal_id }).await;
        }
    }
}
