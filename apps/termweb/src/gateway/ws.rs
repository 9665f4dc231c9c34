//! WebSocket endpoints.
//!
//! `/ws/h264` fans encoded frames out to viewers, `/ws/control` carries
//! JSON telemetry and keyframe requests, `/ws/file` speaks the binary
//! transfer protocol. One socket owns its transfer sessions; frames are
//! processed strictly in the order they arrive.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::gateway::{AppState, VideoCommand};
use crate::transfer::wire::{encode_server_frame, ServerFrame};

/// Client → server control messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Buffer health, 0..=255, reported about once a second.
    BufferHealth { value: u8 },
    RequestKeyframe,
    Ping,
}

/// Server → client control messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    TierChanged {
        tier: &'static str,
        bitrate: u32,
        fps: u32,
    },
    Pong,
}

pub async fn h264_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_h264_socket(socket, state))
}

pub async fn control_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_control_socket(socket, state))
}

pub async fn file_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_file_socket(socket, state))
}

/// Forwards the encoded-frame broadcast. A viewer that falls behind the
/// channel capacity skips ahead; the next keyframe resynchronizes it.
async fn handle_h264_socket(mut socket: WebSocket, state: AppState) {
    let mut frames = state.video.subscribe();
    state.video.send_command(VideoCommand::RequestKeyframe);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(data) => {
                    if socket.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "viewer lagged, requesting keyframe");
                    state.video.send_command(VideoCommand::RequestKeyframe);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                _ => {}
            },
        }
    }
}

async fn handle_control_socket(mut socket: WebSocket, state: AppState) {
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        let parsed: ControlMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(error = %err, "ignoring malformed control message");
                continue;
            }
        };
        let reply = apply_control(&state, parsed);
        if let Some(reply) = reply {
            let body = serde_json::to_string(&reply).expect("control replies serialize");
            if socket.send(Message::Text(body)).await.is_err() {
                break;
            }
        }
    }
}

fn apply_control(state: &AppState, message: ControlMessage) -> Option<ControlReply> {
    match message {
        ControlMessage::BufferHealth { value } => {
            let changed = state.video.controller.lock().on_health_report(value);
            let tier = changed?;
            state.video.send_command(VideoCommand::SetRate {
                bitrate: tier.bitrate,
                fps: tier.fps,
            });
            Some(ControlReply::TierChanged {
                tier: tier.name,
                bitrate: tier.bitrate,
                fps: tier.fps,
            })
        }
        ControlMessage::RequestKeyframe => {
            state.video.send_command(VideoCommand::RequestKeyframe);
            None
        }
        ControlMessage::Ping => Some(ControlReply::Pong),
    }
}

/// Binary transfer loop. Incoming frames always win over outgoing chunk
/// pumping so cancels and acks are never starved by a large download.
async fn handle_file_socket(mut socket: WebSocket, state: AppState) {
    let mut owned_sessions: Vec<u32> = Vec::new();

    loop {
        let pending = {
            let transfers = state.transfers.lock();
            owned_sessions
                .iter()
                .copied()
                .find(|id| transfers.has_pending(*id))
        };

        if let Some(transfer_id) = pending {
            tokio::select! {
                biased;
                incoming = socket.recv() => {
                    if !process_incoming(&mut socket, &state, &mut owned_sessions, incoming).await {
                        break;
                    }
                }
                _ = std::future::ready(()) => {
                    let frame = state.transfers.lock().next_outgoing(transfer_id);
                    if let Some(frame) = frame {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        } else {
            let incoming = socket.recv().await;
            if !process_incoming(&mut socket, &state, &mut owned_sessions, incoming).await {
                break;
            }
        }
    }

    // Suspend whatever this socket still owned; resume picks it back up.
    let mut transfers = state.transfers.lock();
    for transfer_id in owned_sessions {
        transfers.suspend(transfer_id);
    }
}

async fn process_incoming(
    socket: &mut WebSocket,
    state: &AppState,
    owned_sessions: &mut Vec<u32>,
    incoming: Option<Result<Message, axum::Error>>,
) -> bool {
    let data = match incoming {
        Some(Ok(Message::Binary(data))) => data,
        Some(Ok(Message::Close(_))) | None => return false,
        Some(Ok(_)) => return true,
        Some(Err(err)) => {
            warn!(error = %err, "file socket error");
            return false;
        }
    };

    let replies = state.transfers.lock().handle_frame(&data);
    for frame in &replies {
        if let ServerFrame::TransferReady { transfer_id, .. } = frame {
            if !owned_sessions.contains(transfer_id) {
                owned_sessions.push(*transfer_id);
            }
        }
        if send_frame(socket, frame).await.is_err() {
            return false;
        }
    }
    true
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    socket.send(Message::Binary(encode_server_frame(frame))).await
}
