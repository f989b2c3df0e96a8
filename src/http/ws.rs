// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Subscriber WebSocket channel. A client connects, sends a
//! `subscribe` frame carrying its bearer token, and — once authenticated —
//! receives a state snapshot, a bounded replay of recent history, then a
//! `replay_complete` marker, then live frames. Connections that don't
//! authenticate within the grace period, or whose keepalive pings stop
//! arriving, are closed with the appropriate code (4001/4002).

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::close_code;
use crate::protocol::{ClientFrame, ServerFrame};

use super::AppState;

const PING_GRACE_PERIOD: Duration = Duration::from_secs(45);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: Uuid) {
    let Some(handle) = state.registry.get(session_id) else {
        close_with(&mut socket, close_code::SESSION_EXPIRED, "unknown session").await;
        return;
    };

    let client_id = Uuid::new_v4().to_string();

    // Wait for the initial `subscribe` frame. Anything else, or silence
    // past the grace period, is an auth failure.
    let subscribed = tokio::time::timeout(PING_GRACE_PERIOD, socket.recv()).await;
    let Ok(Some(Ok(Message::Text(text)))) = subscribed else {
        close_with(&mut socket, close_code::AUTH_REQUIRED, "subscribe required").await;
        return;
    };
    let Ok(ClientFrame::Subscribe { token, client_id: wire_client_id }) =
        serde_json::from_str::<ClientFrame>(&text)
    else {
        close_with(&mut socket, close_code::AUTH_REQUIRED, "subscribe required").await;
        return;
    };
    let client_id = if wire_client_id.is_empty() { client_id } else { wire_client_id };

    let result = handle.subscribe(client_id.clone(), token).await;
    let (mut frames, participant_id) = match result {
        Ok(sub) => {
            send_frame(&mut socket, &ServerFrame::Subscribed { state: sub.state }).await;
            for event in sub.replay {
                send_frame(&mut socket, &ServerFrame::SandboxEvent { event }).await;
            }
            send_frame(&mut socket, &ServerFrame::ReplayComplete).await;
            (sub.frames, sub.participant_id)
        }
        Err(_) => {
            close_with(&mut socket, close_code::AUTH_REQUIRED, "invalid token").await;
            return;
        }
    };

    let mut shutdown_rx = state.shutdown.clone();

    info!(%session_id, %client_id, "subscriber connected");

    loop {
        tokio::select! {
            msg = tokio::time::timeout(PING_GRACE_PERIOD, socket.recv()) => {
                match msg {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Ping) => {
                                send_frame(&mut socket, &ServerFrame::Pong).await;
                                handle.touch_last_seen(participant_id).await;
                            }
                            Ok(ClientFrame::Prompt { content, attachments, reasoning_effort }) => {
                                let _ = handle
                                    .enqueue_prompt(crate::actor::EnqueueInput {
                                        content,
                                        author_id: crate::actor::AuthorRef::Known(participant_id),
                                        source: crate::domain::MessageSource::Web,
                                        attachments,
                                        callback_context: None,
                                        reasoning_effort: reasoning_effort.map(|e| e.as_str().to_string()),
                                    })
                                    .await;
                                handle.touch_last_seen(participant_id).await;
                            }
                            Ok(ClientFrame::Stop) => {
                                let _ = handle.stop().await;
                                handle.touch_last_seen(participant_id).await;
                            }
                            Ok(ClientFrame::Typing { is_typing }) => {
                                handle.typing(participant_id, is_typing).await;
                                handle.touch_last_seen(participant_id).await;
                            }
                            Ok(ClientFrame::Subscribe { .. }) => {
                                handle.touch_last_seen(participant_id).await;
                            }
                            Err(e) => warn!(%session_id, "invalid client frame: {e}"),
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(_))) | Err(_) => break,
                }
            }
            frame = frames.recv() => {
                match frame {
                    Some(frame) => send_frame(&mut socket, &frame).await,
                    None => break,
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    close_with(&mut socket, close_code::NORMAL, "server shutting down").await;
                    break;
                }
            }
        }
    }

    handle.unsubscribe(client_id.clone()).await;
    info!(%session_id, %client_id, "subscriber disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = socket.send(Message::Text(json)).await;
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
