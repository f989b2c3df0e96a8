// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Subscriber Hub. Fan-out is per connection and independent:
//! each connection gets its own bounded queue, so one slow reader is closed
//! rather than stalling or dropping frames for everyone else — unlike a
//! shared `tokio::sync::broadcast` channel, where a lagging receiver loses
//! messages silently.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerFrame;

/// Default bound on a connection's outbound queue before it is closed for
/// back-pressure.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

pub struct Connection {
    pub participant_id: Uuid,
    tx: mpsc::Sender<ServerFrame>,
}

#[derive(Default)]
pub struct SubscriberHub {
    connections: DashMap<String, Connection>,
}

/// Why a connection was dropped from the hub, surfaced to the WebSocket
/// layer so it can pick the right close code (4001/4002, or a normal close
/// for back-pressure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    BackPressure,
    SessionExpired,
}

impl SubscriberHub {
    pub fn new() -> Self {
        SubscriberHub {
            connections: DashMap::new(),
        }
    }

    /// Register a freshly authenticated connection. The caller is expected
    /// to have already sent the `subscribed` + replay tail + `replay_complete`
    /// frames directly to the returned receiver's paired sender *before* any
    /// concurrent command could append a new live event — in practice this
    /// holds because the session actor processes subscribe as one atomic
    /// step in its single-writer command loop.
    pub fn register(
        &self,
        client_id: String,
        participant_id: Uuid,
    ) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        self.connections.insert(client_id, Connection { participant_id, tx });
        rx
    }

    /// Drops a connection and returns the participant id it belonged to, so
    /// the caller can notify other subscribers that the participant left.
    pub fn unregister(&self, client_id: &str) -> Option<Uuid> {
        self.connections.remove(client_id).map(|(_, conn)| conn.participant_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Fan a frame out to every connection. Non-blocking: a connection whose
    /// queue is full is dropped from the hub and returned to the caller so
    /// the WebSocket layer can close it — never blocks on a slow reader.
    pub fn broadcast(&self, frame: ServerFrame) -> Vec<String> {
        let mut closed = Vec::new();
        for entry in self.connections.iter() {
            let client_id = entry.key().clone();
            match entry.value().tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => closed.push(client_id),
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(client_id),
            }
        }
        for client_id in &closed {
            self.connections.remove(client_id);
        }
        closed
    }

    /// Send a frame to one connection only (e.g. `pong`, or a synthetic
    /// `gateway_error` on lag). Returns `false` if the connection is gone or
    /// its queue is full, in which case the caller should close it.
    pub fn send_to(&self, client_id: &str, frame: ServerFrame) -> bool {
        match self.connections.get(client_id) {
            Some(conn) => conn.tx.try_send(frame).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_connection_receives_broadcast() {
        let hub = SubscriberHub::new();
        let mut rx = hub.register("c1".into(), Uuid::new_v4());
        hub.broadcast(ServerFrame::ReplayComplete);
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::ReplayComplete));
    }

    #[tokio::test]
    async fn slow_connection_is_closed_without_blocking_others() {
        let hub = SubscriberHub::new();
        let mut slow_rx = hub.register("slow".into(), Uuid::new_v4());
        let mut fast_rx = hub.register("fast".into(), Uuid::new_v4());

        // Fill the slow connection's queue without draining it.
        for _ in 0..DEFAULT_QUEUE_DEPTH {
            hub.broadcast(ServerFrame::Pong);
        }
        let closed = hub.broadcast(ServerFrame::Pong);
        assert_eq!(closed, vec!["slow".to_string()]);
        assert_eq!(hub.len(), 1);

        // The fast connection still received every frame.
        let mut count = 0;
        while fast_rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, DEFAULT_QUEUE_DEPTH + 1);
        drop(slow_rx.try_recv());
    }

    #[tokio::test]
    async fn unregister_removes_connection() {
        let hub = SubscriberHub::new();
        let _rx = hub.register("c1".into(), Uuid::new_v4());
        hub.unregister("c1");
        assert!(hub.is_empty());
    }
}
