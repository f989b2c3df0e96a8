// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Prompt queue. There is no separate queue data structure: FIFO
//! order is implicit in the message table, `status = pending` ordered by
//! `created_at`. This module is the handful of pure queries the actor runs
//! against its message list.

use crate::domain::{Message, MessageStatus};

/// The oldest pending message, if any (`ORDER BY created_at ASC LIMIT 1`).
pub fn next_pending(messages: &[Message]) -> Option<&Message> {
    messages
        .iter()
        .filter(|m| m.status == MessageStatus::Pending)
        .min_by_key(|m| m.created_at)
}

/// Whether some message is already `processing` — the at-most-one invariant
/// the dispatcher guards on.
pub fn has_processing(messages: &[Message]) -> bool {
    messages.iter().any(|m| m.status == MessageStatus::Processing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageSource, ReasoningEffort};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn msg(status: MessageStatus, created_at: chrono::DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            author_participant_id: Uuid::new_v4(),
            content: "hi".into(),
            source: MessageSource::Web,
            status,
            created_at,
            started_at: None,
            completed_at: None,
            attachments: None,
            callback_context: None,
            reasoning_effort: None::<ReasoningEffort>,
            error: None,
        }
    }

    #[test]
    fn next_pending_picks_oldest() {
        let now = Utc::now();
        let older = msg(MessageStatus::Pending, now - Duration::seconds(10));
        let newer = msg(MessageStatus::Pending, now);
        let messages = vec![newer.clone(), older.clone()];
        assert_eq!(next_pending(&messages).unwrap().id, older.id);
    }

    #[test]
    fn has_processing_detects_in_flight_message() {
        let now = Utc::now();
        let messages = vec![msg(MessageStatus::Processing, now)];
        assert!(has_processing(&messages));
    }

    #[test]
    fn stop_never_removes_pending_messages() {
        // stop() only affects the running message; pending entries stay
        // untouched in the queue.
        let now = Utc::now();
        let messages = vec![msg(MessageStatus::Pending, now)];
        assert!(next_pending(&messages).is_some());
    }
}
