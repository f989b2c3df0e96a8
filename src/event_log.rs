// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Append-only, totally ordered event log with forward/backward pagination.
//! A single [`EventLog`] lives inside one session actor; it is
//! never shared across sessions and never mutated concurrently — the actor's
//! single-writer loop is the only caller of `append`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Event, EventFilter};

/// Opaque pagination cursor: the exact sort key of the last item returned.
/// Round-trips through base64 so callers never need to understand its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        use base64::Engine;
        let json = serde_json::to_vec(self).expect("Cursor always serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Option<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

pub struct Page {
    pub events: Vec<Event>,
    pub has_more: bool,
    pub cursor: Option<String>,
}

#[derive(Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog { events: Vec::new() }
    }

    /// Append is idempotent by `id` (covers duplicate `execution_complete`
    /// delivery, and general re-ingestion safety for all types): a
    /// duplicate id is dropped rather than appended twice.
    pub fn append(&mut self, event: Event) {
        if self.events.iter().any(|e| e.id == event.id) {
            return;
        }
        let pos = self
            .events
            .partition_point(|e| e.sort_key() <= event.sort_key());
        self.events.insert(pos, event);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.events.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The most recent `n` events in ascending order — the bounded replay
    /// window for newly subscribed connections (use `loadOlderEvents` for
    /// anything further back). Applies the "latest wins" `tool_call`
    /// projection: the log itself keeps every revision, but a freshly
    /// subscribed client only needs the current one per `callId`.
    pub fn tail(&self, n: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(n);
        dedup_latest_by_call_id(&self.events[start..])
    }

    /// Forward pagination from the start, or from just after `cursor`.
    pub fn list_forward(
        &self,
        category: Option<EventFilter>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Page {
        let after = cursor.and_then(Cursor::decode);
        let filtered: Vec<&Event> = self
            .events
            .iter()
            .filter(|e| category.as_ref().map_or(true, |f| f.matches(&e.event_type)))
            .filter(|e| match &after {
                Some(c) => (e.created_at, e.id) > (c.created_at, c.id),
                None => true,
            })
            .collect();

        let has_more = filtered.len() > limit;
        let page: Vec<Event> = filtered.into_iter().take(limit).cloned().collect();
        let cursor = page.last().map(|e| {
            Cursor {
                created_at: e.created_at,
                id: e.id,
            }
            .encode()
        });
        Page {
            events: page,
            has_more,
            cursor,
        }
    }

    /// Backward pagination: events strictly before `before`, most-recent
    /// first page boundary but returned in ascending order for the caller.
    pub fn list_before(
        &self,
        category: Option<EventFilter>,
        limit: usize,
        before: &str,
    ) -> Page {
        let Some(before) = Cursor::decode(before) else {
            return Page {
                events: Vec::new(),
                has_more: false,
                cursor: None,
            };
        };
        let filtered: Vec<&Event> = self
            .events
            .iter()
            .filter(|e| category.as_ref().map_or(true, |f| f.matches(&e.event_type)))
            .filter(|e| (e.created_at, e.id) < (before.created_at, before.id))
            .collect();

        let has_more = filtered.len() > limit;
        let start = filtered.len().saturating_sub(limit);
        let page: Vec<Event> = filtered[start..].iter().map(|e| (*e).clone()).collect();
        let cursor = page.first().map(|e| {
            Cursor {
                created_at: e.created_at,
                id: e.id,
            }
            .encode()
        });
        Page {
            events: page,
            has_more,
            cursor,
        }
    }
}

/// Collapse a slice of events to the subscriber "latest wins" view for
/// `tool_call` records sharing a `call_id`. The log itself
/// always retains every entry: this is a read-side projection only.
pub fn dedup_latest_by_call_id(events: &[Event]) -> Vec<Event> {
    use std::collections::HashMap;
    let mut latest: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();
    for (i, e) in events.iter().enumerate() {
        match &e.call_id {
            Some(call_id) if e.event_type == crate::domain::EventType::ToolCall => {
                latest.insert(call_id.clone(), i);
            }
            _ => out.push(i),
        }
    }
    let mut indices: Vec<usize> = out.into_iter().chain(latest.into_values()).collect();
    indices.sort_unstable();
    indices.into_iter().map(|i| events[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use chrono::Utc;

    fn ev(created_at: chrono::DateTime<Utc>, t: EventType) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_type: t,
            data: serde_json::json!({}),
            message_id: None,
            call_id: None,
            created_at,
        }
    }

    #[test]
    fn append_is_idempotent_by_id() {
        let mut log = EventLog::new();
        let e = ev(Utc::now(), EventType::Error);
        log.append(e.clone());
        log.append(e);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn consecutive_pages_have_no_overlap() {
        let mut log = EventLog::new();
        let base = Utc::now();
        for i in 0..7u32 {
            log.append(ev(
                base + chrono::Duration::milliseconds(i as i64),
                EventType::Error,
            ));
        }
        let page1 = log.list_forward(None, 3, None);
        assert_eq!(page1.events.len(), 3);
        assert!(page1.has_more);
        let page2 = log.list_forward(None, 3, page1.cursor.as_deref());
        let ids1: std::collections::HashSet<_> = page1.events.iter().map(|e| e.id).collect();
        let ids2: std::collections::HashSet<_> = page2.events.iter().map(|e| e.id).collect();
        assert!(ids1.is_disjoint(&ids2));
    }

    #[test]
    fn tool_call_dedup_keeps_latest_per_call_id() {
        let base = Utc::now();
        let mut first = ev(base, EventType::ToolCall);
        first.call_id = Some("call-1".into());
        let mut second = ev(base + chrono::Duration::milliseconds(1), EventType::ToolCall);
        second.call_id = Some("call-1".into());
        let events = vec![first.clone(), second.clone()];
        let view = dedup_latest_by_call_id(&events);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, second.id);
    }

    #[test]
    fn tail_returns_ascending_order() {
        let mut log = EventLog::new();
        let base = Utc::now();
        for i in 0..5u32 {
            log.append(ev(
                base + chrono::Duration::milliseconds(i as i64),
                EventType::Error,
            ));
        }
        let tail = log.tail(3);
        assert_eq!(tail.len(), 3);
        assert!(tail.windows(2).all(|w| w[0].sort_key() < w[1].sort_key()));
    }
}
