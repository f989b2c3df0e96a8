// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-message token batching. Flushes on a deadline timer, a
//! size bound, a `messageId` change, or an explicit call — never a busy
//! loop, and never silently drops a partial batch: [`TokenAggregator::drop`]
//! flushes whatever remains instead of discarding it on destruction.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_SIZE_BOUND: usize = 100;

/// A flushed, concatenated batch of token text for one message.
pub struct Flushed {
    pub message_id: Uuid,
    pub text: String,
}

/// Accumulates token deltas for a single session. Not `Send`-shared; the
/// session actor owns one instance and feeds it from its command loop.
pub struct TokenAggregator {
    current: Option<(Uuid, String, usize)>,
    flush_interval: Duration,
    size_bound: usize,
    out: mpsc::UnboundedSender<Flushed>,
    detached: bool,
}

impl TokenAggregator {
    pub fn new(out: mpsc::UnboundedSender<Flushed>) -> Self {
        TokenAggregator {
            current: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            size_bound: DEFAULT_SIZE_BOUND,
            out,
            detached: false,
        }
    }

    pub fn with_limits(mut self, flush_interval: Duration, size_bound: usize) -> Self {
        self.flush_interval = flush_interval;
        self.size_bound = size_bound;
        self
    }

    /// The deadline the caller's `tokio::select!` should race against. Far
    /// in the future when nothing is pending, so the select branch never
    /// fires spuriously.
    pub fn deadline(&self) -> Instant {
        match &self.current {
            Some(_) => Instant::now() + self.flush_interval,
            None => Instant::now() + Duration::from_secs(3600),
        }
    }

    /// Add a token chunk for `message_id`. A change of key flushes the
    /// previous batch first; a no-op if the aggregator has been destroyed.
    pub fn add(&mut self, message_id: Uuid, chunk: &str) {
        if self.detached {
            return;
        }
        match &mut self.current {
            Some((id, text, count)) if *id == message_id => {
                text.push_str(chunk);
                *count += 1;
                if *count >= self.size_bound {
                    self.flush();
                }
            }
            Some(_) => {
                self.flush();
                self.current = Some((message_id, chunk.to_string(), 1));
            }
            None => {
                self.current = Some((message_id, chunk.to_string(), 1));
            }
        }
    }

    /// Timer-triggered flush; a no-op if nothing is pending.
    pub fn flush(&mut self) {
        if let Some((message_id, text, _)) = self.current.take() {
            if !text.is_empty() {
                let _ = self.out.send(Flushed { message_id, text });
            }
        }
    }

    /// Flush and stop accepting further chunks. Subsequent `add` calls are
    /// no-ops.
    pub fn destroy(&mut self) {
        self.flush();
        self.detached = true;
    }
}

impl Drop for TokenAggregator {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (TokenAggregator, mpsc::UnboundedReceiver<Flushed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TokenAggregator::new(tx), rx)
    }

    #[test]
    fn concatenation_order_is_preserved() {
        let (mut agg, mut rx) = harness();
        let id = Uuid::new_v4();
        agg.add(id, "hel");
        agg.add(id, "lo ");
        agg.add(id, "world");
        agg.flush();
        let flushed = rx.try_recv().unwrap();
        assert_eq!(flushed.text, "hello world");
    }

    #[test]
    fn key_change_flushes_previous_batch() {
        let (mut agg, mut rx) = harness();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        agg.add(a, "first");
        agg.add(b, "second");
        let flushed = rx.try_recv().unwrap();
        assert_eq!(flushed.message_id, a);
        assert_eq!(flushed.text, "first");
    }

    #[test]
    fn size_bound_triggers_flush() {
        let (mut agg, mut rx) = harness();
        let mut agg = agg.with_limits(Duration::from_secs(3600), 3);
        let id = Uuid::new_v4();
        agg.add(id, "a");
        agg.add(id, "b");
        assert!(rx.try_recv().is_err());
        agg.add(id, "c");
        let flushed = rx.try_recv().unwrap();
        assert_eq!(flushed.text, "abc");
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let (mut agg, mut rx) = harness();
        agg.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn destroy_flushes_and_detaches() {
        let (mut agg, mut rx) = harness();
        let id = Uuid::new_v4();
        agg.add(id, "tail");
        agg.destroy();
        assert_eq!(rx.try_recv().unwrap().text, "tail");
        agg.add(id, "ignored");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drop_flushes_pending_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        {
            let mut agg = TokenAggregator::new(tx);
            agg.add(id, "leftover");
        }
        assert_eq!(rx.try_recv().unwrap().text, "leftover");
    }
}
