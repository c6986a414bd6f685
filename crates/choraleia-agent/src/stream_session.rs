//! Per-conversation fan-out: a bounded replay ring of emitted chunks plus a
//! set of subscriber channels with drop-if-slow delivery.
//!
//! Ordering: every subscriber sees chunks in `event_id` order. A slow
//! subscriber may miss chunks (non-blocking send) but never observes
//! reordering. Fresh reconnects replay `event_id > last_event_id` from the
//! ring, then follow live.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use choraleia_core::config::{STREAM_RING_CAPACITY, SUBSCRIBER_CHANNEL_CAPACITY};
use choraleia_core::types::ConversationId;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunk::ChatChunk;

/// A chunk tagged with its monotonically increasing stream position.
#[derive(Debug, Clone)]
pub struct StreamEnvelope {
    pub event_id: u64,
    pub chunk: ChatChunk,
}

pub struct StreamSession {
    ring: Mutex<VecDeque<StreamEnvelope>>,
    next_event_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<StreamEnvelope>>>,
    next_subscriber_id: AtomicU64,
    /// Closed when the stream completes (any finish path).
    done: CancellationToken,
    /// Cancelled by `CancelStream`; the engine's turn loop watches it.
    cancel: CancellationToken,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(STREAM_RING_CAPACITY)),
            next_event_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            done: CancellationToken::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Tag, buffer, and broadcast a chunk. Subscribers that cannot keep up
    /// miss this chunk (try_send); the ring keeps it for reconnect replay.
    pub fn publish(&self, chunk: ChatChunk) -> u64 {
        let event_id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let envelope = StreamEnvelope { event_id, chunk };

        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() >= STREAM_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(envelope.clone());
        }

        let subscribers = self.subscribers.lock().unwrap();
        for (sub_id, tx) in subscribers.iter() {
            if tx.try_send(envelope.clone()).is_err() {
                debug!(subscriber = sub_id, event_id, "slow subscriber, chunk dropped");
            }
        }
        event_id
    }

    /// Ring entries with `event_id > since`.
    pub fn events_since(&self, since: u64) -> Vec<StreamEnvelope> {
        self.ring
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_id > since)
            .cloned()
            .collect()
    }

    /// Register a live subscriber. The returned guard unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>) -> (mpsc::Receiver<StreamEnvelope>, SubscriptionGuard) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().insert(id, tx);
        (
            rx,
            SubscriptionGuard {
                session: Arc::clone(self),
                id,
            },
        )
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    /// Completion signal; subscribers stop reading when it fires.
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Engine-side cancellation signal.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn close(&self) {
        self.done.cancel();
        // Dropping the senders closes every subscriber channel.
        self.subscribers.lock().unwrap().clear();
    }
}

/// Unsubscribes its stream subscriber when dropped.
pub struct SubscriptionGuard {
    session: Arc<StreamSession>,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.session.unsubscribe(self.id);
    }
}

/// Active stream sessions, one per streaming conversation.
pub struct StreamRegistry {
    sessions: DashMap<ConversationId, Arc<StreamSession>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create (or return) the session for a conversation.
    pub fn open(&self, conversation_id: &ConversationId) -> Arc<StreamSession> {
        self.sessions
            .entry(conversation_id.clone())
            .or_insert_with(|| Arc::new(StreamSession::new()))
            .clone()
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<Arc<StreamSession>> {
        self.sessions.get(conversation_id).map(|s| Arc::clone(&s))
    }

    /// Subscribe to live chunks; `None` when no stream is active.
    pub fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<(mpsc::Receiver<StreamEnvelope>, SubscriptionGuard)> {
        self.get(conversation_id).map(|s| s.subscribe())
    }

    /// Replay buffer for reconnects; empty when no stream is active.
    pub fn events_since(&self, conversation_id: &ConversationId, since: u64) -> Vec<StreamEnvelope> {
        self.get(conversation_id)
            .map(|s| s.events_since(since))
            .unwrap_or_default()
    }

    /// Request cancellation of the running stream.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        match self.get(conversation_id) {
            Some(session) => {
                session.cancel_token().cancel();
                true
            }
            None => false,
        }
    }

    /// Close the done channel, drop subscribers, and remove the session.
    pub fn close(&self, conversation_id: &ConversationId) {
        if let Some((_, session)) = self.sessions.remove(conversation_id) {
            session.close();
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ChatChunk {
        ChatChunk::content("m", "model", "c", text)
    }

    #[tokio::test]
    async fn subscribers_receive_in_event_id_order() {
        let registry = StreamRegistry::new();
        let conv = ConversationId::new();
        let session = registry.open(&conv);

        let (mut rx, _guard) = session.subscribe();
        for i in 0..10 {
            session.publish(chunk(&format!("c{i}")));
        }

        let mut last = 0;
        for _ in 0..10 {
            let envelope = rx.recv().await.unwrap();
            assert!(envelope.event_id > last);
            last = envelope.event_id;
        }
    }

    #[tokio::test]
    async fn reconnect_replays_only_missed_events() {
        let registry = StreamRegistry::new();
        let conv = ConversationId::new();
        let session = registry.open(&conv);

        for i in 0..50 {
            session.publish(chunk(&format!("c{i}")));
        }

        // Client saw up to event 42 and reconnects.
        let replay = registry.events_since(&conv, 42);
        let ids: Vec<u64> = replay.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, (43..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let registry = StreamRegistry::new();
        let conv = ConversationId::new();
        let session = registry.open(&conv);

        for i in 0..(STREAM_RING_CAPACITY + 100) {
            session.publish(chunk(&format!("c{i}")));
        }
        let all = session.events_since(0);
        assert_eq!(all.len(), STREAM_RING_CAPACITY);
        // Oldest entries were evicted.
        assert_eq!(all.first().unwrap().event_id, 101);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_but_never_reorders() {
        let registry = StreamRegistry::new();
        let conv = ConversationId::new();
        let session = registry.open(&conv);

        let (mut rx, _guard) = session.subscribe();
        // Overflow the subscriber channel without draining it.
        for i in 0..(SUBSCRIBER_CHANNEL_CAPACITY + 64) {
            session.publish(chunk(&format!("c{i}")));
        }

        let mut received = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            received.push(envelope.event_id);
        }
        assert_eq!(received.len(), SUBSCRIBER_CHANNEL_CAPACITY);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn close_fires_done_and_drops_subscribers() {
        let registry = StreamRegistry::new();
        let conv = ConversationId::new();
        let session = registry.open(&conv);
        let done = session.done_token();
        let (mut rx, _guard) = session.subscribe();

        registry.close(&conv);
        assert!(done.is_cancelled());
        assert!(rx.recv().await.is_none());
        assert!(registry.get(&conv).is_none());
    }

    #[test]
    fn subscribe_on_missing_conversation_returns_none() {
        let registry = StreamRegistry::new();
        assert!(registry.subscribe(&ConversationId::new()).is_none());
    }
}
