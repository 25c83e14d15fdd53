//! Session transports and the registry that owns them.
//!
//! One session is one long-lived logical client connection, identified by an
//! opaque server-generated id and layered above individual HTTP requests.
//! The registry maps session ids to live transport handles, creating on
//! initialization, removing on close, and sweeping everything at shutdown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::Event;
use tokio::sync::{RwLock, broadcast};

use crate::error::CloseFailure;

/// Maximum number of events kept for replay per session.
const HISTORY_SIZE: usize = 100;

/// A duplex connection handle owned by the registry for one session.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    /// The opaque session id this transport was registered under.
    fn session_id(&self) -> &str;

    /// Cooperatively close the transport.
    ///
    /// Called once per entry during removal or bulk shutdown; the caller
    /// bounds the wait, so implementations need not enforce their own
    /// timeout.
    async fn close(&self) -> anyhow::Result<()>;
}

/// A buffered protocol event with an id for `Last-Event-ID` replay.
#[derive(Clone, Debug)]
pub struct BufferedEvent {
    /// Monotonically increasing per session.
    pub id: u64,
    /// SSE event type (e.g. "message").
    pub event_type: String,
    /// JSON payload.
    pub data: String,
}

impl BufferedEvent {
    /// Convert to an Axum SSE event.
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default().id(self.id.to_string()).event(self.event_type.clone()).data(&self.data)
    }
}

/// Streamable HTTP transport: an event mailbox with replay.
///
/// POST requests push responses into the mailbox, GET requests stream it
/// over SSE, and a reconnecting client replays missed events by presenting
/// the last event id it saw.
pub struct StreamableHttpTransport {
    id: String,
    tx: broadcast::Sender<BufferedEvent>,
    history: RwLock<VecDeque<BufferedEvent>>,
    next_event_id: AtomicU64,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    /// Create a transport for the given session id.
    #[must_use]
    pub fn new(id: String) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            id,
            tx,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_SIZE)),
            next_event_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an event: stored for replay and broadcast to live subscribers.
    pub async fn push_event(&self, event_type: impl Into<String>, data: impl Into<String>) -> u64 {
        let event = BufferedEvent {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            event_type: event_type.into(),
            data: data.into(),
        };

        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine; the event stays in history.
        let _ = self.tx.send(event.clone());

        event.id
    }

    /// Events after a given id, for replay on reconnection.
    pub async fn events_after(&self, last_event_id: u64) -> Vec<BufferedEvent> {
        let history = self.history.read().await;
        history.iter().filter(|e| e.id > last_event_id).cloned().collect()
    }

    /// Subscribe to live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BufferedEvent> {
        self.tx.subscribe()
    }

    /// Whether the transport has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransport for StreamableHttpTransport {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!(session_id = %self.id, "Transport closed");
        Ok(())
    }
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Maps session ids to live transport handles.
///
/// Add/get/remove are linearizable per id. The registry exclusively owns
/// each transport for the lifetime of its session; once removed, a session
/// id is never reused for a different transport (ids are 122-bit random
/// UUIDs, generated only by [`Self::generate_session_id`]).
pub struct SessionRegistry<T: SessionTransport> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: SessionTransport> SessionRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Generate a fresh opaque session id.
    #[must_use]
    pub fn generate_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register a transport under its session id.
    ///
    /// A collision means the id generator misbehaved; last write wins, and
    /// the collision is logged.
    pub async fn add(&self, session_id: String, transport: Arc<T>) {
        let previous = self.entries.write().await.insert(session_id.clone(), transport);
        if previous.is_some() {
            tracing::warn!(session_id = %session_id, "Session id collision, replacing transport");
        } else {
            tracing::info!(session_id = %session_id, "Registered session");
        }
    }

    /// Look up the transport for a session. Pure read.
    pub async fn get(&self, session_id: &str) -> Option<Arc<T>> {
        self.entries.read().await.get(session_id).cloned()
    }

    /// Remove a session. Idempotent; removing an absent id is a no-op.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.entries.write().await.remove(session_id).is_some();
        if removed {
            tracing::info!(session_id = %session_id, "Removed session");
        }
        removed
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no sessions are registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Best-effort bulk shutdown.
    ///
    /// Every entry is removed from the registry regardless of its close
    /// outcome. Each close is bounded by `per_entry_timeout` so one
    /// unresponsive transport cannot stall the sweep; failures are logged
    /// and reported, and never abort the remaining entries.
    pub async fn close_all(&self, per_entry_timeout: Duration) -> Vec<CloseFailure> {
        let drained: Vec<(String, Arc<T>)> =
            self.entries.write().await.drain().collect();

        let mut failures = Vec::new();
        for (session_id, transport) in drained {
            let result = tokio::time::timeout(per_entry_timeout, transport.close()).await;
            let reason = match result {
                Ok(Ok(())) => {
                    tracing::info!(session_id = %session_id, "Closed session transport");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("close timed out after {per_entry_timeout:?}"),
            };
            tracing::error!(session_id = %session_id, reason = %reason, "Transport close failed");
            failures.push(CloseFailure { session_id, reason });
        }
        failures
    }
}

impl<T: SessionTransport> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SessionTransport> std::fmt::Debug for SessionRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = SessionRegistry::new();
        let id = SessionRegistry::<StreamableHttpTransport>::generate_session_id();
        let transport = Arc::new(StreamableHttpTransport::new(id.clone()));

        registry.add(id.clone(), Arc::clone(&transport)).await;
        let found = registry.get(&id).await.unwrap();
        assert!(Arc::ptr_eq(&found, &transport));

        assert!(registry.remove(&id).await);
        assert!(registry.get(&id).await.is_none());
        // Idempotent removal
        assert!(!registry.remove(&id).await);
    }

    #[tokio::test]
    async fn test_event_push_and_replay() {
        let transport = StreamableHttpTransport::new("s1".into());

        assert_eq!(transport.push_event("message", r#"{"n":1}"#).await, 1);
        assert_eq!(transport.push_event("message", r#"{"n":2}"#).await, 2);
        assert_eq!(transport.push_event("message", r#"{"n":3}"#).await, 3);

        let events = transport.events_after(1).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, 2);
        assert_eq!(events[1].id, 3);
    }

    #[tokio::test]
    async fn test_ring_buffer_overflow() {
        let transport = StreamableHttpTransport::new("s1".into());
        for i in 0..150 {
            transport.push_event("message", format!(r#"{{"n":{i}}}"#)).await;
        }

        let events = transport.events_after(0).await;
        assert_eq!(events.len(), HISTORY_SIZE);
        // Events 1..=50 were evicted.
        assert_eq!(events[0].id, 51);
    }

    #[tokio::test]
    async fn test_close_marks_transport() {
        let transport = StreamableHttpTransport::new("s1".into());
        assert!(!transport.is_closed());
        transport.close().await.unwrap();
        assert!(transport.is_closed());
    }

    /// Transport that can be told to fail or hang on close.
    struct FlakyTransport {
        id: String,
        mode: Mode,
    }

    enum Mode {
        Ok,
        Fail,
        Hang,
    }

    #[async_trait]
    impl SessionTransport for FlakyTransport {
        fn session_id(&self) -> &str {
            &self.id
        }

        async fn close(&self) -> anyhow::Result<()> {
            match self.mode {
                Mode::Ok => Ok(()),
                Mode::Fail => Err(anyhow::anyhow!("peer went away")),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_close_all_reports_failures_and_removes_everything() {
        let registry = SessionRegistry::new();
        for (id, mode) in [("s1", Mode::Ok), ("s2", Mode::Fail), ("s3", Mode::Ok)] {
            registry
                .add(id.to_string(), Arc::new(FlakyTransport { id: id.to_string(), mode }))
                .await;
        }

        let failures = registry.close_all(Duration::from_secs(1)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].session_id, "s2");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_bounds_unresponsive_transports() {
        let registry = SessionRegistry::new();
        registry
            .add("hang".to_string(), Arc::new(FlakyTransport { id: "hang".into(), mode: Mode::Hang }))
            .await;
        registry
            .add("ok".to_string(), Arc::new(FlakyTransport { id: "ok".into(), mode: Mode::Ok }))
            .await;

        let failures = registry.close_all(Duration::from_millis(50)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].session_id, "hang");
        assert!(failures[0].reason.contains("timed out"));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_ends_live_subscriber_streams() {
        use tokio_stream::StreamExt;
        use tokio_stream::wrappers::BroadcastStream;

        let registry = SessionRegistry::new();
        let transport = Arc::new(StreamableHttpTransport::new("s1".into()));
        registry.add("s1".into(), Arc::clone(&transport)).await;

        let mut stream = BroadcastStream::new(transport.subscribe());
        drop(transport);

        // Sweeping drops the last handle, the sender goes with it, and the
        // subscriber stream terminates instead of pending forever.
        registry.close_all(Duration::from_millis(100)).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collision_is_last_write_wins() {
        let registry = SessionRegistry::new();
        let first = Arc::new(StreamableHttpTransport::new("dup".into()));
        let second = Arc::new(StreamableHttpTransport::new("dup".into()));

        registry.add("dup".into(), Arc::clone(&first)).await;
        registry.add("dup".into(), Arc::clone(&second)).await;

        let found = registry.get("dup").await.unwrap();
        assert!(Arc::ptr_eq(&found, &second));
        assert_eq!(registry.len().await, 1);
    }
}
