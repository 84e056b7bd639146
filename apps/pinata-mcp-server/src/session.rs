//! Per-session transport state and the store that owns it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use pinata_mcp::{JsonRpcMessage, JsonRpcResponse, McpConnection};
use tokio::sync::{Mutex, oneshot};

pub type SessionHandle = Arc<SessionTransport>;

/// Fires once when the transport closes.
pub type ClosedSignal = oneshot::Receiver<()>;

/// Protocol state bound to one session id.
///
/// Message handling holds the connection lock for the whole call, so requests
/// on the same session are processed one at a time in arrival order.
pub struct SessionTransport {
    session_id: String,
    conn: Mutex<McpConnection>,
    closer: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    last_activity: std::sync::Mutex<Instant>,
    in_flight: AtomicUsize,
}

impl SessionTransport {
    pub fn new(session_id: impl Into<String>, conn: McpConnection) -> (SessionHandle, ClosedSignal) {
        let (tx, rx) = oneshot::channel();
        let t = Arc::new(Self {
            session_id: session_id.into(),
            conn: Mutex::new(conn),
            closer: std::sync::Mutex::new(Some(tx)),
            last_activity: std::sync::Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
        });
        (t, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        let _busy = InFlight::enter(&self.in_flight);
        self.touch();
        let mut conn = self.conn.lock().await;
        let resp = conn.handle_message(msg).await;
        drop(conn);
        self.touch();
        resp
    }

    /// True while at least one message is queued or being handled.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    pub async fn is_initialized(&self) -> bool {
        self.conn.lock().await.is_initialized()
    }

    /// Signal closure. Returns `true` only for the call that actually fired it.
    pub fn close(&self) -> bool {
        let sender = match self.closer.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            // The receiver may already be gone; closure still counts as fired.
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.closer.lock() {
            Ok(g) => g.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        let last = match self.last_activity.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        };
        last.elapsed()
    }

    fn touch(&self) {
        match self.last_activity.lock() {
            Ok(mut g) => *g = Instant::now(),
            Err(poisoned) => *poisoned.into_inner() = Instant::now(),
        }
    }
}

/// Decrements on drop, so a cancelled or panicking handler still leaves.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// `session_id -> transport` map. Cloning shares the same map.
///
/// The lock is only held for map operations, never while a session handles a
/// message.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner.lock().await.get(session_id).cloned()
    }

    /// Insert or overwrite. An empty id is never registered; returns whether
    /// the entry was stored.
    pub async fn put(&self, session_id: &str, handle: SessionHandle) -> bool {
        if session_id.is_empty() {
            return false;
        }
        self.inner
            .lock()
            .await
            .insert(session_id.to_string(), handle);
        true
    }

    /// Insert unless a live entry already exists. A closed entry whose removal
    /// is still pending counts as absent. Returns the entry now in the store
    /// and whether it is the one passed in.
    pub async fn insert_if_absent(
        &self,
        session_id: &str,
        handle: SessionHandle,
    ) -> (SessionHandle, bool) {
        let mut map = self.inner.lock().await;
        if let Some(existing) = map.get(session_id)
            && !existing.is_closed()
        {
            return (existing.clone(), false);
        }
        map.insert(session_id.to_string(), handle.clone());
        (handle, true)
    }

    /// Idempotent delete.
    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner.lock().await.remove(session_id)
    }

    /// Delete only if the entry is still the given transport instance, so a
    /// late closure of an old transport cannot evict a recreated session.
    pub(crate) async fn remove_instance(
        &self,
        session_id: &str,
        instance: &Weak<SessionTransport>,
    ) -> bool {
        let mut map = self.inner.lock().await;
        let same = map
            .get(session_id)
            .is_some_and(|h| std::ptr::eq(Arc::as_ptr(h), instance.as_ptr()));
        if same {
            map.remove(session_id);
        }
        same
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        self.inner.lock().await.values().cloned().collect()
    }
}
