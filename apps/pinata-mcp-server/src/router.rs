//! Session resolution for the streamable HTTP transport.
//!
//! Precedence, first match wins:
//! 1. known session id            -> reuse the stored transport
//! 2. `initialize` with unknown id -> forced recovery under that id
//!    `initialize` without an id   -> fresh session, registered once the
//!    handshake has succeeded
//! 3. unknown id, anything else    -> `SessionNotFound`
//! 4. no id, anything else         -> `SessionRequired`
//!
//! The router never looks at which tool method is called; that belongs to the
//! session's `McpConnection`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use pinata_mcp::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcResponse, McpConnection, McpHandler,
    McpServerConfig, McpServerInfo, error_codes,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::{SessionHandle, SessionStore, SessionTransport};

/// Runs after a closed session has been removed from the store, e.g. to drop a
/// session-affinity entry held elsewhere.
pub type CloseHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Bad Request: session required or send initialize")]
    SessionRequired,
    #[error("Session not found: {session_id}; resend initialize")]
    SessionNotFound { session_id: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouteError {
    pub fn code(&self) -> i64 {
        match self {
            Self::SessionRequired => error_codes::SESSION_REQUIRED,
            Self::SessionNotFound { .. } => error_codes::SESSION_NOT_FOUND,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::SessionRequired => "session_required",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Internal(_) => "internal",
        }
    }

    pub fn to_jsonrpc(&self, id: JsonRpcId) -> JsonRpcResponse {
        JsonRpcResponse::err(id, JsonRpcError::new(self.code(), self.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPath {
    Reused,
    Recovered,
    Fresh,
}

pub enum Route {
    Session {
        handle: SessionHandle,
        path: SessionPath,
    },
    /// Nothing to deliver; acknowledge and stop.
    Acknowledge,
}

#[derive(Debug)]
pub struct Routed {
    /// Set when the session is registered and the client should keep using it.
    pub session_id: Option<String>,
    pub response: Option<JsonRpcResponse>,
}

#[derive(Clone)]
pub struct SessionRouter {
    store: SessionStore,
    cfg: McpServerConfig,
    handler: Arc<dyn McpHandler>,
    on_close: Option<CloseHook>,
}

impl SessionRouter {
    pub fn new(store: SessionStore, cfg: McpServerConfig, handler: Arc<dyn McpHandler>) -> Self {
        Self {
            store,
            cfg,
            handler,
            on_close: None,
        }
    }

    pub fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }

    pub fn server_info(&self) -> &McpServerInfo {
        &self.cfg.server_info
    }

    pub async fn session_count(&self) -> usize {
        self.store.len().await
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.live_session(session_id).await.is_some()
    }

    async fn live_session(&self, session_id: &str) -> Option<SessionHandle> {
        self.store.get(session_id).await.filter(|h| !h.is_closed())
    }

    /// Decide where a message goes. Mutates the store only on forced recovery.
    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        msg: &JsonRpcMessage,
    ) -> Result<Route, RouteError> {
        let session_id = session_id.map(str::trim).filter(|s| !s.is_empty());

        if let Some(sid) = session_id
            && let Some(handle) = self.live_session(sid).await
        {
            return Ok(Route::Session {
                handle,
                path: SessionPath::Reused,
            });
        }

        if msg.is_initialize_request() {
            let Some(sid) = session_id else {
                let handle = self.open_transport(Uuid::new_v4().to_string());
                return Ok(Route::Session {
                    handle,
                    path: SessionPath::Fresh,
                });
            };

            let candidate = self.open_transport(sid.to_string());
            let (handle, inserted) = self.store.insert_if_absent(sid, candidate).await;
            if !inserted {
                // Lost a race with a concurrent recovery of the same id.
                return Ok(Route::Session {
                    handle,
                    path: SessionPath::Reused,
                });
            }
            return Ok(Route::Session {
                handle,
                path: SessionPath::Recovered,
            });
        }

        if let JsonRpcMessage::Notification(n) = msg
            && n.method == "notifications/initialized"
        {
            return Ok(Route::Acknowledge);
        }

        let err = match session_id {
            Some(sid) => RouteError::SessionNotFound {
                session_id: sid.to_string(),
            },
            None => RouteError::SessionRequired,
        };
        warn!(reason = err.reason(), method = ?msg.method(), "rejecting request");
        pinata_otel::metrics().record_rejection(err.reason());
        Err(err)
    }

    /// Hand a message to a resolved session. Fresh sessions are registered
    /// here, after their transport reports a completed handshake. A recovered
    /// entry was claimed in `resolve` and is withdrawn again if its handshake
    /// failed, so both paths only leave initialized sessions behind.
    pub async fn deliver(
        &self,
        handle: &SessionHandle,
        path: SessionPath,
        msg: JsonRpcMessage,
    ) -> Routed {
        let response = handle.handle_message(msg).await;

        let registered = match path {
            SessionPath::Reused => true,
            SessionPath::Recovered => {
                if handle.is_initialized().await {
                    info!(
                        session_id = %handle.session_id(),
                        "recreated unknown session from initialize"
                    );
                    pinata_otel::metrics().record_session_opened("recovered");
                    true
                } else {
                    self.store
                        .remove_instance(handle.session_id(), &Arc::downgrade(handle))
                        .await;
                    warn!(
                        session_id = %handle.session_id(),
                        "recovery handshake failed; entry withdrawn"
                    );
                    false
                }
            }
            SessionPath::Fresh => {
                if handle.is_initialized().await
                    && self.store.put(handle.session_id(), handle.clone()).await
                {
                    info!(session_id = %handle.session_id(), "session initialized");
                    pinata_otel::metrics().record_session_opened("fresh");
                    true
                } else {
                    false
                }
            }
        };

        Routed {
            session_id: registered.then(|| handle.session_id().to_string()),
            response,
        }
    }

    /// `resolve` followed by `deliver`.
    pub async fn route(
        &self,
        session_id: Option<&str>,
        msg: JsonRpcMessage,
    ) -> Result<Routed, RouteError> {
        match self.resolve(session_id, &msg).await? {
            Route::Session { handle, path } => Ok(self.deliver(&handle, path, msg).await),
            Route::Acknowledge => Ok(Routed {
                session_id: None,
                response: None,
            }),
        }
    }

    /// Client-initiated teardown. Store removal follows from the closure signal.
    pub async fn close_session(&self, session_id: &str) -> Result<(), RouteError> {
        let Some(handle) = self.live_session(session_id).await else {
            return Err(RouteError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        };
        handle.close();
        Ok(())
    }

    /// Close sessions with no message activity for at least `max_idle`.
    /// Sessions with a message in flight are left alone.
    pub async fn close_idle(&self, max_idle: Duration) -> usize {
        let mut closed = 0;
        for handle in self.store.snapshot().await {
            if !handle.is_busy() && handle.idle_for() >= max_idle && handle.close() {
                info!(session_id = %handle.session_id(), "closing idle session");
                closed += 1;
            }
        }
        closed
    }

    /// Server-initiated teardown of every live session.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for handle in self.store.snapshot().await {
            if handle.close() {
                closed += 1;
            }
        }
        closed
    }

    /// Create a transport and subscribe to its closure exactly once.
    fn open_transport(&self, session_id: String) -> SessionHandle {
        let conn = McpConnection::new(self.cfg.clone(), self.handler.clone());
        let (handle, closed) = SessionTransport::new(session_id.clone(), conn);
        let instance = Arc::downgrade(&handle);
        let store = self.store.clone();
        let hook = self.on_close.clone();

        tokio::spawn(async move {
            // Sender dropped without close(): the transport was never registered.
            if closed.await.is_err() {
                return;
            }

            let removed = store.remove_instance(&session_id, &instance).await;
            if removed {
                pinata_otel::metrics().record_session_closed();
            }
            info!(session_id = %session_id, removed, "session closed");

            if let Some(hook) = hook
                && std::panic::catch_unwind(AssertUnwindSafe(|| hook(&session_id))).is_err()
            {
                warn!(session_id = %session_id, "session close hook panicked");
            }
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pinata_mcp::{JsonRpcNotification, JsonRpcRequest};

    use super::*;
    use crate::test_support::{handler_stub, wait_until};

    fn router(store: &SessionStore) -> SessionRouter {
        SessionRouter::new(
            store.clone(),
            McpServerConfig::default_for_binary("test", "0.0.0"),
            handler_stub(),
        )
    }

    fn request(id: i64, method: &str, params: Option<serde_json::Value>) -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new(JsonRpcId::Number(id.into()), method, params))
    }

    fn initialize(id: i64) -> JsonRpcMessage {
        request(
            id,
            "initialize",
            Some(serde_json::json!({"protocolVersion": "2025-06-18"})),
        )
    }

    #[tokio::test]
    async fn fresh_initialize_registers_one_session() {
        let store = SessionStore::new();
        let r = router(&store);

        let routed = r.route(None, initialize(1)).await.expect("routed");
        let sid = routed.session_id.expect("session id");
        assert!(routed.response.expect("response").error.is_none());
        assert_eq!(store.len().await, 1);
        assert!(store.get(&sid).await.is_some());

        let routed = r
            .route(Some(&sid), request(2, "tools/list", None))
            .await
            .expect("routed");
        assert_eq!(routed.session_id.as_deref(), Some(sid.as_str()));
        let resp = routed.response.expect("response");
        assert!(resp.error.is_none(), "{resp:?}");
        assert!(resp.result.expect("result")["tools"].is_array());
    }

    #[tokio::test]
    async fn failed_fresh_initialize_is_not_registered() {
        let store = SessionStore::new();
        let r = router(&store);

        let routed = r
            .route(None, request(1, "initialize", Some(serde_json::json!([1, 2]))))
            .await
            .expect("routed");
        assert!(routed.session_id.is_none());
        assert!(routed.response.expect("response").error.is_some());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found_for_any_method() {
        let store = SessionStore::new();
        let r = router(&store);

        for method in ["tools/list", "tools/call", "ping", "whatever"] {
            let err = r
                .route(Some("ghost"), request(2, method, None))
                .await
                .expect_err("must reject");
            assert_eq!(err.code(), -32001, "{method}");
            assert!(matches!(err, RouteError::SessionNotFound { ref session_id } if session_id == "ghost"));
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn missing_session_is_required_for_non_initialize() {
        let store = SessionStore::new();
        let r = router(&store);

        for method in ["tools/list", "tools/call", "ping"] {
            let err = r
                .route(None, request(3, method, None))
                .await
                .expect_err("must reject");
            assert_eq!(err.code(), -32000, "{method}");
        }

        // A blank header is the same as no header.
        let err = r
            .route(Some("  "), request(4, "tools/list", None))
            .await
            .expect_err("must reject");
        assert!(matches!(err, RouteError::SessionRequired));
    }

    #[tokio::test]
    async fn initialized_notification_is_acknowledged_without_session() {
        let store = SessionStore::new();
        let r = router(&store);
        let msg = JsonRpcMessage::Notification(JsonRpcNotification::new(
            "notifications/initialized",
            None,
        ));
        let routed = r.route(None, msg).await.expect("ack");
        assert!(routed.response.is_none());
        assert!(routed.session_id.is_none());

        let other = JsonRpcMessage::Notification(JsonRpcNotification::new(
            "notifications/cancelled",
            None,
        ));
        assert!(r.route(None, other).await.is_err());
    }

    #[tokio::test]
    async fn forced_recovery_uses_client_id_and_is_idempotent() {
        let store = SessionStore::new();
        let r = router(&store);

        let routed = r.route(Some("old-id"), initialize(1)).await.expect("routed");
        assert_eq!(routed.session_id.as_deref(), Some("old-id"));
        assert!(routed.response.expect("response").error.is_none());
        let first = store.get("old-id").await.expect("registered");

        let Route::Session { handle, path } =
            r.resolve(Some("old-id"), &initialize(2)).await.expect("resolved")
        else {
            panic!("expected a session route");
        };
        assert_eq!(path, SessionPath::Reused);
        assert!(Arc::ptr_eq(&handle, &first));
        assert_eq!(store.len().await, 1);

        let routed = r
            .route(Some("old-id"), request(3, "tools/list", None))
            .await
            .expect("routed");
        assert!(routed.response.expect("response").error.is_none());
    }

    #[tokio::test]
    async fn failed_recovery_handshake_is_withdrawn() {
        let store = SessionStore::new();
        let r = router(&store);

        let routed = r
            .route(
                Some("old-id"),
                request(1, "initialize", Some(serde_json::json!({"protocolVersion": 5}))),
            )
            .await
            .expect("routed");
        assert!(routed.session_id.is_none());
        assert_eq!(
            routed.response.expect("response").error.map(|e| e.code),
            Some(error_codes::INVALID_PARAMS)
        );
        assert!(store.is_empty().await);

        let err = r
            .route(Some("old-id"), request(2, "tools/list", None))
            .await
            .expect_err("nothing registered");
        assert_eq!(err.code(), -32001);

        // A well-formed retry recovers normally.
        let routed = r.route(Some("old-id"), initialize(3)).await.expect("routed");
        assert_eq!(routed.session_id.as_deref(), Some("old-id"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_recoveries_converge_on_one_entry() {
        let store = SessionStore::new();
        let r = router(&store);

        let (init1, init2) = (initialize(1), initialize(2));
        let (a, b) = tokio::join!(
            r.resolve(Some("same"), &init1),
            r.resolve(Some("same"), &init2),
        );
        let (Ok(Route::Session { handle: ha, .. }), Ok(Route::Session { handle: hb, .. })) = (a, b)
        else {
            panic!("expected session routes");
        };
        assert!(Arc::ptr_eq(&ha, &hb));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn close_removes_entry_once_and_runs_hook_once() {
        let store = SessionStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let r = router(&store).with_close_hook(Arc::new(move |_sid: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let sid = r
            .route(None, initialize(1))
            .await
            .expect("routed")
            .session_id
            .expect("sid");

        r.close_session(&sid).await.expect("close");
        // Second close: the session is already closed, so it reads as unknown.
        assert!(matches!(
            r.close_session(&sid).await,
            Err(RouteError::SessionNotFound { .. })
        ));

        assert!(!r.has_session(&sid).await);
        wait_until(|| {
            let store = store.clone();
            async move { store.is_empty().await }
        })
        .await;
        wait_until(|| {
            let calls = calls.clone();
            async move { calls.load(Ordering::SeqCst) == 1 }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = r
            .route(Some(&sid), request(2, "tools/list", None))
            .await
            .expect_err("closed session is gone");
        assert_eq!(err.code(), -32001);
    }

    #[tokio::test]
    async fn panicking_close_hook_does_not_block_removal() {
        let store = SessionStore::new();
        let r = router(&store).with_close_hook(Arc::new(|_sid: &str| panic!("hook failure")));

        let sid = r
            .route(Some("doomed"), initialize(1))
            .await
            .expect("routed")
            .session_id
            .expect("sid");
        r.close_session(&sid).await.expect("close");
        wait_until(|| {
            let store = store.clone();
            async move { store.is_empty().await }
        })
        .await;
    }

    #[tokio::test]
    async fn late_close_of_old_transport_keeps_recreated_session() {
        let store = SessionStore::new();
        let r = router(&store);

        r.route(Some("sid"), initialize(1)).await.expect("routed");
        let old = store.get("sid").await.expect("old");
        old.close();
        // Recreate before the old closure has necessarily been processed.
        r.route(Some("sid"), initialize(2)).await.expect("routed");
        let new = store.get("sid").await.expect("new");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let still = store.get("sid").await.expect("entry survives");
        assert!(Arc::ptr_eq(&still, &new));
        assert!(!still.is_closed());
    }

    #[tokio::test]
    async fn idle_sweep_and_close_all() {
        let store = SessionStore::new();
        let r = router(&store);

        r.route(Some("a"), initialize(1)).await.expect("routed");
        r.route(Some("b"), initialize(1)).await.expect("routed");

        assert_eq!(r.close_idle(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(r.close_idle(Duration::from_millis(5)).await, 2);
        wait_until(|| {
            let store = store.clone();
            async move { store.is_empty().await }
        })
        .await;

        r.route(Some("c"), initialize(1)).await.expect("routed");
        assert_eq!(r.close_all().await, 1);
        assert_eq!(r.close_all().await, 0);
        wait_until(|| {
            let store = store.clone();
            async move { store.is_empty().await }
        })
        .await;
    }
}
