//! Connection records.
//!
//! A record is the logical, persistent identity of one pool member. Its id
//! is immutable for the slot's lifetime; the physical socket behind it is
//! replaced in place on renewal and reconnection.

use crate::error::WsResult;
use crate::state::ConnState;
use crate::transport::{Socket, SocketReadyState};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::warn;

/// One pending promise-based request awaiting a correlated reply.
pub struct PendingRequest {
    tx: oneshot::Sender<WsResult<Value>>,
    /// Socket generation the request was written on.
    pub generation: u64,
    /// Timer-registry entry for the request timeout.
    pub timer_id: u64,
}

impl PendingRequest {
    pub fn new(tx: oneshot::Sender<WsResult<Value>>, generation: u64, timer_id: u64) -> Self {
        Self {
            tx,
            generation,
            timer_id,
        }
    }

    /// Resolve the waiting caller.
    pub fn resolve(self, value: Value) {
        let _ = self.tx.send(Ok(value));
    }

    /// Reject the waiting caller.
    pub fn reject(self, err: crate::error::WsError) {
        let _ = self.tx.send(Err(err));
    }
}

/// The shared state of one pool slot.
pub struct ConnectionRecord {
    id: String,
    url_path: Option<String>,
    state: watch::Sender<ConnState>,
    /// Current socket and its generation. Stale during a renewal window:
    /// the old socket stays routable until the replacement opens.
    socket: RwLock<Option<(Arc<dyn Socket>, u64)>>,
    /// Highest generation handed out for this record. A close event for an
    /// older generation is superseded and must not trigger reconnection.
    latest_generation: AtomicU64,
    url: RwLock<String>,
    close_initiated: AtomicBool,
    reconnection_pending: AtomicBool,
    renewal_pending: AtomicBool,
    pending_requests: Mutex<HashMap<String, PendingRequest>>,
    pending_subscriptions: Mutex<Vec<String>>,
    session_logon_req: Mutex<Option<Value>>,
    session_logged_on: AtomicBool,
}

impl ConnectionRecord {
    pub fn new(id: Option<String>, url_path: Option<String>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnState::Closed);
        Arc::new(Self {
            id: id.unwrap_or_else(exws_core::generate_id),
            url_path,
            state,
            socket: RwLock::new(None),
            latest_generation: AtomicU64::new(0),
            url: RwLock::new(String::new()),
            close_initiated: AtomicBool::new(false),
            reconnection_pending: AtomicBool::new(false),
            renewal_pending: AtomicBool::new(false),
            pending_requests: Mutex::new(HashMap::new()),
            pending_subscriptions: Mutex::new(Vec::new()),
            session_logon_req: Mutex::new(None),
            session_logged_on: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url_path(&self) -> Option<&str> {
        self.url_path.as_deref()
    }

    // --- state machine ---

    pub fn state(&self) -> ConnState {
        *self.state.borrow()
    }

    /// Observe state changes (used by `connect_pool` to await OPEN).
    pub fn subscribe_state(&self) -> watch::Receiver<ConnState> {
        self.state.subscribe()
    }

    /// Apply a state transition; illegal transitions are logged and dropped.
    pub fn transition(&self, next: ConnState) -> bool {
        let current = self.state();
        if !current.can_transition(next) {
            warn!(
                conn_id = %self.id,
                from = %current,
                to = %next,
                "Illegal connection state transition ignored"
            );
            return false;
        }
        if current != next {
            // send_replace stores the value even when no receiver is
            // subscribed yet; send() would silently drop it.
            self.state.send_replace(next);
        }
        true
    }

    // --- socket ownership ---

    /// Allocate the generation for the next socket opened on this record.
    pub fn next_generation(&self) -> u64 {
        self.latest_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest_generation.load(Ordering::SeqCst)
    }

    /// Install a socket, returning the previous one (stale) if any.
    pub fn swap_socket(
        &self,
        socket: Arc<dyn Socket>,
        generation: u64,
    ) -> Option<(Arc<dyn Socket>, u64)> {
        self.socket.write().replace((socket, generation))
    }

    pub fn socket(&self) -> Option<(Arc<dyn Socket>, u64)> {
        self.socket.read().clone()
    }

    /// Whether the record's current socket is OPEN.
    pub fn socket_open(&self) -> bool {
        self.socket
            .read()
            .as_ref()
            .is_some_and(|(s, _)| s.ready_state() == SocketReadyState::Open)
    }

    pub fn set_url(&self, url: &str) {
        *self.url.write() = url.to_string();
    }

    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    // --- lifecycle flags ---

    pub fn close_initiated(&self) -> bool {
        self.close_initiated.load(Ordering::SeqCst)
    }

    pub fn mark_close_initiated(&self) {
        self.close_initiated.store(true, Ordering::SeqCst);
    }

    pub fn reconnection_pending(&self) -> bool {
        self.reconnection_pending.load(Ordering::SeqCst)
    }

    pub fn set_reconnection_pending(&self, pending: bool) {
        self.reconnection_pending.store(pending, Ordering::SeqCst);
    }

    pub fn renewal_pending(&self) -> bool {
        self.renewal_pending.load(Ordering::SeqCst)
    }

    pub fn set_renewal_pending(&self, pending: bool) {
        self.renewal_pending.store(pending, Ordering::SeqCst);
    }

    /// Selection filter: not shut down, not mid-reconnect, and (unless the
    /// caller accepts non-established slots) backed by an OPEN socket.
    pub fn is_available(&self, allow_non_established: bool) -> bool {
        !self.close_initiated()
            && !self.reconnection_pending()
            && (allow_non_established || self.socket_open())
    }

    // --- pending requests ---

    pub fn insert_pending(&self, id: String, pending: PendingRequest) {
        self.pending_requests.lock().insert(id, pending);
    }

    /// Remove and return the pending entry for `id`.
    ///
    /// The first match consumes the entry; a late reply for the same id
    /// finds nothing.
    pub fn take_pending(&self, id: &str) -> Option<PendingRequest> {
        self.pending_requests.lock().remove(id)
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.lock().len()
    }

    /// Reject every pending entry written on `generation`.
    ///
    /// Called on socket teardown so callers never await a reply the dead
    /// socket can no longer deliver.
    pub fn reject_pending_for_generation(&self, generation: u64, code: u16, reason: &str) {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending_requests.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.generation == generation)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };
        for (id, p) in drained {
            warn!(conn_id = %self.id, request_id = %id, "Rejecting pending request on closed socket");
            p.reject(crate::error::WsError::ConnectionClosed {
                code,
                reason: reason.to_string(),
            });
        }
    }

    // --- pending subscriptions (streaming) ---

    pub fn queue_subscription(&self, stream: String) {
        self.pending_subscriptions.lock().push(stream);
    }

    /// Flush and clear queued subscriptions.
    pub fn drain_subscriptions(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending_subscriptions.lock())
    }

    pub fn pending_subscription_count(&self) -> usize {
        self.pending_subscriptions.lock().len()
    }

    // --- trading-session state ---

    pub fn session_logged_on(&self) -> bool {
        self.session_logged_on.load(Ordering::SeqCst)
    }

    pub fn set_session_logged_on(&self, logged_on: bool) {
        self.session_logged_on.store(logged_on, Ordering::SeqCst);
    }

    pub fn set_session_logon_req(&self, req: Option<Value>) {
        *self.session_logon_req.lock() = req;
    }

    pub fn session_logon_req(&self) -> Option<Value> {
        self.session_logon_req.lock().clone()
    }

    /// Clear session state (on pool disconnect).
    pub fn clear_session(&self) {
        self.set_session_logged_on(false);
        self.set_session_logon_req(None);
    }
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("url_path", &self.url_path)
            .field("state", &self.state())
            .field("close_initiated", &self.close_initiated())
            .field("reconnection_pending", &self.reconnection_pending())
            .field("renewal_pending", &self.renewal_pending())
            .field("pending_requests", &self.pending_request_count())
            .finish()
    }
}
