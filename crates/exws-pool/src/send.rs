//! Outbound sending and request/response correlation.
//!
//! Two send paths: fire-and-forget text frames, and promise-based requests
//! correlated by id with a per-request timeout. Replies are matched back to
//! their waiting caller exactly once.

use crate::error::{WsError, WsResult};
use crate::pool::ConnectionPool;
use crate::record::{ConnectionRecord, PendingRequest};
use crate::timer::TimerKind;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

impl ConnectionPool {
    /// Fire-and-forget send. Routes through round-robin selection when no
    /// connection is given.
    pub fn send_text(
        &self,
        payload: &str,
        connection: Option<Arc<ConnectionRecord>>,
    ) -> WsResult<()> {
        let record = match connection {
            Some(c) => c,
            None => self.get_connection(false, None)?,
        };
        let Some((socket, _)) = record.socket() else {
            return Err(WsError::ConnectionUnavailable);
        };
        if !record.socket_open() {
            return Err(WsError::ConnectionUnavailable);
        }
        socket.send(payload.to_string())
    }

    /// Promise-based send: writes `payload`, registers `id` as pending, and
    /// resolves when a reply carrying the same id arrives or the timeout
    /// fires.
    pub async fn send_request(
        &self,
        payload: &str,
        id: &str,
        timeout: Option<Duration>,
        connection: Option<Arc<ConnectionRecord>>,
    ) -> WsResult<Value> {
        if id.is_empty() {
            return Err(WsError::MissingRequestId);
        }
        let record = match connection {
            Some(c) => c,
            None => self.get_connection(false, None)?,
        };
        let Some((socket, generation)) = record.socket() else {
            return Err(WsError::ConnectionUnavailable);
        };
        if !record.socket_open() {
            return Err(WsError::ConnectionUnavailable);
        }

        let timeout =
            timeout.unwrap_or_else(|| Duration::from_millis(self.inner.config.request_timeout_ms));
        let (tx, rx) = oneshot::channel();

        let timer_record = record.clone();
        let timer_id = {
            let id = id.to_string();
            self.inner
                .timers
                .schedule(generation, timeout, TimerKind::Timeout, move || {
                    if let Some(pending) = timer_record.take_pending(&id) {
                        debug!(request_id = %id, "Request timed out");
                        pending.reject(WsError::RequestTimeout(id.clone()));
                    }
                })
        };
        record.insert_pending(
            id.to_string(),
            PendingRequest::new(tx, generation, timer_id),
        );

        if let Err(e) = socket.send(payload.to_string()) {
            if let Some(pending) = record.take_pending(id) {
                self.inner.timers.cancel(generation, pending.timer_id);
            }
            return Err(e);
        }

        rx.await.map_err(|_| WsError::ConnectionClosed {
            code: 1006,
            reason: "connection dropped before reply".to_string(),
        })?
    }

    /// Deliver a correlated reply (or failure) to the caller waiting on `id`.
    ///
    /// Returns false when no pending entry matches, which covers both unknown
    /// ids and replies arriving after the request timed out.
    pub fn complete_request(
        &self,
        record: &Arc<ConnectionRecord>,
        id: &str,
        result: WsResult<Value>,
    ) -> bool {
        let Some(pending) = record.take_pending(id) else {
            warn!(conn_id = %record.id(), request_id = %id, "Reply for unknown or timed-out request id");
            return false;
        };
        self.inner.timers.cancel(pending.generation, pending.timer_id);
        match result {
            Ok(value) => pending.resolve(value),
            Err(e) => pending.reject(e),
        }
        true
    }
}
