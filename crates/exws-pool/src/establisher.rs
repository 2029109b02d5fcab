//! Connection establishment, renewal, and teardown.
//!
//! Brings one connection record's socket to OPEN and keeps it functioning
//! until intentionally closed: reacts to lifecycle events, schedules the
//! proactive renewal, enqueues reconnection on unexpected close, and drains
//! sockets gracefully before closing them.

use crate::pool::{ConnectionPool, PoolEvent};
use crate::record::ConnectionRecord;
use crate::state::ConnState;
use crate::timer::TimerKind;
use crate::transport::{Socket, SocketEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll cadence while waiting for a draining socket's pending requests.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Hard ceiling after which a draining socket is force-closed.
pub const DRAIN_FORCE_CLOSE_AFTER: Duration = Duration::from_secs(30);

impl ConnectionPool {
    /// Open a socket for `record` against `url` and wire its lifecycle.
    ///
    /// For renewal flows the record's existing socket stays routable until
    /// the replacement reaches OPEN; `renewalPending` covers the whole
    /// drain window.
    pub fn init_connect(&self, url: &str, is_renewal: bool, record: &Arc<ConnectionRecord>) {
        let generation = record.next_generation();
        record.set_url(url);
        if is_renewal {
            record.set_renewal_pending(true);
            info!(conn_id = %record.id(), generation, "Renewing Websocket connection");
        } else {
            record.transition(ConnState::Connecting);
            debug!(conn_id = %record.id(), generation, url, "Opening Websocket connection");
        }

        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let socket = self
            .inner
            .transport
            .open(url, &self.inner.options, events_tx);

        if !is_renewal {
            // Replace any stale socket left by a failed renewal or reconnect.
            if let Some((old, old_generation)) = record.swap_socket(socket.clone(), generation) {
                old.close();
                self.inner.timers.clear(old_generation);
            }
        }

        let pool = self.clone();
        let record = record.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    SocketEvent::Open => {
                        pool.handle_open(&record, socket.clone(), generation, is_renewal);
                    }
                    SocketEvent::Message(raw) => pool.handle_message(&record, &raw),
                    SocketEvent::Ping(payload) => pool.handle_ping(&record, &socket, payload),
                    SocketEvent::Pong(_) => pool.emit(PoolEvent::Pong {
                        conn_id: record.id().to_string(),
                    }),
                    SocketEvent::Error(message) => pool.handle_error(&record, message),
                    SocketEvent::Close { code, reason } => {
                        pool.handle_close(&record, generation, code, reason);
                        break;
                    }
                }
            }
        });
    }

    fn handle_open(
        &self,
        record: &Arc<ConnectionRecord>,
        socket: Arc<dyn Socket>,
        generation: u64,
        is_renewal: bool,
    ) {
        let was_reconnection = record.reconnection_pending();
        record.set_reconnection_pending(false);

        if is_renewal {
            // Swap in the replacement and drain the superseded socket.
            if let Some((old, old_generation)) = record.swap_socket(socket, generation) {
                let pool = self.clone();
                let drain_record = record.clone();
                tokio::spawn(async move {
                    pool.close_connection_gracefully(&drain_record, old, old_generation)
                        .await;
                    drain_record.set_renewal_pending(false);
                    debug!(conn_id = %drain_record.id(), "Connection renewal complete");
                });
            } else {
                record.set_renewal_pending(false);
            }
        } else {
            record.transition(ConnState::Open);
        }

        info!(conn_id = %record.id(), generation, is_renewal, "Websocket connection open");
        self.schedule_renewal(record, generation);
        self.inner
            .handler
            .on_open(self, record, is_renewal || was_reconnection);
        self.emit(PoolEvent::Open {
            conn_id: record.id().to_string(),
        });
    }

    fn schedule_renewal(&self, record: &Arc<ConnectionRecord>, generation: u64) {
        let interval = Duration::from_millis(self.inner.config.renewal_interval_ms);
        let pool = self.clone();
        let record = record.clone();
        self.inner
            .timers
            .schedule(generation, interval, TimerKind::Timeout, move || {
                if record.close_initiated() {
                    return;
                }
                let url = pool
                    .inner
                    .handler
                    .reconnect_url(&pool, &record, &record.url());
                pool.init_connect(&url, true, &record);
            });
    }

    fn handle_message(&self, record: &Arc<ConnectionRecord>, raw: &str) {
        if record.state() == ConnState::Closed {
            warn!(conn_id = %record.id(), "Message received while connection is CLOSED; dropping");
            return;
        }
        self.inner.handler.on_message(self, record, raw);
    }

    fn handle_ping(&self, record: &Arc<ConnectionRecord>, socket: &Arc<dyn Socket>, payload: Vec<u8>) {
        debug!(conn_id = %record.id(), "Received ping; replying with pong");
        if let Err(e) = socket.pong(payload) {
            warn!(conn_id = %record.id(), error = %e, "Failed to send pong");
        }
        self.emit(PoolEvent::Ping {
            conn_id: record.id().to_string(),
        });
    }

    fn handle_error(&self, record: &Arc<ConnectionRecord>, message: String) {
        // On an established socket errors are observable only; reconnection
        // is driven by close. An error before the socket ever opened fails
        // the pending connect.
        warn!(conn_id = %record.id(), error = %message, "Websocket error");
        if record.state() == ConnState::Connecting {
            record.transition(ConnState::Closed);
        }
        self.emit(PoolEvent::Error {
            conn_id: record.id().to_string(),
            message,
        });
    }

    fn handle_close(
        &self,
        record: &Arc<ConnectionRecord>,
        generation: u64,
        code: u16,
        reason: String,
    ) {
        self.emit(PoolEvent::Close {
            conn_id: record.id().to_string(),
            code,
            reason: reason.clone(),
        });
        self.inner.timers.clear(generation);
        record.reject_pending_for_generation(generation, code, &reason);

        if record.close_initiated() {
            debug!(conn_id = %record.id(), code, "Connection closed intentionally");
            record.transition(ConnState::Closed);
            return;
        }

        // A close for a superseded generation means a renewal already opened
        // (or is opening) a replacement; renewal wins over reconnect.
        if generation != record.latest_generation() {
            debug!(
                conn_id = %record.id(),
                generation,
                latest = record.latest_generation(),
                "Close for superseded socket generation; no reconnection"
            );
            return;
        }

        warn!(conn_id = %record.id(), code, reason = %reason, "Websocket connection closed unexpectedly");
        record.transition(ConnState::Closed);
        // A failed renewal degrades to an ordinary reconnection.
        record.set_renewal_pending(false);
        record.set_reconnection_pending(true);

        let pool = self.clone();
        let record = record.clone();
        let delay = Duration::from_millis(self.inner.config.reconnect_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if record.close_initiated() {
                return;
            }
            let url = pool
                .inner
                .handler
                .reconnect_url(&pool, &record, &record.url());
            pool.inner.reconnect.enqueue(&pool, record.clone(), url, false);
        });
    }

    /// Close `socket` once `record` has no pending requests, force-closing
    /// after the drain ceiling. All timers for the socket's generation are
    /// cleared as part of teardown.
    pub(crate) async fn close_connection_gracefully(
        &self,
        record: &Arc<ConnectionRecord>,
        socket: Arc<dyn Socket>,
        generation: u64,
    ) {
        let started = tokio::time::Instant::now();
        while record.pending_request_count() > 0 {
            if started.elapsed() >= DRAIN_FORCE_CLOSE_AFTER {
                warn!(
                    conn_id = %record.id(),
                    pending = record.pending_request_count(),
                    "Force closing connection with pending requests after drain deadline"
                );
                break;
            }
            info!(
                conn_id = %record.id(),
                pending = record.pending_request_count(),
                "Waiting for pending requests before closing connection"
            );
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        record.reject_pending_for_generation(generation, 1001, "connection closing");
        socket.close();
        self.inner.timers.clear(generation);
    }
}
