//! Connection pool coordinator.
//!
//! Owns the ordered set of connection records, answers "which connection
//! should handle this unit of work", and drives pool-wide operations
//! (connect, disconnect, ping).

use crate::config::PoolConfig;
use crate::error::{WsError, WsResult};
use crate::handler::MessageHandler;
use crate::reconnect::ReconnectQueue;
use crate::record::ConnectionRecord;
use crate::state::ConnState;
use crate::timer::TimerRegistry;
use crate::transport::{Transport, TransportOptions};
use exws_core::WsMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Pool-level lifecycle events.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Open { conn_id: String },
    Ping { conn_id: String },
    Pong { conn_id: String },
    Error { conn_id: String, message: String },
    Close { conn_id: String, code: u16, reason: String },
}

/// Round-robin cursors are scoped per (mode, url-path) so different paths
/// rotate independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RoundRobinKey {
    mode: WsMode,
    url_path: Option<String>,
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) options: TransportOptions,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) timers: Arc<TimerRegistry>,
    pub(crate) reconnect: ReconnectQueue,
    connections: Vec<Arc<ConnectionRecord>>,
    rr_cursors: Mutex<HashMap<RoundRobinKey, usize>>,
    events_tx: broadcast::Sender<PoolEvent>,
}

/// The connection-pool lifecycle manager.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    pub(crate) inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self::with_connections(config, transport, handler, Vec::new())
    }

    /// Build a pool around existing records.
    ///
    /// A supplied pool is never shrunk, only grown to the configured
    /// minimum, partitioning new records across url-paths in contiguous
    /// blocks.
    pub fn with_connections(
        config: PoolConfig,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MessageHandler>,
        existing: Vec<Arc<ConnectionRecord>>,
    ) -> Self {
        let mut connections = existing;
        let per_path = config.connections_per_path();
        let paths: Vec<Option<String>> = if config.url_paths.is_empty() {
            vec![None]
        } else {
            config.url_paths.iter().cloned().map(Some).collect()
        };
        let target = per_path * paths.len();
        while connections.len() < target {
            let path = paths[connections.len() / per_path].clone();
            connections.push(ConnectionRecord::new(None, path));
        }

        let (events_tx, _) = broadcast::channel(64);
        let options = config.transport_options();
        let reconnect = ReconnectQueue::new(config.reconnect_throttle_ms);
        Self {
            inner: Arc::new(PoolInner {
                config,
                options,
                transport,
                handler,
                timers: Arc::new(TimerRegistry::new()),
                reconnect,
                connections,
                rr_cursors: Mutex::new(HashMap::new()),
                events_tx,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Snapshot of every record, in pool order.
    pub fn connections(&self) -> Vec<Arc<ConnectionRecord>> {
        self.inner.connections.clone()
    }

    pub fn connection_by_id(&self, id: &str) -> Option<Arc<ConnectionRecord>> {
        self.inner.connections.iter().find(|c| c.id() == id).cloned()
    }

    /// Subscribe to pool-level lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// Records eligible to carry work.
    ///
    /// In `single` mode with no url-path filter this is exactly the first
    /// record, even before it has opened, preserving single-connection
    /// semantics. Otherwise the pool is filtered to healthy records, further
    /// narrowed by `url_path` when given.
    pub fn get_available_connections(
        &self,
        allow_non_established: bool,
        url_path: Option<&str>,
    ) -> Vec<Arc<ConnectionRecord>> {
        if self.inner.config.mode == WsMode::Single && url_path.is_none() {
            return self.inner.connections.first().cloned().into_iter().collect();
        }
        self.inner
            .connections
            .iter()
            .filter(|c| c.is_available(allow_non_established))
            .filter(|c| url_path.is_none() || c.url_path() == url_path)
            .cloned()
            .collect()
    }

    /// Select one connection by per-path round-robin.
    pub fn get_connection(
        &self,
        allow_non_established: bool,
        url_path: Option<&str>,
    ) -> WsResult<Arc<ConnectionRecord>> {
        let available = self.get_available_connections(allow_non_established, url_path);
        if available.is_empty() {
            return Err(WsError::NoConnectionAvailable);
        }
        let key = RoundRobinKey {
            mode: self.inner.config.mode,
            url_path: url_path.map(str::to_string),
        };
        let mut cursors = self.inner.rr_cursors.lock();
        let cursor = cursors.entry(key).or_insert(0);
        let index = *cursor % available.len();
        *cursor = cursor.wrapping_add(1);
        Ok(available[index].clone())
    }

    /// Open every record in `subset` (default: the whole pool) against `url`
    /// concurrently. Resolves once all have opened; rejects on the first
    /// error or unexpected close among them.
    pub async fn connect_pool(
        &self,
        url: &str,
        subset: Option<Vec<Arc<ConnectionRecord>>>,
    ) -> WsResult<()> {
        let targets = subset.unwrap_or_else(|| self.connections());
        for record in &targets {
            self.init_connect(url, false, record);
        }
        futures_util::future::try_join_all(targets.iter().map(|r| Self::await_open(r.clone())))
            .await?;
        info!(count = targets.len(), url, "Websocket connections established");
        Ok(())
    }

    async fn await_open(record: Arc<ConnectionRecord>) -> WsResult<()> {
        let mut rx = record.subscribe_state();
        loop {
            match *rx.borrow_and_update() {
                ConnState::Open => return Ok(()),
                ConnState::Closed => {
                    return Err(WsError::ConnectionFailed(format!(
                        "connection {} closed before opening",
                        record.id()
                    )))
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(WsError::ConnectionFailed(
                    "connection state channel dropped".to_string(),
                ));
            }
        }
    }

    /// Whether the given connection (or any pool member) is live.
    pub fn is_connected(&self, connection: Option<&Arc<ConnectionRecord>>) -> bool {
        let live = |c: &Arc<ConnectionRecord>| {
            c.socket_open() && !c.reconnection_pending() && !c.close_initiated()
        };
        match connection {
            Some(c) => live(c),
            None => self.inner.connections.iter().any(live),
        }
    }

    /// Gracefully shut the whole pool down.
    ///
    /// Marks every record `closeInitiated`, clears trading-session state,
    /// then drains and closes each socket concurrently.
    pub async fn disconnect(&self) {
        if !self.is_connected(None) {
            warn!("No Websocket connection to disconnect");
            return;
        }
        let connections = self.connections();
        for record in &connections {
            record.mark_close_initiated();
            record.clear_session();
            if record.state() != ConnState::Closed {
                record.transition(ConnState::Draining);
            }
        }
        futures_util::future::join_all(connections.iter().map(|record| {
            let pool = self.clone();
            let record = record.clone();
            async move {
                if let Some((socket, generation)) = record.socket() {
                    pool.close_connection_gracefully(&record, socket, generation)
                        .await;
                }
                record.transition(ConnState::Closed);
            }
        }))
        .await;
        info!("All Websocket connections closed");
    }

    /// Send a protocol ping on every ready connection.
    pub fn ping_server(&self) {
        if !self.is_connected(None) {
            warn!("Unable to ping server since there is no Websocket connection");
            return;
        }
        for record in &self.inner.connections {
            if !record.is_available(false) {
                continue;
            }
            if let Some((socket, _)) = record.socket() {
                if let Err(e) = socket.ping() {
                    warn!(conn_id = %record.id(), error = %e, "Failed to ping server");
                }
            }
        }
    }
}
