//! Pluggable message handling.
//!
//! The trading-session and streaming layers replace the pool's message
//! handler to route inbound frames, flush queued work on open, and rebuild
//! subscription URLs for reconnection.

use crate::pool::ConnectionPool;
use crate::record::ConnectionRecord;
use std::sync::Arc;

/// Layer hooks invoked by the connection establisher.
///
/// Methods receive the owning pool so implementations can send on it
/// without holding a back-reference.
pub trait MessageHandler: Send + Sync {
    /// Inbound frame on `connection`.
    fn on_message(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, raw: &str);

    /// Socket reached OPEN. `reopened` is true for renewal and reconnection
    /// flows; first-time opens pass false.
    fn on_open(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, reopened: bool) {
        let _ = (pool, connection, reopened);
    }

    /// URL to open a replacement socket against, reconstructed so state
    /// (for example stream subscriptions) survives the socket swap.
    fn reconnect_url(
        &self,
        pool: &ConnectionPool,
        connection: &Arc<ConnectionRecord>,
        url: &str,
    ) -> String {
        let _ = (pool, connection);
        url.to_string()
    }
}

/// Handler that drops every frame. Used by bare pools and tests.
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn on_message(&self, _pool: &ConnectionPool, _connection: &Arc<ConnectionRecord>, _raw: &str) {}
}
