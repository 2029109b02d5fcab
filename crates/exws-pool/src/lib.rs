//! WebSocket connection-pool lifecycle manager.
//!
//! Maintains one or more connections to an exchange endpoint with:
//! - Single and round-robin pool operating modes
//! - Proactive socket renewal before the server's 24h force-close
//! - Throttled, serialized reconnection after unexpected closes
//! - Request/response correlation by id with per-request timeouts
//! - Graceful drain of in-flight requests before sockets close

pub mod config;
pub mod error;
pub mod establisher;
pub mod handler;
pub mod mock;
pub mod pool;
pub mod record;
mod reconnect;
mod send;
pub mod state;
pub mod timer;
pub mod transport;
pub mod tungstenite;

pub use config::PoolConfig;
pub use error::{WsError, WsResult};
pub use establisher::{DRAIN_FORCE_CLOSE_AFTER, DRAIN_POLL_INTERVAL};
pub use handler::{MessageHandler, NoopHandler};
pub use pool::{ConnectionPool, PoolEvent};
pub use record::{ConnectionRecord, PendingRequest};
pub use state::ConnState;
pub use timer::{TimerKind, TimerRegistry};
pub use transport::{Socket, SocketEvent, SocketReadyState, Transport, TransportOptions};
pub use tungstenite::TungsteniteTransport;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
