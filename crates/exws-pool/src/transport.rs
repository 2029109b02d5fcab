//! Transport abstraction.
//!
//! The pool talks to sockets through the `Transport`/`Socket` trait pair so
//! tests can substitute a scripted transport. `Transport::open` returns a
//! handle immediately; the socket reports its lifecycle through the event
//! channel it was given.

use crate::error::{WsError, WsResult};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Physical readiness of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle events a socket reports to its owning connection record.
#[derive(Debug)]
pub enum SocketEvent {
    Open,
    Message(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Error(String),
    Close { code: u16, reason: String },
}

/// Transport-level options applied when opening a socket.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Request permessage-deflate compression.
    pub compression: bool,
    /// Proxy URL for outbound connections.
    pub proxy: Option<String>,
}

/// Handle to one physical socket.
///
/// All methods are non-blocking: `send`, `ping` and `pong` enqueue a frame
/// for the socket's writer task, `close` begins teardown.
pub trait Socket: Send + Sync {
    fn ready_state(&self) -> SocketReadyState;
    fn send(&self, data: String) -> WsResult<()>;
    fn ping(&self) -> WsResult<()>;
    fn pong(&self, payload: Vec<u8>) -> WsResult<()>;
    fn close(&self);
}

/// Opens physical sockets.
pub trait Transport: Send + Sync {
    /// Begin opening a socket to `url`.
    ///
    /// Returns the handle immediately with `ready_state() == Connecting`;
    /// `SocketEvent::Open` (or `Error`/`Close`) arrives on `events` once the
    /// outcome is known.
    fn open(
        &self,
        url: &str,
        options: &TransportOptions,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Arc<dyn Socket>;
}

pub(crate) fn send_closed_err() -> WsError {
    WsError::SendFailed("socket is closed".to_string())
}
