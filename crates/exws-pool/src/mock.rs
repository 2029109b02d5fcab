//! Scripted transport for tests.
//!
//! `MockTransport` records every socket it opens and exposes server-side
//! controls so tests can script opens, inbound frames, pings and closes
//! without a network.

use crate::transport::{Socket, SocketEvent, SocketReadyState, Transport, TransportOptions};
use crate::error::WsResult;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One scripted socket.
pub struct MockSocket {
    url: String,
    state: RwLock<SocketReadyState>,
    events: mpsc::UnboundedSender<SocketEvent>,
    sent: Mutex<Vec<String>>,
    pings: AtomicUsize,
    pongs: AtomicUsize,
}

impl MockSocket {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Frames written by the client, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn pong_count(&self) -> usize {
        self.pongs.load(Ordering::SeqCst)
    }

    // --- server-side controls ---

    /// Transition to OPEN and report it.
    pub fn open_now(&self) {
        *self.state.write() = SocketReadyState::Open;
        let _ = self.events.send(SocketEvent::Open);
    }

    /// Fail the connection attempt: error then close without ever opening.
    pub fn fail_connect(&self, reason: &str) {
        *self.state.write() = SocketReadyState::Closed;
        let _ = self.events.send(SocketEvent::Error(reason.to_string()));
        let _ = self.events.send(SocketEvent::Close {
            code: 1006,
            reason: reason.to_string(),
        });
    }

    /// Deliver an error without a following close frame.
    pub fn server_error(&self, reason: &str) {
        let _ = self.events.send(SocketEvent::Error(reason.to_string()));
    }

    /// Deliver a text frame from the server.
    pub fn server_message(&self, raw: &str) {
        let _ = self.events.send(SocketEvent::Message(raw.to_string()));
    }

    /// Deliver a ping frame from the server.
    pub fn server_ping(&self, payload: &[u8]) {
        let _ = self.events.send(SocketEvent::Ping(payload.to_vec()));
    }

    /// Close the connection from the server side.
    pub fn server_close(&self, code: u16, reason: &str) {
        *self.state.write() = SocketReadyState::Closed;
        let _ = self.events.send(SocketEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

impl Socket for MockSocket {
    fn ready_state(&self) -> SocketReadyState {
        *self.state.read()
    }

    fn send(&self, data: String) -> WsResult<()> {
        if self.ready_state() == SocketReadyState::Closed {
            return Err(crate::transport::send_closed_err());
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn ping(&self) -> WsResult<()> {
        if self.ready_state() == SocketReadyState::Closed {
            return Err(crate::transport::send_closed_err());
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pong(&self, _payload: Vec<u8>) -> WsResult<()> {
        if self.ready_state() == SocketReadyState::Closed {
            return Err(crate::transport::send_closed_err());
        }
        self.pongs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.write();
        if *state == SocketReadyState::Closed {
            return;
        }
        *state = SocketReadyState::Closed;
        drop(state);
        let _ = self.events.send(SocketEvent::Close {
            code: 1000,
            reason: "normal closure".to_string(),
        });
    }
}

/// Transport that hands out `MockSocket`s.
pub struct MockTransport {
    auto_open: bool,
    sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockTransport {
    /// `auto_open` sockets report OPEN immediately; otherwise tests drive
    /// `open_now`/`fail_connect` themselves.
    pub fn new(auto_open: bool) -> Self {
        Self {
            auto_open,
            sockets: Mutex::new(Vec::new()),
        }
    }

    /// Every socket opened so far, in open order.
    pub fn sockets(&self) -> Vec<Arc<MockSocket>> {
        self.sockets.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// The most recently opened socket.
    pub fn last_socket(&self) -> Option<Arc<MockSocket>> {
        self.sockets.lock().last().cloned()
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        url: &str,
        _options: &TransportOptions,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Arc<dyn Socket> {
        let socket = Arc::new(MockSocket {
            url: url.to_string(),
            state: RwLock::new(SocketReadyState::Connecting),
            events,
            sent: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            pongs: AtomicUsize::new(0),
        });
        self.sockets.lock().push(socket.clone());
        if self.auto_open {
            socket.open_now();
        }
        socket
    }
}
