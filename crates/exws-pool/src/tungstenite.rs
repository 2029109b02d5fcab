//! Production transport over tokio-tungstenite.
//!
//! Each opened socket runs two tasks: a connector/reader that performs the
//! TLS handshake and pumps inbound frames into the event channel, and a
//! writer that drains outbound frames into the sink. `close` cancels both.

use crate::error::WsResult;
use crate::transport::{
    send_closed_err, Socket, SocketEvent, SocketReadyState, Transport, TransportOptions,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum OutboundFrame {
    Text(String),
    Ping,
    Pong(Vec<u8>),
}

/// Socket handle backed by a live tungstenite stream.
pub struct TungsteniteSocket {
    state: Arc<RwLock<SocketReadyState>>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    shutdown: CancellationToken,
}

impl Socket for TungsteniteSocket {
    fn ready_state(&self) -> SocketReadyState {
        *self.state.read()
    }

    fn send(&self, data: String) -> WsResult<()> {
        self.outbound
            .send(OutboundFrame::Text(data))
            .map_err(|_| send_closed_err())
    }

    fn ping(&self) -> WsResult<()> {
        self.outbound
            .send(OutboundFrame::Ping)
            .map_err(|_| send_closed_err())
    }

    fn pong(&self, payload: Vec<u8>) -> WsResult<()> {
        self.outbound
            .send(OutboundFrame::Pong(payload))
            .map_err(|_| send_closed_err())
    }

    fn close(&self) {
        *self.state.write() = SocketReadyState::Closing;
        self.shutdown.cancel();
    }
}

/// Opens real sockets with `connect_async_tls_with_config`.
#[derive(Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn open(
        &self,
        url: &str,
        options: &TransportOptions,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Arc<dyn Socket> {
        if options.compression {
            debug!("permessage-deflate not supported by this transport; ignoring");
        }
        if let Some(proxy) = &options.proxy {
            debug!(proxy = %proxy, "proxying not supported by this transport; connecting directly");
        }

        let state = Arc::new(RwLock::new(SocketReadyState::Connecting));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let socket = Arc::new(TungsteniteSocket {
            state: state.clone(),
            outbound: outbound_tx,
            shutdown: shutdown.clone(),
        });

        let url = url.to_string();
        tokio::spawn(async move {
            let connect = connect_async_tls_with_config(&url, None, true, None);
            let ws_stream = tokio::select! {
                result = connect => match result {
                    Ok((stream, _response)) => stream,
                    Err(e) => {
                        *state.write() = SocketReadyState::Closed;
                        let _ = events.send(SocketEvent::Error(e.to_string()));
                        let _ = events.send(SocketEvent::Close {
                            code: 1006,
                            reason: e.to_string(),
                        });
                        return;
                    }
                },
                () = shutdown.cancelled() => {
                    *state.write() = SocketReadyState::Closed;
                    let _ = events.send(SocketEvent::Close {
                        code: 1000,
                        reason: "closed before handshake completed".to_string(),
                    });
                    return;
                }
            };

            let (mut write, mut read) = ws_stream.split();
            *state.write() = SocketReadyState::Open;
            let _ = events.send(SocketEvent::Open);

            let (mut close_code, mut close_reason) = (1006u16, String::new());
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let message = match frame {
                            OutboundFrame::Text(data) => Message::Text(data),
                            OutboundFrame::Ping => Message::Ping(Vec::new()),
                            OutboundFrame::Pong(payload) => Message::Pong(payload),
                        };
                        if let Err(e) = write.send(message).await {
                            warn!(error = %e, "Websocket write failed");
                            let _ = events.send(SocketEvent::Error(e.to_string()));
                            close_reason = e.to_string();
                            break;
                        }
                    }
                    inbound = read.next() => {
                        match inbound {
                            Some(Ok(Message::Text(raw))) => {
                                let _ = events.send(SocketEvent::Message(raw));
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = events.send(SocketEvent::Ping(payload));
                            }
                            Some(Ok(Message::Pong(payload))) => {
                                let _ = events.send(SocketEvent::Pong(payload));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                if let Some(frame) = frame {
                                    close_code = frame.code.into();
                                    close_reason = frame.reason.into_owned();
                                }
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                let _ = events.send(SocketEvent::Error(e.to_string()));
                                close_reason = e.to_string();
                                break;
                            }
                            None => break,
                        }
                    }
                    () = shutdown.cancelled() => {
                        close_code = 1000;
                        close_reason = "normal closure".to_string();
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            *state.write() = SocketReadyState::Closed;
            let _ = events.send(SocketEvent::Close {
                code: close_code,
                reason: close_reason,
            });
        });

        socket
    }
}
