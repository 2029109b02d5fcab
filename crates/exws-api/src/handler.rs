//! Inbound message routing for the trading-session layer.
//!
//! Replies carrying an `id` are correlated back to their pending request;
//! unsolicited pushes carrying an `event` are dispatched to the callbacks
//! registered for the connection they arrived on. After a reconnect or
//! renewal the saved session logon is replayed transparently.

use crate::config::ApiConfig;
use exws_core::Signer;
use exws_pool::{ConnectionPool, ConnectionRecord, MessageHandler, WsError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback invoked with each unsolicited user-data event.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

pub(crate) struct ApiShared {
    pub(crate) config: ApiConfig,
    pub(crate) signer: Option<Signer>,
    /// User-data callbacks keyed by connection id.
    pub(crate) event_callbacks: Mutex<HashMap<String, Vec<EventCallback>>>,
}

pub(crate) struct ApiHandler {
    shared: Arc<ApiShared>,
}

impl ApiHandler {
    pub(crate) fn new(shared: Arc<ApiShared>) -> Self {
        Self { shared }
    }

    fn dispatch_event(&self, connection: &Arc<ConnectionRecord>, event: &Value) {
        let callbacks = self.shared.event_callbacks.lock();
        let Some(registered) = callbacks.get(connection.id()) else {
            debug!(conn_id = %connection.id(), "User-data event with no registered callbacks");
            return;
        };
        for callback in registered {
            callback(event);
        }
    }

    /// Replay the saved session logon on a freshly opened socket.
    ///
    /// Logs the outcome; never propagates an error out of the open path.
    fn session_relogon(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>) {
        connection.set_session_logged_on(false);
        if !self.shared.config.auto_session_relogon {
            return;
        }
        let Some(logon_req) = connection.session_logon_req() else {
            return;
        };
        let Some(id) = logon_req.get("id").and_then(Value::as_str).map(str::to_string) else {
            warn!(conn_id = %connection.id(), "Saved session logon request has no id; skipping replay");
            return;
        };
        let payload = logon_req.to_string();
        let pool = pool.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            match pool
                .send_request(&payload, &id, None, Some(connection.clone()))
                .await
            {
                Ok(_) => {
                    connection.set_session_logged_on(true);
                    info!(conn_id = %connection.id(), "Session re-logon succeeded");
                }
                Err(e) => {
                    warn!(conn_id = %connection.id(), error = %e, "Session re-logon failed");
                }
            }
        });
    }
}

impl MessageHandler for ApiHandler {
    fn on_message(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, raw: &str) {
        let msg: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(conn_id = %connection.id(), error = %e, "Dropping malformed message");
                return;
            }
        };

        if let Some(id) = request_id(&msg) {
            let result = parse_reply(&msg);
            pool.complete_request(connection, &id, result);
            return;
        }

        if let Some(event) = msg.get("event") {
            self.dispatch_event(connection, event);
            return;
        }

        debug!(conn_id = %connection.id(), "Ignoring message without id or event field");
    }

    fn on_open(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, reopened: bool) {
        if reopened {
            self.session_relogon(pool, connection);
        }
    }
}

fn request_id(msg: &Value) -> Option<String> {
    match msg.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Map a correlated reply to the caller's result.
///
/// Success replies resolve to `{data, rateLimits?}` where `data` is the
/// reply's `result` (or `response` as fallback); failures reject with the
/// server's error code and message.
fn parse_reply(msg: &Value) -> Result<Value, WsError> {
    let status = msg.get("status").and_then(Value::as_i64);
    if status == Some(200) || status.is_none() {
        let data = msg
            .get("result")
            .or_else(|| msg.get("response"))
            .cloned()
            .unwrap_or(Value::Null);
        let mut reply = serde_json::Map::new();
        reply.insert("data".to_string(), data);
        if let Some(rate_limits) = msg.get("rateLimits") {
            reply.insert("rateLimits".to_string(), rate_limits.clone());
        }
        Ok(Value::Object(reply))
    } else {
        let code = msg
            .pointer("/error/code")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| status.unwrap_or(-1));
        let message = msg
            .pointer("/error/msg")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        Err(WsError::Server { code, message })
    }
}
