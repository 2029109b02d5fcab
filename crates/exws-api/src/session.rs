//! The trading-session WebSocket API.
//!
//! Wraps the connection pool with request signing, API-key and timestamp
//! injection, session logon/logout fan-out, and time-unit URL preparation.

use crate::config::{ApiConfig, SendOptions};
use crate::handler::{ApiHandler, ApiShared, EventCallback};
use exws_core::{generate_id, Signer, TimeUnit};
use exws_pool::{
    ConnectionPool, ConnectionRecord, Transport, TungsteniteTransport, WsError, WsResult,
};
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Request/response trading API over the connection pool.
pub struct WebsocketApi {
    pool: ConnectionPool,
    shared: Arc<ApiShared>,
}

impl WebsocketApi {
    pub fn new(config: ApiConfig) -> Self {
        Self::with_transport(config, Arc::new(TungsteniteTransport::new()))
    }

    /// Build against an explicit transport (tests substitute a scripted one).
    pub fn with_transport(config: ApiConfig, transport: Arc<dyn Transport>) -> Self {
        let signer = config.signing.clone().map(Signer::new);
        let shared = Arc::new(ApiShared {
            signer,
            event_callbacks: parking_lot::Mutex::new(std::collections::HashMap::new()),
            config,
        });
        let handler = Arc::new(ApiHandler::new(shared.clone()));
        let pool = ConnectionPool::new(shared.config.pool.clone(), transport, handler);
        Self { pool, shared }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_connected(None)
    }

    /// Connect the whole pool, or no-op if already connected.
    pub async fn connect(&self) -> WsResult<()> {
        if self.is_connected() {
            debug!("Websocket already connected; skipping connect");
            return Ok(());
        }
        let url = self.prepare_url(&self.shared.config.ws_url);
        let timeout = Duration::from_millis(self.pool.config().connect_timeout_ms);
        tokio::time::timeout(timeout, self.pool.connect_pool(&url, None))
            .await
            .map_err(|_| WsError::ConnectTimeout)?
    }

    pub async fn disconnect(&self) {
        self.pool.disconnect().await;
    }

    /// Register a callback for unsolicited user-data events arriving on the
    /// given connection.
    pub fn register_event_callback(&self, connection_id: &str, callback: EventCallback) {
        self.shared
            .event_callbacks
            .lock()
            .entry(connection_id.to_string())
            .or_default()
            .push(callback);
    }

    /// Send a request envelope `{id, method, params}` and await its reply.
    ///
    /// Session logon/logout calls fan out to every available connection;
    /// everything else goes to one round-robin-selected connection.
    pub async fn send_message(
        &self,
        method: &str,
        params: Map<String, Value>,
        options: SendOptions,
    ) -> WsResult<Value> {
        if !self.is_connected() {
            return Err(WsError::NotConnected);
        }
        if options.is_session_logon || options.is_session_logout {
            return self.send_session_fan_out(method, &params, options).await;
        }
        let connection = self.pool.get_connection(false, None)?;
        let (payload, id, _) = self.build_envelope(method, &params, options, &connection)?;
        self.pool
            .send_request(&payload, &id, None, Some(connection))
            .await
    }

    /// Send a session-scoped call on every available connection.
    ///
    /// Each connection gets its own id, timestamp and signature, and its
    /// session flags are updated on that connection's individual outcome.
    /// Returns the first successful reply, or the first error when every
    /// connection fails.
    async fn send_session_fan_out(
        &self,
        method: &str,
        params: &Map<String, Value>,
        options: SendOptions,
    ) -> WsResult<Value> {
        let connections = self.pool.get_available_connections(false, None);
        if connections.is_empty() {
            return Err(WsError::NoConnectionAvailable);
        }
        let sends = connections.iter().map(|connection| {
            let connection = connection.clone();
            async move {
                let (payload, id, envelope) =
                    self.build_envelope(method, params, options, &connection)?;
                let result = self
                    .pool
                    .send_request(&payload, &id, None, Some(connection.clone()))
                    .await;
                match &result {
                    Ok(_) if options.is_session_logon => {
                        connection.set_session_logon_req(Some(envelope));
                        connection.set_session_logged_on(true);
                        info!(conn_id = %connection.id(), "Session logon succeeded");
                    }
                    Ok(_) => {
                        connection.clear_session();
                        info!(conn_id = %connection.id(), "Session logout succeeded");
                    }
                    Err(e) => {
                        warn!(conn_id = %connection.id(), error = %e, "Session call failed");
                    }
                }
                result
            }
        });
        let mut results = join_all(sends).await;
        if let Some(pos) = results.iter().position(Result::is_ok) {
            return results.swap_remove(pos);
        }
        results.swap_remove(0)
    }

    /// Build the wire payload for one connection.
    ///
    /// Signed requests get the API key and a timestamp, lexicographically
    /// sorted params, and a signature. The signature is skipped when the
    /// target connection already holds a logged-on session and auto-relogon
    /// is enabled; session logon itself is always signed.
    fn build_envelope(
        &self,
        method: &str,
        params: &Map<String, Value>,
        options: SendOptions,
        connection: &Arc<ConnectionRecord>,
    ) -> WsResult<(String, String, Value)> {
        let mut sorted: BTreeMap<String, Value> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        if options.with_api_key || options.is_signed {
            let Some(api_key) = &self.shared.config.api_key else {
                return Err(WsError::SendFailed("API key is not configured".to_string()));
            };
            sorted.insert("apiKey".to_string(), Value::String(api_key.clone()));
        }

        if options.is_signed {
            sorted.insert(
                "timestamp".to_string(),
                Value::from(chrono::Utc::now().timestamp_millis()),
            );
            let session_active = connection.session_logged_on()
                && self.shared.config.auto_session_relogon
                && !options.is_session_logon;
            if session_active {
                debug!(conn_id = %connection.id(), "Active session; skipping request signature");
            } else {
                let Some(signer) = &self.shared.signer else {
                    return Err(WsError::SendFailed(
                        "signing credentials are not configured".to_string(),
                    ));
                };
                let query = query_string(&sorted);
                let signature = signer
                    .sign(&query)
                    .map_err(|e| WsError::SendFailed(e.to_string()))?;
                sorted.insert("signature".to_string(), Value::String(signature));
            }
        }

        let id = generate_id();
        let envelope = if sorted.is_empty() {
            json!({"id": id, "method": method})
        } else {
            json!({"id": id, "method": method, "params": sorted})
        };
        let payload = serde_json::to_string(&envelope)?;
        Ok((payload, id, envelope))
    }

    /// Append the configured `timeUnit` query parameter.
    ///
    /// An invalid time unit is logged and the URL is returned unmodified.
    pub fn prepare_url(&self, base: &str) -> String {
        let Some(raw) = &self.shared.config.time_unit else {
            return base.to_string();
        };
        match TimeUnit::parse(raw) {
            Ok(unit) => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!("{base}{separator}timeUnit={}", unit.as_query_value())
            }
            Err(e) => {
                error!(error = %e, "Invalid timeUnit; connecting without it");
                base.to_string()
            }
        }
    }
}

fn query_string(params: &BTreeMap<String, Value>) -> String {
    params
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use exws_core::SigningMethod;
    use exws_pool::mock::MockTransport;

    fn api_with(config: ApiConfig) -> (WebsocketApi, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(true));
        let api = WebsocketApi::with_transport(config, transport.clone());
        (api, transport)
    }

    #[test]
    fn test_prepare_url_appends_time_unit() {
        let (api, _) = api_with(ApiConfig {
            ws_url: "wss://example.com/ws-api/v3".to_string(),
            time_unit: Some("microsecond".to_string()),
            ..Default::default()
        });
        assert_eq!(
            api.prepare_url("wss://example.com/ws-api/v3"),
            "wss://example.com/ws-api/v3?timeUnit=MICROSECOND"
        );
        assert_eq!(
            api.prepare_url("wss://example.com/ws-api/v3?a=1"),
            "wss://example.com/ws-api/v3?a=1&timeUnit=MICROSECOND"
        );
    }

    #[test]
    fn test_prepare_url_invalid_time_unit_unmodified() {
        let (api, _) = api_with(ApiConfig {
            time_unit: Some("fortnight".to_string()),
            ..Default::default()
        });
        assert_eq!(api.prepare_url("wss://example.com/ws"), "wss://example.com/ws");
    }

    #[test]
    fn test_envelope_sorts_and_signs_params() {
        let (api, _) = api_with(ApiConfig {
            api_key: Some("k".to_string()),
            signing: Some(SigningMethod::hmac("secret")),
            ..Default::default()
        });
        let connection = ConnectionRecord::new(None, None);
        let mut params = Map::new();
        params.insert("symbol".to_string(), Value::from("BTCUSDT"));
        params.insert("side".to_string(), Value::from("BUY"));

        let (payload, id, envelope) = api
            .build_envelope("order.place", &params, SendOptions::signed(), &connection)
            .unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(envelope["id"], Value::String(id));
        let keys: Vec<&String> = envelope["params"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["apiKey", "side", "signature", "symbol", "timestamp"]);
        assert!(payload.contains("\"method\":\"order.place\""));
    }

    #[test]
    fn test_signature_skipped_with_active_session() {
        let (api, _) = api_with(ApiConfig {
            api_key: Some("k".to_string()),
            signing: Some(SigningMethod::hmac("secret")),
            ..Default::default()
        });
        let connection = ConnectionRecord::new(None, None);
        connection.set_session_logged_on(true);

        let (_, _, envelope) = api
            .build_envelope("order.place", &Map::new(), SendOptions::signed(), &connection)
            .unwrap();
        assert!(envelope["params"].get("signature").is_none());
        assert!(envelope["params"].get("apiKey").is_some());
    }

    #[test]
    fn test_logon_always_signed_despite_session() {
        let (api, _) = api_with(ApiConfig {
            api_key: Some("k".to_string()),
            signing: Some(SigningMethod::hmac("secret")),
            ..Default::default()
        });
        let connection = ConnectionRecord::new(None, None);
        connection.set_session_logged_on(true);

        let (_, _, envelope) = api
            .build_envelope(
                "session.logon",
                &Map::new(),
                SendOptions::session_logon(),
                &connection,
            )
            .unwrap();
        assert!(envelope["params"].get("signature").is_some());
    }

    #[tokio::test]
    async fn test_send_message_requires_connection() {
        let (api, _) = api_with(ApiConfig::default());
        let err = api
            .send_message("ping", Map::new(), SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not connected");
    }
}
