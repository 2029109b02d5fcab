//! The market-data streaming API.
//!
//! Tracks which connection serves which stream, batches SUBSCRIBE and
//! UNSUBSCRIBE frames, queues subscriptions made before a socket opens, and
//! rebuilds subscribe URLs on reconnection so stream state survives socket
//! replacement.

use crate::config::StreamsConfig;
use exws_core::{generate_id, TimeUnit};
use exws_pool::{
    ConnectionPool, ConnectionRecord, MessageHandler, Transport, TungsteniteTransport, WsError,
    WsResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Callback invoked with each stream message's `data` payload.
pub type StreamCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Scoped key used by every stream map: `urlPath::stream` when a url-path is
/// given, else the bare stream name.
pub fn stream_key(stream: &str, url_path: Option<&str>) -> String {
    match url_path {
        Some(path) if !path.is_empty() => format!("{path}::{stream}"),
        _ => stream.to_string(),
    }
}

struct StreamShared {
    config: StreamsConfig,
    /// Stream key to the id of the connection serving it. Many-to-one: one
    /// connection serves many streams, each stream maps to one connection.
    stream_connections: Mutex<HashMap<String, String>>,
    /// Stream key to registered local callbacks.
    stream_callbacks: Mutex<HashMap<String, Vec<StreamCallback>>>,
}

impl StreamShared {
    /// `{base}[/path]/stream?streams=a/b/c[&timeUnit=...]`. An empty stream
    /// list still yields a valid URL with an empty `streams=` value.
    fn prepare_url(&self, streams: &[String], url_path: Option<&str>) -> String {
        let mut url = self.config.ws_url.clone();
        if let Some(path) = url_path {
            if !path.is_empty() {
                url.push('/');
                url.push_str(path);
            }
        }
        url.push_str("/stream?streams=");
        url.push_str(&streams.join("/"));
        if let Some(raw) = &self.config.time_unit {
            match TimeUnit::parse(raw) {
                Ok(unit) => {
                    url.push_str("&timeUnit=");
                    url.push_str(unit.as_query_value());
                }
                Err(e) => error!(error = %e, "Invalid timeUnit; building URL without it"),
            }
        }
        url
    }

    /// Rebuild the subscribe URL for exactly the streams mapped to this
    /// connection, scoped to its url-path.
    fn reconnect_url(&self, connection: &Arc<ConnectionRecord>) -> String {
        let path = connection.url_path();
        let prefix = path.map(|p| format!("{p}::"));
        let streams: Vec<String> = self
            .stream_connections
            .lock()
            .iter()
            .filter(|(_, conn_id)| conn_id.as_str() == connection.id())
            .filter_map(|(key, _)| match &prefix {
                Some(prefix) => key.strip_prefix(prefix.as_str()).map(str::to_string),
                None => (!key.contains("::")).then(|| key.clone()),
            })
            .collect();
        self.prepare_url(&streams, path)
    }
}

struct StreamHandler {
    shared: Arc<StreamShared>,
}

impl MessageHandler for StreamHandler {
    fn on_message(&self, _pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, raw: &str) {
        let msg: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(conn_id = %connection.id(), error = %e, "Dropping malformed stream message");
                return;
            }
        };
        // Combined-stream envelopes without a top-level stream field are
        // ignored.
        let Some(stream) = msg.get("stream").and_then(Value::as_str) else {
            return;
        };
        let key = stream_key(stream, connection.url_path());
        let data = msg.get("data").unwrap_or(&Value::Null);
        let callbacks = self.shared.stream_callbacks.lock();
        if let Some(registered) = callbacks.get(&key) {
            for callback in registered {
                callback(data);
            }
        }
    }

    fn on_open(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, _reopened: bool) {
        flush_pending_subscriptions(pool, connection);
    }

    fn reconnect_url(
        &self,
        _pool: &ConnectionPool,
        connection: &Arc<ConnectionRecord>,
        _url: &str,
    ) -> String {
        self.shared.reconnect_url(connection)
    }
}

/// Send one combined SUBSCRIBE frame for everything queued on `connection`.
fn flush_pending_subscriptions(pool: &ConnectionPool, connection: &Arc<ConnectionRecord>) {
    let streams = connection.drain_subscriptions();
    if streams.is_empty() {
        return;
    }
    info!(conn_id = %connection.id(), count = streams.len(), "Flushing queued subscriptions");
    let frame = subscribe_frame("SUBSCRIBE", &streams, None);
    if let Err(e) = pool.send_text(&frame, Some(connection.clone())) {
        warn!(conn_id = %connection.id(), error = %e, "Failed to flush queued subscriptions");
    }
}

fn subscribe_frame(method: &str, streams: &[String], id: Option<String>) -> String {
    json!({
        "method": method,
        "params": streams,
        "id": id.unwrap_or_else(generate_id),
    })
    .to_string()
}

/// Market-data streaming over the connection pool.
pub struct WebsocketStreams {
    pool: ConnectionPool,
    shared: Arc<StreamShared>,
}

impl WebsocketStreams {
    pub fn new(config: StreamsConfig) -> Self {
        Self::with_transport(config, Arc::new(TungsteniteTransport::new()))
    }

    /// Build against an explicit transport (tests substitute a scripted one).
    pub fn with_transport(config: StreamsConfig, transport: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(StreamShared {
            config,
            stream_connections: Mutex::new(HashMap::new()),
            stream_callbacks: Mutex::new(HashMap::new()),
        });
        let handler = Arc::new(StreamHandler {
            shared: shared.clone(),
        });
        let pool = ConnectionPool::new(shared.config.pool.clone(), transport, handler);
        Self { pool, shared }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_connected(None)
    }

    /// Connect the pool, one subset per configured url-path, with the given
    /// streams pre-assigned and baked into each subscribe URL.
    pub async fn connect(&self, streams: &[String]) -> WsResult<()> {
        if self.is_connected() {
            debug!("Websocket streams already connected; skipping connect");
            return Ok(());
        }
        let paths: Vec<Option<String>> = if self.shared.config.pool.url_paths.is_empty() {
            vec![None]
        } else {
            self.shared
                .config
                .pool
                .url_paths
                .iter()
                .cloned()
                .map(Some)
                .collect()
        };
        let timeout = Duration::from_millis(self.pool.config().connect_timeout_ms);
        let connect_all = async {
            for path in &paths {
                self.handle_stream_assignment(streams, path.as_deref())?;
                let url = self.shared.prepare_url(streams, path.as_deref());
                let subset: Vec<Arc<ConnectionRecord>> = self
                    .pool
                    .connections()
                    .into_iter()
                    .filter(|c| c.url_path() == path.as_deref())
                    .collect();
                self.pool.connect_pool(&url, Some(subset)).await?;
            }
            Ok(())
        };
        tokio::time::timeout(timeout, connect_all)
            .await
            .map_err(|_| WsError::ConnectTimeout)?
    }

    /// Disconnect the pool and drop all stream bookkeeping.
    pub async fn disconnect(&self) {
        self.pool.disconnect().await;
        self.shared.stream_connections.lock().clear();
        self.shared.stream_callbacks.lock().clear();
    }

    /// Register a callback for a stream's `data` payloads.
    pub fn on_stream(&self, stream: &str, url_path: Option<&str>, callback: StreamCallback) {
        let key = stream_key(stream, url_path);
        self.shared
            .stream_callbacks
            .lock()
            .entry(key)
            .or_default()
            .push(callback);
    }

    /// Subscribe to streams, assigning each new stream to a connection.
    ///
    /// Streams already mapped to a viable connection are no-ops. Streams
    /// assigned to a not-yet-open connection are queued and flushed when the
    /// socket opens. `id` is the frame correlation id; one is generated when
    /// not supplied.
    pub fn subscribe(
        &self,
        streams: &[&str],
        id: Option<String>,
        url_path: Option<&str>,
    ) -> WsResult<()> {
        let assignments = self.handle_stream_assignment(streams, url_path)?;
        for (connection, new_streams) in assignments {
            if connection.socket_open() {
                let frame = subscribe_frame("SUBSCRIBE", &new_streams, id.clone());
                self.pool.send_text(&frame, Some(connection))?;
            } else {
                info!(
                    conn_id = %connection.id(),
                    streams = ?new_streams,
                    "Connection not open; subscriptions queued"
                );
                for stream in new_streams {
                    connection.queue_subscription(stream);
                }
            }
        }
        Ok(())
    }

    /// Unsubscribe a stream.
    ///
    /// The network UNSUBSCRIBE is skipped while local callbacks remain
    /// registered for the stream. `id` is the frame correlation id; one is
    /// generated when not supplied.
    pub fn unsubscribe(
        &self,
        stream: &str,
        id: Option<String>,
        url_path: Option<&str>,
    ) -> WsResult<()> {
        let key = stream_key(stream, url_path);
        if self
            .shared
            .stream_callbacks
            .lock()
            .get(&key)
            .is_some_and(|callbacks| !callbacks.is_empty())
        {
            warn!(stream, "Stream still has registered callbacks; skipping unsubscribe");
            return Ok(());
        }
        let conn_id = self.shared.stream_connections.lock().get(&key).cloned();
        let Some(conn_id) = conn_id else {
            warn!(stream, "Stream is not associated with an active connection");
            return Ok(());
        };
        let Some(connection) = self.pool.connection_by_id(&conn_id) else {
            warn!(stream, conn_id = %conn_id, "Stream mapped to an unknown connection");
            return Ok(());
        };
        let frame = subscribe_frame("UNSUBSCRIBE", &[stream.to_string()], id);
        self.pool.send_text(&frame, Some(connection))?;
        self.shared.stream_connections.lock().remove(&key);
        self.shared.stream_callbacks.lock().remove(&key);
        Ok(())
    }

    /// Assign streams to connections by round-robin, reusing viable existing
    /// assignments and re-assigning streams whose connection is shutting
    /// down or mid-reconnect. Returns only newly-assigned streams, grouped
    /// by target connection.
    pub fn handle_stream_assignment(
        &self,
        streams: &[impl AsRef<str>],
        url_path: Option<&str>,
    ) -> WsResult<Vec<(Arc<ConnectionRecord>, Vec<String>)>> {
        let mut groups: Vec<(Arc<ConnectionRecord>, Vec<String>)> = Vec::new();
        for stream in streams {
            let stream = stream.as_ref();
            let key = stream_key(stream, url_path);
            let existing = self.shared.stream_connections.lock().get(&key).cloned();
            if let Some(conn_id) = existing {
                let viable = self
                    .pool
                    .connection_by_id(&conn_id)
                    .is_some_and(|c| !c.close_initiated() && !c.reconnection_pending());
                if viable {
                    debug!(stream, "Stream already assigned; skipping");
                    continue;
                }
            }
            let connection = self.pool.get_connection(true, url_path)?;
            self.shared
                .stream_connections
                .lock()
                .insert(key, connection.id().to_string());
            match groups.iter_mut().find(|(c, _)| c.id() == connection.id()) {
                Some((_, group)) => group.push(stream.to_string()),
                None => groups.push((connection, vec![stream.to_string()])),
            }
        }
        Ok(groups)
    }

    /// Whether any mapping exists for this stream under any url-path.
    pub fn is_subscribed(&self, stream: &str) -> bool {
        let suffix = format!("::{stream}");
        self.shared
            .stream_connections
            .lock()
            .keys()
            .any(|key| key == stream || key.ends_with(&suffix))
    }

    /// The subscribe URL that reconnection would use for this connection.
    pub fn reconnect_url(&self, connection: &Arc<ConnectionRecord>) -> String {
        self.shared.reconnect_url(connection)
    }

    /// The subscribe URL for a given stream set and url-path.
    pub fn prepare_url(&self, streams: &[String], url_path: Option<&str>) -> String {
        self.shared.prepare_url(streams, url_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exws_pool::mock::MockTransport;
    use exws_pool::PoolConfig;
    use exws_core::WsMode;

    fn streams_with(config: StreamsConfig) -> (WebsocketStreams, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(true));
        let streams = WebsocketStreams::with_transport(config, transport.clone());
        (streams, transport)
    }

    fn base_config() -> StreamsConfig {
        StreamsConfig {
            ws_url: "wss://stream.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_stream_key_scoping() {
        assert_eq!(stream_key("btcusdt@trade", None), "btcusdt@trade");
        assert_eq!(stream_key("btcusdt@trade", Some("")), "btcusdt@trade");
        assert_eq!(stream_key("btcusdt@trade", Some("ws")), "ws::btcusdt@trade");
    }

    #[test]
    fn test_prepare_url_shapes() {
        let (streams, _) = streams_with(StreamsConfig {
            time_unit: Some("microsecond".to_string()),
            ..base_config()
        });
        assert_eq!(
            streams.prepare_url(&["a@trade".to_string(), "b@depth".to_string()], Some("ws")),
            "wss://stream.example.com/ws/stream?streams=a@trade/b@depth&timeUnit=MICROSECOND"
        );
        let (streams, _) = streams_with(base_config());
        assert_eq!(
            streams.prepare_url(&[], None),
            "wss://stream.example.com/stream?streams="
        );
    }

    #[tokio::test]
    async fn test_subscribe_roundtrip() {
        let (streams, transport) = streams_with(base_config());
        streams.connect(&[]).await.unwrap();

        streams.subscribe(&["btcusdt@trade"], None, None).unwrap();
        let socket = transport.sockets()[0].clone();
        let frames = socket.sent_frames();
        assert_eq!(frames.len(), 1);
        let frame: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["method"], "SUBSCRIBE");
        assert_eq!(frame["params"], json!(["btcusdt@trade"]));
        assert!(streams.is_subscribed("btcusdt@trade"));

        // Duplicate subscribe is a no-op.
        streams.subscribe(&["btcusdt@trade"], None, None).unwrap();
        assert_eq!(socket.sent_frames().len(), 1);

        streams.unsubscribe("btcusdt@trade", None, None).unwrap();
        let frames = socket.sent_frames();
        assert_eq!(frames.len(), 2);
        let frame: Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(frame["method"], "UNSUBSCRIBE");
        assert!(!streams.is_subscribed("btcusdt@trade"));
    }

    #[tokio::test]
    async fn test_caller_supplied_frame_id() {
        let (streams, transport) = streams_with(base_config());
        streams.connect(&[]).await.unwrap();

        streams
            .subscribe(&["btcusdt@trade"], Some("sub-1".to_string()), None)
            .unwrap();
        streams
            .unsubscribe("btcusdt@trade", Some("unsub-1".to_string()), None)
            .unwrap();

        let frames = transport.sockets()[0].sent_frames();
        let subscribe: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(subscribe["id"], "sub-1");
        let unsubscribe: Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(unsubscribe["id"], "unsub-1");
    }

    #[tokio::test]
    async fn test_unsubscribe_blocked_by_callbacks() {
        let (streams, transport) = streams_with(base_config());
        streams.connect(&[]).await.unwrap();
        streams.on_stream("btcusdt@trade", None, Arc::new(|_| {}));
        streams.subscribe(&["btcusdt@trade"], None, None).unwrap();

        streams.unsubscribe("btcusdt@trade", None, None).unwrap();
        assert_eq!(transport.sockets()[0].sent_frames().len(), 1);
        assert!(streams.is_subscribed("btcusdt@trade"));
    }

    #[tokio::test]
    async fn test_path_isolation() {
        let config = StreamsConfig {
            pool: PoolConfig {
                mode: WsMode::Single,
                url_paths: vec!["ws".to_string(), "ws-alt".to_string()],
                ..Default::default()
            },
            ..base_config()
        };
        let (streams, transport) = streams_with(config);
        streams.connect(&[]).await.unwrap();

        streams.subscribe(&["btcusdt@trade"], None, Some("ws")).unwrap();
        streams.subscribe(&["btcusdt@trade"], None, Some("ws-alt")).unwrap();
        assert_eq!(transport.sockets()[0].sent_frames().len(), 1);
        assert_eq!(transport.sockets()[1].sent_frames().len(), 1);

        streams.unsubscribe("btcusdt@trade", None, Some("ws")).unwrap();
        assert!(streams.is_subscribed("btcusdt@trade"));

        streams.unsubscribe("btcusdt@trade", None, Some("ws-alt")).unwrap();
        assert!(!streams.is_subscribed("btcusdt@trade"));
    }

    #[tokio::test]
    async fn test_reconnect_url_scoped_to_connection() {
        let config = StreamsConfig {
            pool: PoolConfig {
                mode: WsMode::Single,
                url_paths: vec!["ws".to_string(), "ws-alt".to_string()],
                ..Default::default()
            },
            ..base_config()
        };
        let (streams, _) = streams_with(config);
        streams.connect(&[]).await.unwrap();
        streams.subscribe(&["a@trade", "b@trade"], None, Some("ws")).unwrap();
        streams.subscribe(&["c@trade"], None, Some("ws-alt")).unwrap();

        let connections = streams.pool().connections();
        let url = streams.reconnect_url(&connections[0]);
        assert!(url.starts_with("wss://stream.example.com/ws/stream?streams="));
        assert!(url.contains("a@trade"));
        assert!(url.contains("b@trade"));
        assert!(!url.contains("c@trade"));
    }

    #[tokio::test]
    async fn test_message_dispatch_to_callbacks() {
        let (streams, transport) = streams_with(base_config());
        streams.connect(&[]).await.unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        streams.on_stream(
            "btcusdt@trade",
            None,
            Arc::new(move |data| sink.lock().push(data.clone())),
        );
        streams.subscribe(&["btcusdt@trade"], None, None).unwrap();

        let socket = transport.sockets()[0].clone();
        socket.server_message(
            &json!({"stream": "btcusdt@trade", "data": {"p": "50000"}}).to_string(),
        );
        socket.server_message(&json!({"result": null, "id": 1}).to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["p"], "50000");
    }

    #[tokio::test]
    async fn test_pending_subscriptions_flush_on_open() {
        let transport = Arc::new(MockTransport::new(false));
        let streams = WebsocketStreams::with_transport(base_config(), transport.clone());
        let record = streams.pool().connections()[0].clone();
        streams
            .pool()
            .init_connect("wss://stream.example.com/stream?streams=", false, &record);
        tokio::time::sleep(Duration::from_millis(10)).await;

        streams.subscribe(&["a@trade", "b@trade"], None, None).unwrap();
        let socket = transport.sockets()[0].clone();
        assert!(socket.sent_frames().is_empty());
        assert_eq!(record.pending_subscription_count(), 2);

        socket.open_now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frames = socket.sent_frames();
        assert_eq!(frames.len(), 1);
        let frame: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["params"], json!(["a@trade", "b@trade"]));
        assert_eq!(record.pending_subscription_count(), 0);
    }
}
