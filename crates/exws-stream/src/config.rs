//! Streaming configuration.

use exws_pool::PoolConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the streaming layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Base WebSocket URL, e.g. `wss://stream.example.com`.
    pub ws_url: String,
    /// Raw `timeUnit` setting appended to subscribe URLs. Invalid values are
    /// logged and omitted.
    pub time_unit: Option<String>,
    /// Underlying pool configuration. `url_paths` partitions the pool across
    /// logical sub-endpoints.
    pub pool: PoolConfig,
}
