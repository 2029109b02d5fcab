//! Pool configuration.

use crate::transport::TransportOptions;
use exws_core::WsMode;
use serde::{Deserialize, Serialize};

/// Connection-pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Operating mode: one connection or a round-robin pool.
    #[serde(default)]
    pub mode: WsMode,
    /// Connections per url-path partition (ignored in `single` mode).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Url-path partitions. Empty means the pool is not partitioned.
    #[serde(default)]
    pub url_paths: Vec<String>,
    /// Delay before a reconnection attempt is queued after an unexpected close.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Spacing between reconnection attempts while the queue drains.
    #[serde(default = "default_reconnect_throttle_ms")]
    pub reconnect_throttle_ms: u64,
    /// Proactive socket-renewal horizon. The server force-closes connections
    /// after 24 hours; renew an hour early.
    #[serde(default = "default_renewal_interval_ms")]
    pub renewal_interval_ms: u64,
    /// Pool-connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Default timeout for promise-based sends.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Request permessage-deflate compression.
    #[serde(default)]
    pub compression: bool,
    /// Proxy URL for outbound connections.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_pool_size() -> usize {
    1
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_reconnect_throttle_ms() -> u64 {
    500
}

fn default_renewal_interval_ms() -> u64 {
    23 * 60 * 60 * 1000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: WsMode::Single,
            pool_size: default_pool_size(),
            url_paths: Vec::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_throttle_ms: default_reconnect_throttle_ms(),
            renewal_interval_ms: default_renewal_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            compression: false,
            proxy: None,
        }
    }
}

impl PoolConfig {
    /// Records allocated per url-path partition.
    pub fn connections_per_path(&self) -> usize {
        match self.mode {
            WsMode::Single => 1,
            WsMode::Pool => self.pool_size.max(1),
        }
    }

    /// Total records the pool allocates up front.
    pub fn target_pool_size(&self) -> usize {
        self.connections_per_path() * self.url_paths.len().max(1)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            compression: self.compression,
            proxy: self.proxy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.mode, WsMode::Single);
        assert_eq!(config.target_pool_size(), 1);
        assert_eq!(config.renewal_interval_ms, 82_800_000);
    }

    #[test]
    fn test_target_size_pool_mode_with_paths() {
        let config = PoolConfig {
            mode: WsMode::Pool,
            pool_size: 3,
            url_paths: vec!["ws".to_string(), "ws-fapi".to_string()],
            ..Default::default()
        };
        assert_eq!(config.target_pool_size(), 6);
    }

    #[test]
    fn test_single_mode_one_per_path() {
        let config = PoolConfig {
            mode: WsMode::Single,
            pool_size: 4,
            url_paths: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(config.connections_per_path(), 1);
        assert_eq!(config.target_pool_size(), 2);
    }
}
