//! Trading-session API configuration.

use exws_core::SigningMethod;
use exws_pool::PoolConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the trading-session layer.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base WebSocket URL, e.g. `wss://ws-api.example.com/ws-api/v3`.
    pub ws_url: String,
    /// API key injected into keyed and signed requests.
    pub api_key: Option<String>,
    /// Signing credentials. Absent for public-only usage. Key material is
    /// injected programmatically, never serialized.
    #[serde(skip)]
    pub signing: Option<SigningMethod>,
    /// Replay the saved session logon after reconnection or renewal, and
    /// skip per-request signatures while a session is active.
    pub auto_session_relogon: bool,
    /// Raw `timeUnit` setting appended to the connection URL. Invalid values
    /// are logged and the URL is left unmodified.
    pub time_unit: Option<String>,
    /// Underlying pool configuration.
    pub pool: PoolConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            api_key: None,
            signing: None,
            auto_session_relogon: true,
            time_unit: None,
            pool: PoolConfig::default(),
        }
    }
}

/// Per-call options for `send_message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Inject the API key without signing.
    pub with_api_key: bool,
    /// Inject API key and timestamp, sort params, and sign.
    pub is_signed: bool,
    /// Fan the signed call out to every available connection and record it
    /// for replay.
    pub is_session_logon: bool,
    /// Fan out and clear per-connection session state.
    pub is_session_logout: bool,
}

impl SendOptions {
    pub fn signed() -> Self {
        Self {
            is_signed: true,
            ..Self::default()
        }
    }

    pub fn with_api_key() -> Self {
        Self {
            with_api_key: true,
            ..Self::default()
        }
    }

    pub fn session_logon() -> Self {
        Self {
            is_signed: true,
            is_session_logon: true,
            ..Self::default()
        }
    }

    pub fn session_logout() -> Self {
        Self {
            is_session_logout: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_with_defaults() {
        let config: ApiConfig = serde_json::from_str(
            r#"{"ws_url": "wss://ws-api.example.com", "api_key": "k"}"#,
        )
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert!(config.auto_session_relogon);
        assert!(config.signing.is_none());
        assert_eq!(config.pool.pool_size, 1);
    }
}
