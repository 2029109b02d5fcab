//! Configuration primitives shared by the API and streaming layers.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Pool operating mode.
///
/// `Single` preserves one-connection semantics: selection always returns the
/// first record, even before it has opened. `Pool` round-robins across every
/// healthy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsMode {
    #[default]
    Single,
    Pool,
}

impl std::fmt::Display for WsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Pool => write!(f, "pool"),
        }
    }
}

/// Timestamp unit requested from the server via the `timeUnit` URL parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Millisecond,
    Microsecond,
}

impl TimeUnit {
    /// Parse a configured time-unit string.
    ///
    /// Accepts the full unit name in any case plus the short forms the
    /// server documents (`MILLISECOND`/`millisecond`, `MICROSECOND`/
    /// `microsecond`).
    pub fn parse(value: &str) -> CoreResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "millisecond" => Ok(Self::Millisecond),
            "microsecond" => Ok(Self::Microsecond),
            _ => Err(CoreError::InvalidTimeUnit(value.to_string())),
        }
    }

    /// Value placed in the `timeUnit` query parameter.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Self::Millisecond => "MILLISECOND",
            Self::Microsecond => "MICROSECOND",
        }
    }
}
