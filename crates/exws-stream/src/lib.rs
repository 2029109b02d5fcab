//! Market-data streaming WebSocket API.
//!
//! Layers subscribe/unsubscribe bookkeeping, stream-to-connection
//! assignment, and reconnect URL reconstruction over the exws connection
//! pool.

pub mod config;
pub mod streams;

pub use config::StreamsConfig;
pub use streams::{stream_key, StreamCallback, WebsocketStreams};
