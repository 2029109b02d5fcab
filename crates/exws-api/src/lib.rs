//! Trading-session WebSocket API.
//!
//! Layers request signing, session logon replay, and id-correlated
//! request/response calls over the exws connection pool.

pub mod config;
mod handler;
pub mod session;

pub use config::{ApiConfig, SendOptions};
pub use handler::EventCallback;
pub use session::WebsocketApi;
