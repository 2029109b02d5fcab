//! Shared building blocks for the exws workspace.
//!
//! Provides the pieces both WebSocket layers need but that are not tied to
//! the connection pool itself: operating-mode and time-unit configuration,
//! id generation, and request signing (HMAC-SHA256 or Ed25519) with a
//! fingerprint-keyed signer cache.

pub mod config;
pub mod error;
pub mod id;
pub mod sign;

pub use config::{TimeUnit, WsMode};
pub use error::{CoreError, CoreResult};
pub use id::generate_id;
pub use sign::{fingerprint, Signer, SignerCache, SigningMethod};
