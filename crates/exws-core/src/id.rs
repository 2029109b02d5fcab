//! Connection and request id generation.

use uuid::Uuid;

/// Generate a random 32-hex-character id.
///
/// Used for both connection slots and request correlation ids when the
/// caller does not supply one.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
