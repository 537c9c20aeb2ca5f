//! Message and station id generation.

use uuid::Uuid;

/// Generate a unique OCPP-J message id (≤36 chars, per the wire format).
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a 2.0.1 transaction id: a UUID string, always ≤36 chars.
pub fn new_transaction_id_v201() -> String {
    Uuid::new_v4().to_string()
}

/// Derive a stable station hash id from a template name and fleet index,
/// e.g. `"CS-001-00042"`. Stable across restarts as long as the template
/// name and index are stable — this is what templates mean by "stable hash id".
pub fn station_hash_id(base_name: &str, index: u32) -> String {
    format!("{base_name}-{index:05}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique_and_bounded() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
        assert!(a.len() <= 36);
    }

    #[test]
    fn station_hash_id_is_stable() {
        assert_eq!(station_hash_id("CS", 42), "CS-00042");
        assert_eq!(station_hash_id("CS", 42), station_hash_id("CS", 42));
    }
}
