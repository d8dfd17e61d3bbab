//! Correlation ids attached to every request for log correlation

/// Generate a fresh correlation id (random UUIDv4)
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
