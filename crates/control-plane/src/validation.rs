use serde_json::Value;

use crate::error::{ApiResult, AppError};

const ALLOWED_TOP_LEVEL_KEYS: &[&str] =
    &["collection", "security", "server", "aggregator", "logging"];
const MIN_COLLECTION_INTERVAL_MS: i64 = 100;
const MAX_COLLECTION_INTERVAL_MS: i64 = 60_000;
const MIN_COMPRESSION_LEVEL: i64 = 1;
const MAX_COMPRESSION_LEVEL: i64 = 9;

/// Validates a node configuration document before it is stored: the value
/// must be an object, top-level keys must be known, and numeric knobs must
/// sit inside their declared ranges.
pub fn validate_node_configuration(configuration: &Value) -> ApiResult<()> {
    let Some(object) = configuration.as_object() else {
        return Err(AppError::bad_request("configuration must be an object"));
    };

    for key in object.keys() {
        if !ALLOWED_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            return Err(AppError::bad_request(format!(
                "unknown configuration key: {key}"
            )));
        }
    }

    if let Some(interval) = configuration.pointer("/collection/interval") {
        let Some(value) = interval.as_i64() else {
            return Err(AppError::bad_request("collection.interval must be an integer"));
        };
        if !(MIN_COLLECTION_INTERVAL_MS..=MAX_COLLECTION_INTERVAL_MS).contains(&value) {
            return Err(AppError::bad_request(format!(
                "collection.interval must be between {MIN_COLLECTION_INTERVAL_MS} and {MAX_COLLECTION_INTERVAL_MS} ms"
            )));
        }
    }

    if let Some(level) = configuration.pointer("/security/compression/level") {
        let Some(value) = level.as_i64() else {
            return Err(AppError::bad_request(
                "security.compression.level must be an integer",
            ));
        };
        if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&value) {
            return Err(AppError::bad_request(format!(
                "security.compression.level must be between {MIN_COMPRESSION_LEVEL} and {MAX_COMPRESSION_LEVEL}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_known_keys_in_range() {
        let config = json!({
            "collection": {"interval": 500, "disk": {"mount_points": ["/"]}},
            "security": {"compression": {"level": 6}},
            "logging": {"level": "info"}
        });
        assert!(validate_node_configuration(&config).is_ok());
    }

    #[test]
    fn accepts_empty_object() {
        assert!(validate_node_configuration(&json!({})).is_ok());
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let err = validate_node_configuration(&json!({"turbo": true})).unwrap_err();
        assert!(err.message.contains("unknown configuration key"));
    }

    #[test]
    fn rejects_non_object() {
        assert!(validate_node_configuration(&json!([1, 2, 3])).is_err());
        assert!(validate_node_configuration(&json!("fast")).is_err());
    }

    #[test]
    fn rejects_interval_outside_declared_range() {
        assert!(
            validate_node_configuration(&json!({"collection": {"interval": 50}})).is_err()
        );
        assert!(
            validate_node_configuration(&json!({"collection": {"interval": 90_000}})).is_err()
        );
        assert!(
            validate_node_configuration(&json!({"collection": {"interval": "fast"}})).is_err()
        );
    }

    #[test]
    fn rejects_compression_level_outside_range() {
        assert!(validate_node_configuration(
            &json!({"security": {"compression": {"level": 0}}})
        )
        .is_err());
        assert!(validate_node_configuration(
            &json!({"security": {"compression": {"level": 10}}})
        )
        .is_err());
    }
}
