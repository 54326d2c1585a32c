//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::cache::{CacheValue, TierScope};

/// Longest key accepted over HTTP
pub const MAX_REQUEST_KEY_LENGTH: usize = 256;

fn default_remote() -> bool {
    true
}

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds (the key's category TTL if absent)
/// - `remote`: Also write the shared tier (default true)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: CacheValue,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default = "default_remote")]
    pub remote: bool,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_REQUEST_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} characters",
                MAX_REQUEST_KEY_LENGTH
            ));
        }
        if self.ttl == Some(0) {
            return Some("TTL must be positive".to_string());
        }
        None
    }

    pub fn scope(&self) -> TierScope {
        if self.remote {
            TierScope::All
        } else {
            TierScope::Local
        }
    }
}

/// Request body for POST /clear. Without a pattern the whole shared tier is
/// flushed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub pattern: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"key": "test", "value": "hello"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "test");
        assert_eq!(req.value, json!("hello"));
        assert!(req.ttl.is_none());
        assert_eq!(req.scope(), TierScope::All);
    }

    #[test]
    fn test_set_request_structured_value() {
        let json = r#"{"key": "user_profile:1", "value": {"tags": ["a", "b"]}, "ttl": 60, "remote": false}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value, json!({"tags": ["a", "b"]}));
        assert_eq!(req.ttl, Some(60));
        assert_eq!(req.scope(), TierScope::Local);
    }

    #[test]
    fn test_validate_empty_key() {
        let req = SetRequest {
            key: "".to_string(),
            value: json!("test"),
            ttl: None,
            remote: true,
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let req = SetRequest {
            key: "k".to_string(),
            value: json!(1),
            ttl: Some(0),
            remote: true,
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_validate_valid_request() {
        let req = SetRequest {
            key: "valid_key".to_string(),
            value: json!([1, 2, 3]),
            ttl: Some(60),
            remote: true,
        };
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_clear_request_optional_pattern() {
        let req: ClearRequest = serde_json::from_str("{}").unwrap();
        assert!(req.pattern.is_none());

        let req: ClearRequest = serde_json::from_str(r#"{"pattern": "authz:*"}"#).unwrap();
        assert_eq!(req.pattern.as_deref(), Some("authz:*"));
    }
}
