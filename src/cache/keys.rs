//! Key Codec Module
//!
//! Deterministic cache-key construction. Keys have the shape
//! `prefix:part1:part2:...:version`; once that form grows past
//! [`MAX_RAW_KEY_LENGTH`] it is replaced by `prefix:version:hash:<sha256>`.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Separator between key segments.
pub const KEY_DELIMITER: char = ':';

/// Longest raw key kept verbatim.
pub const MAX_RAW_KEY_LENGTH: usize = 200;

/// Version tag used when callers do not supply one.
pub const DEFAULT_KEY_VERSION: &str = "v1";

// == Generate Key ==
/// Builds a cache key from a category prefix, ordered parts and a version tag.
///
/// Parts are escaped so that a delimiter inside a part can never be confused
/// with a segment boundary: `["a:b"]` and `["a", "b"]` yield different keys.
pub fn generate_key<I, P>(parts: I, prefix: &str, version: &str) -> String
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    let mut raw = escape_part(prefix);
    for part in parts {
        raw.push(KEY_DELIMITER);
        raw.push_str(&escape_part(part.as_ref()));
    }
    raw.push(KEY_DELIMITER);
    raw.push_str(&escape_part(version));

    if raw.chars().count() > MAX_RAW_KEY_LENGTH {
        hashed_key(&raw, prefix, version)
    } else {
        raw
    }
}

fn hashed_key(raw: &str, prefix: &str, version: &str) -> String {
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    format!(
        "{prefix}{d}{version}{d}hash{d}{digest}",
        prefix = escape_part(prefix),
        version = escape_part(version),
        d = KEY_DELIMITER,
    )
}

/// Escapes the escape character and the delimiter.
fn escape_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for ch in part.chars() {
        if ch == '\\' || ch == KEY_DELIMITER {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

// == Canonical Parts ==
/// Canonicalizes an argument tuple into key parts.
///
/// A serialized sequence (tuples, vectors, arrays) yields one part per
/// element, anything else a single part. Each part is the element's JSON
/// text, so `"1"` and `1` stay distinct, and maps serialize with sorted keys.
pub fn canonical_parts<A: Serialize + ?Sized>(args: &A) -> Result<Vec<String>> {
    let parts = match serde_json::to_value(args)? {
        Value::Array(items) => items.iter().map(Value::to_string).collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    };
    Ok(parts)
}
