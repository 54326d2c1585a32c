//! TTL Policy Module
//!
//! Maps a key's category (the segment before the first delimiter) to a TTL.

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::keys::KEY_DELIMITER;
use crate::error::{CacheError, Result};

/// Fallback TTL for keys whose category has no row.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Built-in categories.
const DEFAULT_TABLE: &[(&str, u64)] = &[
    ("authz", 300),
    ("user_profile", 900),
    ("embedding", 86_400),
    ("monitoring", 60),
];

// == TTL Policy ==
/// Immutable category to TTL table. Read-only after construction, so it can be
/// shared across threads without locking.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    table: HashMap<String, Duration>,
    default_ttl: Duration,
}

impl TtlPolicy {
    /// Builds a policy, rejecting empty categories and zero durations.
    pub fn new<I, S>(rows: I, default_ttl: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Duration)>,
        S: Into<String>,
    {
        if default_ttl.is_zero() {
            return Err(CacheError::Configuration(
                "default TTL must be positive".to_string(),
            ));
        }

        let mut table = HashMap::new();
        for (category, ttl) in rows {
            let category = category.into();
            if category.is_empty() || category.contains(KEY_DELIMITER) {
                return Err(CacheError::Configuration(format!(
                    "invalid TTL category '{}'",
                    category
                )));
            }
            if ttl.is_zero() {
                return Err(CacheError::Configuration(format!(
                    "TTL for category '{}' must be positive",
                    category
                )));
            }
            table.insert(category, ttl);
        }

        Ok(Self { table, default_ttl })
    }

    /// The built-in table plus `overrides` (seconds), which win on conflict.
    pub fn with_overrides(overrides: &[(String, u64)], default_ttl: Duration) -> Result<Self> {
        let rows = DEFAULT_TABLE
            .iter()
            .map(|(category, secs)| (category.to_string(), *secs))
            .chain(overrides.iter().cloned())
            .map(|(category, secs)| (category, Duration::from_secs(secs)));
        Self::new(rows, default_ttl)
    }

    // == Lookup ==
    /// TTL for `key`, resolved from its category.
    pub fn ttl_for(&self, key: &str) -> Duration {
        let category = key.split(KEY_DELIMITER).next().unwrap_or(key);
        self.table
            .get(category)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        let table = DEFAULT_TABLE
            .iter()
            .map(|(category, secs)| (category.to_string(), Duration::from_secs(*secs)))
            .collect();
        Self {
            table,
            default_ttl: DEFAULT_TTL,
        }
    }
}
