//! Banner dismissal tied to the data snapshot it was dismissed for.
//!
//! Records are stored as `<prefix><timestamp> = "true"`. Every call prunes
//! records for other timestamps, so at most one survives and new data
//! always brings the banner back.

use std::sync::Arc;

use skycast_core::CacheConfig;

use crate::store::KeyValueStore;
use crate::types::DISMISSAL_KEY_PREFIX;

const DISMISSED: &str = "true";

pub struct DismissalTracker {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl DismissalTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_prefix(store, DISMISSAL_KEY_PREFIX)
    }

    pub fn with_prefix(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_prefix(store, &config.dismissal_key_prefix)
    }

    fn key(&self, timestamp: i64) -> String {
        format!("{}{}", self.prefix, timestamp)
    }

    /// Whether the banner was dismissed for data stamped `cache_timestamp`.
    pub fn is_dismissed(&self, cache_timestamp: Option<i64>) -> bool {
        let Some(timestamp) = cache_timestamp else {
            return false;
        };
        let key = self.key(timestamp);
        self.prune_except(&key);

        match self.store.get(&key) {
            Ok(value) => value.as_deref() == Some(DISMISSED),
            Err(e) => {
                tracing::warn!("Failed to read banner dismissal: {}", e);
                false
            }
        }
    }

    pub fn dismiss(&self, cache_timestamp: Option<i64>) {
        let Some(timestamp) = cache_timestamp else {
            return;
        };
        let key = self.key(timestamp);
        self.prune_except(&key);

        if let Err(e) = self.store.set(&key, DISMISSED) {
            tracing::warn!("Failed to record banner dismissal: {}", e);
        }
    }

    /// Forget the dismissal for `cache_timestamp`.
    pub fn clear(&self, cache_timestamp: Option<i64>) {
        let Some(timestamp) = cache_timestamp else {
            return;
        };
        let key = self.key(timestamp);
        self.prune_except(&key);

        if let Err(e) = self.store.remove(&key) {
            tracing::warn!("Failed to clear banner dismissal: {}", e);
        }
    }

    fn prune_except(&self, current: &str) {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to list banner dismissals: {}", e);
                return;
            }
        };

        for key in keys
            .iter()
            .filter(|k| k.starts_with(&self.prefix) && k.as_str() != current)
        {
            tracing::debug!("Pruning superseded banner dismissal {}", key);
            if let Err(e) = self.store.remove(key) {
                tracing::warn!("Failed to prune banner dismissal {}: {}", key, e);
            }
        }
    }
}
