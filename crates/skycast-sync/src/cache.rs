//! Last-known-good forecast, persisted under a single key.
//!
//! Every storage failure is absorbed here: `save` reports a bool, `load`
//! returns `None`, `clear` never fails. Entries that can't be parsed, lack
//! required fields, or carry a different schema version are deleted by the
//! read that finds them.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use skycast_core::{CacheConfig, StorageError};

use crate::clock::Clock;
use crate::store::KeyValueStore;
use crate::types::{CacheEntry, DataSource, CACHE_SCHEMA_VERSION, FORECAST_CACHE_KEY};

pub struct ForecastCache<F> {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    schema_version: String,
    _payload: PhantomData<fn() -> F>,
}

impl<F> ForecastCache<F>
where
    F: Serialize + DeserializeOwned,
{
    /// Cache under the default key and schema version.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_key(store, clock, FORECAST_CACHE_KEY, CACHE_SCHEMA_VERSION)
    }

    pub fn with_key(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            schema_version: schema_version.into(),
            _payload: PhantomData,
        }
    }

    pub fn from_config(
        config: &CacheConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_key(store, clock, &config.cache_key, &config.schema_version)
    }

    /// Persist a forecast. Returns `true` only if the write reads back intact.
    pub fn save(&self, forecast: &F, data_source: &DataSource) -> bool {
        self.save_stamped(forecast, data_source).is_some()
    }

    /// Like [`save`](Self::save), returning the timestamp written on success.
    pub fn save_stamped(&self, forecast: &F, data_source: &DataSource) -> Option<i64> {
        match self.try_save(forecast, data_source) {
            Ok(timestamp) => {
                tracing::debug!("Cached forecast from {} at {}", data_source, timestamp);
                Some(timestamp)
            }
            Err(e) if e.is_quota_exceeded() => {
                tracing::warn!("Forecast cache over quota, dropping stored entry: {}", e);
                if let Err(e) = self.store.remove(&self.key) {
                    tracing::warn!("Failed to drop forecast cache after quota error: {}", e);
                }
                None
            }
            Err(e) => {
                tracing::warn!("Failed to save forecast cache: {}", e);
                None
            }
        }
    }

    fn try_save(&self, forecast: &F, data_source: &DataSource) -> Result<i64, StorageError> {
        let timestamp = self.clock.now_millis();
        let entry = CacheEntry {
            forecast,
            timestamp,
            data_source: data_source.clone(),
            schema_version: self.schema_version.clone(),
        };
        let serialized = serde_json::to_string(&entry)
            .map_err(|e| StorageError::Backend(format!("serialize failed: {}", e)))?;

        self.store.set(&self.key, &serialized)?;

        match self.store.get(&self.key)? {
            Some(stored) if stored == serialized => Ok(timestamp),
            _ => Err(StorageError::Backend("write was not persisted".into())),
        }
    }

    /// Read the cached entry, discarding it if it's unusable.
    pub fn load(&self) -> Option<CacheEntry<F>> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read forecast cache: {}", e);
                return None;
            }
        };

        match self.decode(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Discarding forecast cache: {}", e);
                self.clear();
                None
            }
        }
    }

    fn decode(&self, raw: &str) -> Result<CacheEntry<F>, StorageError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| StorageError::Corruption(e.to_string()))?;

        let found = value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if found != self.schema_version {
            return Err(StorageError::VersionMismatch {
                expected: self.schema_version.clone(),
                found: found.to_string(),
            });
        }

        for field in ["forecast", "timestamp"] {
            if value.get(field).map_or(true, Value::is_null) {
                return Err(StorageError::Corruption(format!("missing field `{}`", field)));
            }
        }

        serde_json::from_value(value).map_err(|e| StorageError::Corruption(e.to_string()))
    }

    /// Remove the cached entry. Failures are logged and swallowed.
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            tracing::warn!("Failed to clear forecast cache: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;

    const NOW: i64 = 1_760_000_000_000;

    fn setup() -> (Arc<MemoryStore>, ForecastCache<Value>) {
        let store = Arc::new(MemoryStore::new());
        let cache = ForecastCache::new(store.clone(), Arc::new(ManualClock::new(NOW)));
        (store, cache)
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let (_, cache) = setup();
        let forecast = json!({"regions": [{"name": "North", "high": 21.5}]});

        assert!(cache.save(&forecast, &DataSource::real()));

        let entry = cache.load().unwrap();
        assert_eq!(entry.forecast, forecast);
        assert_eq!(entry.data_source, DataSource::real());
        assert_eq!(entry.timestamp, NOW);
        assert_eq!(entry.schema_version, CACHE_SCHEMA_VERSION);
    }

    #[test]
    fn test_typed_payload() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Outlook {
            summary: String,
            alerts: Vec<String>,
        }

        let store = Arc::new(MemoryStore::new());
        let cache: ForecastCache<Outlook> =
            ForecastCache::new(store, Arc::new(ManualClock::new(NOW)));
        let outlook = Outlook {
            summary: "Showers".into(),
            alerts: vec!["Wind".into()],
        };

        assert!(cache.save(&outlook, &DataSource::mock()));
        assert_eq!(cache.load().unwrap().forecast, outlook);
    }

    #[test]
    fn test_last_write_wins() {
        let (_, cache) = setup();
        cache.save(&json!({"v": 1}), &DataSource::real());
        cache.save(&json!({"v": 2}), &DataSource::mock());

        let entry = cache.load().unwrap();
        assert_eq!(entry.forecast, json!({"v": 2}));
        assert_eq!(entry.data_source, DataSource::mock());
    }

    #[test]
    fn test_version_mismatch_is_removed() {
        let (store, cache) = setup();
        store
            .set(
                FORECAST_CACHE_KEY,
                r#"{"forecast":{},"timestamp":1,"dataSource":"real","version":"0.9"}"#,
            )
            .unwrap();

        assert!(cache.load().is_none());
        assert_eq!(store.get(FORECAST_CACHE_KEY).unwrap(), None);
    }

    #[test]
    fn test_missing_version_is_removed() {
        let (store, cache) = setup();
        store
            .set(
                FORECAST_CACHE_KEY,
                r#"{"forecast":{},"timestamp":1,"dataSource":"real"}"#,
            )
            .unwrap();

        assert!(cache.load().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_json_is_removed() {
        let (store, cache) = setup();
        store.set(FORECAST_CACHE_KEY, "not json {").unwrap();

        assert!(cache.load().is_none());
        assert_eq!(store.get(FORECAST_CACHE_KEY).unwrap(), None);
    }

    #[test]
    fn test_missing_required_fields_are_removed() {
        let (store, cache) = setup();
        store
            .set(
                FORECAST_CACHE_KEY,
                r#"{"forecast":null,"timestamp":1,"dataSource":"real","version":"1.0"}"#,
            )
            .unwrap();
        assert!(cache.load().is_none());
        assert!(store.is_empty());

        store
            .set(
                FORECAST_CACHE_KEY,
                r#"{"forecast":{},"dataSource":"real","version":"1.0"}"#,
            )
            .unwrap();
        assert!(cache.load().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_custom_schema_version() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let v1: ForecastCache<Value> =
            ForecastCache::with_key(store.clone(), clock.clone(), "k", "1.0");
        let v2: ForecastCache<Value> = ForecastCache::with_key(store.clone(), clock, "k", "2.0");

        assert!(v1.save(&json!({"a": 1}), &DataSource::real()));
        assert!(v2.load().is_none());
        assert!(v1.load().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (store, cache) = setup();
        cache.clear();
        assert!(store.is_empty());

        cache.save(&json!({}), &DataSource::real());
        cache.clear();
        cache.clear();
        assert!(store.is_empty());
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_quota_exceeded_drops_existing_entry() {
        let store = Arc::new(MemoryStore::with_quota(200));
        let cache: ForecastCache<Value> =
            ForecastCache::new(store.clone(), Arc::new(ManualClock::new(NOW)));

        assert!(cache.save(&json!({"small": true}), &DataSource::real()));
        assert!(!store.is_empty());

        let big = json!({"blob": "x".repeat(500)});
        assert!(!cache.save(&big, &DataSource::real()));
        assert_eq!(store.get(FORECAST_CACHE_KEY).unwrap(), None);
    }

    #[test]
    fn test_save_stamped_returns_clock_time() {
        let (_, cache) = setup();
        assert_eq!(cache.save_stamped(&json!({}), &DataSource::real()), Some(NOW));
    }
}
