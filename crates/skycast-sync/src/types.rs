use serde::{Deserialize, Serialize};
use skycast_core::NetworkError;

/// Schema version written into every cache entry
pub const CACHE_SCHEMA_VERSION: &str = "1.0";

/// Storage key of the persisted forecast entry
pub const FORECAST_CACHE_KEY: &str = "skycast.forecast_cache";

/// Prefix of banner dismissal keys; the cache timestamp is appended
pub const DISMISSAL_KEY_PREFIX: &str = "skycast.banner_dismissed.";

/// Opaque forecast body, for callers that don't model the payload
pub type OpaqueForecast = serde_json::Value;

/// Backend profile that produced a forecast (e.g. "real", "mock")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSource(String);

impl DataSource {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn real() -> Self {
        Self::new("real")
    }

    pub fn mock() -> Self {
        Self::new("mock")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted unit: one forecast snapshot plus its metadata.
///
/// Stored as `{ forecast, timestamp, dataSource, version }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<F> {
    pub forecast: F,
    /// Epoch milliseconds, stamped by the cache at write time
    pub timestamp: i64,
    pub data_source: DataSource,
    #[serde(rename = "version")]
    pub schema_version: String,
}

/// Where the currently displayed forecast came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Network,
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    LoadingFromCache,
    Refreshing,
    /// Fresh network data is displayed
    Ready,
    /// Cached data is displayed after a failed refresh
    Degraded,
    /// Nothing to display and the fetch failed
    Failed,
}

/// What the presentation layer should render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// No data yet, fetch in flight
    Loading,
    /// No data and the fetch failed; offer a retry
    Blocked,
    /// Data available (possibly with a non-blocking warning)
    Content,
}

/// Observable state of the two-phase load.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState<F> {
    pub phase: SyncPhase,
    /// Whether a load outcome (data or fatal error) is available
    pub loaded: bool,
    pub forecast: Option<F>,
    pub source: Option<Provenance>,
    /// Timestamp of the displayed data
    pub cache_timestamp: Option<i64>,
    pub data_source: Option<DataSource>,
    pub refreshing: bool,
    /// Non-fatal: the last refresh failed but data is still displayed
    pub refresh_error: Option<NetworkError>,
    /// Fatal: nothing to display
    pub error: Option<NetworkError>,
}

impl<F> Default for SyncState<F> {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            loaded: false,
            forecast: None,
            source: None,
            cache_timestamp: None,
            data_source: None,
            refreshing: false,
            refresh_error: None,
            error: None,
        }
    }
}

impl<F> SyncState<F> {
    pub fn is_from_cache(&self) -> bool {
        self.source == Some(Provenance::Cache)
    }

    pub fn display_mode(&self) -> DisplayMode {
        if self.forecast.is_some() {
            DisplayMode::Content
        } else if self.error.is_some() {
            DisplayMode::Blocked
        } else {
            DisplayMode::Loading
        }
    }
}

/// Connectivity/staleness banner classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerKind {
    Offline,
    Stale,
    Cached,
}

impl BannerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Stale => "stale",
            Self::Cached => "cached",
        }
    }

    /// Default banner headline
    pub fn description(&self) -> &'static str {
        match self {
            Self::Offline => "You are offline. Showing the last saved forecast.",
            Self::Stale => "Showing saved forecast. It may be outdated.",
            Self::Cached => "Showing saved forecast.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_entry_wire_format() {
        let entry = CacheEntry {
            forecast: serde_json::json!({"regions": []}),
            timestamp: 1_700_000_000_000,
            data_source: DataSource::mock(),
            schema_version: CACHE_SCHEMA_VERSION.to_string(),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["dataSource"], "mock");
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert!(json.get("schemaVersion").is_none());
    }

    #[test]
    fn test_display_mode() {
        let mut state: SyncState<OpaqueForecast> = SyncState::default();
        assert_eq!(state.display_mode(), DisplayMode::Loading);

        state.error = Some(NetworkError::Timeout);
        assert_eq!(state.display_mode(), DisplayMode::Blocked);

        state.forecast = Some(serde_json::json!({}));
        assert_eq!(state.display_mode(), DisplayMode::Content);
    }

    #[test]
    fn test_banner_kind_names() {
        assert_eq!(BannerKind::Offline.as_str(), "offline");
        assert_eq!(BannerKind::Stale.as_str(), "stale");
        assert_eq!(
            serde_json::to_string(&BannerKind::Cached).unwrap(),
            "\"cached\""
        );
    }

    #[test]
    fn test_provenance_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Provenance::Network).unwrap(),
            "\"network\""
        );
    }
}
