//! Banner classification from reachability, data provenance and data age.
//!
//! Precedence, first match wins:
//! 1. offline
//! 2. from cache and older than the stale threshold
//! 3. from cache
//! 4. no banner

use std::sync::Arc;
use std::time::Duration;

use skycast_core::StatusConfig;

use crate::clock::Clock;
use crate::types::{BannerKind, SyncState};

/// Default age after which cached data gets the "may be outdated" banner
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Default age after which cached data counts as very old
pub const DEFAULT_VERY_OLD_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThresholds {
    pub stale_after: Duration,
    pub very_old_after: Duration,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            very_old_after: DEFAULT_VERY_OLD_AFTER,
        }
    }
}

impl From<&StatusConfig> for StatusThresholds {
    fn from(config: &StatusConfig) -> Self {
        Self {
            stale_after: Duration::from_secs(config.stale_after_secs),
            very_old_after: Duration::from_secs(config.very_old_after_secs),
        }
    }
}

/// Everything the presentation layer needs to render the status banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub banner: Option<BannerKind>,
    /// Displayed data is from cache and past the stale threshold
    pub show_age_warning: bool,
    /// Displayed data is past the very-old threshold
    pub very_old: bool,
    /// e.g. "3 minutes ago"
    pub age_label: Option<String>,
}

/// Elapsed time since `timestamp`; future timestamps count as zero.
pub fn age_at(now_millis: i64, timestamp: i64) -> Duration {
    let elapsed = now_millis.saturating_sub(timestamp).max(0);
    Duration::from_millis(elapsed as u64)
}

/// Pure banner classification.
pub fn classify(
    is_online: bool,
    age: Option<Duration>,
    is_from_cache: bool,
    stale_after: Duration,
) -> Option<BannerKind> {
    if !is_online {
        Some(BannerKind::Offline)
    } else if is_from_cache && age.is_some_and(|age| age > stale_after) {
        Some(BannerKind::Stale)
    } else if is_from_cache {
        Some(BannerKind::Cached)
    } else {
        None
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}

/// Human-readable age: "less than a minute ago", "N minute(s) ago", ...
pub fn format_age(elapsed: Duration) -> String {
    let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    if ms < MINUTE_MS {
        "less than a minute ago".to_string()
    } else if ms < HOUR_MS {
        plural(ms / MINUTE_MS, "minute")
    } else if ms < DAY_MS {
        plural(ms / HOUR_MS, "hour")
    } else {
        plural(ms / DAY_MS, "day")
    }
}

/// Clock-aware wrapper over [`classify`] and [`format_age`].
#[derive(Clone)]
pub struct StatusEvaluator {
    thresholds: StatusThresholds,
    clock: Arc<dyn Clock>,
}

impl StatusEvaluator {
    pub fn new(thresholds: StatusThresholds, clock: Arc<dyn Clock>) -> Self {
        Self { thresholds, clock }
    }

    pub fn from_config(config: &StatusConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(StatusThresholds::from(config), clock)
    }

    pub fn thresholds(&self) -> StatusThresholds {
        self.thresholds
    }

    fn age(&self, timestamp: i64) -> Duration {
        age_at(self.clock.now_millis(), timestamp)
    }

    pub fn evaluate(
        &self,
        is_online: bool,
        cache_timestamp: Option<i64>,
        is_from_cache: bool,
    ) -> Option<BannerKind> {
        classify(
            is_online,
            cache_timestamp.map(|ts| self.age(ts)),
            is_from_cache,
            self.thresholds.stale_after,
        )
    }

    /// Strictly older than the stale threshold.
    pub fn is_stale(&self, timestamp: i64) -> bool {
        self.age(timestamp) > self.thresholds.stale_after
    }

    /// Strictly older than the very-old threshold.
    pub fn is_very_old(&self, timestamp: i64) -> bool {
        self.age(timestamp) > self.thresholds.very_old_after
    }

    pub fn age_label(&self, timestamp: i64) -> String {
        format_age(self.age(timestamp))
    }

    pub fn report<F>(&self, is_online: bool, state: &SyncState<F>) -> StatusReport {
        let from_cache = state.is_from_cache();
        let timestamp = state.cache_timestamp;

        StatusReport {
            banner: self.evaluate(is_online, timestamp, from_cache),
            show_age_warning: from_cache && timestamp.is_some_and(|ts| self.is_stale(ts)),
            very_old: timestamp.is_some_and(|ts| self.is_very_old(ts)),
            age_label: timestamp.map(|ts| self.age_label(ts)),
        }
    }
}
