//! Offline-resilient forecast synchronization for Skycast
//!
//! Fetches forecasts with bounded retries, keeps the last good one in a
//! durable store, serves cache-first loading, and derives the
//! connectivity/staleness banner shown next to the data.

pub mod cache;
pub mod client;
pub mod clock;
pub mod dismissal;
pub mod fetcher;
pub mod orchestrator;
pub mod status;
pub mod store;
pub mod types;

pub use cache::ForecastCache;
pub use client::ForecastClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dismissal::DismissalTracker;
pub use fetcher::{with_timeout_retries, FetchOptions, RetryingFetcher};
pub use orchestrator::SyncOrchestrator;
pub use status::{StatusEvaluator, StatusReport, StatusThresholds};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use types::*;
