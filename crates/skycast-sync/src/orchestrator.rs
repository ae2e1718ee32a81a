//! Two-phase forecast loading: paint from cache, then refresh from network.
//!
//! State moves through `Idle → LoadingFromCache → Refreshing → Ready |
//! Degraded | Failed`, driven only by explicit calls to [`SyncOrchestrator::start`]
//! and [`SyncOrchestrator::refresh`]. Every transition is published to
//! subscribers in order.
//!
//! Refreshes are numbered. A result is applied only if it is newer than
//! the last applied one, so an early refresh that resolves late can't
//! overwrite the outcome of a later one.
//!
//! Cache reads and writes run on the blocking pool, never on the async
//! executor, and no state lock is held while they run.

use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use skycast_core::{Config, NetworkError};

use crate::cache::ForecastCache;
use crate::client::ForecastClient;
use crate::clock::Clock;
use crate::store::KeyValueStore;
use crate::types::{CacheEntry, DataSource, Provenance, SyncPhase, SyncState};

/// States buffered per subscriber before further updates are dropped for it
pub const SUBSCRIBER_BUFFER: usize = 64;

struct Inner<F> {
    state: SyncState<F>,
    /// Highest refresh number handed out
    started: u64,
    /// Highest refresh number whose result was applied
    applied: u64,
    /// Displayed forecast matches the stored cache entry
    persisted: bool,
}

pub struct SyncOrchestrator<F> {
    client: ForecastClient,
    cache: Arc<ForecastCache<F>>,
    data_source: DataSource,
    inner: Mutex<Inner<F>>,
    /// Held while a refresh result is checked, persisted and applied
    reconcile: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<mpsc::SyncSender<SyncState<F>>>>,
}

impl<F> SyncOrchestrator<F>
where
    F: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(client: ForecastClient, cache: ForecastCache<F>, data_source: DataSource) -> Self {
        Self {
            client,
            cache: Arc::new(cache),
            data_source,
            inner: Mutex::new(Inner {
                state: SyncState::default(),
                started: 0,
                applied: 0,
                persisted: false,
            }),
            reconcile: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let client = ForecastClient::from_config(&config.forecast)?;
        let cache = ForecastCache::from_config(&config.cache, store, clock);
        let data_source = DataSource::new(&config.forecast.data_source);
        Ok(Self::new(client, cache, data_source))
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState<F> {
        self.inner.lock().state.clone()
    }

    /// Receive every state published from now on.
    ///
    /// Each receiver buffers up to [`SUBSCRIBER_BUFFER`] states. While it is
    /// full, new states are dropped for that receiver only; a dropped
    /// receiver is unsubscribed on the next publish.
    pub fn subscribe(&self) -> mpsc::Receiver<SyncState<F>> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, state: &SyncState<F>) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(state.clone()) {
                Ok(()) => true,
                Err(mpsc::TrySendError::Full(_)) => {
                    tracing::debug!("Subscriber is not draining states, skipping update");
                    true
                }
                Err(mpsc::TrySendError::Disconnected(_)) => false,
            });
    }

    /// Initial load: emit cached data if any, then refresh from the network.
    pub async fn start(&self) -> SyncState<F> {
        {
            let mut inner = self.inner.lock();
            inner.state.phase = SyncPhase::LoadingFromCache;
            self.publish(&inner.state);
        }

        match self.load_cached().await {
            Some(entry) => {
                let mut inner = self.inner.lock();
                if inner.applied > 0 {
                    tracing::debug!("A refresh already landed, not showing the cached forecast");
                } else {
                    tracing::info!(
                        "Showing cached forecast from {} (timestamp {})",
                        entry.data_source,
                        entry.timestamp
                    );
                    inner.persisted = true;
                    inner.state = SyncState {
                        phase: SyncPhase::Refreshing,
                        loaded: true,
                        forecast: Some(entry.forecast),
                        source: Some(Provenance::Cache),
                        cache_timestamp: Some(entry.timestamp),
                        data_source: Some(entry.data_source),
                        refreshing: true,
                        refresh_error: None,
                        error: None,
                    };
                    self.publish(&inner.state);
                }
            }
            None => tracing::debug!("No cached forecast available"),
        }

        self.refresh().await
    }

    /// Fetch fresh data and reconcile it with what is displayed.
    ///
    /// Never fails: errors end up in the returned state.
    pub async fn refresh(&self) -> SyncState<F> {
        let seq = self.begin_refresh();
        let result = self.client.fetch_forecast::<F>(&self.data_source).await;
        self.complete_refresh(seq, result).await
    }

    fn begin_refresh(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.started += 1;
        let seq = inner.started;

        let state = &mut inner.state;
        state.phase = SyncPhase::Refreshing;
        state.refreshing = true;
        state.error = None;
        state.loaded = state.forecast.is_some();

        tracing::debug!("Starting forecast refresh #{}", seq);
        self.publish(&inner.state);
        seq
    }

    async fn complete_refresh(&self, seq: u64, result: Result<F, NetworkError>) -> SyncState<F> {
        // One result at a time: cache writes land in refresh order
        let _reconciling = self.reconcile.lock().await;

        {
            let inner = self.inner.lock();
            if seq <= inner.applied {
                tracing::debug!(
                    "Discarding result of refresh #{} (#{} already applied)",
                    seq,
                    inner.applied
                );
                return inner.state.clone();
            }
        }

        let saved_at = match &result {
            Ok(forecast) => self.persist(forecast).await,
            Err(_) => None,
        };

        let mut inner = self.inner.lock();
        inner.applied = seq;
        let refreshing = inner.started > seq;

        match result {
            Ok(forecast) => {
                if saved_at.is_none() {
                    tracing::warn!("Fresh forecast could not be cached, showing it unpersisted");
                }
                tracing::info!("Forecast refreshed from network");
                inner.persisted = saved_at.is_some();
                inner.state = SyncState {
                    phase: SyncPhase::Ready,
                    loaded: true,
                    forecast: Some(forecast),
                    source: Some(Provenance::Network),
                    cache_timestamp: saved_at,
                    data_source: Some(self.data_source.clone()),
                    refreshing,
                    refresh_error: None,
                    error: None,
                };
            }
            Err(e) if inner.state.forecast.is_some() => {
                tracing::warn!("Refresh failed, keeping displayed forecast: {}", e);
                let persisted = inner.persisted;
                let state = &mut inner.state;
                state.phase = SyncPhase::Degraded;
                state.loaded = true;
                if persisted {
                    // Displayed data is the stored entry
                    state.source = Some(Provenance::Cache);
                }
                state.refreshing = refreshing;
                state.refresh_error = Some(e);
                state.error = None;
            }
            Err(e) => {
                tracing::error!("Forecast load failed with nothing to show: {}", e);
                inner.persisted = false;
                inner.state = SyncState {
                    phase: SyncPhase::Failed,
                    loaded: true,
                    forecast: None,
                    source: Some(Provenance::Network),
                    cache_timestamp: None,
                    data_source: None,
                    refreshing,
                    refresh_error: None,
                    error: Some(e),
                };
            }
        }

        self.publish(&inner.state);
        inner.state.clone()
    }

    async fn load_cached(&self) -> Option<CacheEntry<F>> {
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.load()).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Forecast cache read task failed: {}", e);
                None
            }
        }
    }

    async fn persist(&self, forecast: &F) -> Option<i64> {
        let cache = self.cache.clone();
        let forecast = forecast.clone();
        let data_source = self.data_source.clone();
        match tokio::task::spawn_blocking(move || cache.save_stamped(&forecast, &data_source)).await
        {
            Ok(saved_at) => saved_at,
            Err(e) => {
                tracing::error!("Forecast cache write task failed: {}", e);
                None
            }
        }
    }

    /// Hide a non-fatal refresh error without refetching.
    pub fn dismiss_refresh_error(&self) {
        let mut inner = self.inner.lock();
        if inner.state.refresh_error.take().is_some() {
            self.publish(&inner.state);
        }
    }

    /// Drop the persisted entry. What is displayed stays as it is.
    pub async fn clear_cache(&self) {
        let _reconciling = self.reconcile.lock().await;
        let cache = self.cache.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || cache.clear()).await {
            tracing::error!("Forecast cache clear task failed: {}", e);
            return;
        }
        self.inner.lock().persisted = false;
    }
}
