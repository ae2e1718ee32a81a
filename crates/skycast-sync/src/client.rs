//! Forecast API client: `GET <base>/forecasts/<data_source>` → `{ "data": ... }`.

use anyhow::{Context, Result};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use skycast_core::{ForecastConfig, NetworkError, ReqwestErrorExt};
use url::Url;

use crate::fetcher::{FetchOptions, RetryingFetcher};
use crate::types::DataSource;

/// Longest slice of an error body kept in the error message
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct ForecastEnvelope<F> {
    data: F,
}

#[derive(Debug, Clone)]
pub struct ForecastClient {
    base_url: Url,
    fetcher: RetryingFetcher,
    options: FetchOptions,
}

impl ForecastClient {
    pub fn new(base_url: &str, options: FetchOptions) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("Invalid forecast base URL")?;
        // Keep the last path segment when joining relative paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            fetcher: RetryingFetcher::default(),
            options,
        })
    }

    pub fn from_config(config: &ForecastConfig) -> Result<Self> {
        let options = FetchOptions::from_config(config).context("Invalid forecast auth token")?;
        Self::new(&config.base_url, options)
    }

    pub fn forecast_url(&self, source: &DataSource) -> Result<Url, NetworkError> {
        self.base_url
            .join(&format!("forecasts/{}", source))
            .map_err(|e| NetworkError::ConnectionFailed(format!("bad forecast URL: {}", e)))
    }

    /// Fetch and decode the forecast for `source`.
    ///
    /// Non-2xx statuses and malformed bodies are failures, like transport
    /// errors, but only transport failures and timeouts are retried. The
    /// body is read inside the timed attempt.
    pub async fn fetch_forecast<F: DeserializeOwned>(
        &self,
        source: &DataSource,
    ) -> Result<F, NetworkError> {
        let url = self.forecast_url(source)?;
        tracing::debug!("Fetching forecast from {}", url);

        let forecast = self
            .fetcher
            .fetch_with(url.as_str(), &self.options, read_forecast::<F>)
            .await??;

        tracing::info!("Fetched forecast from {}", source);
        Ok(forecast)
    }
}

/// Read and decode one response.
///
/// The outer error is a body transport failure (retryable); the inner one
/// is a bad status or a malformed envelope (final).
async fn read_forecast<F: DeserializeOwned>(
    response: Response,
) -> Result<Result<F, NetworkError>, NetworkError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match body.trim() {
            "" => status.canonical_reason().unwrap_or("request failed").to_string(),
            text => text.chars().take(ERROR_BODY_LIMIT).collect(),
        };
        tracing::warn!("Forecast request returned status {}", status);
        return Ok(Err(NetworkError::HttpStatus {
            status: status.as_u16(),
            message,
        }));
    }

    let body = response
        .bytes()
        .await
        .map_err(ReqwestErrorExt::into_network_error)?;
    Ok(serde_json::from_slice::<ForecastEnvelope<F>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|e| NetworkError::InvalidResponse(e.to_string())))
}
