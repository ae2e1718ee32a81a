//! HTTP GET with a hard per-attempt timeout and a bounded retry count.
//!
//! Every failed attempt is retried immediately, with no backoff:
//! - Transport errors (connect, DNS, reset)
//! - Attempts that outlive the timeout
//!
//! HTTP status codes are NOT inspected here. A 500 is a successful
//! attempt from this layer's point of view; callers check the status.
//!
//! When the timer wins the race the request future is dropped, which
//! aborts the in-flight reqwest call instead of leaving it running. With
//! [`RetryingFetcher::fetch_with`] the body read is part of that race.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use skycast_core::{ForecastConfig, NetworkError, ReqwestErrorExt};

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Default retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Per-request fetch settings
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Hard limit for a single attempt
    pub timeout: Duration,
    /// Attempts made = max_retries + 1
    pub max_retries: u32,
    pub headers: HeaderMap,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            headers: HeaderMap::new(),
        }
    }
}

impl FetchOptions {
    pub fn new(timeout_ms: u64, max_retries: u32) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            headers: HeaderMap::new(),
        }
    }

    pub fn from_config(config: &ForecastConfig) -> Result<Self, NetworkError> {
        let options = Self::new(config.timeout_ms, config.max_retries);
        match config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => options.with_bearer_token(token),
            None => Ok(options),
        }
    }

    /// Attach `Authorization: Bearer <token>`.
    pub fn with_bearer_token(mut self, token: &str) -> Result<Self, NetworkError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| NetworkError::ConnectionFailed(format!("invalid auth token: {}", e)))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds, racing each attempt against the timeout.
///
/// `operation` receives the 1-based attempt number. Returns the first
/// success, or the last error once `max_retries + 1` attempts have failed.
pub async fn with_timeout_retries<T, F, Fut>(
    options: &FetchOptions,
    mut operation: F,
) -> Result<T, NetworkError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, NetworkError>>,
{
    let total = options.total_attempts();
    let mut last_error = NetworkError::Timeout;

    for attempt in 1..=total {
        tracing::debug!("Fetch attempt {} of {}", attempt, total);

        match tokio::time::timeout(options.timeout, operation(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::info!("Fetch succeeded on attempt {} of {}", attempt, total);
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                tracing::warn!("Fetch attempt {} of {} failed: {}", attempt, total, e);
                last_error = e;
            }
            Err(_) => {
                tracing::warn!(
                    "Fetch attempt {} of {} timed out after {:?}",
                    attempt,
                    total,
                    options.timeout
                );
                last_error = NetworkError::Timeout;
            }
        }
    }

    tracing::error!("All {} fetch attempts exhausted: {}", total, last_error);
    Err(last_error)
}

/// Issues GET requests through [`with_timeout_retries`].
#[derive(Debug, Clone, Default)]
pub struct RetryingFetcher {
    client: Client,
}

impl RetryingFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GET `url`. The response is returned whatever its status.
    ///
    /// Only the headers are covered by the timeout; use [`Self::fetch_with`]
    /// when the body must be read inside the attempt.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Response, NetworkError> {
        self.fetch_with(url, options, |response| async move { Ok::<_, NetworkError>(response) })
            .await
    }

    /// GET `url` and run `read` on the response inside the same attempt.
    ///
    /// A body that stalls counts against the per-attempt timeout. An `Err`
    /// from `read` is retried like a transport failure, so `read` should
    /// return final outcomes (bad status, bad JSON) inside `Ok`.
    pub async fn fetch_with<T, R, Fut>(
        &self,
        url: &str,
        options: &FetchOptions,
        read: R,
    ) -> Result<T, NetworkError>
    where
        R: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, NetworkError>>,
    {
        let read = &read;
        with_timeout_retries(options, move |_| {
            let request = self.client.get(url).headers(options.headers.clone());
            async move {
                let response = request
                    .send()
                    .await
                    .map_err(ReqwestErrorExt::into_network_error)?;
                read(response).await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_fetch_options_default() {
        let options = FetchOptions::default();
        assert_eq!(options.timeout, Duration::from_millis(10_000));
        assert_eq!(options.max_retries, 2);
        assert_eq!(options.total_attempts(), 3);
    }

    #[test]
    fn test_bearer_token_header() {
        let options = FetchOptions::default().with_bearer_token("abc").unwrap();
        assert_eq!(options.headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }

    #[test]
    fn test_bearer_token_rejects_control_chars() {
        assert!(FetchOptions::default().with_bearer_token("bad\ntoken").is_err());
    }

    #[tokio::test]
    async fn test_retry_exhaustion_makes_n_plus_one_attempts() {
        let attempts = AtomicU32::new(0);
        let options = FetchOptions::new(1_000, 3);

        let result: Result<(), _> = with_timeout_retries(&options, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(NetworkError::ConnectionFailed("refused".into())) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            result.unwrap_err(),
            NetworkError::ConnectionFailed("refused".into())
        );
    }

    #[tokio::test]
    async fn test_zero_retries_makes_one_attempt() {
        let attempts = AtomicU32::new(0);
        let options = FetchOptions::new(1_000, 0);

        let result: Result<(), _> = with_timeout_retries(&options, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(NetworkError::Timeout) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_failures_stops_retrying() {
        let attempts = AtomicU32::new(0);
        let options = FetchOptions::new(1_000, 5);

        let result = with_timeout_retries(&options, |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(NetworkError::ConnectionFailed("reset".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out_and_retries() {
        let options = FetchOptions::new(20, 1);

        let result = with_timeout_retries(&options, |attempt| async move {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(attempt)
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_all_attempts_timing_out_yields_timeout() {
        let options = FetchOptions::new(10, 2);

        let result: Result<(), _> = with_timeout_retries(&options, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap_err(), NetworkError::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_returns_error_status_without_retrying() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/forecasts/real"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = RetryingFetcher::default();
        let url = format!("{}/forecasts/real", mock_server.uri());
        let response = fetcher.fetch(&url, &FetchOptions::new(1_000, 2)).await.unwrap();

        assert_eq!(response.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn test_fetch_sends_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/forecasts/mock"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let options = FetchOptions::new(1_000, 0)
            .with_bearer_token("secret")
            .unwrap();
        let url = format!("{}/forecasts/mock", mock_server.uri());
        let response = RetryingFetcher::default().fetch(&url, &options).await.unwrap();

        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_fetch_times_out_slow_server() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let url = format!("{}/forecasts/real", mock_server.uri());
        let err = RetryingFetcher::default()
            .fetch(&url, &FetchOptions::new(50, 1))
            .await
            .unwrap_err();

        assert_eq!(err, NetworkError::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_with_times_out_stalled_body() {
        let (addr, connections) = stalled_body_server().await;

        let url = format!("http://{}/forecasts/real", addr);
        let started = std::time::Instant::now();
        let err = RetryingFetcher::default()
            .fetch_with(&url, &FetchOptions::new(100, 1), |response| async move {
                response.bytes().await.map_err(ReqwestErrorExt::into_network_error)
            })
            .await
            .unwrap_err();

        assert_eq!(err, NetworkError::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    /// Serves headers promising 100 bytes, sends a few, then goes silent.
    async fn stalled_body_server() -> (std::net::SocketAddr, std::sync::Arc<AtomicU32>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = std::sync::Arc::new(AtomicU32::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"data\":")
                        .await;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });

        (addr, connections)
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("http://127.0.0.1:{}/forecasts/real", port);
        let err = RetryingFetcher::default()
            .fetch(&url, &FetchOptions::new(1_000, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, NetworkError::ConnectionFailed(_)));
    }
}
