//! Blocking HTTP client with browser-like headers, a politeness delay between requests, and one retry.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use std::time::{Duration, Instant};
use tracing::debug;

/// Desktop Chrome.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 250;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for get_with_retry: the initial request plus one retry.
const DEFAULT_RETRY_COUNT: u32 = 2;
/// Default backoff in seconds before each retry.
const DEFAULT_BACKOFF_SECS: [u64; 1] = [1];

/// Blocking HTTP client that enforces a delay between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Build a client with default User-Agent, timeout, delay and retry settings.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// Perform a POST request with form data. Not retried.
    pub fn post_form(
        &mut self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        self.wait_delay();
        let result = self.inner.post(url).form(form).send();
        self.last_request = Some(Instant::now());
        result
    }

    /// Perform a GET request, retrying transient failures.
    ///
    /// Retries on timeout, connection errors and HTTP 5xx until the attempt budget is spent.
    /// Other errors and statuses (including 4xx) are returned immediately; on the final attempt
    /// a 5xx response is returned as-is so the caller can report its status.
    /// `referer` is sent as the `Referer` header when set (image hosts check it).
    pub fn get_with_retry(
        &mut self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let mut attempt = 1;
        loop {
            self.wait_delay();
            let mut request = self.inner.get(url);
            if let Some(r) = referer {
                request = request.header(REFERER, r);
            }
            let result = request.send();
            self.last_request = Some(Instant::now());
            let last_attempt = attempt >= self.retry_count;
            match result {
                Ok(response) if response.status().is_server_error() && !last_attempt => {
                    debug!(
                        "HTTP {} from {} (attempt {}/{}), retrying",
                        response.status().as_u16(),
                        url,
                        attempt,
                        self.retry_count
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if (e.is_timeout() || e.is_connect()) && !last_attempt => {
                    debug!(
                        "request to {} failed (attempt {}/{}): {}, retrying",
                        url, attempt, self.retry_count, e
                    );
                }
                Err(e) => return Err(e),
            }
            std::thread::sleep(self.backoff_for(attempt));
            attempt += 1;
        }
    }

    /// Backoff before the retry that follows `attempt` (1-based). Reuses the last value when the list is short.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let secs = self
            .backoff_secs
            .get(attempt.saturating_sub(1) as usize)
            .or_else(|| self.backoff_secs.last())
            .copied()
            .unwrap_or(1);
        Duration::from_secs(secs)
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

/// Builder for PoliteClient with optional User-Agent, delay, timeout, and retry settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a desktop browser string is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set delay between requests in milliseconds. Default 250.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Set request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set number of GET attempts for transient failures (default 2, i.e. one retry).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Set backoff delays in seconds before each retry. If shorter than needed, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    /// Build the blocking client and polite wrapper.
    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
        );
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            DEFAULT_BACKOFF_SECS.to_vec()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_millis(self.delay_ms),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}
