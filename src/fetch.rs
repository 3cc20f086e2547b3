use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use robotstxt::DefaultMatcher;
use url::Url;

use crate::ScraperError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Status codes worth retrying. The registry intermittently answers 403/404
/// for pages that exist, so those are treated as transient too.
const RETRYABLE_STATUS: &[u16] = &[500, 502, 503, 504, 400, 403, 404, 408];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Attempts per URL before giving up.
    pub retries: u32,
    /// Randomized pre-request delay range in milliseconds.
    pub delay_ms: (u64, u64),
}

impl FetchConfig {
    /// At least one request always goes out, even with retries set to 0.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: 30,
            retries: 3,
            delay_ms: (1000, 3000),
        }
    }
}

/// HTTP client wrapper: browser-like headers, randomized delays, robots.txt
/// checks and bounded retries.
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    referer: Option<String>,
    robots: Option<String>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, ScraperError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(
            HeaderName::from_static("upgrade-insecure-requests"),
            HeaderValue::from_static("1"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            config,
            referer: None,
            robots: None,
        })
    }

    /// Sent with every request once the homepage is known.
    pub fn set_referer(&mut self, url: &str) {
        self.referer = Some(url.to_string());
    }

    /// Best-effort load of the origin's robots.txt. Missing or unreachable
    /// robots.txt means everything is allowed.
    pub async fn load_robots(&mut self, origin: &Url) {
        let robots_url = format!(
            "{}://{}/robots.txt",
            origin.scheme(),
            origin.host_str().unwrap_or_default()
        );
        match self.client.get(&robots_url).send().await {
            Ok(res) if res.status().is_success() => match res.text().await {
                Ok(body) => {
                    log::debug!("Loaded robots.txt from {} ({} bytes)", robots_url, body.len());
                    self.robots = Some(body);
                }
                Err(e) => log::warn!("Could not read robots.txt body: {}", e),
            },
            Ok(res) => log::debug!("No robots.txt at {} ({})", robots_url, res.status()),
            Err(e) => log::warn!("Could not fetch {}: {}", robots_url, e),
        }
    }

    pub fn allowed(&self, url: &str) -> bool {
        match &self.robots {
            Some(body) => robots_allows(body, &self.config.user_agent, url),
            None => true,
        }
    }

    pub async fn get(&self, url: &str) -> Result<String, ScraperError> {
        self.execute(url, || self.client.get(url)).await
    }

    pub async fn get_with_query(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, ScraperError> {
        self.execute(url, || self.client.get(url).query(params)).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<String, ScraperError> {
        self.execute(url, || self.client.post(url).form(form)).await
    }

    /// Single-attempt download for attached documents. Failures here are
    /// logged by the caller and never abort record processing.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ScraperError> {
        if !self.allowed(url) {
            log::info!("Skipping {} (disallowed by robots.txt)", url);
            return Err(ScraperError::RobotsDisallowed(url.to_string()));
        }
        self.pause().await;
        let res = self.client.get(url).send().await?.error_for_status()?;
        Ok(res.bytes().await?.to_vec())
    }

    async fn execute<F>(&self, url: &str, make: F) -> Result<String, ScraperError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        if !self.allowed(url) {
            log::info!("Skipping {} (disallowed by robots.txt)", url);
            return Err(ScraperError::RobotsDisallowed(url.to_string()));
        }

        let attempts = self.config.attempts();
        for attempt in 1..=attempts {
            self.pause().await;

            let mut req = make();
            if let Some(referer) = &self.referer {
                req = req.header(REFERER, referer.as_str());
            }

            match req.send().await {
                Ok(res) => {
                    let status = res.status().as_u16();
                    if res.status().is_success() {
                        return Ok(res.text().await?);
                    }
                    if !is_retryable(status) {
                        log::warn!("Non-retryable status {} for {}", status, url);
                        return Err(ScraperError::BadStatus {
                            url: url.to_string(),
                            status,
                        });
                    }
                    log::warn!(
                        "Attempt {}/{} for {} returned {}",
                        attempt,
                        attempts,
                        url,
                        status
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        attempts,
                        url,
                        e
                    );
                }
            }

            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(1000 * u64::from(attempt))).await;
            }
        }

        Err(ScraperError::RetriesExhausted {
            url: url.to_string(),
            attempts,
        })
    }

    async fn pause(&self) {
        let (min, max) = self.config.delay_ms;
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if ms > 0 {
            log::debug!("Waiting {}ms before next request", ms);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

pub fn is_retryable(status: u16) -> bool {
    RETRYABLE_STATUS.contains(&status)
}

pub fn robots_allows(robots_body: &str, user_agent: &str, url: &str) -> bool {
    let mut matcher = DefaultMatcher::default();
    matcher.one_agent_allowed_by_robots(robots_body, user_agent, url)
}

/// Write a raw page snapshot for offline inspection, named by page role and
/// capture time.
pub fn save_snapshot(dir: &Path, role: &str, body: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let path = dir.join(format!("{}_{}.html", role, ts));
    std::fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        for status in [500, 502, 503, 504] {
            assert!(is_retryable(status), "{} should be retryable", status);
        }
    }

    #[test]
    fn flaky_registry_client_errors_are_retryable() {
        for status in [400, 403, 404, 408] {
            assert!(is_retryable(status), "{} should be retryable", status);
        }
    }

    #[test]
    fn other_client_errors_are_not_retryable() {
        for status in [401, 410, 418, 451] {
            assert!(!is_retryable(status), "{} should not be retryable", status);
        }
    }

    #[test]
    fn zero_retries_still_make_one_attempt() {
        let config = FetchConfig {
            retries: 0,
            ..FetchConfig::default()
        };
        assert_eq!(config.attempts(), 1);

        let config = FetchConfig::default();
        assert_eq!(config.attempts(), config.retries);
    }

    #[test]
    fn robots_disallow_is_honored() {
        let body = "User-agent: *\nDisallow: /private/\n";
        assert!(!robots_allows(
            body,
            DEFAULT_USER_AGENT,
            "https://example.com/private/page"
        ));
        assert!(robots_allows(
            body,
            DEFAULT_USER_AGENT,
            "https://example.com/public/page"
        ));
    }

    #[test]
    fn empty_robots_allows_everything() {
        assert!(robots_allows("", DEFAULT_USER_AGENT, "https://example.com/x"));
    }
}
