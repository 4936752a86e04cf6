use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use rand::seq::SliceRandom;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;

const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// A successfully fetched page body.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub latency_ms: i64,
}

/// Page source for the crawl loop. Pacing and retries belong to the implementor.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RawPage, FetchError>> + Send;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
    accept_language: String,
    delay: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    /// One proxy is picked for the lifetime of the client; user agents rotate per request.
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(settings.timeout());
        if let Some(proxy) = settings.proxies.choose(&mut rand::thread_rng()) {
            let proxy_url = if proxy.contains("://") {
                proxy.clone()
            } else {
                format!("http://{}", proxy.trim())
            };
            debug!(proxy = %proxy_url, "using proxy");
            builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
        }

        Ok(HttpFetcher {
            client: builder.build()?,
            user_agents: settings.user_agents.clone(),
            accept_language: settings.accept_language.clone(),
            delay: settings.request_delay(),
            max_retries: settings.max_retries,
            backoff: settings.backoff(),
        })
    }

    /// `backoff * 2^attempt`, capped at ten minutes.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    fn user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    async fn fetch_once(&self, url: &str) -> Result<RawPage, FetchError> {
        let user_agent = self.user_agent();
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT_LANGUAGE, &self.accept_language)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;

        Ok(RawPage {
            url: url.to_string(),
            status: status.as_u16(),
            body,
            latency_ms: start.elapsed().as_millis() as i64,
        })
    }
}

impl Fetch for HttpFetcher {
    /// Waits the configured delay before every request and backs off
    /// exponentially on rate limiting and server errors.
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let mut attempt = 0;
        loop {
            tokio::time::sleep(self.delay).await;
            match self.fetch_once(url).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        url,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        error = %e,
                        "fetch failed, backing off {:.1}s",
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
