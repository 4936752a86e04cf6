use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "scraper.toml";
const ENV_PREFIX: &str = "IMDB";
/// User agent strings contain both `,` and `;`, so env lists split on `|`.
const ENV_LIST_SEPARATOR: &str = "|";

/// Immutable run settings, built once at startup and shared by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub base_url: String,
    /// Listing page template; `{start}` is replaced by the 1-based rank offset.
    pub listing_url: String,
    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
    pub accept_language: String,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub workers: usize,
    pub robots_user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: PathBuf::from("data/imdb.sqlite"),
            base_url: "https://www.imdb.com".into(),
            listing_url:
                "https://www.imdb.com/search/title/?groups=top_1000&start={start}&ref_=adv_nxt"
                    .into(),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".into(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15".into(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".into(),
            ],
            proxies: Vec::new(),
            accept_language: "en-US,en;q=0.5".into(),
            request_delay_ms: 4000,
            timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 2000,
            workers: 1,
            robots_user_agent: "*".into(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional config file, then `IMDB__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_sources(path, None)
    }

    fn from_sources(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let explicit = path.is_some();

        let settings = Config::builder()
            .add_source(File::from(file).required(explicit))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(ENV_LIST_SEPARATOR)
                    .with_list_parse_key("user_agents")
                    .with_list_parse_key("proxies")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to load settings from {:?}", file))?;

        let parsed: Settings = settings
            .try_deserialize()
            .context("Invalid scraper settings")?;
        parsed.validate()
    }

    fn validate(mut self) -> Result<Self> {
        if !self.listing_url.contains("{start}") {
            anyhow::bail!("listing_url must contain a {{start}} placeholder");
        }
        self.user_agents.retain(|ua| !ua.trim().is_empty());
        self.proxies.retain(|p| !p.trim().is_empty());
        if self.user_agents.is_empty() {
            anyhow::bail!("at least one user agent is required");
        }
        self.workers = self.workers.max(1);
        Ok(self)
    }

    pub fn listing_page(&self, start: u32) -> String {
        self.listing_url.replace("{start}", &start.to_string())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
