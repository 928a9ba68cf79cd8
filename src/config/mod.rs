use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::CrawlError;
use crate::logging::LoggingConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub proxy: ProxyConfig,
    pub fetch: FetchConfig,
    pub discovery: DiscoveryConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
    pub sites: Vec<SiteSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub sources: Vec<String>,
    pub test_url: String,
    pub source_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub probe_concurrency: usize,
    pub max_failures: u32,
    /// Percentage in [0, 100]
    pub min_success_rate: f64,
    pub health_check_sample: usize,
    pub health_check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub request_timeout_seconds: u64,
    pub delay_min_seconds: f64,
    pub delay_max_seconds: f64,
    pub jitter_seconds: f64,
    pub max_requests_per_session: u32,
    pub session_max_age_seconds: u64,
    pub refresh_cooldown_min_seconds: f64,
    pub refresh_cooldown_max_seconds: f64,
    /// Abort a page instead of going direct when no proxy is available
    pub require_proxy: bool,
    pub page_attempts: u32,
    pub retry_backoff_ms: u64,
    pub delay_between_sites_seconds: u64,
    pub user_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_pages: usize,
    pub admission_keywords: Vec<String>,
    pub financial_keywords: Vec<String>,
    pub program_keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub priority_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub min_interval_ms: u64,
    pub max_input_chars: usize,
}

/// One crawl entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSeed {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl SiteSeed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            city: None,
            country: None,
            kind: None,
        }
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: words(&[
                "https://www.proxy-list.download/api/v1/get?type=http",
                "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=5000&country=all",
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
            ]),
            test_url: "http://httpbin.org/ip".to_string(),
            source_timeout_seconds: 15,
            probe_timeout_seconds: 10,
            probe_concurrency: 50,
            max_failures: 3,
            min_success_rate: 60.0,
            health_check_sample: 10,
            health_check_interval_seconds: 300,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            delay_min_seconds: 2.0,
            delay_max_seconds: 5.0,
            jitter_seconds: 0.5,
            max_requests_per_session: 100,
            session_max_age_seconds: 3600,
            refresh_cooldown_min_seconds: 10.0,
            refresh_cooldown_max_seconds: 20.0,
            require_proxy: false,
            page_attempts: 2,
            retry_backoff_ms: 2000,
            delay_between_sites_seconds: 45,
            user_agents: Vec::new(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_pages: 10,
            admission_keywords: words(&[
                "admission", "admissions", "apply", "application", "eligibility", "requirements", "criteria",
            ]),
            financial_keywords: words(&[
                "fee", "fees", "tuition", "cost", "finance", "scholarship", "scholarships", "financial-aid",
            ]),
            program_keywords: words(&["program", "programs", "undergraduate", "graduate", "postgraduate"]),
            excluded_keywords: words(&[
                "event", "events", "news", "story", "stories", "blog", "press", "calendar", "research",
                "gallery", "video", "contact", "about", "faculty", "career", "job", "jobs", "alumni",
                "login", "signup", "profile",
            ]),
            priority_keywords: words(&["admission", "fee", "tuition"]),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            request_timeout_seconds: 120,
            max_retries: 3,
            retry_delay_seconds: 5,
            min_interval_ms: 1000,
            max_input_chars: 15_000,
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_seconds)
    }
}

impl ProxyConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_seconds)
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    pub async fn load() -> Result<Self> {
        let config_path = get_config_path();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path).await?
        } else {
            info!("No configuration file found, using defaults");
            Self::default()
        };

        ConfigOverrides::apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(CrawlError::from)?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            CrawlError::InvalidConfig {
                path: format!("{}: {}", path.display(), e),
            }
        })?;

        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let fetch = &self.fetch;
        if fetch.delay_min_seconds < 0.0 || fetch.delay_min_seconds > fetch.delay_max_seconds {
            return Err(CrawlError::config("Fetch delay range must satisfy 0 <= min <= max").into());
        }

        if fetch.refresh_cooldown_min_seconds < 0.0
            || fetch.refresh_cooldown_min_seconds > fetch.refresh_cooldown_max_seconds
        {
            return Err(CrawlError::config("Refresh cooldown range must satisfy 0 <= min <= max").into());
        }

        if fetch.jitter_seconds < 0.0 {
            return Err(CrawlError::config("Fetch jitter must be >= 0").into());
        }

        if fetch.request_timeout_seconds == 0 {
            return Err(CrawlError::config("Fetch request_timeout_seconds must be > 0").into());
        }

        if fetch.max_requests_per_session == 0 || fetch.session_max_age_seconds == 0 {
            return Err(CrawlError::config("Session ceilings must be > 0").into());
        }

        if fetch.page_attempts == 0 {
            return Err(CrawlError::config("Fetch page_attempts must be > 0").into());
        }

        let proxy = &self.proxy;
        if proxy.probe_timeout_seconds == 0 || proxy.source_timeout_seconds == 0 {
            return Err(CrawlError::config("Proxy timeouts must be > 0").into());
        }

        if proxy.probe_concurrency == 0 {
            return Err(CrawlError::config("Proxy probe_concurrency must be > 0").into());
        }

        if proxy.max_failures == 0 {
            return Err(CrawlError::config("Proxy max_failures must be > 0").into());
        }

        if !(0.0..=100.0).contains(&proxy.min_success_rate) {
            return Err(CrawlError::config("Proxy min_success_rate must be between 0 and 100").into());
        }

        if proxy.enabled && proxy.sources.is_empty() {
            return Err(CrawlError::config("Proxies are enabled but no proxy sources are configured").into());
        }

        if self.discovery.max_pages == 0 {
            return Err(CrawlError::config("Discovery max_pages must be > 0").into());
        }

        if self.oracle.max_input_chars == 0 {
            return Err(CrawlError::config("Oracle max_input_chars must be > 0").into());
        }

        for site in &self.sites {
            url::Url::parse(&site.url)
                .map_err(|e| CrawlError::config(format!("Invalid URL for site '{}': {}", site.name, e)))?;
        }

        Ok(())
    }

    /// Find a configured site by case-insensitive name fragment
    pub fn find_site(&self, name: &str) -> Option<&SiteSeed> {
        let needle = name.to_lowercase();
        self.sites.iter().find(|site| site.name.to_lowercase().contains(&needle))
    }
}

/// Get the default data directory
pub fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("com", "uniscrape", "uniscrape")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "uniscrape", "uniscrape")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_from<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("UNISCRAPE_USE_PROXIES") {
            config.proxy.enabled = value.to_lowercase() == "true";
        }

        if let Some(url) = lookup("UNISCRAPE_PROXY_TEST_URL") {
            config.proxy.test_url = url;
        }

        if let Some(min) = lookup("UNISCRAPE_DELAY_MIN").and_then(|v| v.parse::<f64>().ok()) {
            config.fetch.delay_min_seconds = min;
        }

        if let Some(max) = lookup("UNISCRAPE_DELAY_MAX").and_then(|v| v.parse::<f64>().ok()) {
            config.fetch.delay_max_seconds = max;
        }

        if let Some(timeout) = lookup("UNISCRAPE_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
            config.fetch.request_timeout_seconds = timeout;
        }

        if let Some(endpoint) = lookup("UNISCRAPE_ORACLE_ENDPOINT") {
            config.oracle.endpoint = Some(endpoint);
        }

        if let Some(key) = lookup("UNISCRAPE_ORACLE_API_KEY") {
            config.oracle.api_key = Some(key);
        }

        if let Some(level) = lookup("UNISCRAPE_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
