use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub mod batch;
pub mod site;

pub use batch::{BatchSummary, RunStats};
pub use site::SiteScraper;

use crate::aggregate::SiteScrapeResult;
use crate::config::{AppConfig, SiteSeed};
use crate::extraction::RetryingOracle;
use crate::proxy::{HealthReport, ProxyPool};
use crate::scraper::FetchEngine;

/// Granularity of the between-sites sleep, so a stop request is noticed quickly
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Core application state: one proxy pool, one fetch engine and one oracle
/// shared by every site of a run
pub struct UniScraper {
    config: AppConfig,
    pool: Option<Arc<ProxyPool>>,
    engine: Arc<FetchEngine>,
    oracle: Arc<RetryingOracle>,
    site_scraper: SiteScraper,
    stop: Arc<AtomicBool>,
    last_health_check: Mutex<Instant>,
}

impl UniScraper {
    /// Initialize every subsystem from configuration. With proxies enabled the
    /// pool is loaded and verified before the first site.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing uniscrape core");

        let pool = if config.proxy.enabled {
            let pool = ProxyPool::from_config(&config.proxy);
            let client = reqwest::Client::builder()
                .timeout(config.proxy.source_timeout())
                .build()?;
            pool.load(&client, &config.proxy.sources, config.proxy.source_timeout())
                .await;
            pool.verify(config.proxy.probe_concurrency).await;
            info!("Proxy pool initialized with {} working proxies", pool.len());
            Some(Arc::new(pool))
        } else {
            info!("Proxy rotation disabled");
            None
        };

        let engine = Arc::new(FetchEngine::new(config.fetch.clone(), pool.clone()));
        info!("Fetch engine initialized");

        let oracle = Arc::new(RetryingOracle::from_config(&config.oracle)?);
        info!("Extraction oracle initialized");

        Ok(Self::with_components(config, pool, engine, oracle))
    }

    /// Assemble from prebuilt parts
    pub fn with_components(
        config: AppConfig,
        pool: Option<Arc<ProxyPool>>,
        engine: Arc<FetchEngine>,
        oracle: Arc<RetryingOracle>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let site_scraper = SiteScraper::new(&config, engine.clone(), oracle.clone(), stop.clone());

        Self {
            config,
            pool,
            engine,
            oracle,
            site_scraper,
            stop,
            last_health_check: Mutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Flag that ends the run after the page in flight
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub async fn scrape_site(&self, site: &SiteSeed) -> SiteScrapeResult {
        self.site_scraper.scrape_site(site).await
    }

    /// Scrape an ad-hoc URL, named after its host
    pub async fn scrape_url(&self, url: &str) -> SiteScrapeResult {
        let name = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        self.scrape_site(&SiteSeed::new(name, url)).await
    }

    /// Scrape sites one after another. A failing site never aborts the run.
    pub async fn scrape_batch(&self, sites: &[SiteSeed], delay_between: Duration) -> BatchSummary {
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(sites.len());
        let mut interrupted = false;

        for (i, site) in sites.iter().enumerate() {
            if self.stop_requested() {
                warn!("Stop requested, skipping the remaining {} sites", sites.len() - i);
                interrupted = true;
                break;
            }

            info!("Processing site {}/{}: {}", i + 1, sites.len(), site.name);
            results.push(self.scrape_site(site).await);

            self.maybe_health_check().await;

            if i + 1 < sites.len() && !delay_between.is_zero() {
                info!("Waiting {:?} before next site", delay_between);
                if !self.sleep_unless_stopped(delay_between).await {
                    warn!("Stop requested during the wait between sites");
                    interrupted = true;
                    break;
                }
            }
        }

        let summary = BatchSummary::new(results, started_at, interrupted);
        info!(
            "Batch finished: {} completed, {} partial, {} failed, {} records",
            summary.completed, summary.partial, summary.failed, summary.total_records
        );
        summary
    }

    /// Sleep for `duration`; false when the stop flag was raised meanwhile
    async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL_INTERVAL)).await;
        }
    }

    /// Health-check the pool when the configured interval has elapsed. A pool
    /// left empty afterwards is refreshed from its sources.
    pub async fn maybe_health_check(&self) -> Option<HealthReport> {
        let pool = self.pool.as_ref()?;
        let interval = Duration::from_secs(self.config.proxy.health_check_interval_seconds);

        {
            let mut last = self
                .last_health_check
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.elapsed() < interval {
                return None;
            }
            *last = Instant::now();
        }

        let report = pool.health_check(self.config.proxy.health_check_sample).await;

        if pool.is_empty() && !self.config.proxy.sources.is_empty() {
            warn!("Proxy pool exhausted, refreshing from sources");
            match reqwest::Client::builder()
                .timeout(self.config.proxy.source_timeout())
                .build()
            {
                Ok(client) => {
                    pool.refresh(
                        &client,
                        &self.config.proxy.sources,
                        self.config.proxy.source_timeout(),
                        self.config.proxy.probe_concurrency,
                    )
                    .await;
                }
                Err(e) => warn!("Could not build proxy source client: {}", e),
            }
        }

        Some(report)
    }

    pub async fn stats(&self) -> RunStats {
        RunStats {
            fetch: self.engine.stats().await,
            proxies: self.pool.as_ref().map(|pool| pool.stats()),
            oracle: self.oracle.stats().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SiteStatus;
    use crate::error::OracleError;
    use crate::extraction::{ExtractionOracle, RecordCategory};
    use crate::proxy::{PoolPolicy, ProbeOutcome, ProxyEndpoint, ProxyProber};
    use crate::scraper::NoDelay;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FeeOracle;

    #[async_trait]
    impl ExtractionOracle for FeeOracle {
        async fn extract(&self, category: RecordCategory, _text: &str) -> Result<Vec<Value>, OracleError> {
            Ok(match category {
                RecordCategory::FeeStructure => vec![json!({"program": "BSc", "tuition_fee": "150000"})],
                _ => Vec::new(),
            })
        }
    }

    struct AlwaysPass;

    #[async_trait]
    impl ProxyProber for AlwaysPass {
        async fn probe(&self, _endpoint: &ProxyEndpoint) -> ProbeOutcome {
            ProbeOutcome::pass(Duration::from_millis(5))
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.proxy.enabled = false;
        config.fetch.retry_backoff_ms = 0;
        config.oracle.min_interval_ms = 0;
        config
    }

    fn build_app(config: AppConfig, pool: Option<Arc<ProxyPool>>) -> UniScraper {
        let engine = Arc::new(FetchEngine::new(config.fetch.clone(), pool.clone()).with_pacing(Arc::new(NoDelay)));
        let oracle = Arc::new(RetryingOracle::new(Arc::new(FeeOracle), &config.oracle));
        UniScraper::with_components(config, pool, engine, oracle)
    }

    async fn fee_site() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fees"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<main>Tuition 150000</main>"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_batch_survives_failing_site() {
        let server = fee_site().await;
        let app = build_app(test_config(), None);

        let sites = vec![
            SiteSeed::new("Broken", "not a url"),
            SiteSeed::new("Fee University", format!("{}/fees", server.uri())),
        ];
        let summary = app.scrape_batch(&sites, Duration::from_millis(10)).await;

        assert_eq!(summary.site_count(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total_records, 1);
        assert!(!summary.interrupted);
        assert_eq!(summary.results[1].status, SiteStatus::Completed);

        let stats = app.stats().await;
        assert!(stats.fetch.successful_requests >= 1);
        assert!(stats.proxies.is_none());
    }

    #[tokio::test]
    async fn test_stop_flag_ends_batch() {
        let server = fee_site().await;
        let app = build_app(test_config(), None);
        app.stop_handle().store(true, Ordering::SeqCst);

        let sites = vec![SiteSeed::new("Fee University", format!("{}/fees", server.uri()))];
        let summary = app.scrape_batch(&sites, Duration::ZERO).await;

        assert!(summary.interrupted);
        assert_eq!(summary.site_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_during_wait_between_sites() {
        let server = fee_site().await;
        let app = Arc::new(build_app(test_config(), None));
        let stop = app.stop_handle();

        let sites = vec![
            SiteSeed::new("First", format!("{}/fees", server.uri())),
            SiteSeed::new("Second", format!("{}/fees", server.uri())),
        ];
        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.scrape_batch(&sites, Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.store(true, Ordering::SeqCst);

        let summary = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.site_count(), 1);
    }

    #[tokio::test]
    async fn test_scrape_url_names_site_after_host() {
        let server = fee_site().await;
        let app = build_app(test_config(), None);

        let result = app.scrape_url(&format!("{}/fees", server.uri())).await;
        assert_eq!(result.site_name, "127.0.0.1");
        assert_eq!(result.status, SiteStatus::Completed);
    }

    #[tokio::test]
    async fn test_health_check_runs_on_interval() {
        let mut config = test_config();
        config.proxy.health_check_interval_seconds = 0;
        config.proxy.sources.clear();

        let pool = ProxyPool::new(PoolPolicy::default(), Arc::new(AlwaysPass));
        pool.ingest("10.0.0.1:8080\n10.0.0.2:8080");
        pool.verify(2).await;
        let app = build_app(config, Some(Arc::new(pool)));

        let report = app.maybe_health_check().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.evicted, 0);
        assert_eq!(app.stats().await.proxies.unwrap().working, 2);

        let without_pool = build_app(test_config(), None);
        assert!(without_pool.maybe_health_check().await.is_none());
    }

    #[tokio::test]
    async fn test_health_check_waits_for_interval() {
        let mut config = test_config();
        config.proxy.health_check_interval_seconds = 3600;

        let pool = ProxyPool::new(PoolPolicy::default(), Arc::new(AlwaysPass));
        let app = build_app(config, Some(Arc::new(pool)));
        assert!(app.maybe_health_check().await.is_none());
    }

    #[tokio::test]
    async fn test_new_without_proxies() {
        let app = UniScraper::new(test_config()).await.unwrap();
        let stats = app.stats().await;
        assert!(stats.proxies.is_none());
        assert_eq!(stats.fetch.total_requests, 0);
        assert_eq!(stats.oracle.calls, 0);
    }
}
