use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::aggregate::{ResultAggregator, SiteScrapeResult};
use crate::config::{AppConfig, SiteSeed};
use crate::discovery::PageDiscovery;
use crate::error::{CrawlError, FetchError};
use crate::extraction::{extract_all, prepare_oracle_input, RetryingOracle};
use crate::logging::{LogContext, PerformanceLogger};
use crate::scraper::{extract_content, FetchEngine, FetchedPage};

/// Drives one site: discovery, then each page in rank order through fetch,
/// cleaning and extraction. Pages are fetched strictly one after another.
pub struct SiteScraper {
    engine: Arc<FetchEngine>,
    discovery: PageDiscovery,
    oracle: Arc<RetryingOracle>,
    max_pages: usize,
    max_input_chars: usize,
    page_attempts: u32,
    retry_backoff: Duration,
    stop: Arc<AtomicBool>,
}

impl SiteScraper {
    pub fn new(
        config: &AppConfig,
        engine: Arc<FetchEngine>,
        oracle: Arc<RetryingOracle>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            discovery: PageDiscovery::new(engine.clone(), &config.discovery),
            engine,
            oracle,
            max_pages: config.discovery.max_pages,
            max_input_chars: config.oracle.max_input_chars,
            page_attempts: config.fetch.page_attempts.max(1),
            retry_backoff: Duration::from_millis(config.fetch.retry_backoff_ms),
            stop,
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Scrape one site. Never fails: problems end up in the result's status
    /// and error message.
    pub async fn scrape_site(&self, site: &SiteSeed) -> SiteScrapeResult {
        let context = LogContext::new("site_scraper", "scrape_site")
            .with_site(&site.name)
            .with_url(&site.url);
        let perf = PerformanceLogger::new(context.clone());
        crate::log_info!(context, "Starting scrape for {}", site.name);

        let mut aggregator = ResultAggregator::new();

        let seed = match Url::parse(&site.url) {
            Ok(url) => url,
            Err(_) => {
                let error = CrawlError::InvalidUrl { url: site.url.clone() };
                crate::log_error!(context.clone().with_error_category(error.category()), "{}", error);
                let result = aggregator.finish(site, Some(error.to_string()));
                perf.finish_with_status("Site scrape finished", result.status.to_string());
                return result;
            }
        };

        let pages = self.discovery.discover(&seed, self.max_pages).await;
        let mut fatal: Option<String> = None;

        for page in &pages {
            if self.stop_requested() {
                info!(
                    "Stop requested, keeping {} pages scraped from {}",
                    aggregator.pages_fetched(),
                    site.name
                );
                if aggregator.pages_fetched() == 0 {
                    fatal = Some(CrawlError::Cancelled.to_string());
                }
                break;
            }

            info!("Scraping page {}/{}: {}", page.rank + 1, pages.len(), page.url);
            match self.fetch_page(page.url.as_str()).await {
                Ok(fetched) => {
                    let content = extract_content(&fetched.body);
                    let input = prepare_oracle_input(&content, self.max_input_chars);
                    let records = extract_all(&self.oracle, &input, page.url.as_str()).await;
                    aggregator.record_page(records);
                }
                Err(e) if !e.is_recoverable() => {
                    let error = CrawlError::from(e);
                    crate::log_error!(
                        context.clone().with_error_category(error.category()),
                        "Abandoning {}: {}",
                        site.name,
                        error
                    );
                    fatal = Some(error.to_string());
                    break;
                }
                Err(e) => {
                    warn!("Failed to get response for {}: {}", page.url, e);
                }
            }
        }

        let result = aggregator.finish(site, fatal);
        info!(
            "Finished {}: {} ({} pages, {} records)",
            site.name, result.status, result.pages_fetched, result.total_records
        );
        perf.finish_with_status("Site scrape finished", result.status.to_string());
        result
    }

    /// Fetch one page, retrying through another proxy when the failure is
    /// one a different route could fix
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut attempt = 1;
        loop {
            match self.engine.fetch_via_pool(url).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt < self.page_attempts && e.should_rotate_proxy() => {
                    let backoff = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt, self.page_attempts, url, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SiteStatus;
    use crate::error::OracleError;
    use crate::extraction::{ExtractionOracle, NoOracle, RecordCategory};
    use crate::proxy::{PoolPolicy, ProbeOutcome, ProxyEndpoint, ProxyPool, ProxyProber};
    use crate::scraper::NoDelay;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Finds the same scholarship on every page
    struct SameScholarship;

    #[async_trait]
    impl ExtractionOracle for SameScholarship {
        async fn extract(&self, category: RecordCategory, _text: &str) -> Result<Vec<Value>, OracleError> {
            Ok(match category {
                RecordCategory::Scholarships => vec![json!({"name": "X", "amount": "10000"})],
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
        config.oracle.retry_delay_seconds = 0;
        config
    }

    fn scraper(
        config: &AppConfig,
        pool: Option<Arc<ProxyPool>>,
        oracle: Arc<dyn ExtractionOracle>,
        stop: Arc<AtomicBool>,
    ) -> SiteScraper {
        let engine = Arc::new(FetchEngine::new(config.fetch.clone(), pool).with_pacing(Arc::new(NoDelay)));
        let oracle = Arc::new(RetryingOracle::new(oracle, &config.oracle));
        SiteScraper::new(config, engine, oracle, stop)
    }

    async fn university_site() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><nav><a href="/admissions">Admissions</a></nav>
                   <a href="/fees">Fee structure</a><a href="/news">News</a></body></html>"#,
            ))
            .mount(&server)
            .await;
        for route in ["/admissions", "/fees"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string("<main><p>Details</p></main>"))
                .mount(&server)
                .await;
        }
        server
    }

    #[tokio::test]
    async fn test_completed_site_dedups_records() {
        let server = university_site().await;
        let config = test_config();
        let scraper = scraper(&config, None, Arc::new(SameScholarship), Arc::new(AtomicBool::new(false)));

        let site = SiteSeed::new("Example University", format!("{}/", server.uri()));
        let result = scraper.scrape_site(&site).await;

        assert_eq!(result.status, SiteStatus::Completed);
        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.total_records, 1);
        assert_eq!(result.records[&RecordCategory::Scholarships].len(), 1);
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_pages_without_records_are_partial() {
        let server = university_site().await;
        let config = test_config();
        let scraper = scraper(&config, None, Arc::new(NoOracle), Arc::new(AtomicBool::new(false)));

        let site = SiteSeed::new("Example University", format!("{}/", server.uri()));
        let result = scraper.scrape_site(&site).await;

        assert_eq!(result.status, SiteStatus::Partial);
        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.error_message.as_deref(), Some("No data extracted"));
    }

    #[tokio::test]
    async fn test_mandatory_proxy_exhaustion_fails_site() {
        let server = university_site().await;
        let mut config = test_config();
        config.fetch.require_proxy = true;
        let pool = Arc::new(ProxyPool::new(PoolPolicy::default(), Arc::new(AlwaysPass)));
        let scraper = scraper(&config, Some(pool), Arc::new(SameScholarship), Arc::new(AtomicBool::new(false)));

        let site = SiteSeed::new("Example University", format!("{}/", server.uri()));
        let result = scraper.scrape_site(&site).await;

        assert_eq!(result.status, SiteStatus::Failed);
        assert_eq!(result.pages_fetched, 0);
        assert!(result.error_message.unwrap().contains("no working proxy available"));
    }

    #[tokio::test]
    async fn test_invalid_seed_url_fails() {
        let config = test_config();
        let scraper = scraper(&config, None, Arc::new(NoOracle), Arc::new(AtomicBool::new(false)));

        let result = scraper.scrape_site(&SiteSeed::new("Broken", "not a url")).await;
        assert_eq!(result.status, SiteStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("Invalid URL: not a url"));
    }

    #[tokio::test]
    async fn test_stop_flag_before_first_page() {
        let server = university_site().await;
        let config = test_config();
        let scraper = scraper(&config, None, Arc::new(SameScholarship), Arc::new(AtomicBool::new(true)));

        let site = SiteSeed::new("Example University", format!("{}/", server.uri()));
        let result = scraper.scrape_site(&site).await;

        assert_eq!(result.status, SiteStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("Operation cancelled"));
    }

    #[tokio::test]
    async fn test_bot_detection_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fees"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fees"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Fees</p>"))
            .with_priority(2)
            .mount(&server)
            .await;

        let config = test_config();
        let scraper = scraper(&config, None, Arc::new(SameScholarship), Arc::new(AtomicBool::new(false)));

        // discovery consumes the first 503 and degrades to the seed alone,
        // the page fetch then succeeds on its second attempt
        let site = SiteSeed::new("Fees Only", format!("{}/fees", server.uri()));
        let result = scraper.scrape_site(&site).await;

        assert_eq!(result.status, SiteStatus::Completed);
        assert_eq!(result.pages_fetched, 1);
    }
}
