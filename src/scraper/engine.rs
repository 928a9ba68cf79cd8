use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::fingerprint::HeaderFingerprint;
use super::pacing::{HumanPacing, PacingPolicy};
use super::session::{FetchSession, SessionLimits};
use super::user_agent::UserAgentRotator;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::logging::LogContext;
use crate::proxy::{ProxyEndpoint, ProxyPool};

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
    pub proxy: Option<String>,
}

/// Request counters for the lifetime of an engine
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub proxy_failures: u64,
    pub bot_detections: u64,
    pub timeouts: u64,
    pub session_refreshes: u64,
}

/// Identity of the current session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub request_count: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// HTTP fetcher with rotating identity, human pacing and proxy feedback.
///
/// Requests are serialized through the session lock, so one engine issues at
/// most one request at a time.
pub struct FetchEngine {
    config: FetchConfig,
    pool: Option<Arc<ProxyPool>>,
    pacing: Arc<dyn PacingPolicy>,
    limits: SessionLimits,
    fingerprint: HeaderFingerprint,
    session: Mutex<FetchSession>,
    stats: RwLock<FetchStats>,
}

impl FetchEngine {
    /// Create new fetch engine. Without a pool every request goes direct.
    pub fn new(config: FetchConfig, pool: Option<Arc<ProxyPool>>) -> Self {
        info!("Initializing fetch engine");

        let pacing = Arc::new(HumanPacing::from_config(&config));
        let fingerprint = HeaderFingerprint::new(UserAgentRotator::new(&config.user_agents));

        Self {
            limits: SessionLimits::from(&config),
            config,
            pool,
            pacing,
            fingerprint,
            session: Mutex::new(FetchSession::new()),
            stats: RwLock::new(FetchStats::default()),
        }
    }

    pub fn with_pacing(mut self, pacing: Arc<dyn PacingPolicy>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    /// Proxies are mandatory and a pool is attached
    pub fn requires_proxy(&self) -> bool {
        self.config.require_proxy && self.pool.is_some()
    }

    /// Fetch `url` through the next pooled proxy, or direct when the pool is
    /// empty and proxies are optional.
    pub async fn fetch_via_pool(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let proxy = self.pool.as_ref().and_then(|pool| pool.next());

        if proxy.is_none() && self.requires_proxy() {
            let context = LogContext::new("fetch_engine", "fetch")
                .with_url(url)
                .with_error_category("proxy");
            crate::log_warn!(context, "No working proxy available and proxies are required");
            return Err(FetchError::NoProxyAvailable);
        }

        self.fetch(url, proxy.as_ref(), None).await
    }

    /// Issue one GET. Proxy outcomes are reported back to the pool; ordinary
    /// network failures come back as a classified `FetchError`.
    pub async fn fetch(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
        timeout: Option<Duration>,
    ) -> Result<FetchedPage, FetchError> {
        let mut session = self.session.lock().await;

        if session.needs_refresh(&self.limits) {
            info!(
                "Refreshing fetch session {} after {} requests",
                session.id(),
                session.request_count()
            );
            *session = FetchSession::new();
            self.stats.write().await.session_refreshes += 1;

            let cooldown = self.pacing.refresh_cooldown();
            debug!("Cooling down for {:.2}s", cooldown.as_secs_f64());
            tokio::time::sleep(cooldown).await;
        } else if session.request_count() > 0 {
            let delay = self.pacing.page_delay(session.request_count());
            debug!("Sleeping for {:.2}s", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }

        session.record_request();
        self.stats.write().await.total_requests += 1;

        let result = match session.client_for(proxy) {
            Ok(client) => {
                let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
                self.send(&client, url, proxy, timeout).await
            }
            Err(e) => Err(e),
        };
        drop(session);

        self.record_outcome(url, proxy, &result).await;
        result
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
        timeout: Duration,
    ) -> Result<FetchedPage, FetchError> {
        let start = Instant::now();
        let response = client
            .get(url)
            .headers(self.fingerprint.generate())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport(&e, proxy.is_some()))?;

        let status = response.status().as_u16();
        match status {
            200 => {}
            403 | 429 | 503 => return Err(FetchError::BotDetected { status }),
            _ => return Err(FetchError::UnexpectedStatus { status }),
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(&e, proxy.is_some()))?;

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            status,
            body,
            elapsed: start.elapsed(),
            proxy: proxy.map(|p| p.to_string()),
        })
    }

    async fn record_outcome(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
        result: &Result<FetchedPage, FetchError>,
    ) {
        let mut stats = self.stats.write().await;

        match result {
            Ok(page) => {
                stats.successful_requests += 1;
                if let (Some(pool), Some(proxy)) = (&self.pool, proxy) {
                    pool.report_success(proxy.id, page.elapsed);
                }
                debug!("Fetched {} ({} bytes) in {:?}", url, page.body.len(), page.elapsed);
            }
            Err(err) => {
                stats.failed_requests += 1;
                match err {
                    FetchError::BotDetected { .. } => stats.bot_detections += 1,
                    FetchError::Timeout => stats.timeouts += 1,
                    FetchError::ProxyConnection { .. } => stats.proxy_failures += 1,
                    _ => {}
                }

                let mut context = LogContext::new("fetch_engine", "fetch")
                    .with_url(url)
                    .with_error_category(err.category());
                if let Some(proxy) = proxy {
                    context = context.with_proxy(proxy.address());
                }
                crate::log_warn!(context, "Request failed: {}", err);

                if let (Some(pool), Some(proxy)) = (&self.pool, proxy) {
                    if err.penalizes_proxy() {
                        pool.report_failure(proxy.id, &err.to_string());
                    }
                }
            }
        }
    }

    pub async fn stats(&self) -> FetchStats {
        self.stats.read().await.clone()
    }

    pub async fn session_info(&self) -> SessionInfo {
        let session = self.session.lock().await;
        SessionInfo {
            id: session.id(),
            request_count: session.request_count(),
            started_at: session.started_at(),
        }
    }
}

fn classify_transport(error: &reqwest::Error, proxied: bool) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if proxied && error.is_connect() {
        FetchError::proxy(error.to_string())
    } else {
        FetchError::transport(error.to_string())
    }
}
