use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::endpoint::{ProxyEndpoint, ProxyId};
use super::prober::{HttpProber, ProbeOutcome, ProxyProber};
use crate::config::ProxyConfig;
use crate::error::{CrawlError, CrawlResult};

/// Eviction thresholds
#[derive(Debug, Clone, Copy)]
pub struct PoolPolicy {
    pub max_failures: u32,
    /// Percentage in [0, 100]
    pub min_success_rate: f64,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_failures: 3,
            min_success_rate: 60.0,
        }
    }
}

impl From<&ProxyConfig> for PoolPolicy {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            min_success_rate: config.min_success_rate,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    candidates: Vec<ProxyEndpoint>,
    working: Vec<ProxyEndpoint>,
    failed: Vec<ProxyEndpoint>,
    cursor: usize,
    next_id: ProxyId,
}

impl PoolState {
    fn clamp_cursor(&mut self) {
        if self.cursor >= self.working.len() {
            self.cursor = 0;
        }
    }

    fn find_mut(&mut self, id: ProxyId) -> Option<&mut ProxyEndpoint> {
        self.working
            .iter_mut()
            .chain(self.failed.iter_mut())
            .chain(self.candidates.iter_mut())
            .find(|p| p.id == id)
    }

    fn sort_working(&mut self) {
        self.working.sort_by(rotation_order);
        self.clamp_cursor();
    }
}

/// Faster first, then higher success rate, then insertion order
fn rotation_order(a: &ProxyEndpoint, b: &ProxyEndpoint) -> Ordering {
    let a_time = a.last_response_time.unwrap_or(Duration::MAX);
    let b_time = b.last_response_time.unwrap_or(Duration::MAX);
    a_time
        .cmp(&b_time)
        .then_with(|| {
            b.success_rate()
                .partial_cmp(&a.success_rate())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Outcome of a verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub probed: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Outcome of a health check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checked: usize,
    pub evicted: usize,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub candidates: usize,
    pub working: usize,
    pub failed: usize,
    pub total: usize,
    pub cursor: usize,
    pub avg_response_time: Duration,
    pub best: Option<ProxyEndpoint>,
}

/// Rotating proxy pool with health tracking.
///
/// Every endpoint lives in exactly one of the candidate, working and failed
/// sets. All mutation goes through one mutex, so concurrent `next` and
/// `report_failure` calls cannot push the cursor out of bounds or double
/// count a failure.
pub struct ProxyPool {
    policy: PoolPolicy,
    prober: Arc<dyn ProxyProber>,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(policy: PoolPolicy, prober: Arc<dyn ProxyProber>) -> Self {
        Self {
            policy,
            prober,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Pool that probes through `HttpProber` against the configured test URL
    pub fn from_config(config: &ProxyConfig) -> Self {
        let prober = HttpProber::new(config.test_url.clone(), config.probe_timeout());
        Self::new(PoolPolicy::from(config), Arc::new(prober))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch every source independently and add the parsed lines as
    /// candidates. A failing source is logged and skipped.
    pub async fn load(&self, client: &reqwest::Client, sources: &[String], timeout: Duration) -> usize {
        info!("Loading proxies from {} sources", sources.len());
        let mut added = 0;

        for source in sources {
            match fetch_listing(client, source, timeout).await {
                Ok(body) => {
                    let count = self.ingest(&body);
                    info!("Fetched {} new proxy candidates from {}", count, source);
                    added += count;
                }
                Err(e) => {
                    warn!(error_category = e.category(), "Failed to fetch proxies: {}", e);
                }
            }
        }

        if added == 0 {
            warn!("No proxies loaded, running without proxy rotation");
        }
        added
    }

    /// Parse a raw listing, one candidate per line; malformed lines are dropped
    pub fn ingest(&self, listing: &str) -> usize {
        self.add_candidates(listing.lines().filter_map(ProxyEndpoint::parse))
    }

    /// Add endpoints to the candidate set. Endpoints equivalent to one that is
    /// already a candidate or working are skipped.
    pub fn add_candidates<I>(&self, endpoints: I) -> usize
    where
        I: IntoIterator<Item = ProxyEndpoint>,
    {
        let mut state = self.lock();
        let mut added = 0;

        for mut endpoint in endpoints {
            let duplicate = state
                .candidates
                .iter()
                .chain(state.working.iter())
                .any(|p| p.same_identity(&endpoint));
            if duplicate {
                continue;
            }

            endpoint.id = state.next_id;
            state.next_id += 1;
            state.candidates.push(endpoint);
            added += 1;
        }

        debug!("Added {} proxy candidates", added);
        added
    }

    /// Probe every candidate with at most `concurrency_limit` probes in
    /// flight. Passing endpoints join the working set, the rest the failed set.
    pub async fn verify(&self, concurrency_limit: usize) -> VerifyReport {
        let snapshot: Vec<ProxyEndpoint> = self.lock().candidates.clone();
        if snapshot.is_empty() {
            return VerifyReport::default();
        }

        info!("Testing {} proxies", snapshot.len());
        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));

        let probes = snapshot.into_iter().map(|endpoint| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = self.prober.probe(&endpoint).await;
                self.apply_probe(endpoint.id, &outcome)
            }
        });
        let results = join_all(probes).await;

        let mut report = VerifyReport {
            probed: results.len(),
            ..VerifyReport::default()
        };
        for passed in results.into_iter().flatten() {
            if passed {
                report.passed += 1;
            } else {
                report.failed += 1;
            }
        }

        self.lock().sort_working();

        info!(
            "Proxy testing completed: {}/{} working",
            report.passed, report.probed
        );
        report
    }

    /// Move one probed candidate into its new set. Returns `None` when the
    /// candidate vanished meanwhile (e.g. a concurrent refresh).
    fn apply_probe(&self, id: ProxyId, outcome: &ProbeOutcome) -> Option<bool> {
        let mut state = self.lock();
        let index = state.candidates.iter().position(|p| p.id == id)?;
        let mut endpoint = state.candidates.remove(index);

        endpoint.last_checked = Some(chrono::Utc::now());
        if outcome.passed {
            endpoint.success_count += 1;
            endpoint.last_response_time = Some(outcome.response_time);
            endpoint.working = true;
            state.working.push(endpoint);
        } else {
            endpoint.failure_count += 1;
            endpoint.working = false;
            state.failed.push(endpoint);
        }

        Some(outcome.passed)
    }

    /// Next endpoint in round-robin order, or `None` when the working set is
    /// empty. `None` means "no proxy available", not an error.
    pub fn next(&self) -> Option<ProxyEndpoint> {
        let mut state = self.lock();
        if state.working.is_empty() {
            debug!("No working proxies available");
            return None;
        }

        let cursor = state.cursor;
        let endpoint = &mut state.working[cursor];
        endpoint.last_used = Some(chrono::Utc::now());
        let snapshot = endpoint.clone();

        state.cursor = (cursor + 1) % state.working.len();
        Some(snapshot)
    }

    pub fn report_success(&self, id: ProxyId, response_time: Duration) {
        let mut state = self.lock();
        if let Some(endpoint) = state.find_mut(id) {
            endpoint.success_count += 1;
            endpoint.working = true;
            endpoint.last_response_time = Some(response_time);
            endpoint.last_used = Some(chrono::Utc::now());
        }
    }

    /// Count a failure against the endpoint and evict it from rotation when it
    /// crosses a threshold. Returns true if this call evicted it.
    pub fn report_failure(&self, id: ProxyId, reason: &str) -> bool {
        let mut state = self.lock();

        let Some(index) = state.working.iter().position(|p| p.id == id) else {
            if let Some(endpoint) = state.find_mut(id) {
                endpoint.failure_count += 1;
                endpoint.working = false;
            }
            return false;
        };

        let endpoint = &mut state.working[index];
        endpoint.failure_count += 1;
        endpoint.working = false;
        warn!("Proxy {} failed: {}", endpoint, reason);

        let exhausted = endpoint.failure_count >= self.policy.max_failures
            || endpoint.success_rate() < self.policy.min_success_rate;
        if !exhausted {
            return false;
        }

        let removed = state.working.remove(index);
        info!("Removed proxy {} from rotation", removed);
        state.failed.push(removed);

        if index < state.cursor {
            state.cursor -= 1;
        }
        state.clamp_cursor();
        true
    }

    /// Re-probe a random sample of the working set; failures are routed
    /// through `report_failure`.
    pub async fn health_check(&self, sample_size: usize) -> HealthReport {
        let sample: Vec<ProxyEndpoint> = {
            let state = self.lock();
            let mut rng = rand::thread_rng();
            state
                .working
                .choose_multiple(&mut rng, sample_size.min(state.working.len()))
                .cloned()
                .collect()
        };

        if sample.is_empty() {
            return HealthReport::default();
        }

        info!("Performing proxy health check on {} proxies", sample.len());
        let mut report = HealthReport {
            checked: sample.len(),
            evicted: 0,
        };

        for endpoint in &sample {
            let outcome = self.prober.probe(endpoint).await;
            {
                let mut state = self.lock();
                if let Some(p) = state.find_mut(endpoint.id) {
                    p.last_checked = Some(chrono::Utc::now());
                }
            }

            if outcome.passed {
                self.report_success(endpoint.id, outcome.response_time);
            } else if self.report_failure(endpoint.id, "Health check failed") {
                report.evicted += 1;
            }
        }

        info!("Health check completed. Removed {} failed proxies", report.evicted);
        report
    }

    /// Drop every endpoint and run a fresh load and verification cycle
    pub async fn refresh(
        &self,
        client: &reqwest::Client,
        sources: &[String],
        timeout: Duration,
        concurrency_limit: usize,
    ) -> VerifyReport {
        info!("Refreshing proxy list");
        {
            let mut state = self.lock();
            state.candidates.clear();
            state.working.clear();
            state.failed.clear();
            state.cursor = 0;
        }

        self.load(client, sources, timeout).await;
        self.verify(concurrency_limit).await
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let avg_response_time = if state.working.is_empty() {
            Duration::ZERO
        } else {
            let total: Duration = state
                .working
                .iter()
                .filter_map(|p| p.last_response_time)
                .sum();
            total / state.working.len() as u32
        };

        PoolStats {
            candidates: state.candidates.len(),
            working: state.working.len(),
            failed: state.failed.len(),
            total: state.candidates.len() + state.working.len() + state.failed.len(),
            cursor: state.cursor,
            avg_response_time,
            best: state.working.first().cloned(),
        }
    }

    /// Number of endpoints eligible for rotation
    pub fn len(&self) -> usize {
        self.lock().working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn candidate_count(&self) -> usize {
        self.lock().candidates.len()
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn working_snapshot(&self) -> Vec<ProxyEndpoint> {
        self.lock().working.clone()
    }

    pub fn failed_snapshot(&self) -> Vec<ProxyEndpoint> {
        self.lock().failed.clone()
    }
}

async fn fetch_listing(client: &reqwest::Client, source: &str, timeout: Duration) -> CrawlResult<String> {
    let source_error = |message: String| CrawlError::SourceFetch {
        source_url: source.to_string(),
        message,
    };

    let response = client
        .get(source)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| source_error(e.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(source_error(format!("HTTP {}", response.status())));
    }

    response.text().await.map_err(|e| source_error(e.to_string()))
}
