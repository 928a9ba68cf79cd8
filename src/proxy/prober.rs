use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use super::endpoint::ProxyEndpoint;
use crate::scraper::user_agent::UserAgentRotator;

/// Result of one live connectivity probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub passed: bool,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn pass(response_time: Duration) -> Self {
        Self {
            passed: true,
            response_time,
            error: None,
        }
    }

    pub fn fail(response_time: Duration, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            response_time,
            error: Some(error.into()),
        }
    }
}

/// Checks whether a proxy can carry a request
#[async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> ProbeOutcome;
}

/// Probes a proxy by fetching a fixed reachability URL through it.
/// Passes only on HTTP 200 within the timeout.
pub struct HttpProber {
    test_url: String,
    timeout: Duration,
    user_agents: UserAgentRotator,
}

impl HttpProber {
    pub fn new(test_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            test_url: test_url.into(),
            timeout,
            user_agents: UserAgentRotator::default(),
        }
    }

    async fn try_probe(&self, endpoint: &ProxyEndpoint) -> Result<u16, String> {
        let proxy = endpoint.to_reqwest_proxy().map_err(|e| e.to_string())?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| e.to_string())?;

        let user_agent = self.user_agents.get_random_user_agent().to_string();
        let response = client
            .get(&self.test_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl ProxyProber for HttpProber {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> ProbeOutcome {
        let start = Instant::now();
        let result = self.try_probe(endpoint).await;
        let elapsed = start.elapsed();

        match result {
            Ok(200) => ProbeOutcome::pass(elapsed),
            Ok(status) => ProbeOutcome::fail(elapsed, format!("HTTP {}", status)),
            Err(e) => {
                debug!("Proxy probe failed for {}: {}", endpoint, e);
                ProbeOutcome::fail(elapsed, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_through_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = HttpProber::new("http://example.invalid/ip", Duration::from_secs(2));
        let outcome = prober.probe(&ProxyEndpoint::new("127.0.0.1", port)).await;

        assert!(!outcome.passed);
        assert!(outcome.error.is_some());
    }
}
