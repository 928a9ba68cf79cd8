use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::proxy::{ProxyEndpoint, ProxyId};

/// Ceilings after which a session is replaced
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_requests: u32,
    pub max_age: Duration,
}

impl From<&FetchConfig> for SessionLimits {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_requests: config.max_requests_per_session,
            max_age: config.session_max_age(),
        }
    }
}

/// True once either ceiling is reached
pub fn needs_refresh(request_count: u32, age: Duration, limits: &SessionLimits) -> bool {
    request_count >= limits.max_requests || age >= limits.max_age
}

/// One logical browsing identity: a cookie jar shared by every client built
/// for it, plus the request counter and age that drive refresh.
pub struct FetchSession {
    id: Uuid,
    request_count: u32,
    created_at: Instant,
    started_at: DateTime<Utc>,
    cookies: Arc<Jar>,
    clients: HashMap<Option<ProxyId>, reqwest::Client>,
}

impl FetchSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            request_count: 0,
            created_at: Instant::now(),
            started_at: Utc::now(),
            cookies: Arc::new(Jar::default()),
            clients: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn needs_refresh(&self, limits: &SessionLimits) -> bool {
        needs_refresh(self.request_count, self.age(), limits)
    }

    /// Count one request against this identity
    pub fn record_request(&mut self) -> u32 {
        self.request_count += 1;
        self.request_count
    }

    /// Client bound to this session's cookies, routed through `proxy` or direct
    pub fn client_for(&mut self, proxy: Option<&ProxyEndpoint>) -> Result<reqwest::Client, FetchError> {
        let key = proxy.map(|p| p.id);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .cookie_provider(self.cookies.clone())
            .gzip(true)
            .brotli(true);

        builder = match proxy {
            Some(endpoint) => {
                let proxy = endpoint.to_reqwest_proxy().map_err(|e| FetchError::proxy(e.to_string()))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder.build().map_err(|e| FetchError::transport(e.to_string()))?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for FetchSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_refresh_thresholds() {
        let limits = SessionLimits {
            max_requests: 100,
            max_age: Duration::from_secs(3600),
        };
        assert!(!needs_refresh(0, Duration::ZERO, &limits));
        assert!(!needs_refresh(99, Duration::from_secs(3599), &limits));
        assert!(needs_refresh(100, Duration::ZERO, &limits));
        assert!(needs_refresh(3, Duration::from_secs(3600), &limits));
    }

    #[test]
    fn test_fresh_session_state() {
        let mut session = FetchSession::new();
        assert_eq!(session.request_count(), 0);
        assert_eq!(session.record_request(), 1);
        assert_eq!(session.record_request(), 2);
        assert_ne!(session.id(), FetchSession::new().id());
    }

    #[test]
    fn test_clients_cached_per_route() {
        let mut session = FetchSession::new();
        let mut proxy = ProxyEndpoint::new("127.0.0.1", 8080);
        proxy.id = 7;

        session.client_for(None).unwrap();
        session.client_for(None).unwrap();
        session.client_for(Some(&proxy)).unwrap();
        assert_eq!(session.clients.len(), 2);
    }
}
