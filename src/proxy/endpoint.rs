use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Pool-assigned identity of an endpoint, also its insertion order
pub type ProxyId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyProtocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "socks5" => Ok(Self::Socks5),
            _ => Err(()),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A proxy endpoint and its health counters.
///
/// Instances handed out by the pool are snapshots; mutating one does not
/// affect the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub id: ProxyId,
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub credentials: Option<ProxyCredentials>,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_response_time: Option<Duration>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub working: bool,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: 0,
            host: host.into(),
            port,
            protocol: ProxyProtocol::Http,
            credentials: None,
            success_count: 0,
            failure_count: 0,
            last_response_time: None,
            last_used: None,
            last_checked: None,
            working: false,
        }
    }

    /// Parse one listing line: `host:port` or `user:pass@host:port`, with an
    /// optional `scheme://` prefix. Returns `None` for anything malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || !line.contains(':') {
            return None;
        }

        let (protocol, rest) = match line.split_once("://") {
            Some((scheme, rest)) => (scheme.parse::<ProxyProtocol>().ok()?, rest),
            None => (ProxyProtocol::Http, line),
        };

        let (credentials, address) = match rest.split_once('@') {
            Some((auth, address)) => {
                if address.contains('@') {
                    return None;
                }
                let (username, password) = split_pair(auth)?;
                let credentials = ProxyCredentials {
                    username: username.to_string(),
                    password: password.to_string(),
                };
                (Some(credentials), address)
            }
            None => (None, rest),
        };

        let (host, port) = split_pair(address)?;
        let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;

        let mut endpoint = Self::new(host, port);
        endpoint.protocol = protocol;
        endpoint.credentials = credentials;
        Some(endpoint)
    }

    /// Success percentage in [0, 100]; 0 when no attempts were made
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64 * 100.0
        }
    }

    /// `host:port`, used for logging; never includes credentials
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL without credentials
    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    /// Same host, port, protocol and credentials
    pub fn same_identity(&self, other: &ProxyEndpoint) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.protocol == other.protocol
            && self.credentials == other.credentials
    }

    pub fn to_reqwest_proxy(&self) -> reqwest::Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.proxy_url())?;
        Ok(match &self.credentials {
            Some(creds) => proxy.basic_auth(&creds.username, &creds.password),
            None => proxy,
        })
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol.scheme(), self.address())
    }
}

/// Split `a:b` into two non-empty halves; more than one colon is malformed
fn split_pair(s: &str) -> Option<(&str, &str)> {
    let (left, right) = s.split_once(':')?;
    if left.is_empty() || right.is_empty() || right.contains(':') {
        return None;
    }
    Some((left, right))
}
