//! Proxy acquisition, verification and rotation

pub mod endpoint;
pub mod pool;
pub mod prober;

pub use endpoint::{ProxyCredentials, ProxyEndpoint, ProxyId, ProxyProtocol};
pub use pool::{HealthReport, PoolPolicy, PoolStats, ProxyPool, VerifyReport};
pub use prober::{HttpProber, ProbeOutcome, ProxyProber};
