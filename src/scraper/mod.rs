//! Page fetching: sessions, header fingerprints, pacing and content cleaning

pub mod content;
pub mod engine;
pub mod fingerprint;
pub mod pacing;
pub mod session;
pub mod user_agent;

pub use content::extract_content;
pub use engine::{FetchEngine, FetchStats, FetchedPage, SessionInfo};
pub use fingerprint::HeaderFingerprint;
pub use pacing::{paced_delay, HumanPacing, NoDelay, PacingPolicy};
pub use session::{needs_refresh, FetchSession, SessionLimits};
pub use user_agent::UserAgentRotator;
