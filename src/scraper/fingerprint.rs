use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL, DNT, USER_AGENT,
};

use super::user_agent::UserAgentRotator;

const ACCEPT_VARIANTS: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
];

const LANGUAGE_VARIANTS: &[&str] = &["en-US,en;q=0.9", "en-US,en;q=0.8", "en-GB,en-US;q=0.9,en;q=0.8"];

const CACHE_VARIANTS: &[&str] = &["no-cache", "max-age=0", "no-store"];

const FETCH_SITE_VARIANTS: &[&str] = &["none", "same-origin", "cross-site"];

const SEC_FETCH_DEST: &str = "sec-fetch-dest";
const SEC_FETCH_MODE: &str = "sec-fetch-mode";
const SEC_FETCH_SITE: &str = "sec-fetch-site";

/// Produces a plausible, randomly varied browser header set per request
#[derive(Debug, Clone)]
pub struct HeaderFingerprint {
    user_agents: UserAgentRotator,
    /// Probability of sending `DNT: 1`
    dnt_probability: f64,
    /// Probability of sending the `Sec-Fetch-*` trio
    fetch_metadata_probability: f64,
}

impl HeaderFingerprint {
    pub fn new(user_agents: UserAgentRotator) -> Self {
        Self {
            user_agents,
            dnt_probability: 0.5,
            fetch_metadata_probability: 0.7,
        }
    }

    /// Draw a fresh header set
    pub fn generate(&self) -> HeaderMap {
        let mut rng = rand::thread_rng();
        let mut headers = HeaderMap::new();

        let user_agent = self.user_agents.get_random_user_agent();
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }

        headers.insert(ACCEPT, pick(&mut rng, ACCEPT_VARIANTS));
        headers.insert(ACCEPT_LANGUAGE, pick(&mut rng, LANGUAGE_VARIANTS));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        headers.insert(CACHE_CONTROL, pick(&mut rng, CACHE_VARIANTS));

        if rng.gen_bool(self.dnt_probability) {
            headers.insert(DNT, HeaderValue::from_static("1"));
        }

        if rng.gen_bool(self.fetch_metadata_probability) {
            headers.insert(HeaderName::from_static(SEC_FETCH_DEST), HeaderValue::from_static("document"));
            headers.insert(HeaderName::from_static(SEC_FETCH_MODE), HeaderValue::from_static("navigate"));
            headers.insert(
                HeaderName::from_static(SEC_FETCH_SITE),
                pick(&mut rng, FETCH_SITE_VARIANTS),
            );
        }

        headers
    }
}

impl Default for HeaderFingerprint {
    fn default() -> Self {
        Self::new(UserAgentRotator::default())
    }
}

fn pick<R: Rng>(rng: &mut R, variants: &'static [&'static str]) -> HeaderValue {
    HeaderValue::from_static(variants.choose(rng).copied().unwrap_or(variants[0]))
}
