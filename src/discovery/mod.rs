//! One-hop discovery of pages likely to hold admissions and fee data

use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub mod taxonomy;

pub use taxonomy::KeywordTaxonomy;

use crate::config::DiscoveryConfig;
use crate::scraper::FetchEngine;

/// A candidate page to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredUrl {
    pub url: Url,
    /// Position in the ranked list, 0 first
    pub rank: usize,
    pub top_priority: bool,
    pub is_seed: bool,
}

/// Rank the seed and its relevant same-origin outbound links, capped at
/// `max_pages`.
///
/// Links whose URL contains a priority term come first; ties break on the URL
/// string.
pub fn rank_candidates(seed: &Url, html: &str, taxonomy: &KeywordTaxonomy, max_pages: usize) -> Vec<DiscoveredUrl> {
    let seed = without_fragment(seed.clone());
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = vec![seed.clone()];
    seen.insert(seed.to_string());

    let document = Html::parse_document(html);
    if let Ok(anchors) = Selector::parse("a[href]") {
        for anchor in document.select(&anchors) {
            let raw_href = anchor.value().attr("href").unwrap_or_default().trim();
            if raw_href.is_empty() {
                continue;
            }

            let text = anchor.text().collect::<Vec<_>>().join(" ");
            if !taxonomy.is_relevant(raw_href, text.trim()) {
                continue;
            }

            let Ok(resolved) = seed.join(raw_href) else {
                continue;
            };
            let resolved = without_fragment(resolved);
            if !same_origin(&seed, &resolved) {
                continue;
            }

            if seen.insert(resolved.to_string()) {
                candidates.push(resolved);
            }
        }
    }

    let mut ranked: Vec<(bool, Url)> = candidates
        .into_iter()
        .map(|url| (taxonomy.is_priority(url.as_str()), url))
        .collect();
    ranked.sort_by(|(a_priority, a), (b_priority, b)| {
        b_priority.cmp(a_priority).then_with(|| a.as_str().cmp(b.as_str()))
    });

    debug!(
        "Found {} relevant pages for {}, keeping up to {}",
        ranked.len(),
        seed,
        max_pages
    );

    ranked
        .into_iter()
        .take(max_pages)
        .enumerate()
        .map(|(rank, (top_priority, url))| DiscoveredUrl {
            is_seed: url == seed,
            url,
            rank,
            top_priority,
        })
        .collect()
}

fn without_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// An http(s) link whose network location (userinfo, host and explicit
/// port) equals the seed's; subdomains are different locations
fn same_origin(seed: &Url, candidate: &Url) -> bool {
    matches!(candidate.scheme(), "http" | "https")
        && candidate.username() == seed.username()
        && candidate.password() == seed.password()
        && candidate.host_str() == seed.host_str()
        && candidate.port() == seed.port()
}

/// Fetches a seed page and ranks its outbound links
pub struct PageDiscovery {
    engine: Arc<FetchEngine>,
    taxonomy: KeywordTaxonomy,
}

impl PageDiscovery {
    pub fn new(engine: Arc<FetchEngine>, config: &DiscoveryConfig) -> Self {
        Self {
            engine,
            taxonomy: KeywordTaxonomy::from_config(config),
        }
    }

    /// Ranked candidate pages for `seed`. An unreachable seed degrades to the
    /// seed alone.
    pub async fn discover(&self, seed: &Url, max_pages: usize) -> Vec<DiscoveredUrl> {
        info!("Discovering pages for {}", seed);

        match self.engine.fetch_via_pool(seed.as_str()).await {
            Ok(page) => {
                let pages = rank_candidates(seed, &page.body, &self.taxonomy, max_pages);
                info!("Scraping up to {} pages for {}", pages.len(), seed);
                pages
            }
            Err(e) => {
                warn!("Seed page {} unreachable ({}), using it alone", seed, e);
                let seed = without_fragment(seed.clone());
                let top_priority = self.taxonomy.is_priority(seed.as_str());
                std::iter::once(DiscoveredUrl {
                    url: seed,
                    rank: 0,
                    top_priority,
                    is_seed: true,
                })
                .take(max_pages)
                .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::scraper::NoDelay;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn urls(found: &[DiscoveredUrl]) -> Vec<String> {
        found.iter().map(|d| d.url.to_string()).collect()
    }

    #[test]
    fn test_ranking_and_exclusion() {
        let seed = Url::parse("https://uni.edu/").unwrap();
        let html = r#"<body>
            <a href="/programs">Our programs</a>
            <a href="/admission-2024">Admissions</a>
            <a href="/news/event-123">Admission day event</a>
            <a href="/fees">Costs</a>
        </body>"#;

        let found = rank_candidates(&seed, html, &KeywordTaxonomy::default(), 10);
        assert_eq!(
            urls(&found),
            vec![
                "https://uni.edu/admission-2024",
                "https://uni.edu/fees",
                "https://uni.edu/",
                "https://uni.edu/programs",
            ]
        );
        assert!(found[0].top_priority && found[1].top_priority);
        assert!(!found[3].top_priority);
        assert!(found[2].is_seed);
        assert_eq!(found.iter().map(|d| d.rank).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_same_origin_only() {
        let seed = Url::parse("https://uni.edu/home").unwrap();
        let html = r#"
            <a href="https://apply.uni.edu/admission">Apply portal</a>
            <a href="https://uni.edu:8443/fees">Fees</a>
            <a href="http://other.edu/tuition">Tuition</a>
            <a href="mailto:admission@uni.edu">Admission office</a>
            <a href="https://staff@uni.edu/fees">Fees (staff)</a>
            <a href="https://uni.edu/tuition#table">Tuition</a>
            <a href="/tuition">Tuition again</a>
        "#;

        let found = rank_candidates(&seed, html, &KeywordTaxonomy::default(), 10);
        assert_eq!(urls(&found), vec!["https://uni.edu/tuition", "https://uni.edu/home"]);
    }

    #[test]
    fn test_cap_is_hard() {
        let seed = Url::parse("https://uni.edu/").unwrap();
        let html: String = (0..30)
            .map(|i| format!(r#"<a href="/fees/{:02}">Fee schedule</a>"#, i))
            .collect();

        let found = rank_candidates(&seed, &html, &KeywordTaxonomy::default(), 10);
        assert_eq!(found.len(), 10);
        assert_eq!(found[0].url.as_str(), "https://uni.edu/fees/00");
        // the seed has no priority term and falls past the cap
        assert!(found.iter().all(|d| !d.is_seed));
    }

    #[tokio::test]
    async fn test_discover_fetches_seed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="/scholarships">Scholarships</a><a href="/blog">Blog</a>"#),
            )
            .mount(&server)
            .await;

        let engine = Arc::new(FetchEngine::new(FetchConfig::default(), None).with_pacing(Arc::new(NoDelay)));
        let discovery = PageDiscovery::new(engine, &DiscoveryConfig::default());
        let seed = Url::parse(&format!("{}/", server.uri())).unwrap();

        let found = discovery.discover(&seed, 10).await;
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|d| d.url.path() == "/scholarships"));
        assert!(found.iter().all(|d| d.url.path() != "/blog"));
    }

    #[tokio::test]
    async fn test_unreachable_seed_degrades_to_seed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let engine = Arc::new(FetchEngine::new(FetchConfig::default(), None).with_pacing(Arc::new(NoDelay)));
        let discovery = PageDiscovery::new(engine, &DiscoveryConfig::default());
        let seed = Url::parse(&format!("{}/admissions", server.uri())).unwrap();

        let found = discovery.discover(&seed, 10).await;
        assert_eq!(found.len(), 1);
        assert!(found[0].is_seed);
        assert!(found[0].top_priority);
        assert_eq!(found[0].url, seed);
    }
}
