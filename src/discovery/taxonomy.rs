use crate::config::DiscoveryConfig;

/// Keyword lists deciding which links are worth fetching.
///
/// All matching is case-insensitive substring matching.
#[derive(Debug, Clone)]
pub struct KeywordTaxonomy {
    admission: Vec<String>,
    financial: Vec<String>,
    program: Vec<String>,
    excluded: Vec<String>,
    priority: Vec<String>,
}

impl KeywordTaxonomy {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            admission: lowercase(&config.admission_keywords),
            financial: lowercase(&config.financial_keywords),
            program: lowercase(&config.program_keywords),
            excluded: lowercase(&config.excluded_keywords),
            priority: lowercase(&config.priority_keywords),
        }
    }

    /// Blacklisted term in either the href or the anchor text
    pub fn is_excluded(&self, href: &str, text: &str) -> bool {
        let (href, text) = (href.to_lowercase(), text.to_lowercase());
        self.excluded
            .iter()
            .any(|term| href.contains(term.as_str()) || text.contains(term.as_str()))
    }

    /// Not excluded and carries at least one whitelisted term
    pub fn is_relevant(&self, href: &str, text: &str) -> bool {
        if self.is_excluded(href, text) {
            return false;
        }

        let (href, text) = (href.to_lowercase(), text.to_lowercase());
        self.whitelist()
            .any(|term| href.contains(term) || text.contains(term))
    }

    /// Top-priority term anywhere in the URL
    pub fn is_priority(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.priority.iter().any(|term| url.contains(term.as_str()))
    }

    fn whitelist(&self) -> impl Iterator<Item = &str> {
        self.admission
            .iter()
            .chain(&self.financial)
            .chain(&self.program)
            .map(String::as_str)
    }
}

impl Default for KeywordTaxonomy {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}

fn lowercase(words: &[String]) -> Vec<String> {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
