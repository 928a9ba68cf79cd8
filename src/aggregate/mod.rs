//! Per-site merging, deduplication and outcome classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::info;

use crate::config::SiteSeed;
use crate::extraction::{empty_categories, CategorizedRecords, ExtractionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Completed,
    Partial,
    Failed,
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of scraping one site
#[derive(Debug, Clone, Serialize)]
pub struct SiteScrapeResult {
    pub site_name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub status: SiteStatus,
    pub pages_fetched: usize,
    pub records: CategorizedRecords,
    pub total_records: usize,
    pub error_message: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Collects page results for one site scrape
#[derive(Debug)]
pub struct ResultAggregator {
    accumulated: CategorizedRecords,
    pages_fetched: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            accumulated: empty_categories(),
            pages_fetched: 0,
        }
    }

    /// Add the records of one fetched page, in encounter order
    pub fn record_page(&mut self, page: CategorizedRecords) {
        self.pages_fetched += 1;
        for (category, records) in page {
            self.accumulated.entry(category).or_default().extend(records);
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Concatenate per-page results category by category, then deduplicate
    pub fn merge<I>(pages: I) -> CategorizedRecords
    where
        I: IntoIterator<Item = CategorizedRecords>,
    {
        let mut merged = empty_categories();
        for page in pages {
            for (category, records) in page {
                merged.entry(category).or_default().extend(records);
            }
        }
        Self::deduplicate(merged)
    }

    /// Stable structural deduplication; the first occurrence wins
    pub fn deduplicate(records: CategorizedRecords) -> CategorizedRecords {
        records
            .into_iter()
            .map(|(category, items)| {
                let before = items.len();
                let mut seen = HashSet::new();
                let unique: Vec<ExtractionRecord> = items
                    .into_iter()
                    .filter(|record| seen.insert(record.fingerprint()))
                    .collect();

                if unique.len() != before {
                    info!("Removed {} duplicate {} entries", before - unique.len(), category);
                }
                (category, unique)
            })
            .collect()
    }

    /// completed: at least one record; partial: pages fetched but nothing
    /// extracted; failed: no page fetched at all
    pub fn summarize(pages_fetched: usize, records: &CategorizedRecords) -> SiteStatus {
        if total_records(records) > 0 {
            SiteStatus::Completed
        } else if pages_fetched > 0 {
            SiteStatus::Partial
        } else {
            SiteStatus::Failed
        }
    }

    /// Deduplicate what was gathered and roll it up into a site result.
    /// `error` is the unrecoverable error that stopped the scrape, if any.
    pub fn finish(self, site: &SiteSeed, error: Option<String>) -> SiteScrapeResult {
        let pages_fetched = self.pages_fetched;
        let records = Self::deduplicate(self.accumulated);
        let status = Self::summarize(pages_fetched, &records);

        let error_message = match status {
            SiteStatus::Completed => error,
            SiteStatus::Partial => error.or_else(|| Some("No data extracted".to_string())),
            SiteStatus::Failed => error.or_else(|| Some("No page could be fetched".to_string())),
        };

        SiteScrapeResult {
            site_name: site.name.clone(),
            url: site.url.clone(),
            city: site.city.clone(),
            country: site.country.clone(),
            kind: site.kind.clone(),
            status,
            pages_fetched,
            total_records: total_records(&records),
            records,
            error_message,
            scraped_at: Utc::now(),
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn total_records(records: &CategorizedRecords) -> usize {
    records.values().map(Vec::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::RecordCategory;
    use serde_json::json;

    fn scholarship(value: serde_json::Value) -> ExtractionRecord {
        ExtractionRecord::from_value(RecordCategory::Scholarships, value).unwrap()
    }

    fn page(records: Vec<ExtractionRecord>) -> CategorizedRecords {
        let mut page = empty_categories();
        for record in records {
            page.entry(record.category()).or_default().push(record);
        }
        page
    }

    #[test]
    fn test_merge_dedups_across_pages() {
        let first = page(vec![
            scholarship(json!({"name": "X", "amount": "10000"})),
            scholarship(json!({"name": "Y", "amount": "500"})),
        ]);
        let second = page(vec![
            scholarship(json!({"amount": "10000", "name": "X"})),
            scholarship(json!({"name": "Z"})),
        ]);

        let merged = ResultAggregator::merge(vec![first, second]);
        let names: Vec<_> = merged[&RecordCategory::Scholarships]
            .iter()
            .map(|r| match r {
                ExtractionRecord::Scholarship(s) => s.name.clone().unwrap(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        assert_eq!(names, vec!["X", "Y", "Z"]);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_same_fields_in_different_categories_are_distinct() {
        let fee = ExtractionRecord::from_value(RecordCategory::FeeStructure, json!({"program": "BSc"})).unwrap();
        let criterion = ExtractionRecord::from_value(RecordCategory::Criteria, json!({"program": "BSc"})).unwrap();

        let merged = ResultAggregator::merge(vec![page(vec![fee.clone(), criterion]), page(vec![fee])]);
        assert_eq!(merged[&RecordCategory::FeeStructure].len(), 1);
        assert_eq!(merged[&RecordCategory::Criteria].len(), 1);
    }

    #[test]
    fn test_summarize() {
        let empty = empty_categories();
        assert_eq!(ResultAggregator::summarize(0, &empty), SiteStatus::Failed);
        assert_eq!(ResultAggregator::summarize(3, &empty), SiteStatus::Partial);

        let one = page(vec![scholarship(json!({"name": "X"}))]);
        assert_eq!(ResultAggregator::summarize(1, &one), SiteStatus::Completed);
    }

    #[test]
    fn test_finish_rolls_up() {
        let site = SiteSeed::new("Example University", "https://uni.edu");

        let mut aggregator = ResultAggregator::new();
        aggregator.record_page(page(vec![scholarship(json!({"name": "X", "amount": "10000"}))]));
        aggregator.record_page(page(vec![scholarship(json!({"name": "X", "amount": "10000"}))]));
        let result = aggregator.finish(&site, None);

        assert_eq!(result.status, SiteStatus::Completed);
        assert_eq!(result.pages_fetched, 2);
        assert_eq!(result.total_records, 1);
        assert!(result.error_message.is_none());

        let mut partial = ResultAggregator::new();
        partial.record_page(empty_categories());
        let result = partial.finish(&site, None);
        assert_eq!(result.status, SiteStatus::Partial);
        assert_eq!(result.error_message.as_deref(), Some("No data extracted"));

        let failed = ResultAggregator::new().finish(&site, Some("no proxy available".to_string()));
        assert_eq!(failed.status, SiteStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("no proxy available"));

        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["records"]["scholarships"].as_array().unwrap().is_empty());
    }
}
