use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{SiteScrapeResult, SiteStatus};
use crate::extraction::OracleStats;
use crate::proxy::PoolStats;
use crate::scraper::FetchStats;

/// Outcome of a sequential run over several sites
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub results: Vec<SiteScrapeResult>,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    pub total_records: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The stop flag ended the run before every site was visited
    pub interrupted: bool,
}

impl BatchSummary {
    pub fn new(results: Vec<SiteScrapeResult>, started_at: DateTime<Utc>, interrupted: bool) -> Self {
        let count = |status: SiteStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            completed: count(SiteStatus::Completed),
            partial: count(SiteStatus::Partial),
            failed: count(SiteStatus::Failed),
            total_records: results.iter().map(|r| r.total_records).sum(),
            results,
            started_at,
            finished_at: Utc::now(),
            interrupted,
        }
    }

    pub fn site_count(&self) -> usize {
        self.results.len()
    }
}

/// Counters gathered from every subsystem
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub fetch: FetchStats,
    pub proxies: Option<PoolStats>,
    pub oracle: OracleStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ResultAggregator;
    use crate::config::SiteSeed;
    use crate::extraction::{empty_categories, ExtractionRecord, RecordCategory};
    use serde_json::json;

    fn result_with(records: usize, pages: usize) -> SiteScrapeResult {
        let mut aggregator = ResultAggregator::new();
        for page in 0..pages {
            let mut categorized = empty_categories();
            if page < records {
                let record = ExtractionRecord::from_value(
                    RecordCategory::Scholarships,
                    json!({"name": format!("Scholarship {}", page)}),
                )
                .unwrap();
                categorized.entry(RecordCategory::Scholarships).or_default().push(record);
            }
            aggregator.record_page(categorized);
        }
        aggregator.finish(&SiteSeed::new("Example University", "https://uni.edu"), None)
    }

    #[test]
    fn test_summary_counts() {
        let started_at = Utc::now();
        let summary = BatchSummary::new(
            vec![result_with(2, 3), result_with(0, 2), result_with(0, 0), result_with(1, 1)],
            started_at,
            false,
        );

        assert_eq!(summary.site_count(), 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_records, 3);
        assert!(summary.finished_at >= summary.started_at);
        assert!(!summary.interrupted);
    }
}
