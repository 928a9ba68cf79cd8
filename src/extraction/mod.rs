//! Structured record extraction through an external oracle

pub mod oracle;
pub mod parse;
pub mod records;

pub use oracle::{ExtractionOracle, HttpOracle, NoOracle, OracleStats, RetryingOracle};
pub use parse::{parse_oracle_response, prepare_oracle_input};
pub use records::{
    empty_categories, AdmissionCriterion, AdmissionDate, CategorizedRecords, ExtractionRecord, FeeStructure,
    RecordCategory, Scholarship,
};

use tracing::{debug, info};

/// Ask the oracle for every category in turn. Records that cannot be converted
/// to their typed shape, or carry no values at all, are dropped.
pub async fn extract_all(oracle: &RetryingOracle, text: &str, source_url: &str) -> CategorizedRecords {
    let mut results = empty_categories();

    for category in RecordCategory::ALL {
        let raw = oracle.extract(category, text).await;
        let records = results.entry(category).or_default();

        for value in raw {
            match ExtractionRecord::from_value(category, value) {
                Ok(record) if !record.is_empty() => records.push(record),
                Ok(_) => debug!("Dropping empty {} record from {}", category, source_url),
                Err(e) => debug!("Dropping malformed {} record from {}: {}", category, source_url, e),
            }
        }
    }

    let total: usize = results.values().map(Vec::len).sum();
    info!("Extracted {} records from {}", total, source_url);
    results
}
