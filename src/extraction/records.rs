use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kinds of record the oracle is asked for, one call per kind and page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    AdmissionDates,
    Criteria,
    FeeStructure,
    Scholarships,
}

impl RecordCategory {
    pub const ALL: [RecordCategory; 4] = [
        RecordCategory::AdmissionDates,
        RecordCategory::Criteria,
        RecordCategory::FeeStructure,
        RecordCategory::Scholarships,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmissionDates => "admission_dates",
            Self::Criteria => "criteria",
            Self::FeeStructure => "fee_structure",
            Self::Scholarships => "scholarships",
        }
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown record category: {}", s))
    }
}

/// Records grouped by category
pub type CategorizedRecords = BTreeMap<RecordCategory, Vec<ExtractionRecord>>;

/// Every category present, each with an empty list
pub fn empty_categories() -> CategorizedRecords {
    RecordCategory::ALL.iter().map(|c| (*c, Vec::new())).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDate {
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionCriterion {
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub min_marks: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list", skip_serializing_if = "Vec::is_empty")]
    pub required_tests: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list", skip_serializing_if = "Vec::is_empty")]
    pub required_subjects: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list", skip_serializing_if = "Vec::is_empty")]
    pub other_requirements: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeStructure {
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub tuition_fee: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub admission_fee: Option<String>,
    #[serde(default, deserialize_with = "lenient::fee_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub other_fees: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub total_per_semester: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list", skip_serializing_if = "Vec::is_empty")]
    pub eligibility: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub renewable: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One structured record returned by the oracle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractionRecord {
    AdmissionDate(AdmissionDate),
    Criterion(AdmissionCriterion),
    Fee(FeeStructure),
    Scholarship(Scholarship),
}

impl ExtractionRecord {
    /// Convert a loosely typed oracle record. Fails for non-objects and for
    /// fields that cannot be coerced to their declared shape.
    pub fn from_value(category: RecordCategory, value: Value) -> Result<Self, serde_json::Error> {
        if !value.is_object() {
            return Err(serde::de::Error::custom(format!(
                "expected a JSON object, got {}",
                value
            )));
        }

        Ok(match category {
            RecordCategory::AdmissionDates => Self::AdmissionDate(serde_json::from_value(value)?),
            RecordCategory::Criteria => Self::Criterion(serde_json::from_value(value)?),
            RecordCategory::FeeStructure => Self::Fee(serde_json::from_value(value)?),
            RecordCategory::Scholarships => Self::Scholarship(serde_json::from_value(value)?),
        })
    }

    pub fn category(&self) -> RecordCategory {
        match self {
            Self::AdmissionDate(_) => RecordCategory::AdmissionDates,
            Self::Criterion(_) => RecordCategory::Criteria,
            Self::Fee(_) => RecordCategory::FeeStructure,
            Self::Scholarship(_) => RecordCategory::Scholarships,
        }
    }

    /// Canonical JSON with sorted keys. Two records are duplicates iff their
    /// fingerprints are equal.
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        if let Ok(value) = serde_json::to_value(self) {
            write_canonical(&value, &mut out);
        }
        out
    }

    /// No field carries a value
    pub fn is_empty(&self) -> bool {
        matches!(serde_json::to_value(self), Ok(Value::Object(map)) if map.is_empty())
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Coercions applied to oracle output
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn scalar(value: Value) -> Result<Option<String>, String> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => {
                let s = s.trim();
                Ok((!s.is_empty()).then(|| s.to_string()))
            }
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(format!("expected a scalar, got {}", other)),
        }
    }

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        scalar(Value::deserialize(deserializer)?).map_err(D::Error::custom)
    }

    /// A list of scalars; a lone scalar becomes a one-element list
    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = match Value::deserialize(deserializer)? {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut list = Vec::with_capacity(items.len());
        for item in items {
            if let Some(s) = scalar(item).map_err(D::Error::custom)? {
                list.push(s);
            }
        }
        Ok(list)
    }

    /// Anything but a map is discarded
    pub fn fee_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            _ => BTreeMap::new(),
        })
    }

    pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" => Some(true),
                "false" | "no" | "n" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_names() {
        for category in RecordCategory::ALL {
            assert_eq!(category.as_str().parse::<RecordCategory>().unwrap(), category);
            assert_eq!(serde_json::to_value(category).unwrap(), json!(category.as_str()));
        }
        assert!("tuition".parse::<RecordCategory>().is_err());
    }

    #[test]
    fn test_scholarship_coercions() {
        let record = ExtractionRecord::from_value(
            RecordCategory::Scholarships,
            json!({
                "name": "Merit Award",
                "amount": 10000,
                "eligibility": "GPA above 3.5",
                "renewable": "yes",
                "deadline": null,
                "provider": "Alumni Fund"
            }),
        )
        .unwrap();

        let ExtractionRecord::Scholarship(s) = &record else {
            panic!("wrong variant: {:?}", record);
        };
        assert_eq!(s.name.as_deref(), Some("Merit Award"));
        assert_eq!(s.amount.as_deref(), Some("10000"));
        assert_eq!(s.eligibility, vec!["GPA above 3.5"]);
        assert_eq!(s.renewable, Some(true));
        assert!(s.deadline.is_none());
        assert_eq!(s.extra.get("provider"), Some(&json!("Alumni Fund")));
        assert_eq!(record.category(), RecordCategory::Scholarships);
    }

    #[test]
    fn test_fee_structure_other_fees_must_be_map() {
        let record = ExtractionRecord::from_value(
            RecordCategory::FeeStructure,
            json!({"program": "BSc", "tuition_fee": "50,000", "other_fees": "varies"}),
        )
        .unwrap();
        let ExtractionRecord::Fee(fee) = record else {
            panic!("wrong variant");
        };
        assert!(fee.other_fees.is_empty());
        assert!(fee.extra.is_empty());

        let with_map = ExtractionRecord::from_value(
            RecordCategory::FeeStructure,
            json!({"program": "BSc", "other_fees": {"lab": 500, "library": null}}),
        )
        .unwrap();
        let ExtractionRecord::Fee(fee) = with_map else {
            panic!("wrong variant");
        };
        assert_eq!(fee.other_fees.len(), 1);
        assert_eq!(fee.other_fees["lab"], json!(500));
    }

    #[test]
    fn test_unconvertible_records_rejected() {
        assert!(ExtractionRecord::from_value(RecordCategory::Criteria, json!("just text")).is_err());
        assert!(ExtractionRecord::from_value(RecordCategory::Criteria, json!([1, 2])).is_err());
        assert!(ExtractionRecord::from_value(RecordCategory::Criteria, json!({"program": {"nested": true}})).is_err());
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = ExtractionRecord::from_value(
            RecordCategory::Scholarships,
            json!({"name": "X", "amount": "10000"}),
        )
        .unwrap();
        let b = ExtractionRecord::from_value(
            RecordCategory::Scholarships,
            json!({"amount": "10000", "name": "X", "eligibility": []}),
        )
        .unwrap();
        let c = ExtractionRecord::from_value(
            RecordCategory::Scholarships,
            json!({"name": "X", "amount": "20000"}),
        )
        .unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint(), r#"{"amount":"10000","name":"X"}"#);
    }

    #[test]
    fn test_empty_record() {
        let empty = ExtractionRecord::from_value(RecordCategory::Criteria, json!({"program": "  "})).unwrap();
        assert!(empty.is_empty());

        let criterion = ExtractionRecord::from_value(
            RecordCategory::Criteria,
            json!({"program": "MBA", "required_tests": ["GMAT", 2]}),
        )
        .unwrap();
        assert!(!criterion.is_empty());
        let ExtractionRecord::Criterion(c) = criterion else {
            panic!("wrong variant");
        };
        assert_eq!(c.required_tests, vec!["GMAT", "2"]);
    }
}
