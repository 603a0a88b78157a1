//! Docket model.
//!
//! A docket is a single production job entry fetched from an upstream
//! source. Dockets are replaced wholesale on every sync pass and never
//! patched field by field, so the type is a plain value with no setters.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A production job record.
///
/// Identity is `full_name`, which is derived from the docket number and
/// job name when the record is created (e.g. `"24117_Spring Campaign"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocketRecord {
    /// Unique key, derived from `number` and `job_name`.
    pub full_name: String,

    /// Docket number as issued by the production office.
    pub number: String,

    /// Human job name.
    pub job_name: String,

    /// Producer or coordinator responsible for the job.
    #[serde(default)]
    pub owner: Option<String>,

    /// Delivery date, if known.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub subtasks: Vec<String>,

    /// Upstream container (e.g. project ID) the docket was fetched from.
    #[serde(default)]
    pub source_id: Option<String>,

    /// Last modification time reported by the source.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Provider-specific metadata. Sorted map so serialization is stable.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DocketRecord {
    /// Create a docket with its key derived from number and job name.
    pub fn new(number: &str, job_name: &str) -> Self {
        Self {
            full_name: derive_full_name(number, job_name),
            number: number.to_string(),
            job_name: job_name.to_string(),
            owner: None,
            due_date: None,
            tags: Vec::new(),
            subtasks: Vec::new(),
            source_id: None,
            updated_at: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the upstream container this docket came from.
    #[must_use]
    pub fn with_source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    /// Set the delivery date.
    #[must_use]
    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Set the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }
}

/// Build the unique key for a docket.
#[must_use]
pub fn derive_full_name(number: &str, job_name: &str) -> String {
    format!("{}_{}", number.trim(), job_name.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_docket_derives_key() {
        let docket = DocketRecord::new("24117", "Spring Campaign");
        assert_eq!(docket.full_name, "24117_Spring Campaign");
        assert!(docket.tags.is_empty());
    }

    #[test]
    fn test_docket_json_is_camel_case() {
        let docket = DocketRecord::new("1", "Promo").with_source("proj_9");
        let json = serde_json::to_value(&docket).unwrap();
        assert_eq!(json["fullName"], "1_Promo");
        assert_eq!(json["sourceId"], "proj_9");
    }

    #[test]
    fn test_docket_tolerates_missing_optional_fields() {
        let docket: DocketRecord =
            serde_json::from_str(r#"{"fullName":"7_Trailer","number":"7","jobName":"Trailer"}"#)
                .unwrap();
        assert_eq!(docket.owner, None);
        assert!(docket.metadata.is_empty());
    }
}
