//! The catalog's sole entity: a reusable function record.
//!
//! Tags, metadata, and test cases are typed fields of the serialized record,
//! never string-embedded JSON, so tag membership checks are exact-element
//! rather than substring matches on a serialized form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Default truncation for list queries.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Verification lifecycle of a record.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FunctionStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
    Archived,
}

impl FunctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionStatus::Pending => "pending",
            FunctionStatus::Verified => "verified",
            FunctionStatus::Rejected => "rejected",
            FunctionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured test case attached to a record. The fields are opaque to
/// the store; the execution collaborator interprets them.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub expected: Value,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FunctionRecord {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub status: FunctionStatus,
    #[serde(default)]
    pub call_count: u64,
    pub created_at_epoch_ms: u128,
    pub updated_at_epoch_ms: u128,
}

/// Partial update for `upsert`. `None` retains the previous value
/// (merge-on-missing); an explicitly supplied empty value overwrites.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct UpsertFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cases: Option<Vec<TestCase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FunctionStatus>,
}

/// Projection returned by list queries.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub status: FunctionStatus,
    pub call_count: u64,
    pub updated_at_epoch_ms: u128,
}

impl FunctionSummary {
    pub fn from_record(record: &FunctionRecord) -> Self {
        FunctionSummary {
            name: record.name.clone(),
            description: record.description.clone(),
            tags: record.tags.clone(),
            status: record.status,
            call_count: record.call_count,
            updated_at_epoch_ms: record.updated_at_epoch_ms,
        }
    }
}

/// Optional AND-combined list filters.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Case-insensitive substring over name or description.
    pub text_query: Option<String>,
    /// Exact set membership in `tags`.
    pub tag: Option<String>,
    /// Include archived records (default false).
    pub include_archived: bool,
    /// Truncation, clamped to at least 1. `None` means the default limit.
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1)
    }

    pub fn matches(&self, record: &FunctionRecord) -> bool {
        if !self.include_archived && record.status == FunctionStatus::Archived {
            return false;
        }
        if let Some(query) = self.text_query.as_deref() {
            let needle = query.to_lowercase();
            let in_name = record.name.to_lowercase().contains(&needle);
            let in_description = record.description.to_lowercase().contains(&needle);
            if !in_name && !in_description {
                return false;
            }
        }
        if let Some(tag) = self.tag.as_deref() {
            if !record.tags.iter().any(|candidate| candidate == tag) {
                return false;
            }
        }
        true
    }
}

/// Ordering for list results: updated_at descending, name ascending tie-break.
pub fn compare_summaries(a: &FunctionSummary, b: &FunctionSummary) -> Ordering {
    b.updated_at_epoch_ms
        .cmp(&a.updated_at_epoch_ms)
        .then_with(|| a.name.cmp(&b.name))
}

pub fn now_epoch_ms() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute timestamp")?
        .as_millis())
}

/// Deduplicate tags while preserving first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(tags: &[&str], status: FunctionStatus) -> FunctionRecord {
        FunctionRecord {
            name: "sample_fn".to_string(),
            code: "def sample_fn(): pass".to_string(),
            description: "Parses CSV rows".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: BTreeMap::new(),
            test_cases: Vec::new(),
            status,
            call_count: 0,
            created_at_epoch_ms: 1,
            updated_at_epoch_ms: 1,
        }
    }

    #[test]
    fn tag_filter_is_exact_membership_not_substring() {
        let record = record_with(&["ab"], FunctionStatus::Pending);
        let filter = ListFilter {
            tag: Some("a".to_string()),
            ..ListFilter::default()
        };
        assert!(!filter.matches(&record));

        let filter = ListFilter {
            tag: Some("ab".to_string()),
            ..ListFilter::default()
        };
        assert!(filter.matches(&record));
    }

    #[test]
    fn text_query_is_case_insensitive_over_name_and_description() {
        let record = record_with(&[], FunctionStatus::Pending);
        for query in ["SAMPLE", "csv", "parses csv"] {
            let filter = ListFilter {
                text_query: Some(query.to_string()),
                ..ListFilter::default()
            };
            assert!(filter.matches(&record), "query {query:?} should match");
        }
        let filter = ListFilter {
            text_query: Some("tsv".to_string()),
            ..ListFilter::default()
        };
        assert!(!filter.matches(&record));
    }

    #[test]
    fn archived_excluded_unless_requested() {
        let record = record_with(&[], FunctionStatus::Archived);
        assert!(!ListFilter::default().matches(&record));
        let filter = ListFilter {
            include_archived: true,
            ..ListFilter::default()
        };
        assert!(filter.matches(&record));
    }

    #[test]
    fn limit_is_clamped_to_at_least_one() {
        let filter = ListFilter {
            limit: Some(0),
            ..ListFilter::default()
        };
        assert_eq!(filter.effective_limit(), 1);
        assert_eq!(ListFilter::default().effective_limit(), DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn normalize_tags_dedupes_preserving_order() {
        let tags = vec!["io".to_string(), "csv".to_string(), "io".to_string()];
        assert_eq!(
            normalize_tags(tags),
            vec!["io".to_string(), "csv".to_string()]
        );
    }
}
