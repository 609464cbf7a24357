//! Catalog Store: a durable keyed table of function records.
//!
//! One pretty-printed JSON file per record under `<data_dir>/functions/`,
//! mirrored by an in-memory index. Records are never hard-deleted; archival
//! is a status transition. Writes are merge-oriented so enrichment results
//! arriving asynchronously can land as partial updates without clobbering
//! concurrent manual edits of other fields.
//!
//! Concurrency: reads go through an `RwLock` index and proceed concurrently;
//! every upsert is serialized per name through a per-key mutex so two
//! concurrent saves of one name can never interleave merge-on-missing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::error::CatalogError;
use crate::lifecycle::{check_transition, ReactivationPolicy};
use crate::record::{
    compare_summaries, normalize_tags, now_epoch_ms, FunctionRecord, FunctionSummary, ListFilter,
    UpsertFields, RECORD_SCHEMA_VERSION,
};

/// On-disk wrapper for a single record file.
#[derive(Debug, Deserialize, Serialize)]
struct RecordFile {
    schema_version: u32,
    record: FunctionRecord,
}

pub struct CatalogStore {
    functions_dir: PathBuf,
    records: RwLock<BTreeMap<String, FunctionRecord>>,
    name_locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
    reactivation: ReactivationPolicy,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("static name pattern"))
}

/// Validate a function name. The name doubles as a filename stem, so path
/// separators and leading dots are rejected outright.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must be non-empty".to_string());
    }
    if !name_pattern().is_match(name) {
        return Err(format!(
            "name {name:?} must match [A-Za-z0-9_][A-Za-z0-9_.-]*"
        ));
    }
    Ok(())
}

impl CatalogStore {
    /// Open (or create) a store rooted at `data_dir`, loading every record
    /// file into the index. A corrupt or version-mismatched file is a fatal
    /// `StoreIo` error, never silently skipped.
    pub fn open(data_dir: &Path, reactivation: ReactivationPolicy) -> Result<Self, CatalogError> {
        let functions_dir = data_dir.join("functions");
        fs::create_dir_all(&functions_dir).map_err(|err| CatalogError::store_io("open", err))?;

        let mut records = BTreeMap::new();
        let entries =
            fs::read_dir(&functions_dir).map_err(|err| CatalogError::store_io("open", err))?;
        for entry in entries {
            let entry = entry.map_err(|err| CatalogError::store_io("open", err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record = load_record_file(&path)?;
            records.insert(record.name.clone(), record);
        }
        tracing::debug!(
            record_count = records.len(),
            dir = %functions_dir.display(),
            "catalog store opened"
        );

        Ok(CatalogStore {
            functions_dir,
            records: RwLock::new(records),
            name_locks: Mutex::new(BTreeMap::new()),
            reactivation,
        })
    }

    /// Insert or merge-update a record. Fields absent from `fields` retain
    /// their previous value; explicitly supplied empty values overwrite.
    /// `status` defaults to pending only on first insert. Returns the full
    /// resulting record.
    pub fn upsert(&self, name: &str, fields: UpsertFields) -> Result<FunctionRecord, CatalogError> {
        validate_name(name).map_err(|detail| CatalogError::validation("upsert", detail))?;
        if let Some(code) = fields.code.as_deref() {
            if code.trim().is_empty() {
                return Err(CatalogError::validation("upsert", "code must be non-empty"));
            }
        }

        let guard = self.name_lock(name);
        let _held = guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let existing = {
            let records = self.read_index("upsert")?;
            records.get(name).cloned()
        };

        let now = now_epoch_ms().map_err(|err| CatalogError::store_io("upsert", err))?;
        let record = match existing {
            Some(mut current) => {
                if let Some(next) = fields.status {
                    check_transition(current.status, next, self.reactivation).map_err(|detail| {
                        CatalogError::Lifecycle {
                            op: "upsert",
                            detail,
                        }
                    })?;
                    current.status = next;
                }
                if let Some(code) = fields.code {
                    current.code = code;
                }
                if let Some(description) = fields.description {
                    current.description = description;
                }
                if let Some(tags) = fields.tags {
                    current.tags = normalize_tags(tags);
                }
                if let Some(metadata) = fields.metadata {
                    current.metadata = metadata;
                }
                if let Some(test_cases) = fields.test_cases {
                    current.test_cases = test_cases;
                }
                current.updated_at_epoch_ms = now;
                current
            }
            None => {
                let code = fields.code.ok_or_else(|| {
                    CatalogError::validation("upsert", "code is required on first insert")
                })?;
                FunctionRecord {
                    name: name.to_string(),
                    code,
                    description: fields.description.unwrap_or_default(),
                    tags: normalize_tags(fields.tags.unwrap_or_default()),
                    metadata: fields.metadata.unwrap_or_default(),
                    test_cases: fields.test_cases.unwrap_or_default(),
                    status: fields.status.unwrap_or_default(),
                    call_count: 0,
                    created_at_epoch_ms: now,
                    updated_at_epoch_ms: now,
                }
            }
        };

        self.persist(&record)?;
        self.write_index("upsert")?
            .insert(name.to_string(), record.clone());
        Ok(record)
    }

    /// Exact-match lookup.
    pub fn get_by_name(&self, name: &str) -> Result<FunctionRecord, CatalogError> {
        let records = self.read_index("get_by_name")?;
        records
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                op: "get_by_name",
                name: name.to_string(),
            })
    }

    /// Filtered listing ordered by `updated_at` descending.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<FunctionSummary>, CatalogError> {
        let records = self.read_index("list")?;
        let mut summaries: Vec<FunctionSummary> = records
            .values()
            .filter(|record| filter.matches(record))
            .map(FunctionSummary::from_record)
            .collect();
        summaries.sort_by(compare_summaries);
        summaries.truncate(filter.effective_limit());
        Ok(summaries)
    }

    /// Usage-tracking hook: bump `call_count` and `updated_at`. Invoked by
    /// the tool layer whenever a record's code leaves the store.
    pub fn record_usage(&self, name: &str) -> Result<FunctionRecord, CatalogError> {
        let guard = self.name_lock(name);
        let _held = guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut record = {
            let records = self.read_index("record_usage")?;
            records
                .get(name)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound {
                    op: "record_usage",
                    name: name.to_string(),
                })?
        };
        record.call_count += 1;
        record.updated_at_epoch_ms =
            now_epoch_ms().map_err(|err| CatalogError::store_io("record_usage", err))?;

        self.persist(&record)?;
        self.write_index("record_usage")?
            .insert(name.to_string(), record.clone());
        Ok(record)
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .name_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_index(
        &self,
        op: &'static str,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, FunctionRecord>>, CatalogError>
    {
        self.records
            .read()
            .map_err(|_| CatalogError::store_io(op, "record index lock poisoned"))
    }

    fn write_index(
        &self,
        op: &'static str,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, FunctionRecord>>, CatalogError>
    {
        self.records
            .write()
            .map_err(|_| CatalogError::store_io(op, "record index lock poisoned"))
    }

    /// Atomic per-record durability: write a temp file, then rename over the
    /// destination.
    fn persist(&self, record: &FunctionRecord) -> Result<(), CatalogError> {
        let file = RecordFile {
            schema_version: RECORD_SCHEMA_VERSION,
            record: record.clone(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|err| CatalogError::store_io("upsert", err))?;
        let dest = self.record_path(&record.name);
        let tmp = self.functions_dir.join(format!(".{}.json.tmp", record.name));
        fs::write(&tmp, &bytes).map_err(|err| CatalogError::store_io("upsert", err))?;
        fs::rename(&tmp, &dest).map_err(|err| CatalogError::store_io("upsert", err))?;
        Ok(())
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.functions_dir.join(format!("{name}.json"))
    }
}

fn load_record_file(path: &Path) -> Result<FunctionRecord, CatalogError> {
    let bytes = fs::read(path)
        .map_err(|err| CatalogError::store_io("open", format!("read {}: {err}", path.display())))?;
    let file: RecordFile = serde_json::from_slice(&bytes).map_err(|err| {
        CatalogError::store_io("open", format!("parse {}: {err}", path.display()))
    })?;
    if file.schema_version != RECORD_SCHEMA_VERSION {
        return Err(CatalogError::store_io(
            "open",
            format!(
                "unsupported record schema_version {} in {}",
                file.schema_version,
                path.display()
            ),
        ));
    }
    Ok(file.record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FunctionStatus, TestCase};
    use serde_json::json;
    use std::thread;

    fn open_store(dir: &Path) -> CatalogStore {
        CatalogStore::open(dir, ReactivationPolicy::Forbidden).expect("open store")
    }

    fn save_fields(code: &str) -> UpsertFields {
        UpsertFields {
            code: Some(code.to_string()),
            ..UpsertFields::default()
        }
    }

    #[test]
    fn round_trip_returns_all_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());

        store
            .upsert("parse_csv", save_fields("def parse_csv(): pass"))
            .expect("upsert");
        let record = store.get_by_name("parse_csv").expect("get");

        assert_eq!(record.name, "parse_csv");
        assert_eq!(record.code, "def parse_csv(): pass");
        assert_eq!(record.description, "");
        assert!(record.tags.is_empty());
        assert!(record.metadata.is_empty());
        assert!(record.test_cases.is_empty());
        assert_eq!(record.status, FunctionStatus::Pending);
        assert_eq!(record.call_count, 0);
        assert_eq!(record.created_at_epoch_ms, record.updated_at_epoch_ms);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_store(dir.path());
            let fields = UpsertFields {
                code: Some("def f(): pass".to_string()),
                tags: Some(vec!["io".to_string()]),
                test_cases: Some(vec![TestCase {
                    name: Some("smoke".to_string()),
                    input: json!([1, 2]),
                    expected: json!(3),
                }]),
                ..UpsertFields::default()
            };
            store.upsert("f", fields).expect("upsert");
        }
        let store = open_store(dir.path());
        let record = store.get_by_name("f").expect("get after reopen");
        assert_eq!(record.tags, vec!["io".to_string()]);
        assert_eq!(record.test_cases.len(), 1);
    }

    #[test]
    fn merge_on_missing_retains_absent_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());

        let fields = UpsertFields {
            code: Some("def f(): pass".to_string()),
            tags: Some(vec!["a".to_string()]),
            ..UpsertFields::default()
        };
        store.upsert("f", fields).expect("insert");

        let update = UpsertFields {
            description: Some("x".to_string()),
            ..UpsertFields::default()
        };
        let record = store.upsert("f", update).expect("merge update");

        assert_eq!(record.description, "x");
        assert_eq!(record.tags, vec!["a".to_string()]);
        assert_eq!(record.code, "def f(): pass");
    }

    #[test]
    fn explicit_empty_value_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());

        let fields = UpsertFields {
            code: Some("def f(): pass".to_string()),
            tags: Some(vec!["a".to_string()]),
            description: Some("something".to_string()),
            ..UpsertFields::default()
        };
        store.upsert("f", fields).expect("insert");

        let update = UpsertFields {
            tags: Some(Vec::new()),
            description: Some(String::new()),
            ..UpsertFields::default()
        };
        let record = store.upsert("f", update).expect("overwrite");
        assert!(record.tags.is_empty());
        assert_eq!(record.description, "");
    }

    #[test]
    fn identical_upserts_are_idempotent_except_updated_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());

        let fields = UpsertFields {
            code: Some("def f(): pass".to_string()),
            description: Some("same".to_string()),
            tags: Some(vec!["t".to_string()]),
            ..UpsertFields::default()
        };
        let first = store.upsert("f", fields.clone()).expect("first");
        let second = store.upsert("f", fields).expect("second");

        assert_eq!(first.code, second.code);
        assert_eq!(first.description, second.description);
        assert_eq!(first.tags, second.tags);
        assert_eq!(first.status, second.status);
        assert_eq!(first.created_at_epoch_ms, second.created_at_epoch_ms);
        assert!(second.updated_at_epoch_ms >= first.updated_at_epoch_ms);
    }

    #[test]
    fn first_insert_defaults_to_pending_and_manual_status_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());

        let record = store.upsert("a", save_fields("code a")).expect("insert");
        assert_eq!(record.status, FunctionStatus::Pending);

        let fields = UpsertFields {
            code: Some("code b".to_string()),
            status: Some(FunctionStatus::Verified),
            ..UpsertFields::default()
        };
        let record = store.upsert("b", fields).expect("insert with status");
        assert_eq!(record.status, FunctionStatus::Verified);

        // Update without status retains the current one.
        let record = store
            .upsert("b", save_fields("code b2"))
            .expect("update without status");
        assert_eq!(record.status, FunctionStatus::Verified);
    }

    #[test]
    fn insert_without_code_is_a_validation_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let err = store
            .upsert("f", UpsertFields::default())
            .expect_err("missing code");
        assert!(matches!(err, CatalogError::Validation { .. }));

        let err = store
            .upsert("f", save_fields("   "))
            .expect_err("blank code");
        assert!(matches!(err, CatalogError::Validation { .. }));
    }

    #[test]
    fn hostile_names_are_rejected_before_any_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        for name in ["", "  ", "../evil", "a/b", ".hidden"] {
            let err = store
                .upsert(name, save_fields("code"))
                .expect_err("bad name");
            assert!(matches!(err, CatalogError::Validation { .. }), "{name:?}");
        }
    }

    #[test]
    fn get_by_name_misses_with_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let err = store.get_by_name("absent").expect_err("miss");
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[test]
    fn list_orders_by_updated_at_desc_and_truncates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store.upsert("first", save_fields("c1")).expect("insert");
        store.upsert("second", save_fields("c2")).expect("insert");
        // Touch "first" so it becomes the most recently updated.
        store
            .upsert(
                "first",
                UpsertFields {
                    description: Some("fresh".to_string()),
                    ..UpsertFields::default()
                },
            )
            .expect("touch");

        let all = store.list(&ListFilter::default()).expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "first");

        let limited = store
            .list(&ListFilter {
                limit: Some(1),
                ..ListFilter::default()
            })
            .expect("list limited");
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn archive_via_status_then_default_list_excludes_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store.upsert("f", save_fields("code")).expect("insert");
        store
            .upsert(
                "f",
                UpsertFields {
                    status: Some(FunctionStatus::Archived),
                    ..UpsertFields::default()
                },
            )
            .expect("archive");

        assert!(store.list(&ListFilter::default()).expect("list").is_empty());
        let included = store
            .list(&ListFilter {
                include_archived: true,
                ..ListFilter::default()
            })
            .expect("list archived");
        assert_eq!(included.len(), 1);

        // Default policy keeps archived terminal.
        let err = store
            .upsert(
                "f",
                UpsertFields {
                    status: Some(FunctionStatus::Pending),
                    ..UpsertFields::default()
                },
            )
            .expect_err("unarchive");
        assert!(matches!(err, CatalogError::Lifecycle { .. }));
    }

    #[test]
    fn record_usage_bumps_call_count_monotonically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store.upsert("f", save_fields("code")).expect("insert");
        store.record_usage("f").expect("first use");
        let record = store.record_usage("f").expect("second use");
        assert_eq!(record.call_count, 2);
    }

    #[test]
    fn concurrent_same_name_saves_never_tear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(open_store(dir.path()));
        store.upsert("f", save_fields("base")).expect("seed");

        let mut handles = Vec::new();
        for label in ["alpha", "beta"] {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let fields = UpsertFields {
                        description: Some(label.to_string()),
                        tags: Some(vec![label.to_string()]),
                        ..UpsertFields::default()
                    };
                    store.upsert("f", fields).expect("concurrent upsert");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("join writer");
        }

        // Every observable state must come wholly from one input: the
        // description and tag always agree.
        let record = store.get_by_name("f").expect("get");
        assert_eq!(record.tags.len(), 1);
        assert_eq!(record.description, record.tags[0]);
        assert_eq!(record.code, "base");
    }
}
