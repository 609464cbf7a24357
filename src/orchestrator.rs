//! Hybrid orchestrator: sequences local store writes and remote enrichment.
//!
//! The contract is local-durability-first, remote-enrichment-best-effort.
//! `save` always completes its local write before any network attempt; a
//! reader between the initial write and the enrichment update observes
//! `pending`, which is expected, not a race. If the process dies between the
//! two, the record stays `pending` — an accepted inconsistency window, not
//! something to patch over with cross-system transactions.
//!
//! Retry is owned here, explicit and bounded (one retry with backoff by
//! default); the enrichment client itself never retries.

use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::enrich::{EnrichmentClient, RemoteUnavailable, RerankCandidate, VerifyRequest};
use crate::error::CatalogError;
use crate::materialize;
use crate::record::{FunctionRecord, FunctionStatus, ListFilter, TestCase, UpsertFields};
use crate::store::{validate_name, CatalogStore};
use std::sync::Arc;

/// Shortlist size handed to the rerank step.
pub const SMART_CANDIDATE_LIMIT: usize = 10;

/// Bounded retry for remote calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Arguments of a `save_function` call. `None` fields are merge-on-missing:
/// they retain whatever the record already holds.
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub dependencies: Option<Vec<String>>,
    pub test_cases: Option<Vec<TestCase>>,
    /// Manual status override; always wins over the enrichment-driven default.
    pub status: Option<FunctionStatus>,
}

#[derive(Debug)]
pub struct SaveOutcome {
    pub record: FunctionRecord,
    /// Present when enrichment was skipped or failed and the save degraded.
    pub warning: Option<String>,
}

#[derive(Debug)]
pub enum SmartGetOutcome {
    /// Empty local shortlist; no remote call was made.
    NoMatch,
    Injected {
        name: String,
        status: FunctionStatus,
        path: PathBuf,
    },
}

pub struct HybridOrchestrator {
    store: Arc<CatalogStore>,
    client: Box<dyn EnrichmentClient>,
    retry: RetryPolicy,
    materialize_ext: String,
}

impl HybridOrchestrator {
    pub fn new(
        store: Arc<CatalogStore>,
        client: Box<dyn EnrichmentClient>,
        retry: RetryPolicy,
        materialize_ext: String,
    ) -> Self {
        HybridOrchestrator {
            store,
            client,
            retry,
            materialize_ext,
        }
    }

    /// Local-first save with best-effort verification.
    ///
    /// 1. Upsert locally (status pending unless the caller overrides).
    /// 2. Call `verify`; on failure return success-with-warning.
    /// 3. On success merge the returned metadata and apply the result status
    ///    (default verified) — unless the caller supplied a manual status.
    pub fn save(&self, request: SaveRequest) -> Result<SaveOutcome, CatalogError> {
        const OP: &str = "save_function";
        validate_name(&request.name).map_err(|detail| CatalogError::validation(OP, detail))?;
        if request.code.trim().is_empty() {
            return Err(CatalogError::validation(OP, "code must be non-empty"));
        }

        let manual_status = request.status;
        let mut fields = UpsertFields {
            code: Some(request.code.clone()),
            description: request.description.clone(),
            tags: request.tags.clone(),
            test_cases: request.test_cases.clone(),
            status: manual_status,
            metadata: None,
        };
        let dependencies = request.dependencies.clone().unwrap_or_default();
        if request.dependencies.is_some() {
            // Dependencies live under metadata; fold them into whatever
            // metadata the record already carries.
            let mut metadata = match self.store.get_by_name(&request.name) {
                Ok(existing) => existing.metadata,
                Err(CatalogError::NotFound { .. }) => BTreeMap::new(),
                Err(err) => return Err(err),
            };
            metadata.insert("dependencies".to_string(), json!(dependencies.clone()));
            fields.metadata = Some(metadata);
        }

        let record = self.store.upsert(&request.name, fields)?;
        tracing::info!(name = %record.name, status = %record.status, "function saved locally");

        let verify_request = VerifyRequest {
            name: record.name.clone(),
            code: record.code.clone(),
            description: record.description.clone(),
            tags: record.tags.clone(),
            dependencies,
            test_cases: record.test_cases.clone(),
        };

        match self.call_with_retry("verify", || self.client.verify(&verify_request)) {
            Ok(result) => {
                let mut metadata = record.metadata.clone();
                metadata.extend(result.metadata);
                let status = match manual_status {
                    Some(_) => None,
                    None => Some(result.status.unwrap_or(FunctionStatus::Verified)),
                };
                let updated = self.store.upsert(
                    &request.name,
                    UpsertFields {
                        metadata: Some(metadata),
                        status,
                        ..UpsertFields::default()
                    },
                )?;
                tracing::info!(name = %updated.name, status = %updated.status, "enrichment applied");
                Ok(SaveOutcome {
                    record: updated,
                    warning: None,
                })
            }
            Err(err) => {
                tracing::warn!(name = %record.name, error = %err, "verification degraded");
                let warning = format!(
                    "enrichment service unavailable ({err}); record kept with status '{}'",
                    record.status
                );
                Ok(SaveOutcome {
                    record,
                    warning: Some(warning),
                })
            }
        }
    }

    /// Local shortlist -> remote rerank -> authoritative get -> injection.
    ///
    /// Unlike `save` there is no local fallback: a rerank failure aborts the
    /// whole operation, and a selection that vanished locally is surfaced
    /// rather than silently replaced.
    pub fn smart_search_and_get(
        &self,
        query: &str,
        target_dir: &Path,
    ) -> Result<SmartGetOutcome, CatalogError> {
        const OP: &str = "smart_search_and_get";
        if query.trim().is_empty() {
            return Err(CatalogError::validation(OP, "query must be non-empty"));
        }

        let candidates = self.store.list(&ListFilter {
            text_query: Some(query.to_string()),
            tag: None,
            include_archived: false,
            limit: Some(SMART_CANDIDATE_LIMIT),
        })?;
        if candidates.is_empty() {
            tracing::info!(query, "no local candidates; skipping remote rerank");
            return Ok(SmartGetOutcome::NoMatch);
        }

        let rerank_candidates: Vec<RerankCandidate> = candidates
            .iter()
            .map(|summary| RerankCandidate {
                name: summary.name.clone(),
                description: summary.description.clone(),
                tags: summary.tags.clone(),
            })
            .collect();
        let selected = self
            .call_with_retry("rerank", || self.client.rerank(query, &rerank_candidates))
            .map_err(|err| CatalogError::RerankFailed {
                detail: err.to_string(),
            })?;
        tracing::info!(query, selected = %selected, "hub selected best match");

        let record = match self.store.get_by_name(&selected) {
            Ok(record) => record,
            Err(CatalogError::NotFound { .. }) => {
                return Err(CatalogError::SelectedCandidateVanished { name: selected })
            }
            Err(err) => return Err(err),
        };

        let path =
            materialize::write_function(target_dir, &record.name, &record.code, &self.materialize_ext)
                .map_err(|err| CatalogError::store_io(OP, err))?;
        self.store.record_usage(&record.name)?;

        Ok(SmartGetOutcome::Injected {
            name: record.name,
            status: record.status,
            path,
        })
    }

    fn call_with_retry<T>(
        &self,
        label: &'static str,
        mut call: impl FnMut() -> Result<T, RemoteUnavailable>,
    ) -> Result<T, RemoteUnavailable> {
        let mut last = RemoteUnavailable(format!("{label}: no attempt made"));
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tracing::debug!(label, attempt, "retrying remote call");
                thread::sleep(self.retry.backoff);
            }
            match call() {
                Ok(value) => return Ok(value),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}
