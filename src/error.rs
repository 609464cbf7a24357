//! Error taxonomy shared across the store, orchestrator, and tool surface.
//!
//! Every surfaced error names the triggering operation and a human-readable
//! cause. Remote failures are swallowed only in the documented `save` degrade
//! path; store failures always surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// A required field is missing or invalid. Rejected before any store write.
    #[error("{op}: validation failed: {detail}")]
    Validation { op: &'static str, detail: String },

    /// Lookup by name missed. At the tool layer this is a plain "not found"
    /// result, not a system fault.
    #[error("{op}: function '{name}' not found")]
    NotFound { op: &'static str, name: String },

    /// Network unreachable, non-2xx, malformed response body, or timeout from
    /// the enrichment collaborator. One condition; the caller picks the
    /// degradation policy.
    #[error("{op}: enrichment service unavailable: {detail}")]
    RemoteUnavailable { op: &'static str, detail: String },

    /// The rerank step of smart_search_and_get failed. Fatal: no local
    /// fallback ranking is defined.
    #[error("smart_search_and_get: rerank failed: {detail}")]
    RerankFailed { detail: String },

    /// The remote selection no longer exists locally. The selection is
    /// authoritative and is never second-guessed with a substitute.
    #[error("smart_search_and_get: selected candidate '{name}' no longer exists locally")]
    SelectedCandidateVanished { name: String },

    /// A status transition the lifecycle policy forbids.
    #[error("{op}: lifecycle violation: {detail}")]
    Lifecycle { op: &'static str, detail: String },

    /// Underlying persistence failure. Always fatal, never swallowed.
    #[error("{op}: store I/O failure: {detail}")]
    StoreIo { op: &'static str, detail: String },
}

impl CatalogError {
    pub fn store_io(op: &'static str, err: impl std::fmt::Display) -> Self {
        CatalogError::StoreIo {
            op,
            detail: err.to_string(),
        }
    }

    pub fn validation(op: &'static str, detail: impl Into<String>) -> Self {
        CatalogError::Validation {
            op,
            detail: detail.into(),
        }
    }
}
