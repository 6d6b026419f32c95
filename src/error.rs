// src/error.rs
// Error taxonomy shared across the pipeline and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

/// Feed (announcement list) failures. Batch-level: these abort the invocation.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned status {0}")]
    Status(u16),

    #[error("failed to decode feed response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Per-item attachment download failures.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("attachment reference is empty")]
    EmptyRef,

    #[error("download request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("attachment {reference} returned status {status}")]
    Status { reference: String, status: u16 },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Enrichment (AI) failures. Only `Status` with 429/500/503 is transient;
/// everything else is terminal and must not be retried.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("failed to read document {path}: {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode AI response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("AI call failed after {attempts} attempts due to rate limits or transient errors")]
    RetriesExhausted { attempts: u32 },
}

impl EnrichError {
    /// Rate limiting (429) and transient server-side errors (500/503) are
    /// expected to succeed on retry; nothing else is.
    pub fn is_transient(&self) -> bool {
        matches!(self, EnrichError::Status { code, .. } if matches!(code, 429 | 500 | 503))
    }
}

/// Failures scoped to a single announcement. Counted and logged by the
/// orchestrator; never abort the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    #[error("downloaded document is empty at {0}")]
    EmptyDocument(PathBuf),

    #[error("could not stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("enrichment error: {0}")]
    Enrichment(#[from] EnrichError),
}

/// Persisted-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(String),

    #[error("store insert failed: {0}")]
    Insert(String),
}

/// Invocation-level pipeline failures surfaced to the HTTP caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("failed to fetch announcements: {0}")]
    UpstreamFetch(#[from] FeedError),

    #[error("failed to prepare working directory {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Summaries were produced but the bulk insert failed. `produced` tells
    /// the caller how much work succeeded before storage let it down.
    #[error("processed {produced} summaries but failed to save: {source}")]
    Persistence {
        produced: usize,
        #[source]
        source: StoreError,
    },

    #[error("pipeline deadline exceeded")]
    DeadlineExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_and_transient_5xx_are_transient() {
        for code in [429u16, 500, 503] {
            let e = EnrichError::Status {
                code,
                message: String::new(),
            };
            assert!(e.is_transient(), "{code} should be transient");
        }
        for code in [400u16, 401, 403, 404, 502, 504] {
            let e = EnrichError::Status {
                code,
                message: String::new(),
            };
            assert!(!e.is_transient(), "{code} should be terminal");
        }
        assert!(!EnrichError::RetriesExhausted { attempts: 5 }.is_transient());
    }
}
