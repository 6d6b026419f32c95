// src/pipeline.rs
// Ingestion orchestrator: fetch -> dedup -> per-item download + enrichment
// -> bulk persist. Items are processed sequentially on purpose (the AI
// service rate-limits us) and in isolation: one bad document never aborts
// the batch.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{Announcement, GuidanceRecord};
use crate::enrich::Enrichment;
use crate::error::{ItemError, PipelineError};
use crate::feed::Feed;
use crate::retriever::{sanitize_file_name, Retriever};
use crate::store::Store;

/// Sentinel the AI returns when no guidance is present. Such items are
/// skipped, never persisted.
pub const NO_GUIDANCE: &str = "NA";

/// Wait inserted after each item regardless of outcome.
const ITEM_DELAY: Duration = Duration::from_secs(2);

/// Keep only announcements whose issuer name has no persisted record.
/// Order-preserving, exact case-sensitive comparison, no normalization.
/// Keyed on the issuer display name: re-runs are idempotent as long as the
/// feed keeps names stable, and a renamed issuer will be ingested again.
pub fn filter_new(
    announcements: Vec<Announcement>,
    existing: &HashSet<String>,
) -> Vec<Announcement> {
    announcements
        .into_iter()
        .filter(|a| {
            let keep = !existing.contains(&a.issuer_name);
            if !keep {
                tracing::debug!(issuer = %a.issuer_name, "skipping existing announcement");
            }
            keep
        })
        .collect()
}

/// Transient per-invocation counters; never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PipelineStats {
    pub fetched: usize,
    /// Dedup survivors.
    pub new: usize,
    pub saved: usize,
    /// No attachment, or guidance came back as the "NA" sentinel.
    pub skipped: usize,
    pub errored: usize,
}

/// The three caller-visible success shapes. Persistence failure is a
/// `PipelineError::Persistence` instead, carrying the produced count.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Feed returned nothing for the range.
    NoAnnouncements,
    /// Everything fetched was already persisted.
    AllDuplicates { fetched: usize },
    Completed {
        stats: PipelineStats,
        records: Vec<GuidanceRecord>,
    },
}

enum ItemOutcome {
    Saved(GuidanceRecord),
    Skipped,
}

pub struct Orchestrator {
    feed: Arc<dyn Feed>,
    retriever: Arc<dyn Retriever>,
    enrichment: Arc<dyn Enrichment>,
    store: Arc<dyn Store>,
    dest_dir: PathBuf,
    item_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        feed: Arc<dyn Feed>,
        retriever: Arc<dyn Retriever>,
        enrichment: Arc<dyn Enrichment>,
        store: Arc<dyn Store>,
        dest_dir: PathBuf,
    ) -> Self {
        Self {
            feed,
            retriever,
            enrichment,
            store,
            dest_dir,
            item_delay: ITEM_DELAY,
        }
    }

    /// Tests shrink the inter-item wait; production keeps the 2s default.
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// One full invocation over the given date range.
    pub async fn run(
        &self,
        range: &crate::domain::DateRange,
    ) -> Result<PipelineOutcome, PipelineError> {
        let announcements = self.feed.fetch_announcements(range).await?;
        tracing::info!(count = announcements.len(), "fetched announcements from feed");

        if announcements.is_empty() {
            return Ok(PipelineOutcome::NoAnnouncements);
        }
        let fetched = announcements.len();

        // One batched existence query over all candidate names.
        let names: Vec<String> = announcements.iter().map(|a| a.issuer_name.clone()).collect();
        let existing = self
            .store
            .existing_names(&names)
            .await
            .map_err(|source| PipelineError::Persistence { produced: 0, source })?;
        let survivors = filter_new(announcements, &existing);
        tracing::info!(new = survivors.len(), fetched, "announcements after dedup");

        if survivors.is_empty() {
            return Ok(PipelineOutcome::AllDuplicates { fetched });
        }

        tokio::fs::create_dir_all(&self.dest_dir)
            .await
            .map_err(|source| PipelineError::Workdir {
                path: self.dest_dir.clone(),
                source,
            })?;

        let mut stats = PipelineStats {
            fetched,
            new: survivors.len(),
            ..Default::default()
        };
        let mut records = Vec::new();
        let total = survivors.len();

        for (i, announcement) in survivors.into_iter().enumerate() {
            tracing::info!(
                issuer = %announcement.issuer_name,
                item = i + 1,
                total,
                "processing announcement"
            );

            match self.process_item(&announcement).await {
                Ok(ItemOutcome::Saved(record)) => {
                    tracing::info!(issuer = %announcement.issuer_name, "guidance extracted");
                    records.push(record);
                }
                Ok(ItemOutcome::Skipped) => {
                    tracing::info!(issuer = %announcement.issuer_name, "announcement skipped");
                    stats.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        issuer = %announcement.issuer_name,
                        attachment = %announcement.attachment_name,
                        error = %e,
                        "failed to process announcement"
                    );
                    stats.errored += 1;
                }
            }

            tokio::time::sleep(self.item_delay).await;
        }

        stats.saved = records.len();
        tracing::info!(
            saved = stats.saved,
            skipped = stats.skipped,
            errored = stats.errored,
            "processing complete"
        );

        if !records.is_empty() {
            self.store
                .insert_guidances(records.clone())
                .await
                .map_err(|source| PipelineError::Persistence {
                    produced: records.len(),
                    source,
                })?;
        }

        Ok(PipelineOutcome::Completed { stats, records })
    }

    /// Download, verify, enrich, clean up. The temp file is removed on every
    /// exit path once the enrichment step has run (or failed).
    async fn process_item(&self, a: &Announcement) -> Result<ItemOutcome, ItemError> {
        if a.attachment_name.is_empty() {
            return Ok(ItemOutcome::Skipped);
        }

        let date_part = a.date_part().to_string();
        let save_as = format!("{}_{}.pdf", sanitize_file_name(&a.issuer_name), date_part);

        let path = self
            .retriever
            .fetch(&a.attachment_name, &self.dest_dir, &save_as)
            .await?;

        // A zero-byte download is its own failure mode; remove it before
        // reporting so nothing is left behind.
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(source) => {
                return Err(ItemError::Stat { path, source });
            }
        };
        if meta.len() == 0 {
            remove_temp_file(&path).await;
            return Err(ItemError::EmptyDocument(path));
        }
        tracing::debug!(path = %path.display(), size = meta.len(), "document saved");

        let summary = {
            let result = self.enrichment.summarize(&path).await;
            remove_temp_file(&path).await;
            result?
        };

        if summary == NO_GUIDANCE {
            return Ok(ItemOutcome::Skipped);
        }

        Ok(ItemOutcome::Saved(GuidanceRecord::new(
            &a.issuer_name,
            &date_part,
            summary,
        )))
    }
}

async fn remove_temp_file(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
    }
}
