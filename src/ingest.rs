//! Ingestion orchestration: the resumable, cancellable state machine that
//! moves a mailbox selection into the local store and vector index.
//!
//! A run walks COLLECTING → STORING → INDEXING → DONE, with CANCELLED as a
//! side branch out of the first two phases. Remote calls are the only
//! long-latency operations, so the pause gate sits before every page fetch
//! and every batch commit — worst-case pause latency is one page fetch.
//!
//! Durability model: each batch is a store write followed by an index
//! write, treated as a unit. If either fails, the run aborts and that
//! batch is lost; every batch committed before it stays durable. There is
//! no cross-run rollback — cancelling after K batches leaves exactly those
//! K batches stored and indexed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::control::IngestControl;
use crate::error::Error;
use crate::graph::MailSource;
use crate::index::VectorIndex;
use crate::models::{IngestMode, MessageRecord};
use crate::progress::{IngestEvent, IngestPhase, IngestReporter};
use crate::store::{MessageStore, RunMeta};

/// What the user picked in the selection step.
#[derive(Debug, Clone)]
pub enum IngestSelection {
    /// Most-recent-N messages from each folder.
    Folders {
        folder_ids: Vec<String>,
        per_folder_limit: usize,
    },
    /// A fixed list of message identifiers.
    Messages { message_ids: Vec<String> },
}

impl IngestSelection {
    pub fn mode(&self) -> IngestMode {
        match self {
            IngestSelection::Folders { .. } => IngestMode::Folders,
            IngestSelection::Messages { .. } => IngestMode::Selection,
        }
    }
}

/// Terminal state of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// User-cancelled. Batches committed before the cancel remain stored
    /// and indexed — surface this as "some items may already be indexed".
    Cancelled,
}

/// Result of a finished (completed or cancelled) run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub run_id: String,
    pub label: String,
    pub mode: IngestMode,
    pub status: RunStatus,
    /// Deduplicated ids actually committed, in commit order.
    pub message_ids: Vec<String>,
    pub stored: u64,
    /// Records skipped for having no usable identifier.
    pub rejected: u64,
}

/// A failed run, carrying how much had already been durably committed so
/// the caller can report "N items were indexed before the error".
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct IngestFailure {
    pub error: Error,
    pub committed: u64,
}

pub struct Ingestor {
    store: Arc<MessageStore>,
    index: Arc<VectorIndex>,
    mail: Arc<dyn MailSource>,
    tuning: IngestConfig,
    busy: AtomicBool,
}

impl Ingestor {
    pub fn new(
        store: Arc<MessageStore>,
        index: Arc<VectorIndex>,
        mail: Arc<dyn MailSource>,
        tuning: IngestConfig,
    ) -> Self {
        Self {
            store,
            index,
            mail,
            tuning,
            busy: AtomicBool::new(false),
        }
    }

    /// Execute one ingestion run. Internally strictly sequential; one run
    /// at a time per `Ingestor` (a second call while active fails with
    /// `RunInProgress`). Queries against the same store may proceed
    /// concurrently.
    pub async fn run(
        &self,
        selection: IngestSelection,
        control: &IngestControl,
        reporter: &dyn IngestReporter,
    ) -> Result<IngestOutcome, IngestFailure> {
        let _guard = self.acquire()?;

        let created_at = Utc::now();
        let mode = selection.mode();
        let run_id = Uuid::new_v4().to_string();
        let label = format!(
            "{} ingest {}",
            mode.as_str(),
            created_at.format("%Y-%m-%d %H:%M")
        );
        tracing::info!(run_id = %run_id, mode = mode.as_str(), "ingestion run starting");

        // ── COLLECTING ────────────────────────────────────────────────
        reporter.report(IngestEvent::Phase {
            phase: IngestPhase::Collecting,
        });

        let mut cached: HashMap<String, MessageRecord> = HashMap::new();
        let mut rejected = 0u64;

        let ids = match self
            .collect(&selection, control, reporter, &mut cached, &mut rejected)
            .await
        {
            Ok(ids) => ids,
            Err(e) if e.is_cancelled() => {
                return Ok(self.cancelled(run_id, label, mode, Vec::new(), rejected));
            }
            Err(error) => return Err(IngestFailure { error, committed: 0 }),
        };

        if ids.is_empty() {
            return Err(IngestFailure {
                error: Error::NoItemsSelected,
                committed: 0,
            });
        }

        // ── STORING ───────────────────────────────────────────────────
        reporter.report(IngestEvent::Phase {
            phase: IngestPhase::Storing,
        });

        let total = ids.len() as u64;
        let run_meta = RunMeta {
            run_id: run_id.clone(),
            label: label.clone(),
            mode,
            created_at,
        };

        let mut stored = 0u64;
        let mut committed_ids: Vec<String> = Vec::with_capacity(ids.len());

        for batch_ids in ids.chunks(self.tuning.batch_size) {
            match control.checkpoint().await {
                Ok(()) => {}
                Err(_) => {
                    return Ok(self.cancelled(run_id, label, mode, committed_ids, rejected));
                }
            }

            let records = match self
                .resolve_batch(batch_ids, &mut cached, &mut rejected)
                .await
            {
                Ok(records) => records,
                Err(error) => {
                    return Err(IngestFailure {
                        error,
                        committed: stored,
                    });
                }
            };

            if records.is_empty() {
                continue;
            }

            // Store then index, as a unit: if either fails the batch is
            // not counted and the run aborts, prior batches untouched.
            if let Err(error) = self.store.upsert_messages(&run_meta, &records).await {
                return Err(IngestFailure {
                    error,
                    committed: stored,
                });
            }
            if let Err(error) = self.index.add_or_replace(&records).await {
                return Err(IngestFailure {
                    error,
                    committed: stored,
                });
            }

            stored += records.len() as u64;
            committed_ids.extend(records.iter().map(|r| r.message_id.clone()));
            reporter.report(IngestEvent::Stored { stored, total });
        }

        // ── INDEXING ──────────────────────────────────────────────────
        // Indexing happened inside the batches above; this milestone
        // exists so callers see a distinct step before DONE. The floor
        // keeps it perceptible; 0 folds it away.
        reporter.report(IngestEvent::Phase {
            phase: IngestPhase::Indexing,
        });
        if self.tuning.indexing_floor_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.tuning.indexing_floor_ms)).await;
        }

        // ── DONE ──────────────────────────────────────────────────────
        reporter.report(IngestEvent::Phase {
            phase: IngestPhase::Done,
        });
        tracing::info!(run_id = %run_id, stored, rejected, "ingestion run complete");

        Ok(IngestOutcome {
            run_id,
            label,
            mode,
            status: RunStatus::Completed,
            message_ids: committed_ids,
            stored,
            rejected,
        })
    }

    /// Collect the deduplicated identifier set for the selection, caching
    /// any full records the listing already produced.
    async fn collect(
        &self,
        selection: &IngestSelection,
        control: &IngestControl,
        reporter: &dyn IngestReporter,
        cached: &mut HashMap<String, MessageRecord>,
        rejected: &mut u64,
    ) -> crate::error::Result<Vec<String>> {
        match selection {
            IngestSelection::Messages { message_ids } => {
                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                for id in message_ids {
                    if id.is_empty() {
                        *rejected += 1;
                        tracing::warn!("skipping selected message without identifier");
                        continue;
                    }
                    if seen.insert(id.clone()) {
                        ids.push(id.clone());
                    }
                }
                // The list was counted up front: report it as done.
                reporter.report(IngestEvent::Collected {
                    collected: ids.len() as u64,
                    expected: Some(ids.len() as u64),
                });
                Ok(ids)
            }

            IngestSelection::Folders {
                folder_ids,
                per_folder_limit,
            } => {
                let cap = *per_folder_limit;

                // Approximate denominator: Σ min(cap, reported count).
                // Reported counts can be stale in either direction, so
                // this may overshoot what collection actually yields.
                control.checkpoint().await?;
                let folders = self.mail.list_folders().await?;
                let expected: u64 = folder_ids
                    .iter()
                    .map(|id| {
                        folders
                            .iter()
                            .find(|f| &f.id == id)
                            .map(|f| f.total_item_count.min(cap as u64))
                            .unwrap_or(cap as u64)
                    })
                    .sum();

                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                let mut collected = 0u64;

                for folder_id in folder_ids {
                    let mut taken = 0usize;
                    let mut page_token: Option<String> = None;

                    loop {
                        control.checkpoint().await?;
                        let page = self
                            .mail
                            .list_messages(folder_id, page_token.as_deref(), self.tuning.page_size)
                            .await?;

                        for record in page.items {
                            if taken >= cap {
                                break;
                            }
                            if record.message_id.is_empty() {
                                *rejected += 1;
                                tracing::warn!(
                                    folder_id = %folder_id,
                                    "skipping listed message without identifier"
                                );
                                continue;
                            }
                            taken += 1;
                            collected += 1;
                            if seen.insert(record.message_id.clone()) {
                                ids.push(record.message_id.clone());
                                cached.insert(record.message_id.clone(), record);
                            }
                        }

                        reporter.report(IngestEvent::Collected {
                            collected,
                            expected: Some(expected),
                        });

                        page_token = page.next_page;
                        if page_token.is_none() || taken >= cap {
                            break;
                        }
                    }
                }

                Ok(ids)
            }
        }
    }

    /// Turn a batch of ids into full records, fetching whatever the
    /// listing did not already provide.
    async fn resolve_batch(
        &self,
        batch_ids: &[String],
        cached: &mut HashMap<String, MessageRecord>,
        rejected: &mut u64,
    ) -> crate::error::Result<Vec<MessageRecord>> {
        let missing: Vec<String> = batch_ids
            .iter()
            .filter(|id| !cached.contains_key(*id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            for record in self.mail.fetch_messages(&missing).await? {
                if record.message_id.is_empty() {
                    *rejected += 1;
                    tracing::warn!("skipping fetched message without identifier");
                    continue;
                }
                cached.insert(record.message_id.clone(), record);
            }
        }

        let mut records = Vec::with_capacity(batch_ids.len());
        for id in batch_ids {
            match cached.get(id) {
                Some(record) => records.push(record.clone()),
                None => {
                    // Selected but gone from the remote source.
                    *rejected += 1;
                    tracing::warn!(message_id = %id, "selected message no longer available");
                }
            }
        }
        Ok(records)
    }

    fn cancelled(
        &self,
        run_id: String,
        label: String,
        mode: IngestMode,
        committed_ids: Vec<String>,
        rejected: u64,
    ) -> IngestOutcome {
        let stored = committed_ids.len() as u64;
        tracing::info!(run_id = %run_id, stored, "ingestion run cancelled");
        IngestOutcome {
            run_id,
            label,
            mode,
            status: RunStatus::Cancelled,
            message_ids: committed_ids,
            stored,
            rejected,
        }
    }

    fn acquire(&self) -> Result<RunGuard<'_>, IngestFailure> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(IngestFailure {
                error: Error::RunInProgress,
                committed: 0,
            });
        }
        Ok(RunGuard { busy: &self.busy })
    }
}

struct RunGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}
