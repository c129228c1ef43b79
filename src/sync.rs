use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::blocks::{Block, plan_block_sync, render_highlights};
use crate::config::{Notion, Properties, StatusValues, SyncOptions};
use crate::error::SyncError;
use crate::mapping::{FieldMapper, diff_fields};
use crate::model::{ItemError, SourceBookRecord};
use crate::repository::TargetRepository;
use crate::source::SourceAdapter;

const PROGRESS_EVERY: usize = 10;

/// Outcome of one book that made it through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Created,
    Updated,
    Unchanged,
}

impl SyncResult {
    pub fn record(self, stats: &mut SyncStats) {
        stats.processed += 1;
        match self {
            // a created page counts as an update of the database
            SyncResult::Created => {
                stats.created += 1;
                stats.updated += 1;
            }
            SyncResult::Updated => stats.updated += 1,
            SyncResult::Unchanged => stats.unchanged += 1,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SyncResult::Created => "created",
            SyncResult::Updated => "updated",
            SyncResult::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncStats {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errored: usize,
    pub errors: Vec<ItemError>,
}

impl SyncStats {
    fn record_error(&mut self, title: &str, error: &SyncError) {
        self.processed += 1;
        self.errored += 1;
        self.errors.push(ItemError {
            title: title.to_string(),
            message: error.to_string(),
        });
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub source: String,
    pub total: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errored: usize,
    pub errors: Vec<ItemError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn empty(source: &str, started_at: DateTime<Utc>) -> Self {
        SyncReport {
            source: source.to_string(),
            total: 0,
            processed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            errored: 0,
            errors: vec![],
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn from_stats(source: &str, total: usize, stats: SyncStats, started_at: DateTime<Utc>) -> Self {
        SyncReport {
            source: source.to_string(),
            total,
            processed: stats.processed,
            created: stats.created,
            updated: stats.updated,
            unchanged: stats.unchanged,
            errored: stats.errored,
            errors: stats.errors,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: total={} processed={} updated={} (created={}) unchanged={} errored={} in {:.1}s",
            self.source,
            self.total,
            self.processed,
            self.updated,
            self.created,
            self.unchanged,
            self.errored,
            self.elapsed_seconds()
        )
    }
}

/// A fatal error that stopped the run, with whatever was finished before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunAborted {
    pub error: SyncError,
    pub report: SyncReport,
}

/// One async mutex per title, so concurrent workers never race a
/// find-then-create for the same book.
#[derive(Default)]
pub struct TitleLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TitleLocks {
    pub async fn acquire(&self, title: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.locks.lock().await;
            table.entry(title.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

struct Shared {
    source: Arc<dyn SourceAdapter>,
    repo: Arc<dyn TargetRepository>,
    mapper: FieldMapper,
    total: usize,
    queue: Mutex<VecDeque<SourceBookRecord>>,
    locks: TitleLocks,
    stats: Mutex<SyncStats>,
    abort: Mutex<Option<SyncError>>,
    cancel: CancellationToken,
}

pub struct SyncDriver {
    source: Arc<dyn SourceAdapter>,
    repo: Arc<dyn TargetRepository>,
    properties: Properties,
    status_values: StatusValues,
    options: SyncOptions,
}

impl SyncDriver {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        repo: Arc<dyn TargetRepository>,
        notion: &Notion,
        options: SyncOptions,
    ) -> Self {
        SyncDriver {
            source,
            repo,
            properties: notion.properties.clone(),
            status_values: notion.status_values.clone(),
            options,
        }
    }

    async fn prepare(&self) -> Result<FieldMapper, SyncError> {
        self.source.validate_credentials().await?;
        let schema = self.repo.schema().await?;
        FieldMapper::new(&self.properties, &self.status_values, &schema)
    }

    /// Credential presence plus the property mapping, without touching any book.
    pub async fn check(&self) -> Result<Vec<(String, String)>, SyncError> {
        Ok(self.prepare().await?.describe())
    }

    fn select(&self, mut books: Vec<SourceBookRecord>) -> Vec<SourceBookRecord> {
        if let Some(filter) = self.options.title_filter() {
            let needle = filter.to_lowercase();
            let before = books.len();
            books.retain(|b| b.title.to_lowercase().contains(&needle));
            tracing::info!(filter = %filter, matched = books.len(), of = before, "title filter applied");
        }
        if let Some(limit) = self.options.limit {
            books.truncate(limit);
        }
        books
    }

    pub async fn run(&self) -> Result<SyncReport, RunAborted> {
        let started_at = Utc::now();
        let name = self.source.name().to_string();
        let abort = |error: SyncError| RunAborted {
            report: SyncReport::empty(&name, started_at),
            error,
        };

        let mapper = self.prepare().await.map_err(abort)?;
        let books = self.source.list_books().await.map_err(abort)?;
        let books = self.select(books);
        let total = books.len();
        let workers = self.options.effective_workers().min(total.max(1));
        tracing::info!(source = %name, total, workers, "sync started");

        let shared = Arc::new(Shared {
            source: self.source.clone(),
            repo: self.repo.clone(),
            mapper,
            total,
            queue: Mutex::new(books.into_iter().collect()),
            locks: TitleLocks::default(),
            stats: Mutex::new(SyncStats::default()),
            abort: Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(worker(id, shared.clone())))
            .collect();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "sync worker panicked");
            }
        }

        let stats = std::mem::take(&mut *shared.stats.lock().await);
        let report = SyncReport::from_stats(&name, total, stats, started_at);
        if let Some(error) = shared.abort.lock().await.take() {
            tracing::error!(error = %error, processed = report.processed, total, "sync aborted");
            return Err(RunAborted { error, report });
        }
        tracing::info!(
            source = %name,
            total = report.total,
            updated = report.updated,
            created = report.created,
            unchanged = report.unchanged,
            errored = report.errored,
            elapsed = report.elapsed_seconds(),
            "sync complete"
        );
        Ok(report)
    }
}

async fn worker(id: usize, shared: Arc<Shared>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        let Some(record) = shared.queue.lock().await.pop_front() else {
            break;
        };
        let title = record.title.clone();

        match process_book(&shared, record).await {
            Ok(result) => {
                tracing::info!(worker = id, title = %title, result = result.as_str(), "book synced");
                let mut stats = shared.stats.lock().await;
                result.record(&mut stats);
                log_progress(stats.processed, shared.total);
            }
            Err(e) if e.is_fatal() => {
                let mut abort = shared.abort.lock().await;
                if abort.is_none() {
                    tracing::error!(worker = id, title = %title, error = %e, "fatal error, cancelling remaining books");
                    *abort = Some(e);
                }
                shared.cancel.cancel();
                break;
            }
            Err(e) => {
                tracing::error!(worker = id, title = %title, error = %e, "book failed");
                let mut stats = shared.stats.lock().await;
                stats.record_error(&title, &e);
                log_progress(stats.processed, shared.total);
            }
        }
    }
}

fn log_progress(processed: usize, total: usize) {
    if processed % PROGRESS_EVERY == 0 || processed == total {
        tracing::info!(processed, total, "sync progress");
    }
}

async fn process_book(shared: &Shared, record: SourceBookRecord) -> Result<SyncResult, SyncError> {
    // adapters retry transient failures per request; one call here
    let detailed = shared.source.fetch_details(&record).await?;

    tracing::debug!(
        title = %detailed.title,
        status = detailed.status().as_str(),
        progress = detailed.progress_current,
        of = detailed.progress_total,
        highlights = detailed.highlights.as_ref().map(Vec::len),
        "book details fetched"
    );
    let desired = shared.mapper.desired_fields(&detailed);
    let blocks = detailed.highlights.as_deref().map(render_highlights);
    let repo = shared.repo.as_ref();

    let _guard = shared.locks.acquire(&detailed.title).await;
    let Some(existing) = repo.find(&detailed.title).await? else {
        let page = repo.create(&desired).await?;
        if let Some(blocks) = blocks.filter(|b| !b.is_empty()) {
            repo.append_blocks(&page.id, &blocks).await?;
        }
        return Ok(SyncResult::Created);
    };

    let mut desired = desired;
    shared.mapper.reconcile(&mut desired, &existing.properties);
    let changed = diff_fields(&desired, &existing.properties, shared.mapper.title_property());
    if !changed.is_empty() {
        tracing::debug!(
            title = %detailed.title,
            fields = ?changed.keys().collect::<Vec<_>>(),
            "updating changed fields"
        );
        repo.update(&existing.id, &changed).await?;
    }

    let blocks_changed = match blocks {
        Some(blocks) => sync_blocks(repo, &existing.id, &blocks).await?,
        None => false,
    };

    if changed.is_empty() && !blocks_changed {
        Ok(SyncResult::Unchanged)
    } else {
        Ok(SyncResult::Updated)
    }
}

/// Brings the page's managed blocks in line with `desired`. Returns whether
/// anything was written.
async fn sync_blocks(repo: &dyn TargetRepository, page_id: &str, desired: &[Block]) -> Result<bool, SyncError> {
    let existing = repo.list_blocks(page_id).await?;
    let plan = plan_block_sync(desired, &existing);
    if plan.is_empty() {
        return Ok(false);
    }
    tracing::debug!(
        page_id,
        add = plan.to_add.len(),
        delete = plan.to_delete.len(),
        kept = plan.kept,
        "syncing blocks"
    );
    for id in &plan.to_delete {
        repo.delete_block(id).await?;
    }
    if !plan.to_add.is_empty() {
        repo.append_blocks(page_id, &plan.to_add).await?;
    }
    Ok(true)
}
