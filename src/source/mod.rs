//! Reading-data sources. Each adapter lists the shelf once and then fetches
//! per-book details on demand from the sync workers.

pub mod clippings;
pub mod kindle;
pub mod weread;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, SourceKind, non_empty};
use crate::error::SyncError;
use crate::http::RetryPolicy;
use crate::model::SourceBookRecord;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Label written into the target's source column.
    fn name(&self) -> &str;

    /// Cheap presence check of the credential; no network call.
    async fn validate_credentials(&self) -> Result<(), SyncError>;

    async fn list_books(&self) -> Result<Vec<SourceBookRecord>, SyncError>;

    /// Fills in highlights and dates for one listed book.
    async fn fetch_details(&self, record: &SourceBookRecord) -> Result<SourceBookRecord, SyncError>;
}

/// Splits a browser cookie string (`a=1; b=2`) into name/value pairs.
pub fn parse_cookies(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn require_cookies(
    service: &str,
    cookies: &BTreeMap<String, String>,
    required: &[&str],
) -> Result<(), SyncError> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| cookies.get(*name).is_none_or(|v| v.is_empty()))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(SyncError::auth_expired(
        service,
        format!("missing cookie(s): {}", missing.join(", ")),
    ))
}

/// Unix seconds to UTC; zero and negative values mean "unknown".
pub fn from_unix(secs: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    if secs <= 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(secs, 0)
}

/// Whole percent read, rounded down so a book is never reported as complete
/// before it actually is.
pub fn whole_percent(percent: f64) -> u32 {
    percent.floor().clamp(0.0, 100.0) as u32
}

pub fn build_source(cfg: &Config) -> Result<Arc<dyn SourceAdapter>, SyncError> {
    let retry = RetryPolicy::from_options(&cfg.sync);
    let timeout = cfg.sync.request_timeout_seconds;
    let source: Arc<dyn SourceAdapter> = match cfg.source.kind {
        SourceKind::Weread => Arc::new(weread::WeReadSource::new(&cfg.weread, retry, timeout)?),
        SourceKind::Kindle => match non_empty(&cfg.kindle.clippings_path) {
            Some(path) => Arc::new(clippings::ClippingsSource::new(path, &cfg.kindle.label)),
            None => Arc::new(kindle::KindleCloudSource::new(&cfg.kindle, retry, timeout)?),
        },
    };
    Ok(source)
}
