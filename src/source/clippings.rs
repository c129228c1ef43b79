//! Parser for the Kindle device export `My Clippings.txt`.
//!
//! Each entry is separated by a line of `==========`:
//!
//! ```text
//! The Pragmatic Programmer (Hunt, Andrew)
//! - Your Highlight on page 12 | Location 180-182 | Added on Monday, March 4, 2024 9:15:02 PM
//!
//! Care about your craft.
//! ==========
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

use super::SourceAdapter;
use crate::error::SyncError;
use crate::model::{Highlight, SourceBookRecord};

const SEPARATOR: &str = "==========";
const ADDED_ON_FORMAT: &str = "%A, %B %d, %Y %I:%M:%S %p";
/// Progress guess from highlight count, capped so it never reads as finished.
const PERCENT_PER_HIGHLIGHT: u32 = 5;
const MAX_ESTIMATED_PERCENT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Highlight,
    Note,
    Bookmark,
}

#[derive(Debug)]
struct Entry {
    title: String,
    author: String,
    kind: EntryKind,
    added_on: Option<DateTime<Utc>>,
    body: String,
}

fn split_title_line(line: &str) -> (String, String) {
    let line = line.trim();
    if line.ends_with(')') {
        if let Some(open) = line.rfind('(') {
            let title = line[..open].trim();
            let author = line[open + 1..line.len() - 1].trim();
            if !title.is_empty() {
                return (title.to_string(), author.to_string());
            }
        }
    }
    (line.to_string(), String::new())
}

fn entry_kind(meta: &str) -> Option<EntryKind> {
    let lower = meta.to_lowercase();
    if lower.contains("highlight") || meta.contains("标注") {
        Some(EntryKind::Highlight)
    } else if lower.contains("note") || meta.contains("笔记") {
        Some(EntryKind::Note)
    } else if lower.contains("bookmark") || meta.contains("书签") {
        Some(EntryKind::Bookmark)
    } else {
        None
    }
}

/// "Added on" timestamps are device-local.
fn added_on(meta: &str) -> Option<DateTime<Utc>> {
    let (_, raw) = meta.split_once("Added on")?;
    let naive = NaiveDateTime::parse_from_str(raw.trim(), ADDED_ON_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_entry(chunk: &str) -> Option<Entry> {
    let mut lines = chunk
        .lines()
        .map(|l| l.trim_start_matches('\u{feff}').trim_end())
        .skip_while(|l| l.trim().is_empty());

    let (title, author) = split_title_line(lines.next()?);
    let meta = lines.next()?.trim();
    let kind = entry_kind(meta)?;
    let body = lines
        .skip_while(|l| l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    Some(Entry {
        title,
        author,
        kind,
        added_on: added_on(meta),
        body,
    })
}

struct BookAccumulator {
    record: SourceBookRecord,
    highlights: Vec<Highlight>,
}

/// Groups clippings into one record per `(title, author)`, in file order.
pub fn parse_clippings(content: &str, label: &str) -> Vec<SourceBookRecord> {
    let mut books: Vec<BookAccumulator> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for entry in content.split(SEPARATOR).filter_map(parse_entry) {
        if entry.kind == EntryKind::Bookmark || entry.body.is_empty() {
            continue;
        }
        let key = (entry.title.clone(), entry.author.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            let id = format!("{}|{}", entry.title, entry.author);
            let mut record = SourceBookRecord::new(label, &id, &entry.title);
            record.author = entry.author.clone();
            books.push(BookAccumulator {
                record,
                highlights: Vec::new(),
            });
            books.len() - 1
        });
        let book = &mut books[slot];

        if let Some(ts) = entry.added_on {
            let r = &mut book.record;
            r.started_at = Some(r.started_at.map_or(ts, |s| s.min(ts)));
            r.last_read_at = Some(r.last_read_at.map_or(ts, |l| l.max(ts)));
        }

        match entry.kind {
            EntryKind::Highlight => {
                // re-exported edits repeat the same passage
                if book.highlights.iter().any(|h| h.text == entry.body) {
                    continue;
                }
                let mut h = Highlight::new(&entry.body);
                h.created_at = entry.added_on;
                book.highlights.push(h);
            }
            EntryKind::Note => match book.highlights.last_mut() {
                Some(prev) if prev.note.is_none() && !prev.text.is_empty() => {
                    prev.note = Some(entry.body);
                }
                _ => {
                    let mut h = Highlight::new("");
                    h.note = Some(entry.body);
                    h.created_at = entry.added_on;
                    book.highlights.push(h);
                }
            },
            EntryKind::Bookmark => {}
        }
    }

    books
        .into_iter()
        .map(|mut book| {
            let passages = book.highlights.iter().filter(|h| !h.text.is_empty()).count() as u32;
            book.record.progress_total = 100;
            book.record.progress_current = (passages * PERCENT_PER_HIGHLIGHT).min(MAX_ESTIMATED_PERCENT);
            book.record.highlights = Some(book.highlights);
            book.record
        })
        .collect()
}

pub struct ClippingsSource {
    path: PathBuf,
    label: String,
}

impl ClippingsSource {
    pub fn new(path: &str, label: &str) -> Self {
        ClippingsSource {
            path: PathBuf::from(path),
            label: label.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for ClippingsSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn validate_credentials(&self) -> Result<(), SyncError> {
        if tokio::fs::metadata(&self.path).await.is_ok() {
            return Ok(());
        }
        Err(SyncError::Config(format!(
            "clippings file not found: {}",
            self.path.display()
        )))
    }

    async fn list_books(&self) -> Result<Vec<SourceBookRecord>, SyncError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SyncError::Config(format!("read {}: {}", self.path.display(), e)))?;
        let content = String::from_utf8_lossy(&bytes);
        let records = parse_clippings(&content, &self.label);
        tracing::info!(count = records.len(), path = %self.path.display(), "clippings parsed");
        Ok(records)
    }

    /// Everything is already in the listing.
    async fn fetch_details(&self, record: &SourceBookRecord) -> Result<SourceBookRecord, SyncError> {
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\u{feff}Dune (Herbert, Frank)\r
- Your Highlight on page 12 | Location 180-182 | Added on Monday, March 4, 2024 9:15:02 PM\r
\r
Fear is the mind-killer.\r
==========\r
Dune (Herbert, Frank)\r
- Your Note on page 12 | Location 182 | Added on Monday, March 4, 2024 9:16:00 PM\r
\r
Litany against fear.\r
==========\r
Dune (Herbert, Frank)\r
- Your Bookmark on page 40 | Location 600 | Added on Tuesday, March 5, 2024 8:00:00 AM\r
\r
\r
==========\r
Walden (Thoreau)\r
- Your Highlight on Location 10-11 | Added on Sunday, January 7, 2024 10:00:00 AM\r
\r
I went to the woods.\r
==========\r
Dune (Herbert, Frank)\r
- Your Highlight on page 12 | Location 180-182 | Added on Wednesday, March 6, 2024 9:15:02 PM\r
\r
Fear is the mind-killer.\r
==========\r
";

    #[test]
    fn test_groups_entries_by_book() {
        let books = parse_clippings(SAMPLE, "Kindle");
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].title, "Dune");
        assert_eq!(books[0].author, "Herbert, Frank");
        assert_eq!(books[1].title, "Walden");
        assert_eq!(books[1].source, "Kindle");
    }

    #[test]
    fn test_note_attaches_and_duplicates_collapse() {
        let books = parse_clippings(SAMPLE, "Kindle");
        let hs = books[0].highlights.as_ref().unwrap();
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].text, "Fear is the mind-killer.");
        assert_eq!(hs[0].note.as_deref(), Some("Litany against fear."));
        assert_eq!(books[0].progress_current, 5);
    }

    #[test]
    fn test_dates_span_clippings() {
        let books = parse_clippings(SAMPLE, "Kindle");
        let dune = &books[0];
        assert!(dune.started_at.unwrap() < dune.last_read_at.unwrap());
        assert_eq!(
            dune.last_read_at.unwrap().with_timezone(&Local).format("%Y-%m-%d").to_string(),
            "2024-03-06"
        );
    }

    #[test]
    fn test_progress_estimate_is_capped() {
        let mut content = String::new();
        for i in 0..30 {
            content.push_str(&format!(
                "Book (A)\n- Your Highlight on page {i} | Added on Monday, March 4, 2024 9:15:02 PM\n\npassage {i}\n==========\n"
            ));
        }
        let books = parse_clippings(&content, "Kindle");
        assert_eq!(books[0].progress_current, 50);
        assert_eq!(books[0].status(), crate::model::ReadingStatus::InProgress);
    }

    #[test]
    fn test_title_without_author() {
        assert_eq!(split_title_line("Notes"), ("Notes".to_string(), String::new()));
        assert_eq!(
            split_title_line("Sapiens (A Brief History) (Harari)"),
            ("Sapiens (A Brief History)".to_string(), "Harari".to_string())
        );
    }

    #[tokio::test]
    async fn test_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = ClippingsSource::new(file.path().to_str().unwrap(), "Kindle");
        source.validate_credentials().await.unwrap();
        let books = source.list_books().await.unwrap();
        assert_eq!(books.len(), 2);
        let detailed = source.fetch_details(&books[1]).await.unwrap();
        assert_eq!(detailed, books[1]);
    }

    #[tokio::test]
    async fn test_missing_file_fails_validation() {
        let source = ClippingsSource::new("/nonexistent/My Clippings.txt", "Kindle");
        assert!(matches!(
            source.validate_credentials().await,
            Err(SyncError::Config(_))
        ));
    }
}
