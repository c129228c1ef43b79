use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::{SourceAdapter, from_unix, parse_cookies, require_cookies, whole_percent};
use crate::config::Weread;
use crate::error::SyncError;
use crate::http::{RetryPolicy, build_client, send_with_retry};
use crate::model::{Highlight, SourceBookRecord};

const SERVICE: &str = "weread";
const REQUIRED_COOKIES: [&str; 2] = ["wr_skey", "wr_vid"];
/// errcodes WeRead returns for a logged-out or expired session.
const AUTH_ERRCODES: [i64; 2] = [-2010, -2012];

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ShelfResponse {
    books: Vec<ShelfBook>,
    book_progress: Vec<BookProgress>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ShelfBook {
    book_id: String,
    title: String,
    author: String,
    cover: Option<String>,
    read_update_time: i64,
    finish_reading: Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct BookProgress {
    book_id: String,
    progress: f64,
    update_time: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct BookmarkList {
    updated: Vec<Bookmark>,
    chapters: Vec<Chapter>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Bookmark {
    mark_text: String,
    style: Option<i32>,
    color_style: Option<i32>,
    chapter_uid: Option<i64>,
    create_time: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Chapter {
    chapter_uid: i64,
    title: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ReviewList {
    reviews: Vec<ReviewItem>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ReviewItem {
    review: Review,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Review {
    content: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    chapter_uid: Option<i64>,
    chapter_name: Option<String>,
    create_time: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ReadInfo {
    finished_date: i64,
    read_detail: ReadDetail,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ReadDetail {
    begin_reading_date: i64,
}

pub struct WeReadSource {
    client: reqwest::Client,
    base_url: String,
    cookies: String,
    label: String,
    styles: Vec<i32>,
    colors: Vec<i32>,
    retry: RetryPolicy,
}

impl WeReadSource {
    pub fn new(cfg: &Weread, retry: RetryPolicy, timeout_seconds: u64) -> Result<Self, SyncError> {
        Ok(WeReadSource {
            client: build_client(timeout_seconds)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            cookies: cfg.cookies.clone(),
            label: cfg.label.clone(),
            styles: cfg.styles.clone(),
            colors: cfg.colors.clone(),
            retry,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, SyncError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "weread request");
        let response = send_with_retry(SERVICE, self.retry, || {
            self.client
                .get(&url)
                .query(query)
                .header(reqwest::header::COOKIE, &self.cookies)
        })
        .await?;
        let json: Value = response.json().await?;
        check_errcode(&json)?;
        Ok(json)
    }

    fn keep(&self, mark: &Bookmark) -> bool {
        let style_ok = self.styles.is_empty() || mark.style.is_some_and(|s| self.styles.contains(&s));
        let color_ok = self.colors.is_empty() || mark.color_style.is_some_and(|c| self.colors.contains(&c));
        style_ok && color_ok
    }

    async fn read_info(&self, book_id: &str) -> Result<ReadInfo, SyncError> {
        let json = self
            .get_json(
                "/web/book/readinfo",
                &[("bookId", book_id), ("readingDetail", "1"), ("finishedDate", "1")],
            )
            .await?;
        Ok(serde_json::from_value(json)?)
    }
}

fn check_errcode(json: &Value) -> Result<(), SyncError> {
    let Some(code) = json.get("errcode").and_then(Value::as_i64) else {
        return Ok(());
    };
    if code == 0 {
        return Ok(());
    }
    let msg = json.get("errmsg").and_then(Value::as_str).unwrap_or_default();
    if AUTH_ERRCODES.contains(&code) {
        return Err(SyncError::auth_expired(SERVICE, format!("errcode {} {}", code, msg)));
    }
    Err(SyncError::Api(format!("weread errcode {}: {}", code, msg)))
}

fn is_truthy(v: &Value) -> bool {
    v.as_bool().unwrap_or(false) || v.as_i64().is_some_and(|n| n != 0)
}

/// Shelf covers point at the small thumbnail; `t7_` is the large rendition.
fn large_cover(url: &str) -> String {
    url.replace("/s_", "/t7_")
}

fn shelf_records(shelf: ShelfResponse, label: &str) -> Vec<SourceBookRecord> {
    let progress: HashMap<&str, &BookProgress> = shelf
        .book_progress
        .iter()
        .map(|p| (p.book_id.as_str(), p))
        .collect();

    shelf
        .books
        .iter()
        .filter(|b| !b.book_id.is_empty() && !b.title.trim().is_empty())
        .map(|book| {
            let mut record = SourceBookRecord::new(label, &book.book_id, book.title.trim());
            record.author = book.author.trim().to_string();
            record.cover_url = book.cover.as_deref().filter(|c| !c.is_empty()).map(large_cover);
            record.progress_total = 100;

            let entry = progress.get(book.book_id.as_str());
            let percent = entry.map(|p| p.progress).unwrap_or(0.0);
            record.progress_current = whole_percent(percent);
            if is_truthy(&book.finish_reading) {
                record.progress_current = record.progress_total;
            }
            let updated = if book.read_update_time > 0 {
                book.read_update_time
            } else {
                entry.map(|p| p.update_time).unwrap_or(0)
            };
            record.last_read_at = from_unix(updated);
            record
        })
        .collect()
}

fn build_highlights(
    marks: BookmarkList,
    reviews: ReviewList,
    keep: impl Fn(&Bookmark) -> bool,
) -> Vec<Highlight> {
    let order: HashMap<i64, usize> = marks
        .chapters
        .iter()
        .enumerate()
        .map(|(i, c)| (c.chapter_uid, i))
        .collect();
    let titles: BTreeMap<i64, &str> = marks
        .chapters
        .iter()
        .map(|c| (c.chapter_uid, c.title.as_str()))
        .collect();
    let chapter_title = |uid: Option<i64>| {
        uid.and_then(|u| titles.get(&u))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    };

    let mut entries: Vec<(usize, i64, Highlight)> = Vec::new();
    for mark in marks.updated.iter().filter(|m| keep(m)) {
        if mark.mark_text.trim().is_empty() {
            continue;
        }
        let mut h = Highlight::new(mark.mark_text.trim());
        h.style = mark.style;
        h.color = mark.color_style;
        h.chapter = chapter_title(mark.chapter_uid);
        h.created_at = from_unix(mark.create_time);
        let rank = mark.chapter_uid.and_then(|u| order.get(&u).copied()).unwrap_or(usize::MAX);
        entries.push((rank, mark.create_time, h));
    }

    for item in reviews.reviews {
        let review = item.review;
        if review.content.trim().is_empty() {
            continue;
        }
        let mut h = Highlight::new(review.abstract_text.trim());
        h.note = Some(review.content.trim().to_string());
        h.chapter = chapter_title(review.chapter_uid).or_else(|| {
            review
                .chapter_name
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        });
        h.created_at = from_unix(review.create_time);
        let rank = review.chapter_uid.and_then(|u| order.get(&u).copied()).unwrap_or(usize::MAX);
        entries.push((rank, review.create_time, h));
    }

    entries.sort_by_key(|(rank, created, _)| (*rank, *created));
    entries.into_iter().map(|(_, _, h)| h).collect()
}

#[async_trait]
impl SourceAdapter for WeReadSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn validate_credentials(&self) -> Result<(), SyncError> {
        require_cookies(SERVICE, &parse_cookies(&self.cookies), &REQUIRED_COOKIES)
    }

    async fn list_books(&self) -> Result<Vec<SourceBookRecord>, SyncError> {
        let json = self
            .get_json(
                "/web/shelf/sync",
                &[("synckey", "0"), ("teenmode", "0"), ("album", "1"), ("onlyBookid", "0")],
            )
            .await?;
        let shelf: ShelfResponse = serde_json::from_value(json)?;
        let records = shelf_records(shelf, &self.label);
        tracing::info!(count = records.len(), "weread shelf loaded");
        Ok(records)
    }

    async fn fetch_details(&self, record: &SourceBookRecord) -> Result<SourceBookRecord, SyncError> {
        let book_id = record.source_id.as_str();
        let marks: BookmarkList = serde_json::from_value(
            self.get_json("/web/book/bookmarklist", &[("bookId", book_id)])
                .await?,
        )?;
        let reviews: ReviewList = serde_json::from_value(
            self.get_json(
                "/web/review/list",
                &[("bookId", book_id), ("listType", "11"), ("mine", "1"), ("synckey", "0")],
            )
            .await?,
        )?;

        let mut detailed = record.clone();
        detailed.highlights = Some(build_highlights(marks, reviews, |m| self.keep(m)));

        match self.read_info(book_id).await {
            Ok(info) => {
                detailed.started_at = from_unix(info.read_detail.begin_reading_date);
                detailed.finished_at = from_unix(info.finished_date);
            }
            Err(e) if e.is_fatal() || e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(title = %record.title, error = %e, "read info unavailable, dates left empty");
            }
        }
        Ok(detailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReadingStatus;
    use serde_json::json;

    #[test]
    fn test_errcode_classification() {
        assert!(check_errcode(&json!({ "books": [] })).is_ok());
        assert!(check_errcode(&json!({ "errcode": 0 })).is_ok());
        let auth = check_errcode(&json!({ "errcode": -2012, "errmsg": "登录超时" })).unwrap_err();
        assert!(matches!(auth, SyncError::AuthExpired { .. }));
        let other = check_errcode(&json!({ "errcode": -1 })).unwrap_err();
        assert!(matches!(other, SyncError::Api(_)));
    }

    #[test]
    fn test_shelf_maps_progress_and_finish_flag() {
        let shelf: ShelfResponse = serde_json::from_value(json!({
            "books": [
                { "bookId": "1", "title": "活着", "author": "余华", "cover": "https://c/s_1.jpg",
                  "readUpdateTime": 1700000000, "finishReading": 1 },
                { "bookId": "2", "title": "围城", "author": "钱锺书" },
                { "bookId": "3", "title": "  " }
            ],
            "bookProgress": [
                { "bookId": "1", "progress": 97, "updateTime": 1690000000 },
                { "bookId": "2", "progress": 42.6, "updateTime": 1690000000 }
            ]
        }))
        .unwrap();
        let records = shelf_records(shelf, "WeRead");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].progress_current, 100);
        assert_eq!(records[0].cover_url.as_deref(), Some("https://c/t7_1.jpg"));
        assert_eq!(records[0].last_read_at, from_unix(1700000000));
        assert_eq!(records[1].progress_current, 42);
        assert_eq!(records[1].last_read_at, from_unix(1690000000));
        assert!(records[1].highlights.is_none());
    }

    #[test]
    fn test_almost_done_without_finish_flag_stays_in_progress() {
        let shelf: ShelfResponse = serde_json::from_value(json!({
            "books": [ { "bookId": "9", "title": "百年孤独", "author": "马尔克斯" } ],
            "bookProgress": [ { "bookId": "9", "progress": 99.5, "updateTime": 1690000000 } ]
        }))
        .unwrap();
        let records = shelf_records(shelf, "WeRead");
        assert_eq!(records[0].progress_current, 99);
        assert_eq!(records[0].status(), ReadingStatus::InProgress);
    }

    #[test]
    fn test_highlights_ordered_by_chapter_with_notes() {
        let marks: BookmarkList = serde_json::from_value(json!({
            "updated": [
                { "markText": "later passage", "chapterUid": 20, "createTime": 5, "style": 0, "colorStyle": 1 },
                { "markText": "early passage", "chapterUid": 10, "createTime": 9, "style": 1, "colorStyle": 4 }
            ],
            "chapters": [ { "chapterUid": 10, "title": "第一章" }, { "chapterUid": 20, "title": "第二章" } ]
        }))
        .unwrap();
        let reviews: ReviewList = serde_json::from_value(json!({
            "reviews": [ { "review": { "content": "想法", "abstract": "quoted", "chapterUid": 10, "createTime": 10 } } ]
        }))
        .unwrap();

        let hs = build_highlights(marks, reviews, |_| true);
        let texts: Vec<_> = hs.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["early passage", "quoted", "later passage"]);
        assert_eq!(hs[0].chapter.as_deref(), Some("第一章"));
        assert_eq!(hs[1].note.as_deref(), Some("想法"));
    }

    #[test]
    fn test_style_filter_keeps_notes() {
        let marks: BookmarkList = serde_json::from_value(json!({
            "updated": [
                { "markText": "wavy", "style": 2 },
                { "markText": "marker", "style": 1 }
            ]
        }))
        .unwrap();
        let reviews: ReviewList = serde_json::from_value(json!({
            "reviews": [ { "review": { "content": "note body" } } ]
        }))
        .unwrap();
        let hs = build_highlights(marks, reviews, |m| m.style == Some(1));
        assert_eq!(hs.len(), 2);
        assert!(hs.iter().any(|h| h.text == "marker"));
        assert!(hs.iter().any(|h| h.note.as_deref() == Some("note body")));
    }
}
