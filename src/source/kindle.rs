use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{SourceAdapter, from_unix, parse_cookies, require_cookies, whole_percent};
use crate::config::Kindle;
use crate::error::SyncError;
use crate::http::{RetryPolicy, build_client, send_with_retry};
use crate::model::SourceBookRecord;

const SERVICE: &str = "kindle";
const REQUIRED_COOKIES: [&str; 2] = ["session-id", "ubid-main"];
const PAGE_SIZE: &str = "50";
/// Safety stop for a pagination token that never runs out.
const MAX_PAGES: usize = 200;

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SearchResponse {
    items_list: Vec<LibraryItem>,
    pagination_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct LibraryItem {
    asin: String,
    title: String,
    authors: Vec<String>,
    product_url: Option<String>,
    percentage_read: f64,
    first_read_date: Value,
    last_read_date: Value,
    last_access_date: Value,
    sync_date: Value,
    genre: Option<String>,
    category: Option<String>,
    rating: Option<f64>,
}

/// Reading progress from the Kindle cloud reader library. The library search
/// carries no highlights, so existing page content is left alone.
pub struct KindleCloudSource {
    client: reqwest::Client,
    base_url: String,
    cookie_header: String,
    raw_cookies: String,
    label: String,
    retry: RetryPolicy,
}

/// Browser exports percent-encode some cookie values; the library endpoint
/// wants them decoded.
fn decode_cookie_header(raw: &str) -> String {
    parse_cookies(raw)
        .into_iter()
        .map(|(name, value)| {
            let decoded = urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or(value);
            format!("{}={}", name, decoded)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn first_author(authors: &[String]) -> String {
    authors
        .first()
        .map(|a| a.trim().trim_end_matches(':').trim().to_string())
        .unwrap_or_default()
}

/// Library dates come as epoch seconds, epoch milliseconds, or date strings.
fn parse_library_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            let secs = if raw > 1e10 { raw / 1000.0 } else { raw };
            from_unix(secs as i64)
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            day.and_hms_opt(0, 0, 0)?
                .and_local_timezone(Local)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn to_record(item: &LibraryItem, label: &str) -> Option<SourceBookRecord> {
    let title = item.title.trim();
    if item.asin.is_empty() || title.is_empty() {
        return None;
    }
    let mut record = SourceBookRecord::new(label, &item.asin, title);
    record.author = first_author(&item.authors);
    record.cover_url = item.product_url.clone().filter(|u| !u.is_empty());
    record.progress_total = 100;
    record.progress_current = whole_percent(item.percentage_read);
    record.started_at = parse_library_date(&item.first_read_date);
    record.last_read_at = [&item.last_read_date, &item.last_access_date, &item.sync_date]
        .into_iter()
        .find_map(parse_library_date);
    record.genre = item
        .genre
        .as_deref()
        .or(item.category.as_deref())
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string);
    record.rating = item.rating.filter(|r| *r > 0.0);
    Some(record)
}

impl KindleCloudSource {
    pub fn new(cfg: &Kindle, retry: RetryPolicy, timeout_seconds: u64) -> Result<Self, SyncError> {
        Ok(KindleCloudSource {
            client: build_client(timeout_seconds)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            cookie_header: decode_cookie_header(&cfg.cookies),
            raw_cookies: cfg.cookies.clone(),
            label: cfg.label.clone(),
            retry,
        })
    }

    async fn search_page(&self, token: Option<&str>) -> Result<SearchResponse, SyncError> {
        let url = format!("{}/kindle-library/search", self.base_url);
        let mut query = vec![
            ("query", ""),
            ("libraryType", "BOOKS"),
            ("sortType", "recency"),
            ("querySize", PAGE_SIZE),
        ];
        if let Some(t) = token {
            query.push(("paginationToken", t));
        }
        let response = send_with_retry(SERVICE, self.retry, || {
            self.client
                .get(&url)
                .query(&query)
                .header(reqwest::header::COOKIE, &self.cookie_header)
        })
        .await?;

        if response.url().path().contains("/ap/signin") {
            return Err(SyncError::auth_expired(SERVICE, "redirected to the Amazon sign-in page"));
        }
        Ok(response.json::<SearchResponse>().await?)
    }
}

#[async_trait]
impl SourceAdapter for KindleCloudSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn validate_credentials(&self) -> Result<(), SyncError> {
        require_cookies(SERVICE, &parse_cookies(&self.raw_cookies), &REQUIRED_COOKIES)
    }

    async fn list_books(&self) -> Result<Vec<SourceBookRecord>, SyncError> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = self.search_page(token.as_deref()).await?;
            records.extend(page.items_list.iter().filter_map(|i| to_record(i, &self.label)));
            match page.pagination_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        tracing::info!(count = records.len(), "kindle library loaded");
        Ok(records)
    }

    async fn fetch_details(&self, record: &SourceBookRecord) -> Result<SourceBookRecord, SyncError> {
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReadingStatus;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_cookie_values_are_percent_decoded() {
        let header = decode_cookie_header("session-id=123-456; at-main=Atza%7CIwEB%2Fx");
        assert!(header.contains("at-main=Atza|IwEB/x"));
        assert!(header.contains("session-id=123-456"));
    }

    #[test]
    fn test_library_item_to_record() {
        let page: SearchResponse = serde_json::from_value(json!({
            "itemsList": [
                { "asin": "B00X", "title": "Dune", "authors": ["Herbert, Frank:"],
                  "productUrl": "https://m.media-amazon.com/images/I/x.jpg", "percentageRead": 36.4 },
                { "asin": "", "title": "Ghost" }
            ],
            "paginationToken": "2"
        }))
        .unwrap();
        let records: Vec<_> = page.items_list.iter().filter_map(|i| to_record(i, "Kindle")).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].author, "Herbert, Frank");
        assert_eq!(records[0].progress_current, 36);
        assert_eq!(records[0].progress_total, 100);
        assert!(records[0].highlights.is_none());
        assert_eq!(page.pagination_token.as_deref(), Some("2"));
        assert!(records[0].last_read_at.is_none());
    }

    #[test]
    fn test_almost_done_stays_in_progress() {
        let item: LibraryItem = serde_json::from_value(json!({
            "asin": "B01", "title": "Dune Messiah", "percentageRead": 99.5
        }))
        .unwrap();
        let record = to_record(&item, "Kindle").unwrap();
        assert_eq!(record.progress_current, 99);
        assert_eq!(record.status(), ReadingStatus::InProgress);
    }

    #[test]
    fn test_library_dates_genre_and_rating() {
        let item: LibraryItem = serde_json::from_value(json!({
            "asin": "B02", "title": "Walden", "percentageRead": 12,
            "firstReadDate": "2024-01-05T08:00:00Z",
            "lastAccessDate": 1710064800000i64,
            "syncDate": 1600000000,
            "category": "Philosophy",
            "rating": 4.5
        }))
        .unwrap();
        let record = to_record(&item, "Kindle").unwrap();
        assert_eq!(record.started_at, Some(Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap()));
        assert_eq!(record.last_read_at, from_unix(1710064800));
        assert_eq!(record.genre.as_deref(), Some("Philosophy"));
        assert_eq!(record.rating, Some(4.5));
    }
}
