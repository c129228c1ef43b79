use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub text: String,
    pub style: Option<i32>,
    pub color: Option<i32>,
    pub note: Option<String>,
    pub chapter: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Highlight {
    pub fn new(text: &str) -> Self {
        Highlight {
            text: text.to_string(),
            style: None,
            color: None,
            note: None,
            chapter: None,
            created_at: None,
        }
    }
}

/// One book as reported by a source for the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBookRecord {
    pub source_id: String,
    pub title: String,
    pub author: String,
    pub cover_url: Option<String>,
    pub progress_current: u32,
    pub progress_total: u32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub genre: Option<String>,
    /// Star rating as the source reports it, usually 1 to 5.
    pub rating: Option<f64>,
    /// `None` means the source does not carry highlights for this book.
    pub highlights: Option<Vec<Highlight>>,
    pub source: String,
}

impl SourceBookRecord {
    pub fn new(source: &str, source_id: &str, title: &str) -> Self {
        SourceBookRecord {
            source_id: source_id.to_string(),
            title: title.to_string(),
            author: String::new(),
            cover_url: None,
            progress_current: 0,
            progress_total: 0,
            last_read_at: None,
            started_at: None,
            finished_at: None,
            genre: None,
            rating: None,
            highlights: None,
            source: source.to_string(),
        }
    }

    pub fn status(&self) -> ReadingStatus {
        ReadingStatus::derive(self.progress_current, self.progress_total, self.finished_at.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    NotStarted,
    InProgress,
    Finished,
}

impl ReadingStatus {
    pub fn derive(current: u32, total: u32, has_finish_timestamp: bool) -> Self {
        if has_finish_timestamp && current >= total {
            return ReadingStatus::Finished;
        }
        if current == 0 {
            return ReadingStatus::NotStarted;
        }
        if total > 0 && current >= total {
            return ReadingStatus::Finished;
        }
        ReadingStatus::InProgress
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::NotStarted => "not_started",
            ReadingStatus::InProgress => "in_progress",
            ReadingStatus::Finished => "finished",
        }
    }
}

/// Typed value of a single target property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Title(String),
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Select(String),
    Status(String),
    MultiSelect(Vec<String>),
    Url(String),
}

impl FieldValue {
    /// Multi-select order is not meaningful on the target side.
    pub fn same_as(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::MultiSelect(a), FieldValue::MultiSelect(b)) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort();
                b.sort();
                a == b
            }
            (FieldValue::Select(a), FieldValue::Select(b)) | (FieldValue::Status(a), FieldValue::Status(b)) => {
                a.eq_ignore_ascii_case(b)
            }
            _ => self == other,
        }
    }
}

pub type PropertyMap = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub id: String,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub title: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        assert_eq!(ReadingStatus::derive(100, 100, true), ReadingStatus::Finished);
        assert_eq!(ReadingStatus::derive(40, 100, false), ReadingStatus::InProgress);
        assert_eq!(ReadingStatus::derive(40, 100, true), ReadingStatus::InProgress);
        assert_eq!(ReadingStatus::derive(0, 100, false), ReadingStatus::NotStarted);
        assert_eq!(ReadingStatus::derive(0, 0, false), ReadingStatus::NotStarted);
        assert_eq!(ReadingStatus::derive(318, 318, false), ReadingStatus::Finished);
        assert_eq!(ReadingStatus::derive(0, 0, true), ReadingStatus::Finished);
    }

    #[test]
    fn test_multi_select_ignores_order() {
        let a = FieldValue::MultiSelect(vec!["WeRead".into(), "Kindle".into()]);
        let b = FieldValue::MultiSelect(vec!["Kindle".into(), "WeRead".into()]);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&FieldValue::MultiSelect(vec!["WeRead".into()])));
    }
}
