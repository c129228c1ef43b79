use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::{RunAborted, SyncReport};

#[derive(Debug, Deserialize, Default)]
pub struct KeyQuery {
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct APIResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl APIResponse {
    pub fn new_from_msg(msg: &str) -> Self {
        APIResponse {
            status: msg.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_report(msg: &str, report: SyncReport) -> Self {
        APIResponse {
            status: msg.to_owned(),
            report: Some(report),
            ..Default::default()
        }
    }

    pub fn from_aborted(aborted: RunAborted) -> Self {
        APIResponse {
            status: "error".to_owned(),
            hint: aborted.error.hint(),
            error: Some(aborted.error.to_string()),
            report: Some(aborted.report),
        }
    }
}

/// What `GET /status` reports about the current or most recent run.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RunStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub message: String,
    pub error: Option<String>,
    pub report: Option<SyncReport>,
}

impl RunStatus {
    pub fn idle() -> Self {
        RunStatus {
            message: "idle".to_string(),
            ..Default::default()
        }
    }
}
