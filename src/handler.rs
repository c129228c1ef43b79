use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::api::{APIResponse, KeyQuery, RunStatus};
use crate::error::SyncError;
use crate::runner::SyncLauncher;
use crate::sync::{RunAborted, SyncReport};
use crate::{accepted, conflict, good_response, server_error, unauthorized};

#[derive(Clone)]
pub struct AppState {
    pub status: Arc<Mutex<RunStatus>>,
    pub launcher: Arc<dyn SyncLauncher>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(launcher: Arc<dyn SyncLauncher>, api_key: Option<String>) -> Self {
        AppState {
            status: Arc::new(Mutex::new(RunStatus::idle())),
            launcher,
            api_key,
        }
    }

    fn authorized(&self, query: &KeyQuery) -> bool {
        match &self.api_key {
            None => true,
            Some(expected) => query.key.as_deref() == Some(expected.as_str()),
        }
    }

    /// Marks a run as started unless one is already going.
    async fn try_begin(&self, trigger: &str) -> bool {
        let mut status = self.status.lock().await;
        if status.running {
            return false;
        }
        status.running = true;
        status.started_at = Some(Utc::now());
        status.completed_at = None;
        status.error = None;
        status.message = format!("sync started ({})", trigger);
        true
    }

    async fn finish(&self, result: &Result<SyncReport, RunAborted>) {
        let mut status = self.status.lock().await;
        status.running = false;
        status.completed_at = Some(Utc::now());
        match result {
            Ok(report) => {
                status.message = "sync completed".to_string();
                status.error = None;
                status.report = Some(report.clone());
            }
            Err(aborted) => {
                status.message = "sync aborted".to_string();
                status.error = Some(aborted.error.to_string());
                status.report = Some(aborted.report.clone());
            }
        }
    }

    /// Runs the launcher on its own task so a panic is reported as an
    /// aborted run instead of leaving the slot taken.
    async fn launch_guarded(&self) -> Result<SyncReport, RunAborted> {
        let launcher = self.launcher.clone();
        match tokio::spawn(async move { launcher.launch().await }).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "sync task did not complete");
                Err(RunAborted {
                    error: SyncError::Api(format!("sync task failed: {}", e)),
                    report: SyncReport::empty("", Utc::now()),
                })
            }
        }
    }

    /// Runs one sync to completion. `None` when another run holds the slot.
    pub async fn execute_run(&self, trigger: &str) -> Option<Result<SyncReport, RunAborted>> {
        if !self.try_begin(trigger).await {
            return None;
        }
        info!(trigger, "sync run starting");
        let result = self.launch_guarded().await;
        self.finish(&result).await;
        Some(result)
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(APIResponse::new_from_msg("ok"))
}

pub async fn get_status(State(state): State<AppState>, Query(q): Query<KeyQuery>) -> Response {
    if !state.authorized(&q) {
        return unauthorized(APIResponse::new_from_msg("invalid api key"));
    }
    let status = state.status.lock().await.clone();
    (StatusCode::OK, Json(status)).into_response()
}

/// `POST /sync`: starts a run in the background.
pub async fn start_sync(State(state): State<AppState>, Query(q): Query<KeyQuery>) -> Response {
    if !state.authorized(&q) {
        return unauthorized(APIResponse::new_from_msg("invalid api key"));
    }
    if !state.try_begin("http").await {
        return conflict(APIResponse::new_from_msg("sync already running"));
    }

    let background = state.clone();
    tokio::spawn(async move {
        let result = background.launch_guarded().await;
        if let Err(aborted) = &result {
            tracing::error!(error = %aborted.error, "background sync aborted");
        }
        background.finish(&result).await;
    });
    accepted(APIResponse::new_from_msg("sync started"))
}

/// `GET /sync`: runs and waits for the report.
pub async fn run_sync(State(state): State<AppState>, Query(q): Query<KeyQuery>) -> Response {
    if !state.authorized(&q) {
        return unauthorized(APIResponse::new_from_msg("invalid api key"));
    }
    match state.execute_run("http").await {
        None => conflict(APIResponse::new_from_msg("sync already running")),
        Some(Ok(report)) => good_response(APIResponse::with_report("ok", report)),
        Some(Err(aborted)) => {
            let auth = matches!(aborted.error, SyncError::AuthExpired { .. });
            let body = APIResponse::from_aborted(aborted);
            if auth {
                unauthorized(body)
            } else {
                server_error(body)
            }
        }
    }
}
