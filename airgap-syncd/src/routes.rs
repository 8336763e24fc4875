//! HTTP surface exposing sync status, the active progress snapshot, and
//! trigger endpoints, following the teacher's `routes::create_router`
//! nesting-by-resource shape.

use crate::state::AppState;
use airgap_core::progress::Snapshot;
use airgap_core::sync::{ProviderStatus, SyncReport};
use airgap_core::CoreError;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/progress", get(progress))
        .route("/api/sync", post(sync_all))
        .route("/api/sync/{provider}", post(sync_one))
        .route("/api/scan/{provider}", post(scan_local))
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ProviderStatus>>, CoreError> {
    Ok(Json(state.sync_manager.status().await?))
}

async fn progress(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    let tracker = state.sync_manager.active_tracker().await;
    Json(tracker.snapshot())
}

#[derive(Debug, Deserialize, Default)]
struct SyncQuery {
    #[serde(default)]
    dry_run: bool,
}

async fn sync_one(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    query: Option<axum::extract::Query<SyncQuery>>,
) -> Result<Json<SyncReport>, CoreError> {
    let dry_run = query.map(|q| q.0.dry_run).unwrap_or(false);
    let report = state
        .sync_manager
        .sync_one(&provider, dry_run, CancellationToken::new())
        .await?;
    Ok(Json(report))
}

async fn sync_all(State(state): State<Arc<AppState>>) -> Json<Vec<SyncReportOrError>> {
    let reports = state.sync_manager.sync_all(CancellationToken::new()).await;
    Json(reports.into_iter().map(SyncReportOrError::from).collect())
}

async fn scan_local(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<airgap_core::sync::ScanReport>, CoreError> {
    Ok(Json(state.sync_manager.scan_local(&provider).await?))
}

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
enum SyncReportOrError {
    Report(SyncReport),
    Error { error: String },
}

impl From<Result<SyncReport, CoreError>> for SyncReportOrError {
    fn from(r: Result<SyncReport, CoreError>) -> Self {
        match r {
            Ok(report) => SyncReportOrError::Report(report),
            Err(e) => SyncReportOrError::Error { error: e.to_string() },
        }
    }
}

