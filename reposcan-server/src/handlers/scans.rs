use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use reposcan_model::{Page, RepositoryId, ScanFilter, ScanId, ScanStatus};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerScanBody {
    pub repository_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanListQuery {
    pub repository_id: Option<i64>,
    pub repository_name: Option<String>,
    /// One of the wire statuses, e.g. `In Progress`.
    pub status: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl ScanListQuery {
    fn filter(&self) -> Result<ScanFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<ScanStatus>)
            .transpose()
            .map_err(|e| AppError::bad_request(e.to_string()))?;

        Ok(ScanFilter {
            repository_id: self.repository_id.map(RepositoryId),
            repository_name: self.repository_name.clone(),
            status,
        })
    }
}

pub async fn trigger_scan_handler(
    State(state): State<AppState>,
    Json(body): Json<TriggerScanBody>,
) -> AppResult<impl IntoResponse> {
    let scan = state
        .scans
        .trigger_scan(RepositoryId(body.repository_id))
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": scan }))))
}

pub async fn list_scans_handler(
    State(state): State<AppState>,
    Query(query): Query<ScanListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = query.filter()?;
    let scans = state
        .scans
        .list_scans(&filter, Page::new(query.page, query.size))
        .await?;
    Ok(Json(json!({ "data": scans })))
}

pub async fn get_scan_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let scan = state.scans.get_scan(ScanId(id)).await?;
    Ok(Json(json!({ "data": scan })))
}
