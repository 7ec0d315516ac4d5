use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use reposcan_model::{Page, RepositoryFilter, RepositoryId};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RepositoryBody {
    pub repository_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepositoryListQuery {
    pub owner: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

pub async fn create_repository_handler(
    State(state): State<AppState>,
    Json(body): Json<RepositoryBody>,
) -> AppResult<impl IntoResponse> {
    let repository = state
        .repositories
        .create_repository(&body.repository_url)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": repository }))))
}

pub async fn list_repositories_handler(
    State(state): State<AppState>,
    Query(query): Query<RepositoryListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = RepositoryFilter { owner: query.owner };
    let repositories = state
        .repositories
        .list_repositories(&filter, Page::new(query.page, query.size))
        .await?;
    Ok(Json(json!({ "data": repositories })))
}

pub async fn get_repository_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let repository = state.repositories.get_repository(RepositoryId(id)).await?;
    Ok(Json(json!({ "data": repository })))
}

pub async fn update_repository_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RepositoryBody>,
) -> AppResult<impl IntoResponse> {
    let repository = state
        .repositories
        .update_repository(RepositoryId(id), &body.repository_url)
        .await?;
    Ok(Json(json!({ "data": repository })))
}

pub async fn delete_repository_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.repositories.delete_repository(RepositoryId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
