use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    ping_handler,
    repositories::{
        create_repository_handler, delete_repository_handler, get_repository_handler,
        list_repositories_handler, update_repository_handler,
    },
    scans::{get_scan_handler, list_scans_handler, trigger_scan_handler},
};
use crate::state::AppState;

/// Full HTTP surface of the api role.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/repositories",
            post(create_repository_handler).get(list_repositories_handler),
        )
        .route(
            "/repositories/{id}",
            get(get_repository_handler)
                .patch(update_repository_handler)
                .delete(delete_repository_handler),
        )
        .route("/scans", post(trigger_scan_handler).get(list_scans_handler))
        .route("/scans/{id}", get(get_scan_handler))
}
