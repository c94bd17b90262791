pub mod files;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /files/upload              POST    upload an image
/// /files/list                GET     list jobs, newest first
/// /files/status/{id}         GET     job status and results
/// /files/process/{id}        POST    re-run processing
/// /files/{id}                DELETE  remove job and stored image
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/files", files::router())
}
