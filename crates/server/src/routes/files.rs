//! Route definitions for the `/files` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::files;
use crate::state::AppState;

/// Routes mounted at `/files`.
///
/// ```text
/// POST   /upload         -> upload
/// GET    /list           -> list    (?skip=&limit=)
/// GET    /status/{id}    -> status
/// POST   /process/{id}   -> process
/// DELETE /{id}           -> delete
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(files::upload))
        .route("/list", get(files::list))
        .route("/status/{id}", get(files::status))
        .route("/process/{id}", post(files::process))
        .route("/{id}", delete(files::delete))
}
