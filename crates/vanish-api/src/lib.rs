pub mod auth;
pub mod content;
pub mod dashboard;
pub mod error;
pub mod middleware;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Room for multipart framing and the text fields around a maximum-size file.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Every route of the service. CORS and request tracing are layered on by
/// the server binary.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let public = Router::new()
        .route("/api/upload", post(content::upload))
        .route("/api/content/{id}", post(content::peek).delete(content::delete))
        .route("/api/download/{id}", get(content::download))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/health", get(content::health));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/dashboard/links", get(dashboard::list_links))
        .route("/api/dashboard/links/{id}/deactivate", patch(dashboard::deactivate_link))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES)))
        .with_state(state)
}
