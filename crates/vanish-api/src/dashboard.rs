use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;

use vanish_core::{Deactivation, OwnedLink};
use vanish_types::api::{ApiResponse, Claims, DashboardResponse, LinkSummary};

use crate::auth::AppState;
use crate::error::ApiError;

/// GET /api/dashboard/links
pub async fn list_links(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let owned = state
        .service
        .list_owned(&claims.sub.to_string(), Utc::now())
        .await?;

    let links = owned
        .links
        .into_iter()
        .map(|link| summary(&state, link))
        .collect();

    Ok(Json(ApiResponse::ok(DashboardResponse {
        links,
        counts: owned.counts,
    })))
}

/// PATCH /api/dashboard/links/{id}/deactivate
pub async fn deactivate_link(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .service
        .deactivate_owned(&id, &claims.sub.to_string(), Utc::now())
        .await?;

    let message = match outcome {
        Deactivation::Deactivated => "Link deactivated successfully",
        Deactivation::AlreadyInactive => "Link is already deactivated",
    };
    Ok(Json(ApiResponse::with_message(message, ())))
}

fn summary(state: &AppState, link: OwnedLink) -> LinkSummary {
    LinkSummary {
        share_link: state.service.share_link(&link.id),
        unique_id: link.id,
        kind: link.kind,
        file_name: link.file.as_ref().map(|f| f.file_name.clone()),
        file_type: link.file.as_ref().map(|f| f.mime_type.clone()),
        created_at: link.created_at,
        expires_at: link.expires_at,
        is_active: link.is_active,
        deactivated_at: link.deactivated_at,
        status: link.status,
    }
}
