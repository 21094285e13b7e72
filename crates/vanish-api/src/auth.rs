use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use vanish_core::ContentService;
use vanish_core::password::{hash_password, verify_password};
use vanish_db::Database;
use vanish_db::models::{UserRow, parse_ts};
use vanish_types::api::{ApiResponse, AuthResponse, Claims, LoginRequest, MeResponse, RegisterRequest};
use vanish_types::models::User;

use crate::error::{ApiError, AuthError};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: ContentService,
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_LIFETIME_DAYS: i64 = 7;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(AuthError::MissingFields.into());
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(MIN_PASSWORD_LEN).into());
    }

    let password = req.password;
    let password_hash = blocking(move || hash_password(&password)).await?;

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let (id, row_name, row_email) = (user_id.to_string(), name.clone(), email.clone());
    let created =
        blocking(move || db.create_user(&id, &row_name, &row_email, &password_hash)).await?;
    if !created {
        return Err(AuthError::EmailTaken.into());
    }

    let db = state.db.clone();
    let id = user_id.to_string();
    let row = blocking(move || db.get_user_by_id(&id))
        .await?
        .ok_or(AuthError::UnknownUser)?;
    let user = user_from_row(row)?;
    let token = create_token(&state.jwt_secret, user_id, &name)?;

    info!("Account {} registered", user_id);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "User registered successfully",
            AuthResponse { user, token },
        )),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(AuthError::MissingFields.into());
    }

    let db = state.db.clone();
    let row = blocking(move || db.get_user_by_email(&email))
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let password = req.password;
    let hash = row.password.clone();
    if !blocking(move || Ok(verify_password(&password, &hash))).await? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let user = user_from_row(row)?;
    let token = create_token(&state.jwt_secret, user.id, &user.name)?;

    Ok(Json(ApiResponse::with_message(
        "Login successful",
        AuthResponse { user, token },
    )))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let row = blocking(move || db.get_user_by_id(&id))
        .await?
        .ok_or(AuthError::UnknownUser)?;

    Ok(Json(ApiResponse::ok(MeResponse { user: user_from_row(row)? })))
}

pub fn create_token(secret: &str, user_id: Uuid, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn user_from_row(row: UserRow) -> anyhow::Result<User> {
    Ok(User {
        id: row.id.parse()?,
        name: row.name,
        email: row.email,
        created_at: parse_ts(&row.created_at).map_err(anyhow::Error::msg)?,
    })
}

/// Run a blocking account-store call off the async workers.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
