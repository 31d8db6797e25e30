use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use rand_core::OsRng;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::{ConnectionRegistry, Fanout};
use parley_types::api::{Ack, Claims, RegisterRequest, RegisterResponse, SigninRequest, TokenResponse};
use parley_types::models::Identity;

use crate::error::ApiError;
use crate::token::TokenIssuer;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenIssuer,
    pub registry: ConnectionRegistry,
    pub fanout: Fanout,
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}

/// Look up the identity behind a validated email. The auth gate has already
/// run, so a miss here is a server-side inconsistency, not a client error.
pub(crate) async fn resolve_identity(state: &AppState, email: &str) -> Result<Identity, ApiError> {
    let lookup = email.to_string();
    match with_db(state, move |db| db.identity_by_email(&lookup)).await {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => {
            error!(%email, "authenticated email has no user");
            Err(ApiError::Internal("Error getting user from email".into()))
        }
        Err(e) => {
            error!(%email, "user lookup failed: {:#}", e);
            Err(ApiError::Internal("Error getting user from email".into()))
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| {
        info!("rejecting register payload: {}", e);
        ApiError::BadRequest("Error reading payload".into())
    })?;

    if req.name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("Name, email and password are required".into()));
    }

    let email = req.email.clone();
    let taken = with_db(&state, move |db| db.email_exists(&email))
        .await
        .map_err(|e| {
            error!("email lookup failed: {:#}", e);
            ApiError::Internal("Internal Server Error".into())
        })?;
    if taken {
        return Err(ApiError::BadRequest(format!("User with email {} already exists", req.email)));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("password hashing failed: {}", e);
            ApiError::Internal("Internal Server Error".into())
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    let id = user_id.to_string();
    with_db(&state, move |db| db.create_user(&id, &req.name, &req.email, &password_hash))
        .await
        .map_err(|e| {
            error!("user insert failed: {:#}", e);
            ApiError::Internal("Internal Server Error".into())
        })?;

    info!(user_id = %user_id, "user registered");
    Ok((StatusCode::ACCEPTED, Json(RegisterResponse { id: user_id })))
}

pub async fn signin(
    State(state): State<AppState>,
    payload: Result<Json<SigninRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| {
        info!("rejecting signin payload: {}", e);
        ApiError::BadRequest("Error reading payload".into())
    })?;

    let email = req.email.clone();
    let user = with_db(&state, move |db| db.get_user_by_email(&email))
        .await
        .map_err(|e| {
            error!("user lookup failed: {:#}", e);
            ApiError::Internal("Internal Server Error".into())
        })?
        .ok_or_else(|| ApiError::Rejected(format!("User with email {} does not exist", req.email)))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!(email = %user.email, "stored password hash unreadable: {}", e);
        ApiError::Internal("Internal Server Error".into())
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Rejected("Invalid credentials".into()))?;

    let identity = Identity {
        id: user.id.parse().map_err(|_| ApiError::Internal("Internal Server Error".into()))?,
        name: user.name,
        email: user.email,
    };

    let token = state.tokens.issue(&identity).await.map_err(|e| {
        error!(email = %identity.email, "{}", e);
        ApiError::Internal("Internal Server Error".into())
    })?;

    info!(user_id = %identity.id, "user signed in");
    Ok((StatusCode::ACCEPTED, Json(TokenResponse { token })))
}

/// Revoke the caller's credential. A cache failure is logged; the client is
/// told it is signed out either way.
pub async fn signout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    if let Err(e) = state.tokens.revoke(&claims.email).await {
        warn!(email = %claims.email, "{}", e);
    }
    info!(user_id = %claims.sub, "user signed out");
    (StatusCode::ACCEPTED, Json(Ack::new("ok")))
}
