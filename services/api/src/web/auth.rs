//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use reading_tracker_core::connectivity::Gated;
use reading_tracker_core::domain::{Credentials, UserIdentity};
use reading_tracker_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::middleware::{session_cookie, session_id, AUTH_SESSION_DAYS, CLEARED_SESSION_COOKIE};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: String,
    pub display_name: Option<String>,
}

impl From<UserIdentity> for AuthResponse {
    fn from(user: UserIdentity) -> Self {
        Self {
            user_id: user.user_id,
            display_name: user.display_name,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Creates an auth session for `user` and returns its `Set-Cookie` value.
async fn start_auth_session(state: &AppState, user: &UserIdentity) -> Result<String, (StatusCode, String)> {
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(AUTH_SESSION_DAYS);
    state
        .auth
        .create_auth_session(&auth_session_id, &user.user_id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;
    Ok(session_cookie(&auth_session_id))
}

/// POST /auth/signup - Create a new account and sign it in
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created and signed in; sets the session cookie", body = AuthResponse),
        (status = 400, description = "Invalid request or account already exists"),
        (status = 503, description = "Offline")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !state.library.connectivity().is_online() {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Signing up needs a connection".to_string()));
    }
    let credentials = Credentials {
        email: req.email,
        password: req.password,
    };
    let user = state
        .auth
        .register(&credentials, req.display_name)
        .await
        .map_err(|e| {
            error!("Failed to create user: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string())
        })?;

    let cookie = start_auth_session(&state, &user).await?;
    state.library.resume(user.clone()).await;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(user)),
    ))
}

/// POST /auth/login - Sign in with an existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; sets the session cookie", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 503, description = "Offline, login skipped")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let credentials = Credentials {
        email: req.email,
        password: req.password,
    };
    let user = match state.library.login(&credentials).await {
        Ok(Gated::Ready(user)) => user,
        Ok(Gated::Offline) => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "You are offline; try again once connected".to_string(),
            ))
        }
        Err(PortError::Unauthorized) => {
            return Err((StatusCode::UNAUTHORIZED, "Invalid email or password".to_string()))
        }
        Err(e) => {
            error!("Login failed: {}", e);
            return Err((StatusCode::BAD_GATEWAY, "Authentication service error".to_string()));
        }
    };

    let cookie = match start_auth_session(&state, &user).await {
        Ok(cookie) => cookie,
        Err(e) => {
            // Without a cookie nobody can use the session that was just started.
            state.library.logout().await;
            return Err(e);
        }
    };
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(AuthResponse::from(user))))
}

/// POST /auth/logout - Invalidate the session and sign the library out
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Logout successful; clears the session cookie"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Extract and validate the session cookie
    let auth_session_id =
        session_id(&headers).ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;
    let user_id = state
        .auth
        .validate_auth_session(auth_session_id)
        .await
        .map_err(|_| (StatusCode::UNAUTHORIZED, "No active session".to_string()))?;

    // 2. Delete the auth session
    state.auth.delete_auth_session(auth_session_id).await.map_err(|e| {
        error!("Failed to delete auth session: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
    })?;

    // 3. Sign the library out if it belongs to this user
    if state.library.current_user().is_some_and(|user| user.user_id == user_id) {
        state.library.logout().await;
    }
    info!("Signed out user {}", user_id);

    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, CLEARED_SESSION_COOKIE.to_string())]))
}
