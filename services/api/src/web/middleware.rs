//! services/api/src/web/middleware.rs
//!
//! Guards the routes that need a signed-in library, and the session cookie
//! shared with the auth handlers.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Duration;
use reading_tracker_core::domain::UserIdentity;
use std::sync::Arc;
use tracing::debug;

use crate::web::state::AppState;

/// How long an auth session stays valid.
pub const AUTH_SESSION_DAYS: i64 = 30;

/// Expires the session cookie in the browser.
pub const CLEARED_SESSION_COOKIE: &str = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";

/// The `Set-Cookie` value for a freshly created auth session.
pub fn session_cookie(auth_session_id: &str) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id,
        Duration::days(AUTH_SESSION_DAYS).num_seconds()
    )
}

/// Reads the auth session id from the `session` cookie.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// The signed-in user, if it is the one the auth session belongs to.
fn signed_in_as(session_user_id: &str, current: Option<UserIdentity>) -> Option<UserIdentity> {
    current.filter(|user| user.user_id == session_user_id)
}

/// Middleware that validates the auth session cookie against the signed-in user.
///
/// The library serves one user at a time, so a valid session of any other
/// account is rejected too. If valid, inserts the `UserIdentity` into request
/// extensions for handlers to use.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Parse the session id from the cookie
    let auth_session_id = session_id(req.headers()).map(str::to_string).ok_or_else(|| {
        debug!("Rejecting {} {}: no session cookie", req.method(), req.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    // 2. Validate the auth session, get its user
    let session_user_id = state.auth.validate_auth_session(&auth_session_id).await.map_err(|e| {
        debug!("Rejecting {} {}: {}", req.method(), req.uri().path(), e);
        StatusCode::UNAUTHORIZED
    })?;

    // 3. The library must be signed in as that user
    let user = signed_in_as(&session_user_id, state.library.current_user()).ok_or_else(|| {
        debug!(
            "Rejecting {} {}: the library is not signed in as {}",
            req.method(),
            req.uri().path(),
            session_user_id
        );
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
