//! Operator login and logout.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{success, success_with, ApiResult, Notice};
use crate::auth::{is_safe_url, verify_password, SessionHandle, LOGIN_PATH};
use crate::errors::AppError;
use crate::AppState;

/// Where a successful login lands when no safe `next` was given.
const HOME_PATH: &str = "/api/dashboard";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoginQuery {
    pub next: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub password: String,
    pub next: String,
}

#[derive(Debug, Serialize)]
pub struct LoginPage {
    pub csrf_token: String,
    pub next: String,
    pub authenticated: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub user: String,
    pub redirect: String,
}

/// GET /api/auth/login - Issue the CSRF token the login form must send back.
pub async fn login_page(session: SessionHandle, Query(query): Query<LoginQuery>) -> ApiResult<LoginPage> {
    success(LoginPage {
        csrf_token: session.csrf_token(),
        next: query.next,
        authenticated: session.is_authenticated(),
    })
}

/// POST /api/auth/login - Check the password and open an authenticated session.
pub async fn login(
    State(state): State<AppState>,
    session: SessionHandle,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> ApiResult<LoginResult> {
    if !verify_password(&state.config, &request.password) {
        tracing::warn!("Failed login attempt");
        let encoded: String = url::form_urlencoded::byte_serialize(request.next.as_bytes()).collect();
        return Err(AppError::Unauthorized {
            message: "Invalid password.".to_string(),
            login: format!("{}?next={}", LOGIN_PATH, encoded),
        });
    }

    let user = state.config.app_username.clone();
    session.update(|data| {
        data.auth_ok = true;
        data.auth_user = Some(user.clone());
    });
    tracing::info!("Operator {} logged in", user);

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let next = request.next.trim();
    let redirect = if !next.is_empty() && is_safe_url(next, host) {
        next.to_string()
    } else {
        HOME_PATH.to_string()
    };

    success_with(
        LoginResult { user, redirect },
        vec![Notice::success("Welcome back.")],
    )
}

/// POST /api/auth/logout - Drop the whole session.
pub async fn logout(session: SessionHandle) -> ApiResult<()> {
    session.clear();
    success_with((), vec![Notice::success("Logged out.")])
}
