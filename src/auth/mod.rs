//! Login, CSRF and redirect checks for the portal.
//!
//! Secrets are compared in constant time to mitigate timing attacks.

mod session;

pub use session::{session_layer, SessionHandle, SessionKeys};

use axum::{
    extract::{OriginalUri, Request},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use url::Url;

use crate::config::Config;
use crate::errors::AppError;

/// Header carrying the session's CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

pub const LOGIN_PATH: &str = "/api/auth/login";

/// Werkzeug's default when the hash omits the iteration count.
const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Reject requests without an authenticated session.
pub async fn require_login(request: Request, next: Next) -> Response {
    let authenticated = request
        .extensions()
        .get::<SessionHandle>()
        .map(SessionHandle::is_authenticated)
        .unwrap_or(false);
    if authenticated {
        return next.run(request).await;
    }

    let login = if request.method() == Method::GET {
        // Nested routers see the path without their prefix.
        let uri = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| original.0.clone())
            .unwrap_or_else(|| request.uri().clone());
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
        format!("{}?next={}", LOGIN_PATH, encoded)
    } else {
        LOGIN_PATH.to_string()
    };

    AppError::Unauthorized {
        message: "Login required".to_string(),
        login,
    }
    .into_response()
}

/// Require the session's CSRF token on every unsafe method.
pub async fn csrf_layer(request: Request, next: Next) -> Response {
    if matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS
    ) {
        return next.run(request).await;
    }

    let expected = request
        .extensions()
        .get::<SessionHandle>()
        .and_then(|session| session.data().csrf_token);
    let provided = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok());

    match (expected, provided) {
        (Some(expected), Some(provided)) if constant_time_compare(provided, &expected) => {
            next.run(request).await
        }
        _ => {
            tracing::warn!("CSRF check failed for {} {}", request.method(), request.uri().path());
            AppError::Csrf("CSRF token mismatch".to_string()).into_response()
        }
    }
}

/// Check a login password against the configured credential.
///
/// A password hash wins over a plain password. With neither configured only
/// debug mode accepts `dev`.
pub fn verify_password(config: &Config, password: &str) -> bool {
    if let Some(hash) = config.app_password_hash.as_deref() {
        return check_password_hash(hash, password);
    }
    if let Some(plain) = config.app_password.as_deref() {
        return constant_time_compare(password, plain);
    }
    config.debug && password == "dev"
}

/// Verify a werkzeug `pbkdf2:sha256[:iterations]$salt$hexdigest` hash.
fn check_password_hash(hash: &str, password: &str) -> bool {
    let mut parts = hash.splitn(3, '$');
    let (Some(method), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        tracing::warn!("APP_PASSWORD_HASH is not in method$salt$hash form");
        return false;
    };

    let mut method_parts = method.split(':');
    if method_parts.next() != Some("pbkdf2") || method_parts.next() != Some("sha256") {
        tracing::warn!("Unsupported password hash method: {}", method);
        return false;
    }
    let iterations = match method_parts.next() {
        None => DEFAULT_PBKDF2_ITERATIONS,
        Some(n) => match n.parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!("Invalid pbkdf2 iteration count: {}", n);
                return false;
            }
        },
    };

    let mut derived = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut derived);
    constant_time_compare(&hex::encode(derived), &expected.to_ascii_lowercase())
}

/// True when `target` stays on `host` (relative paths included) over http(s).
pub fn is_safe_url(target: &str, host: &str) -> bool {
    let Ok(base) = Url::parse(&format!("http://{}/", host)) else {
        return false;
    };
    let Ok(resolved) = base.join(target) else {
        return false;
    };
    matches!(resolved.scheme(), "http" | "https")
        && resolved.username().is_empty()
        && resolved.password().is_none()
        && resolved.host_str() == base.host_str()
        && resolved.port() == base.port()
}

/// Perform constant-time string comparison.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    a_bytes.ct_eq(b_bytes).into()
}
