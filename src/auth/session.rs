//! Signed cookie sessions.
//!
//! The whole session lives in the `portal_session` cookie as hex encoded JSON
//! followed by an HMAC-SHA256 signature: `<payload_hex>.<signature_hex>`.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::{random_hex, Config};
use crate::errors::AppError;

pub const SESSION_COOKIE: &str = "portal_session";

type HmacSha256 = Hmac<Sha256>;

/// Everything the portal keeps per browser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionData {
    pub auth_ok: bool,
    pub auth_user: Option<String>,
    pub csrf_token: Option<String>,
    pub course_signed_in: bool,
    pub course_email: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Default)]
struct SessionState {
    data: SessionData,
    dirty: bool,
    cleared: bool,
}

/// Per-request session, shared between the layer and the handler.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<Mutex<SessionState>>);

impl SessionHandle {
    pub fn new(data: SessionData) -> Self {
        Self(Arc::new(Mutex::new(SessionState {
            data,
            dirty: false,
            cleared: false,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn data(&self) -> SessionData {
        self.lock().data.clone()
    }

    pub fn update<F: FnOnce(&mut SessionData)>(&self, f: F) {
        let mut state = self.lock();
        f(&mut state.data);
        state.dirty = true;
        state.cleared = false;
    }

    /// Drop every session value.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.data = SessionData::default();
        state.dirty = true;
        state.cleared = true;
    }

    /// The CSRF token of this session, created on first use.
    pub fn csrf_token(&self) -> String {
        let mut state = self.lock();
        if let Some(token) = state.data.csrf_token.clone() {
            return token;
        }
        let token = random_hex(16);
        state.data.csrf_token = Some(token.clone());
        state.dirty = true;
        token
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().data.auth_ok
    }
}

impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or_else(|| AppError::Internal("Session layer not installed".to_string()))
    }
}

/// Cookie signing settings.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    secret: Vec<u8>,
    lifetime_secs: i64,
    secure: bool,
}

impl SessionKeys {
    pub fn new(secret: &str, minutes: i64, secure: bool) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            lifetime_secs: minutes.max(1) * 60,
            secure,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.secret_key,
            config.session_minutes,
            config.session_cookie_secure,
        )
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC takes keys of any length.
        HmacSha256::new_from_slice(&self.secret).unwrap_or_else(|_| unreachable!())
    }

    /// Sign and encode a session for the cookie value.
    pub fn encode(&self, data: &SessionData) -> Result<String, AppError> {
        let payload = serde_json::to_vec(data)?;
        let mut mac = self.mac();
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&payload), hex::encode(signature)))
    }

    /// Decode a cookie value. Tampered, malformed or expired cookies yield `None`.
    pub fn decode(&self, value: &str) -> Option<SessionData> {
        let (payload_hex, signature_hex) = value.split_once('.')?;
        let payload = hex::decode(payload_hex).ok()?;
        let signature = hex::decode(signature_hex).ok()?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature).ok()?;

        let data: SessionData = serde_json::from_slice(&payload).ok()?;
        if data.expires_at <= Utc::now().timestamp() {
            return None;
        }
        Some(data)
    }

    fn set_cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            SESSION_COOKIE, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Value of the session cookie in the request headers, if any.
fn read_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Load the session before the handler runs and write it back afterwards.
/// Authenticated sessions are re-issued on every response so their lifetime rolls.
pub async fn session_layer(keys: Arc<SessionKeys>, mut request: Request, next: Next) -> Response {
    let data = read_cookie(request.headers())
        .and_then(|value| keys.decode(&value))
        .unwrap_or_default();
    let handle = SessionHandle::new(data);
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    let (data, dirty, cleared) = {
        let state = handle.lock();
        (state.data.clone(), state.dirty, state.cleared)
    };

    let cookie = if cleared {
        Some(keys.set_cookie("", 0))
    } else if dirty || data.auth_ok {
        let mut data = data;
        data.expires_at = Utc::now().timestamp() + keys.lifetime_secs;
        match keys.encode(&data) {
            Ok(value) => Some(keys.set_cookie(&value, keys.lifetime_secs)),
            Err(e) => {
                tracing::error!("Failed to encode session: {}", e);
                None
            }
        }
    } else {
        None
    };

    if let Some(cookie) = cookie {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Invalid session cookie header: {}", e),
        }
    }

    response
}
