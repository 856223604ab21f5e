//! Liveness and warmup probes. These stay outside the login guard.

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /_probe
pub async fn probe() -> &'static str {
    "OK"
}

/// GET /warmup
pub async fn warmup() -> &'static str {
    "ok"
}
