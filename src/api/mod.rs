use std::sync::Arc;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the management API router.
/// All routes are relative — the caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::create_approval),
        )
        .route("/approvals/:id", get(handlers::get_approval))
        .route("/approvals/:id/decision", post(handlers::decide_approval))
        .route("/approvals/:id/cancel", post(handlers::cancel_approval))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::register_session),
        )
        .route("/sessions/:id", get(handlers::get_session))
        .layer(middleware::from_fn(admin_auth))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` header against the configured admin key.
/// Returns 401 if missing/invalid, 500 if server config is broken.
async fn admin_auth(req: Request, next: Next) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = std::env::var("OVERSEER_ADMIN_KEY").map_err(|_| {
        tracing::error!("OVERSEER_ADMIN_KEY is not set");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match provided_key {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
