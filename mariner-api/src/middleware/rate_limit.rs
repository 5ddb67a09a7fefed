use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::error::AppError;
use crate::state::AppState;

const WINDOW_SECONDS: i64 = 60;

/// Fixed-window limit per client IP. Without Redis, or when Redis errors, requests pass.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(redis) = state.redis.as_ref() else {
        return next.run(req).await;
    };

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("ratelimit:{}", ip);

    match redis
        .check_rate_limit(&key, state.business_rules.rate_limit_per_minute, WINDOW_SECONDS)
        .await
    {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!(%ip, "Rate limit exceeded");
            AppError::RateLimited.into_response()
        }
        Err(e) => {
            // Fail open
            tracing::warn!("Rate limiter unavailable: {}", e);
            next.run(req).await
        }
    }
}
