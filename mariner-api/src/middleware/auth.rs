use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// A customer token. `sub` is the user id orders and coupon redemptions are recorded under.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CustomerClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: String,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

fn bearer_token(req: &Request) -> Result<&str, AppError> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".into()))
}

fn decode_claims<T: DeserializeOwned + Clone>(token: &str, secret: &str) -> Result<T, AppError> {
    decode::<T>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))
}

// ============================================================================
// Customer Authentication Middleware
// ============================================================================

pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims: CustomerClaims = decode_claims(bearer_token(&req)?, &state.auth.secret)?;

    if claims.role != "CUSTOMER" {
        return Err(AppError::AuthorizationError("Customer role required".into()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Admin Authentication Middleware
// ============================================================================

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims: AdminClaims = decode_claims(bearer_token(&req)?, &state.auth.secret)?;

    if claims.role != "ADMIN" && claims.role != "SUPER_ADMIN" {
        return Err(AppError::AuthorizationError("Admin role required".into()));
    }

    tracing::debug!(admin = %claims.sub, path = %req.uri().path(), "Admin request");
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
