use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mariner_catalog::{PlanError, PoolError};
use mariner_core::RepoError;
use mariner_coupon::{CouponError, RejectionReason};
use mariner_order::OrderError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    CouponRejected(RejectionReason),
    RateLimited,
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, reason_code) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::CouponRejected(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                reason.message().to_string(),
                Some(reason.code()),
            ),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".to_string(), None),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), None)
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), None)
            }
        };

        let body = match reason_code {
            Some(code) => json!({ "error": error_message, "reasonCode": code }),
            None => json!({ "error": error_message }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => AppError::NotFoundError(msg),
            e @ (RepoError::Duplicate(_) | RepoError::InUse(_) | RepoError::Stale(_) | RepoError::Conflict(_)) => {
                AppError::ConflictError(e.to_string())
            }
            other => AppError::Anyhow(anyhow::Error::new(other)),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        match err {
            e @ PlanError::NotFound(_) => AppError::NotFoundError(e.to_string()),
            e @ (PlanError::Inactive(_) | PlanError::Invalid(_)) => AppError::ValidationError(e.to_string()),
            PlanError::Repository(e) => e.into(),
        }
    }
}

impl From<PoolError> for AppError {
    fn from(err: PoolError) -> Self {
        match err {
            e @ (PoolError::PlanNotFound(_) | PoolError::CredentialNotFound(_)) => {
                AppError::NotFoundError(e.to_string())
            }
            e @ (PoolError::CredentialAssigned(_) | PoolError::Duplicate(_)) => AppError::ConflictError(e.to_string()),
            e @ PoolError::Invalid(_) => AppError::ValidationError(e.to_string()),
            PoolError::Repository(e) => e.into(),
        }
    }
}

impl From<CouponError> for AppError {
    fn from(err: CouponError) -> Self {
        match err {
            e @ (CouponError::InvalidCode(_) | CouponError::Invalid(_)) => AppError::ValidationError(e.to_string()),
            e @ CouponError::DuplicateCode(_) => AppError::ConflictError(e.to_string()),
            e @ CouponError::NotFound(_) => AppError::NotFoundError(e.to_string()),
            CouponError::Repository(e) => e.into(),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            e @ OrderError::NotFound(_) => AppError::NotFoundError(e.to_string()),
            e @ OrderError::InvalidTransition { .. } => AppError::ConflictError(e.to_string()),
            e @ OrderError::Validation(_) => AppError::ValidationError(e.to_string()),
            OrderError::CouponRejected(reason) => AppError::CouponRejected(reason),
            e @ OrderError::Consistency { .. } => AppError::InternalServerError(e.to_string()),
            OrderError::Plan(e) => e.into(),
            OrderError::Pool(e) => e.into(),
            OrderError::Coupon(e) => e.into(),
            OrderError::Repository(e) => e.into(),
        }
    }
}
