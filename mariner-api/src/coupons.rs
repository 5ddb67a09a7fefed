use axum::{extract::State, routing::post, Extension, Json, Router};
use mariner_coupon::{CouponValidation, ValidationContext};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, middleware::CustomerClaims, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    pub code: String,
    pub ship_id: Uuid,
    pub subtotal: Decimal,
    #[serde(default)]
    pub plan_ids: Vec<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/coupons/validate", post(validate_coupon))
}

/// POST /coupons/validate
///
/// Rejections are answered with `valid: false` and a reason code, not an error status.
async fn validate_coupon(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<ValidateCouponRequest>,
) -> Result<Json<CouponValidation>, AppError> {
    let ctx = ValidationContext::new(claims.sub, req.ship_id, req.subtotal, req.plan_ids);
    let validation = state.coupons.validate(&req.code, &ctx).await?;
    Ok(Json(validation))
}
