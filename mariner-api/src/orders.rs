use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use mariner_order::{CartRequest, OrderView, Quote};
use mariner_shared::{Order, OrderStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, middleware::CustomerClaims, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrderRequest {
    pub payment_reference: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/quote", post(quote))
        .route("/orders", post(create_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/complete", post(complete_order))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /checkout/quote
async fn quote(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(cart): Json<CartRequest>,
) -> Result<Json<Quote>, AppError> {
    Ok(Json(state.orders.quote(&claims.sub, &cart).await?))
}

/// POST /orders
async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(cart): Json<CartRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.orders.create_order(&claims.sub, &cart).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    Ok(Json(state.orders.view_for_user(id, &claims.sub).await?))
}

/// POST /orders/{id}/complete
///
/// Confirms payment and fulfills in one step. Running out of stock is not an
/// error here: the order comes back as `fulfillment_failed`.
async fn complete_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteOrderRequest>,
) -> Result<Json<CompleteOrderResponse>, AppError> {
    let order = state.orders.get(id).await?;
    if order.user_id != claims.sub {
        return Err(AppError::NotFoundError(format!("Order not found: {}", id)));
    }

    let order = state
        .orders
        .complete(id, &req.payment_reference, req.coupon_code.as_deref())
        .await?;

    Ok(Json(CompleteOrderResponse {
        order_id: order.id,
        status: order.status,
    }))
}
