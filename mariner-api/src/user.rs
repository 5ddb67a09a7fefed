use axum::{extract::State, routing::get, Extension, Json, Router};
use mariner_catalog::{LoyaltyStatus, PlanAvailability};
use mariner_order::OrderView;

use crate::{error::AppError, middleware::CustomerClaims, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user/orders", get(list_orders))
        .route("/user/loyalty", get(loyalty))
        .route("/user/ship-plans", get(ship_plans))
}

/// GET /user/orders
async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Json<Vec<OrderView>>, AppError> {
    Ok(Json(state.orders.list_for_user(&claims.sub).await?))
}

/// GET /user/loyalty
async fn loyalty(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Json<LoyaltyStatus>, AppError> {
    Ok(Json(state.orders.loyalty_status(&claims.sub).await?))
}

/// GET /user/ship-plans
async fn ship_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanAvailability>>, AppError> {
    Ok(Json(state.pool.plan_availability().await?))
}
