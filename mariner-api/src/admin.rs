use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use mariner_catalog::NewPlan;
use mariner_coupon::NewCoupon;
use mariner_order::ExpirySummary;
use mariner_shared::{Coupon, Credential, Order, Plan, PoolStats};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, middleware::AdminClaims, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCredentialsRequest {
    pub plan_id: Uuid,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ImportCredentialsResponse {
    /// Number of credentials imported.
    pub success: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCredentialRequest {
    pub plan_id: Uuid,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuery {
    pub plan_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UnassignResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct FailOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        // Credentials
        .route("/credentials", post(create_credential).get(list_credentials))
        .route("/credentials/import", post(import_credentials))
        .route("/credentials/stats", get(credential_stats))
        .route("/credentials/{id}", get(get_credential).delete(delete_credential))
        .route("/credentials/{id}/unassign", post(unassign_credential))
        // Coupons
        .route("/coupons", post(create_coupon).get(list_coupons))
        .route("/coupons/{id}/deactivate", post(deactivate_coupon))
        // Plans
        .route("/plans", post(create_plan).get(list_plans))
        // Orders
        .route("/orders/expire-stale", post(expire_stale))
        .route("/orders/{id}/refund", post(refund_order))
        .route("/orders/{id}/fail", post(fail_order))
        .route("/orders/{id}/retry-fulfillment", post(retry_fulfillment))
        .route("/orders/{id}/expire", post(expire_order))
}

// ============================================================================
// Credential Pool Handlers
// ============================================================================

/// POST /admin/credentials/import
///
/// One `username,password` pair per line. Bad lines are reported, the rest are imported.
async fn import_credentials(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminClaims>,
    Json(req): Json<ImportCredentialsRequest>,
) -> Result<Json<ImportCredentialsResponse>, AppError> {
    let report = state.pool.bulk_import(req.plan_id, &req.text).await?;
    tracing::info!(
        admin = %admin.sub,
        plan_id = %req.plan_id,
        imported = report.success_count,
        rejected = report.errors.len(),
        "Credential import finished"
    );
    Ok(Json(ImportCredentialsResponse {
        success: report.success_count,
        errors: report.errors,
    }))
}

/// POST /admin/credentials
async fn create_credential(
    State(state): State<AppState>,
    Json(req): Json<CreateCredentialRequest>,
) -> Result<(StatusCode, Json<Credential>), AppError> {
    let credential = state.pool.create(req.plan_id, &req.username, &req.password).await?;
    Ok((StatusCode::CREATED, Json(credential)))
}

/// GET /admin/credentials?planId=
async fn list_credentials(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<Vec<Credential>>, AppError> {
    Ok(Json(state.pool.list(query.plan_id).await?))
}

/// GET /admin/credentials/stats?planId=
async fn credential_stats(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<PoolStats>, AppError> {
    Ok(Json(state.pool.stats(query.plan_id).await?))
}

async fn get_credential(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Credential>, AppError> {
    Ok(Json(state.pool.get(id).await?))
}

/// DELETE /admin/credentials/{id}
async fn delete_credential(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    state.pool.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/credentials/{id}/unassign
///
/// Returns the credential to its pool and releases the matching allocation on the order.
async fn unassign_credential(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<UnassignResponse>, AppError> {
    let released = state.orders.unassign_credential(id).await?;
    tracing::info!(admin = %admin.sub, credential_id = %id, released, "Unassign requested");
    Ok(Json(UnassignResponse { ok: true }))
}

// ============================================================================
// Coupon Handlers
// ============================================================================

async fn create_coupon(
    State(state): State<AppState>,
    Json(req): Json<NewCoupon>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    let coupon = state.coupons.create(req).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

async fn list_coupons(State(state): State<AppState>) -> Result<Json<Vec<Coupon>>, AppError> {
    Ok(Json(state.coupons.list().await?))
}

async fn deactivate_coupon(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Coupon>, AppError> {
    Ok(Json(state.coupons.deactivate(id).await?))
}

// ============================================================================
// Plan Handlers
// ============================================================================

async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<NewPlan>,
) -> Result<(StatusCode, Json<Plan>), AppError> {
    let plan = state.plans.create(req).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<Plan>>, AppError> {
    Ok(Json(state.plans.list(false).await?))
}

// ============================================================================
// Order Handlers
// ============================================================================

/// POST /admin/orders/{id}/refund
async fn refund_order(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    tracing::warn!(admin = %admin.sub, order_id = %id, "Refund requested");
    Ok(Json(state.orders.refund(id).await?))
}

/// POST /admin/orders/{id}/fail
async fn fail_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<FailOrderRequest>>,
) -> Result<Json<Order>, AppError> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "payment failed".to_string());
    Ok(Json(state.orders.mark_payment_failed(id, &reason).await?))
}

/// POST /admin/orders/{id}/retry-fulfillment
async fn retry_fulfillment(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.retry_fulfillment(id).await?))
}

/// POST /admin/orders/{id}/expire
async fn expire_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.expire(id).await?))
}

/// POST /admin/orders/expire-stale
async fn expire_stale(State(state): State<AppState>) -> Result<Json<ExpirySummary>, AppError> {
    Ok(Json(state.orders.expire_stale(Utc::now()).await?))
}
