use axum::{http::Method, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod coupons;
pub mod error;
pub mod middleware;
pub mod orders;
pub mod state;
pub mod user;
pub mod worker;

pub use state::{AppState, AuthConfig, Repositories};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let customer = Router::new()
        .merge(coupons::routes())
        .merge(orders::routes())
        .merge(user::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::customer_auth_middleware,
        ));

    let admin = admin::routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::admin_auth_middleware,
    ));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(customer)
        .nest("/admin", admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .with_state(state)
}
