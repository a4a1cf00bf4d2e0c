//! Administrative API: status, cache inspection and manual refresh.
//!
//! Mounted only when `admin.enabled`; every route requires the admin bearer token.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/cache", get(get_cache))
        .route("/actuator/busrefresh", post(bus_refresh_all))
        .route("/actuator/busrefresh/{destination}", post(bus_refresh_destination))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
