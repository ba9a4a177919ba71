use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::gateway::PaymentService;

#[derive(Clone)]
pub struct PaymentState {
    pub config: Arc<AppConfig>,
    pub payments: Arc<PaymentService>,
}

pub fn payment_routes(state: PaymentState) -> Router {
    let protected_routes = Router::new()
        .route("/create-order", post(handlers::create_order))
        .route("/verify", post(handlers::verify_payment))
        .route("/{payment_id}", get(handlers::get_payment))
        .route("/{payment_id}/fail", post(handlers::report_failure))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
