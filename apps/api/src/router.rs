use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::{appointment_routes, AppointmentState};
use payment_cell::router::{payment_routes, PaymentState};

pub fn create_router(appointments: AppointmentState, payments: Option<PaymentState>) -> Router {
    let router = Router::new()
        .route("/", get(|| async { "Clinic reservation API is running!" }))
        .nest("/appointments", appointment_routes(appointments));

    match payments {
        Some(payments) => router.nest("/payments", payment_routes(payments)),
        None => router,
    }
}
