use axum::{
    extract::{Path, State, Extension},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::extractor::require_role;

use crate::models::{CreateOrderRequest, ReportFailureRequest, VerifyPaymentRequest};
use crate::router::PaymentState;

#[axum::debug_handler]
pub async fn create_order(
    State(state): State<PaymentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Patient])?;

    let created = state.payments.create_order(user.id, request.appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "order": created.order,
        "paymentId": created.payment.id,
        "key": created.key,
    })))
}

#[axum::debug_handler]
pub async fn verify_payment(
    State(state): State<PaymentState>,
    Extension(user): Extension<User>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Patient])?;

    let (payment, appointment) = state.payments.verify_payment(user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payment verified successfully",
        "payment": payment,
        "appointment": appointment,
    })))
}

#[axum::debug_handler]
pub async fn report_failure(
    State(state): State<PaymentState>,
    Path(payment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<ReportFailureRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Patient])?;

    let payment = state.payments.report_failure(user.id, payment_id, request.reason).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payment marked as failed",
        "payment": payment,
    })))
}

#[axum::debug_handler]
pub async fn get_payment(
    State(state): State<PaymentState>,
    Path(payment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let payment = state.payments.get_payment(&user, payment_id).await?;

    Ok(Json(json!({
        "success": true,
        "payment": payment,
    })))
}
