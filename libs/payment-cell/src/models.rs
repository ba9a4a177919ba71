use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::payment::Payment;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub appointment_id: Uuid,
}

/// Checkout callback fields as posted by the client after the provider's
/// payment sheet completes.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
    #[serde(rename = "paymentId")]
    pub payment_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportFailureRequest {
    pub reason: Option<String>,
}

// ==============================================================================
// PROVIDER WIRE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: OrderNotes,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: Option<String>,
}

/// What the client needs to open the checkout sheet.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedOrder {
    pub order: ProviderOrder,
    pub payment: Payment,
    /// Public key id; never the secret.
    pub key: String,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment not found")]
    NotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Not authorized to access this payment")]
    Forbidden,

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Order does not belong to this payment")]
    OrderMismatch,

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound
            | PaymentError::AppointmentNotFound
            | PaymentError::DoctorNotFound => AppError::NotFound(err.to_string()),
            PaymentError::Forbidden => AppError::Forbidden(err.to_string()),
            PaymentError::InvalidSignature
            | PaymentError::OrderMismatch => AppError::Integrity(err.to_string()),
            PaymentError::InvalidState(msg) => AppError::Conflict(msg),
            PaymentError::ValidationError(msg) => AppError::ValidationError(msg),
            PaymentError::NotConfigured => AppError::Internal(err.to_string()),
            PaymentError::Provider(msg) => AppError::ExternalService(msg),
            PaymentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
