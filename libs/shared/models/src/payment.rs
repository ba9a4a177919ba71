use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub payment_number: String,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// Minor currency units (paise for INR).
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_order_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_signature: Option<String>,
    pub failure_reason: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Successful => write!(f, "successful"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

/// Provider evidence recorded when a payment settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub payment_id: Uuid,
    pub provider_payment_id: String,
    pub provider_signature: String,
    pub settled_at: DateTime<Utc>,
}
