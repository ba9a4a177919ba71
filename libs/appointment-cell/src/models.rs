use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::appointment::{Appointment, AppointmentStatus, ConsultationType, Prescription};
use shared_models::error::AppError;
use shared_models::payment::Payment;
use shared_models::profile::{DoctorSummary, PatientSummary, SymptomSummary};
use shared_models::schedule::{hhmm, Slot};

pub const MAX_DESCRIPTION_CHARS: usize = 2000;
pub const MAX_SYMPTOMS: usize = 20;
pub const MAX_REASON_CHARS: usize = 500;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`, 24h
    pub time: String,
    #[serde(default)]
    pub consultation_type: ConsultationType,
    #[serde(default)]
    pub symptoms: Vec<Uuid>,
    pub symptoms_description: Option<String>,
}

/// A booking request whose date and time have been parsed and whose free-text
/// fields are within limits.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub consultation_type: ConsultationType,
    pub symptoms: Vec<Uuid>,
    pub symptoms_description: Option<String>,
}

impl BookAppointmentRequest {
    pub fn validate(self) -> Result<BookingRequest, AppointmentError> {
        let date = parse_date(&self.date)?;
        let time = parse_clock_time(&self.time)?;

        if self.symptoms.len() > MAX_SYMPTOMS {
            return Err(AppointmentError::ValidationError(format!(
                "At most {} symptoms may be attached", MAX_SYMPTOMS
            )));
        }

        let symptoms_description = self
            .symptoms_description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        if let Some(description) = &symptoms_description {
            if description.chars().count() > MAX_DESCRIPTION_CHARS {
                return Err(AppointmentError::ValidationError(format!(
                    "Symptoms description cannot exceed {} characters", MAX_DESCRIPTION_CHARS
                )));
            }
        }

        Ok(BookingRequest {
            doctor_id: self.doctor_id,
            date,
            time,
            consultation_type: self.consultation_type,
            symptoms: self.symptoms,
            symptoms_description,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

impl CancelAppointmentRequest {
    pub fn validate(self) -> Result<String, AppointmentError> {
        let reason = self.reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppointmentError::ValidationError(
                "Cancellation reason is required".to_string(),
            ));
        }
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(AppointmentError::ValidationError(format!(
                "Cancellation reason cannot exceed {} characters", MAX_REASON_CHARS
            )));
        }
        Ok(reason)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub prescription: Option<Prescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterScheduleRequest {
    pub doctor_id: Uuid,
    pub date: String,
    pub slots: Vec<SlotRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRequest {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

impl From<SlotRequest> for Slot {
    fn from(request: SlotRequest) -> Self {
        Slot::open(request.start_time, request.end_time)
    }
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BookedAppointment {
    pub appointment: Appointment,
    pub doctor: DoctorSummary,
}

/// An appointment with the collaborator records a participant needs to see.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub doctor: Option<DoctorSummary>,
    pub patient: Option<PatientSummary>,
    pub symptom_details: Vec<SymptomSummary>,
    pub payment: Option<Payment>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor is not accepting appointments")]
    DoctorNotEligible,

    #[error("No schedule for doctor {doctor_id} on {date}")]
    ScheduleNotFound { doctor_id: Uuid, date: NaiveDate },

    #[error("This time slot is not available")]
    SlotUnavailable,

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Not authorized to access this appointment")]
    Forbidden,

    #[error("Schedule conflict: {0}")]
    ScheduleConflict(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound
            | AppointmentError::DoctorNotFound
            | AppointmentError::ScheduleNotFound { .. } => AppError::NotFound(err.to_string()),
            AppointmentError::DoctorNotEligible
            | AppointmentError::SlotUnavailable
            | AppointmentError::InvalidStatusTransition { .. } => AppError::BadRequest(err.to_string()),
            AppointmentError::Forbidden => AppError::Forbidden(err.to_string()),
            AppointmentError::ScheduleConflict(msg) => AppError::Conflict(msg),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppointmentError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppointmentError::ValidationError(format!("Invalid date '{}', expected YYYY-MM-DD", raw))
    })
}

pub fn parse_clock_time(raw: &str) -> Result<NaiveTime, AppointmentError> {
    let invalid = || AppointmentError::ValidationError(format!("Invalid time '{}', expected HH:MM", raw));
    if raw.len() != 5 {
        return Err(invalid());
    }
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| invalid())
}
