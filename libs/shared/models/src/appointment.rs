use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;
use crate::schedule::{hhmm, SlotKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub appointment_number: String,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    #[serde(default)]
    pub symptoms: Vec<Uuid>,
    pub symptoms_description: Option<String>,
    pub status: AppointmentStatus,
    pub consultation_type: ConsultationType,
    pub is_paid: bool,
    pub payment_id: Option<Uuid>,
    pub prescription: Option<Prescription>,
    pub cancelled_by: Option<Role>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.doctor_id, self.appointment_date, self.appointment_time)
    }

    /// Whether this appointment still holds its (doctor, date, time) claim.
    pub fn holds_claim(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.patient_id == user_id || self.doctor_id == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Ongoing,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Ongoing => write!(f, "ongoing"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no-show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConsultationType {
    #[default]
    InPerson,
    Video,
    Phone,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Prescription {
    #[serde(default)]
    pub medicines: Vec<Medicine>,
    #[serde(default)]
    pub tests: Vec<String>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medicine {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub instructions: Option<String>,
}

/// Field changes written together with a status transition.
///
/// Never carries `is_paid` or `payment_id`: only payment settlement writes those.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppointmentTransition {
    pub status: AppointmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescription: Option<Prescription>,
}

impl AppointmentTransition {
    pub fn to(status: AppointmentStatus) -> Self {
        Self {
            status,
            cancelled_by: None,
            cancellation_reason: None,
            cancelled_at: None,
            completed_at: None,
            prescription: None,
        }
    }

    pub fn cancelled(actor: Role, reason: String, at: DateTime<Utc>) -> Self {
        Self {
            cancelled_by: Some(actor),
            cancellation_reason: Some(reason),
            cancelled_at: Some(at),
            ..Self::to(AppointmentStatus::Cancelled)
        }
    }

    pub fn completed(at: DateTime<Utc>, prescription: Option<Prescription>) -> Self {
        Self {
            completed_at: Some(at),
            prescription,
            ..Self::to(AppointmentStatus::Completed)
        }
    }

    pub fn apply(&self, appointment: &mut Appointment, now: DateTime<Utc>) {
        appointment.status = self.status;
        if let Some(actor) = self.cancelled_by {
            appointment.cancelled_by = Some(actor);
        }
        if let Some(reason) = &self.cancellation_reason {
            appointment.cancellation_reason = Some(reason.clone());
        }
        if let Some(at) = self.cancelled_at {
            appointment.cancelled_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            appointment.completed_at = Some(at);
        }
        if let Some(prescription) = &self.prescription {
            appointment.prescription = Some(prescription.clone());
        }
        appointment.updated_at = now;
    }
}
