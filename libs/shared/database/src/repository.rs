use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use shared_models::appointment::{Appointment, AppointmentStatus, AppointmentTransition};
use shared_models::payment::{Payment, Settlement};
use shared_models::profile::{Doctor, PatientSummary, SymptomSummary};
use shared_models::schedule::{ScheduleDay, Slot, SlotKey};

use crate::error::StoreError;

/// Per-slot booking state. Claims and releases are conditional writes on a
/// single slot entry; implementations must never read-then-write.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// One schedule record per doctor per date; a second registration fails
    /// with `Duplicate`.
    async fn register_day(&self, day: ScheduleDay) -> Result<ScheduleDay, StoreError>;

    async fn find_day(&self, doctor_id: Uuid, date: NaiveDate)
        -> Result<Option<ScheduleDay>, StoreError>;

    /// Marks the slot booked for `appointment_id` only if it exists and is
    /// currently free; otherwise `PreconditionFailed`.
    async fn claim_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<Slot, StoreError>;

    /// Frees the slot only if it is held by `appointment_id`. Returns whether
    /// anything was released.
    async fn release_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Fails with `Duplicate` when another non-cancelled appointment already
    /// holds the same (doctor, date, time).
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Applies `transition` only if the current status is one of
    /// `allowed_from`; otherwise `PreconditionFailed`.
    async fn transition_appointment(
        &self,
        id: Uuid,
        allowed_from: &[AppointmentStatus],
        transition: AppointmentTransition,
    ) -> Result<Appointment, StoreError>;
}

/// Doctor, patient and symptom records owned by the profile services.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>, StoreError>;

    async fn get_patient(&self, id: Uuid) -> Result<Option<PatientSummary>, StoreError>;

    async fn get_symptoms(&self, ids: &[Uuid]) -> Result<Vec<SymptomSummary>, StoreError>;

    /// Atomically increments the doctor's completed-appointment counter and
    /// returns the new value.
    async fn increment_doctor_appointments(&self, doctor_id: Uuid) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    /// The most recent payment for the appointment that has not failed.
    async fn find_active_payment(&self, appointment_id: Uuid)
        -> Result<Option<Payment>, StoreError>;

    /// Records the provider order id on a pending payment.
    async fn attach_order(&self, payment_id: Uuid, provider_order_id: &str)
        -> Result<Payment, StoreError>;

    /// In one atomic step: payment `pending` → `successful` and its
    /// appointment `scheduled` → `confirmed` with `is_paid` set. If either
    /// precondition fails nothing is written.
    async fn settle_payment(&self, settlement: Settlement)
        -> Result<(Payment, Appointment), StoreError>;

    /// Payment `pending` → `failed`.
    async fn mark_payment_failed(&self, payment_id: Uuid, reason: &str)
        -> Result<Payment, StoreError>;
}

/// The four repositories handed to the services at startup.
#[derive(Clone)]
pub struct Repositories {
    pub schedules: Arc<dyn ScheduleRepository>,
    pub appointments: Arc<dyn AppointmentRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Repositories {
    /// Backs every repository with the same store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ScheduleRepository + AppointmentRepository + ProfileRepository + PaymentRepository + 'static,
    {
        Self {
            schedules: store.clone(),
            appointments: store.clone(),
            profiles: store.clone(),
            payments: store,
        }
    }
}
