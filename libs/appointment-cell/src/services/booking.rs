use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::{
    AppointmentRepository, PaymentRepository, ProfileRepository, Repositories, StoreError,
};
use shared_models::appointment::{
    Appointment, AppointmentStatus, Prescription,
};
use shared_models::auth::Role;
use shared_models::profile::Doctor;
use shared_models::schedule::{format_time, ScheduleDay, SlotKey};
use shared_utils::reference::next_reference;

use crate::models::{AppointmentDetails, AppointmentError, BookedAppointment, BookingRequest};
use crate::services::calendar::AvailabilityCalendar;
use crate::services::lifecycle::AppointmentLifecycle;
use crate::services::notification::{
    dispatch_in_background, NotificationDispatcher, NotificationTemplate,
};

const DEFAULT_DURATION_MINUTES: i32 = 30;

/// Turns booking and cancellation requests into slot claims, appointment
/// records and notifications, keeping the three consistent.
pub struct ReservationCoordinator {
    calendar: AvailabilityCalendar,
    lifecycle: AppointmentLifecycle,
    appointments: Arc<dyn AppointmentRepository>,
    profiles: Arc<dyn ProfileRepository>,
    payments: Arc<dyn PaymentRepository>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl ReservationCoordinator {
    pub fn new(repos: Repositories, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            calendar: AvailabilityCalendar::new(repos.schedules),
            lifecycle: AppointmentLifecycle::new(repos.appointments.clone(), repos.profiles.clone()),
            appointments: repos.appointments,
            profiles: repos.profiles,
            payments: repos.payments,
            notifier,
        }
    }

    pub fn calendar(&self) -> &AvailabilityCalendar {
        &self.calendar
    }

    pub fn lifecycle(&self) -> &AppointmentLifecycle {
        &self.lifecycle
    }

    /// Exactly one concurrent caller wins a given (doctor, date, time). A
    /// loser never leaves an appointment behind, and a failed insert gives
    /// the claimed slot back.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, date = %request.date, time = %format_time(&request.time)))]
    pub async fn book_appointment(
        &self,
        patient_id: Uuid,
        request: BookingRequest,
    ) -> Result<BookedAppointment, AppointmentError> {
        let doctor = self.eligible_doctor(request.doctor_id).await?;

        let appointment_id = Uuid::new_v4();
        let key = SlotKey::new(request.doctor_id, request.date, request.time);

        let schedule_id = match self.calendar.find_open_slot(key.doctor_id, key.date, key.start_time).await {
            Ok(open) => {
                self.calendar.claim_slot(key, appointment_id).await?;
                Some(open.schedule_id)
            }
            Err(AppointmentError::ScheduleNotFound { doctor_id, date }) => {
                warn!("No schedule for doctor {} on {}, booking without slot tracking", doctor_id, date);
                None
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let appointment = Appointment {
            id: appointment_id,
            appointment_number: next_reference("APT"),
            patient_id,
            doctor_id: request.doctor_id,
            schedule_id,
            appointment_date: request.date,
            appointment_time: request.time,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            symptoms: request.symptoms,
            symptoms_description: request.symptoms_description,
            status: AppointmentStatus::Scheduled,
            consultation_type: request.consultation_type,
            is_paid: false,
            payment_id: None,
            prescription: None,
            cancelled_by: None,
            cancellation_reason: None,
            cancelled_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let appointment = match self.appointments.insert_appointment(appointment).await {
            Ok(appointment) => appointment,
            Err(e) => {
                if schedule_id.is_some() {
                    self.compensate_claim(key, appointment_id).await;
                }
                return Err(match e {
                    StoreError::SlotTaken(msg) => {
                        warn!("Live appointment already holds the slot: {}", msg);
                        AppointmentError::SlotUnavailable
                    }
                    other => {
                        error!("Appointment {} insert failed: {}", appointment_id, other);
                        AppointmentError::DatabaseError(other.to_string())
                    }
                });
            }
        };

        info!("Appointment {} ({}) booked for patient {}",
              appointment.appointment_number, appointment.id, patient_id);

        self.notify(
            appointment.patient_id,
            NotificationTemplate::AppointmentConfirmation,
            json!({
                "appointmentId": appointment.id,
                "appointmentNumber": appointment.appointment_number,
                "doctorName": doctor.full_name(),
                "date": appointment.appointment_date,
                "time": format_time(&appointment.appointment_time),
                "consultationType": appointment.consultation_type,
            }),
        );

        Ok(BookedAppointment { appointment, doctor: doctor.summary() })
    }

    /// Cancels, then frees the slot using the appointment's own id, then
    /// notifies. Authorization is the caller's concern.
    #[instrument(skip(self, reason))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        actor: Role,
        reason: String,
    ) -> Result<Appointment, AppointmentError> {
        let cancelled = self.lifecycle.cancel(appointment_id, actor, reason).await?;

        if cancelled.schedule_id.is_some() {
            if let Err(e) = self.calendar.release_slot(cancelled.slot_key(), cancelled.id).await {
                error!("Appointment {} cancelled but its slot {} on {} could not be released: {}",
                       cancelled.id, format_time(&cancelled.appointment_time), cancelled.appointment_date, e);
            }
        }

        self.notify(
            cancelled.patient_id,
            NotificationTemplate::AppointmentCancellation,
            json!({
                "appointmentId": cancelled.id,
                "appointmentNumber": cancelled.appointment_number,
                "date": cancelled.appointment_date,
                "time": format_time(&cancelled.appointment_time),
                "cancelledBy": cancelled.cancelled_by,
                "reason": cancelled.cancellation_reason,
            }),
        );

        Ok(cancelled)
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        prescription: Option<Prescription>,
    ) -> Result<Appointment, AppointmentError> {
        self.lifecycle.update_status(appointment_id, status, prescription).await
    }

    pub async fn register_day(&self, day: ScheduleDay) -> Result<ScheduleDay, AppointmentError> {
        self.calendar.register_day(day).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .get_appointment(appointment_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::NotFound)
    }

    /// Attaches doctor, patient, symptom and payment summaries.
    pub async fn appointment_details(
        &self,
        appointment: Appointment,
    ) -> Result<AppointmentDetails, AppointmentError> {
        let db = |e: StoreError| AppointmentError::DatabaseError(e.to_string());

        let doctor = self.profiles.get_doctor(appointment.doctor_id).await.map_err(db)?;
        let patient = self.profiles.get_patient(appointment.patient_id).await.map_err(db)?;
        let symptom_details = self.profiles.get_symptoms(&appointment.symptoms).await.map_err(db)?;
        let payment = self.payments.find_active_payment(appointment.id).await.map_err(db)?;

        debug!("Loaded details for appointment {}", appointment.id);

        Ok(AppointmentDetails {
            doctor: doctor.map(|d| d.summary()),
            patient,
            symptom_details,
            payment,
            appointment,
        })
    }

    async fn eligible_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AppointmentError> {
        let doctor = self
            .profiles
            .get_doctor(doctor_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::DoctorNotFound)?;

        if !doctor.is_bookable() {
            warn!("Booking rejected: doctor {} is not verified", doctor_id);
            return Err(AppointmentError::DoctorNotEligible);
        }

        Ok(doctor)
    }

    async fn compensate_claim(&self, key: SlotKey, appointment_id: Uuid) {
        match self.calendar.release_slot(key, appointment_id).await {
            Ok(_) => error!("Appointment insert failed; released slot {} on {} for doctor {}",
                            format_time(&key.start_time), key.date, key.doctor_id),
            Err(e) => error!("Appointment insert failed and slot {} on {} for doctor {} is still claimed by {}: {}",
                             format_time(&key.start_time), key.date, key.doctor_id, appointment_id, e),
        }
    }

    /// Resolves the patient's address inside the spawned task so lookups
    /// never delay the response.
    fn notify(&self, patient_id: Uuid, template: NotificationTemplate, data: serde_json::Value) {
        let profiles = self.profiles.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let destination = match profiles.get_patient(patient_id).await {
                Ok(Some(patient)) => patient.email.unwrap_or_else(|| patient_id.to_string()),
                _ => patient_id.to_string(),
            };
            if let Err(e) = dispatch_in_background(notifier, destination, template, data).await {
                warn!("Notification task for patient {} aborted: {}", patient_id, e);
            }
        });
    }
}
