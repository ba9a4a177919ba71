use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{ScheduleRepository, StoreError};
use shared_models::schedule::{format_time, ScheduleDay, Slot, SlotKey};

use crate::models::AppointmentError;

/// A free slot and the schedule record it belongs to.
#[derive(Debug, Clone)]
pub struct OpenSlot {
    pub schedule_id: Uuid,
    pub slot: Slot,
}

/// Per-doctor, per-date slot state. All mutation goes through the store's
/// conditional writes.
pub struct AvailabilityCalendar {
    schedules: Arc<dyn ScheduleRepository>,
}

impl AvailabilityCalendar {
    pub fn new(schedules: Arc<dyn ScheduleRepository>) -> Self {
        Self { schedules }
    }

    pub async fn register_day(&self, day: ScheduleDay) -> Result<ScheduleDay, AppointmentError> {
        day.validate().map_err(AppointmentError::ValidationError)?;

        let day = self.schedules.register_day(day).await.map_err(|e| match e {
            StoreError::Duplicate(msg) => AppointmentError::ScheduleConflict(msg),
            StoreError::PreconditionFailed(msg) => AppointmentError::ValidationError(msg),
            other => AppointmentError::DatabaseError(other.to_string()),
        })?;

        info!("Registered schedule {} for doctor {} on {} ({} slots)",
              day.id, day.doctor_id, day.date, day.slots.len());
        Ok(day)
    }

    /// Fails with `ScheduleNotFound` when the day is unmanaged and
    /// `SlotUnavailable` when the slot is missing or already booked.
    pub async fn find_open_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<OpenSlot, AppointmentError> {
        let day = self
            .schedules
            .find_day(doctor_id, date)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::ScheduleNotFound { doctor_id, date })?;

        match day.slot_at(start_time) {
            Some(slot) if !slot.is_booked => {
                debug!("Slot {} on {} is open for doctor {}", format_time(&start_time), date, doctor_id);
                Ok(OpenSlot { schedule_id: day.id, slot: slot.clone() })
            }
            _ => Err(AppointmentError::SlotUnavailable),
        }
    }

    pub async fn claim_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<Slot, AppointmentError> {
        match self.schedules.claim_slot(key, appointment_id).await {
            Ok(slot) => {
                info!("Slot {} on {} claimed by appointment {}",
                      format_time(&key.start_time), key.date, appointment_id);
                Ok(slot)
            }
            Err(StoreError::PreconditionFailed(msg)) => {
                warn!("Slot claim lost for doctor {}: {}", key.doctor_id, msg);
                Err(AppointmentError::SlotUnavailable)
            }
            Err(e) => Err(AppointmentError::DatabaseError(e.to_string())),
        }
    }

    /// Idempotent. Only the appointment currently holding the slot can free it.
    pub async fn release_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        let released = self
            .schedules
            .release_slot(key, appointment_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if released {
            info!("Slot {} on {} released by appointment {}",
                  format_time(&key.start_time), key.date, appointment_id);
        } else {
            debug!("Slot {} on {} not held by appointment {}, nothing released",
                   format_time(&key.start_time), key.date, appointment_id);
        }
        Ok(released)
    }
}
