// In-process store used for local development and tests.
//
// Every conditional write checks its precondition and writes while holding the
// table's write lock. Settlement takes the appointments lock before the
// payments lock; no other path holds both.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::appointment::{Appointment, AppointmentStatus, AppointmentTransition};
use shared_models::payment::{Payment, PaymentStatus, Settlement};
use shared_models::profile::{Doctor, PatientSummary, SymptomSummary};
use shared_models::schedule::{format_time, ScheduleDay, Slot, SlotKey};

use crate::error::StoreError;
use crate::repository::{
    AppointmentRepository, PaymentRepository, ProfileRepository, ScheduleRepository,
};

#[derive(Default)]
pub struct InMemoryDatabase {
    /// Day headers; their `slots` vectors are kept empty.
    days: RwLock<HashMap<(Uuid, NaiveDate), ScheduleDay>>,
    slots: RwLock<HashMap<SlotKey, Slot>>,
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    payments: RwLock<HashMap<Uuid, Payment>>,
    doctors: RwLock<HashMap<Uuid, Doctor>>,
    patients: RwLock<HashMap<Uuid, PatientSummary>>,
    symptoms: RwLock<HashMap<Uuid, SymptomSummary>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_doctor(&self, doctor: Doctor) {
        self.doctors.write().await.insert(doctor.id, doctor);
    }

    pub async fn upsert_patient(&self, patient: PatientSummary) {
        self.patients.write().await.insert(patient.id, patient);
    }

    pub async fn upsert_symptom(&self, symptom: SymptomSummary) {
        self.symptoms.write().await.insert(symptom.id, symptom);
    }

    /// Every slot entry currently held by `appointment_id`.
    pub async fn slots_held_by(&self, appointment_id: Uuid) -> Vec<SlotKey> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.is_held_by(appointment_id))
            .map(|(key, _)| *key)
            .collect()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryDatabase {
    async fn register_day(&self, day: ScheduleDay) -> Result<ScheduleDay, StoreError> {
        day.validate().map_err(StoreError::PreconditionFailed)?;

        let mut days = self.days.write().await;
        let day_key = (day.doctor_id, day.date);
        if days.contains_key(&day_key) {
            return Err(StoreError::Duplicate(format!(
                "Schedule already exists for doctor {} on {}",
                day.doctor_id, day.date
            )));
        }

        let mut slots = self.slots.write().await;
        for slot in &day.slots {
            slots.insert(SlotKey::new(day.doctor_id, day.date, slot.start_time), slot.clone());
        }

        let mut header = day.clone();
        header.slots.clear();
        days.insert(day_key, header);

        debug!("Registered schedule for doctor {} on {} with {} slots",
               day.doctor_id, day.date, day.slots.len());
        Ok(day)
    }

    async fn find_day(&self, doctor_id: Uuid, date: NaiveDate)
        -> Result<Option<ScheduleDay>, StoreError> {
        let days = self.days.read().await;
        let Some(header) = days.get(&(doctor_id, date)) else {
            return Ok(None);
        };

        let slots = self.slots.read().await;
        let mut day = header.clone();
        day.slots = slots
            .iter()
            .filter(|(key, _)| key.doctor_id == doctor_id && key.date == date)
            .map(|(_, slot)| slot.clone())
            .collect();
        day.slots.sort_by_key(|slot| slot.start_time);

        Ok(Some(day))
    }

    async fn claim_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<Slot, StoreError> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&key) {
            Some(slot) if !slot.is_booked => {
                slot.is_booked = true;
                slot.appointment_id = Some(appointment_id);
                Ok(slot.clone())
            }
            Some(_) => Err(StoreError::PreconditionFailed(format!(
                "Slot {} on {} is already booked",
                format_time(&key.start_time), key.date
            ))),
            None => Err(StoreError::PreconditionFailed(format!(
                "No slot at {} on {}",
                format_time(&key.start_time), key.date
            ))),
        }
    }

    async fn release_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<bool, StoreError> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&key) {
            Some(slot) if slot.is_held_by(appointment_id) => {
                slot.is_booked = false;
                slot.appointment_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryDatabase {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.write().await;

        if appointments.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(format!("Appointment {} already exists", appointment.id)));
        }

        let key = appointment.slot_key();
        let taken = appointments
            .values()
            .any(|existing| existing.holds_claim() && existing.slot_key() == key);
        if taken {
            return Err(StoreError::SlotTaken(format!(
                "Doctor {} already has an appointment at {} on {}",
                key.doctor_id, format_time(&key.start_time), key.date
            )));
        }

        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        allowed_from: &[AppointmentStatus],
        transition: AppointmentTransition,
    ) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Appointment {}", id)))?;

        if !allowed_from.contains(&appointment.status) {
            return Err(StoreError::PreconditionFailed(format!(
                "Appointment {} is {}", id, appointment.status
            )));
        }

        transition.apply(appointment, Utc::now());
        Ok(appointment.clone())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryDatabase {
    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>, StoreError> {
        Ok(self.doctors.read().await.get(&id).cloned())
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<PatientSummary>, StoreError> {
        Ok(self.patients.read().await.get(&id).cloned())
    }

    async fn get_symptoms(&self, ids: &[Uuid]) -> Result<Vec<SymptomSummary>, StoreError> {
        let symptoms = self.symptoms.read().await;
        Ok(ids.iter().filter_map(|id| symptoms.get(id).cloned()).collect())
    }

    async fn increment_doctor_appointments(&self, doctor_id: Uuid) -> Result<u32, StoreError> {
        let mut doctors = self.doctors.write().await;
        let doctor = doctors
            .get_mut(&doctor_id)
            .ok_or_else(|| StoreError::NotFound(format!("Doctor {}", doctor_id)))?;
        doctor.total_appointments += 1;
        Ok(doctor.total_appointments)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryDatabase {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        let active_exists = payments.values().any(|existing| {
            existing.appointment_id == payment.appointment_id
                && existing.status != PaymentStatus::Failed
        });
        if active_exists {
            return Err(StoreError::Duplicate(format!(
                "Appointment {} already has an active payment", payment.appointment_id
            )));
        }

        payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn find_active_payment(&self, appointment_id: Uuid)
        -> Result<Option<Payment>, StoreError> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| p.appointment_id == appointment_id && p.status != PaymentStatus::Failed)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn attach_order(&self, payment_id: Uuid, provider_order_id: &str)
        -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("Payment {}", payment_id)))?;

        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::PreconditionFailed(format!(
                "Payment {} is {}", payment_id, payment.status
            )));
        }

        payment.provider_order_id = Some(provider_order_id.to_string());
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn settle_payment(&self, settlement: Settlement)
        -> Result<(Payment, Appointment), StoreError> {
        let mut appointments = self.appointments.write().await;
        let mut payments = self.payments.write().await;

        let payment = payments
            .get_mut(&settlement.payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("Payment {}", settlement.payment_id)))?;
        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::PreconditionFailed(format!(
                "Payment {} is {}", payment.id, payment.status
            )));
        }

        let appointment = appointments
            .get_mut(&payment.appointment_id)
            .ok_or_else(|| StoreError::NotFound(format!("Appointment {}", payment.appointment_id)))?;
        if appointment.status != AppointmentStatus::Scheduled {
            return Err(StoreError::PreconditionFailed(format!(
                "Appointment {} is {}", appointment.id, appointment.status
            )));
        }

        payment.status = PaymentStatus::Successful;
        payment.provider_payment_id = Some(settlement.provider_payment_id);
        payment.provider_signature = Some(settlement.provider_signature);
        payment.settled_at = Some(settlement.settled_at);
        payment.updated_at = settlement.settled_at;

        appointment.status = AppointmentStatus::Confirmed;
        appointment.is_paid = true;
        appointment.payment_id = Some(payment.id);
        appointment.updated_at = settlement.settled_at;

        Ok((payment.clone(), appointment.clone()))
    }

    async fn mark_payment_failed(&self, payment_id: Uuid, reason: &str)
        -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("Payment {}", payment_id)))?;

        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::PreconditionFailed(format!(
                "Payment {} is {}", payment_id, payment.status
            )));
        }

        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_models::schedule::parse_time;
    use std::sync::Arc;

    fn day(doctor_id: Uuid) -> ScheduleDay {
        ScheduleDay::new(
            doctor_id,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            vec![
                Slot::open(parse_time("10:00").unwrap(), parse_time("10:30").unwrap()),
                Slot::open(parse_time("10:30").unwrap(), parse_time("11:00").unwrap()),
            ],
        )
    }

    fn key(doctor_id: Uuid, time: &str) -> SlotKey {
        SlotKey::new(
            doctor_id,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            parse_time(time).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_register_day_is_unique_per_doctor_and_date() {
        let db = InMemoryDatabase::new();
        let doctor_id = Uuid::new_v4();

        db.register_day(day(doctor_id)).await.unwrap();
        let second = db.register_day(day(doctor_id)).await;

        assert!(matches!(second, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_and_release_requires_holder() {
        let db = InMemoryDatabase::new();
        let doctor_id = Uuid::new_v4();
        db.register_day(day(doctor_id)).await.unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        db.claim_slot(key(doctor_id, "10:00"), first).await.unwrap();
        assert!(matches!(
            db.claim_slot(key(doctor_id, "10:00"), second).await,
            Err(StoreError::PreconditionFailed(_))
        ));

        assert!(!db.release_slot(key(doctor_id, "10:00"), second).await.unwrap());
        assert!(db.release_slot(key(doctor_id, "10:00"), first).await.unwrap());
        assert!(!db.release_slot(key(doctor_id, "10:00"), first).await.unwrap());

        let day = db.find_day(doctor_id, key(doctor_id, "10:00").date).await.unwrap().unwrap();
        assert_eq!(day.slots.len(), 2);
        assert!(day.slots.iter().all(|slot| !slot.is_booked));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let db = Arc::new(InMemoryDatabase::new());
        let doctor_id = Uuid::new_v4();
        db.register_day(day(doctor_id)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.claim_slot(key(doctor_id, "10:30"), Uuid::new_v4()).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
