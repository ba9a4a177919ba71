// PostgREST-backed store. Conditional writes are PATCH requests whose
// preconditions are encoded as row filters; with `return=representation` an
// empty result means the precondition did not hold and nothing was written.
// Schema and RPC functions: migrations/001_reservations.sql.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::appointment::{Appointment, AppointmentStatus, AppointmentTransition};
use shared_models::payment::{Payment, Settlement};
use shared_models::profile::{Doctor, PatientSummary, SymptomSummary};
use shared_models::schedule::{format_time, hhmm, ScheduleDay, Slot, SlotKey};

use crate::error::StoreError;
use crate::repository::{
    AppointmentRepository, PaymentRepository, ProfileRepository, ScheduleRepository,
};
use crate::supabase::SupabaseClient;

const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRow {
    id: Uuid,
    doctor_id: Uuid,
    date: NaiveDate,
    is_available: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotRow {
    schedule_id: Uuid,
    doctor_id: Uuid,
    date: NaiveDate,
    #[serde(with = "hhmm")]
    start_time: NaiveTime,
    #[serde(with = "hhmm")]
    end_time: NaiveTime,
    is_booked: bool,
    appointment_id: Option<Uuid>,
}

impl From<SlotRow> for Slot {
    fn from(row: SlotRow) -> Self {
        Slot {
            start_time: row.start_time,
            end_time: row.end_time,
            is_booked: row.is_booked,
            appointment_id: row.appointment_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SettlementRow {
    payment: Payment,
    appointment: Appointment,
}

pub struct PostgrestStore {
    supabase: Arc<SupabaseClient>,
}

impl PostgrestStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn slot_filter(key: &SlotKey) -> String {
        format!(
            "doctor_id=eq.{}&date=eq.{}&start_time=eq.{}",
            key.doctor_id,
            key.date,
            format_time(&key.start_time)
        )
    }

    async fn patch_rows<T>(&self, path: &str, body: Value) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let rows: Vec<T> = self
            .supabase
            .request_with_prefer(Method::PATCH, path, None, Some(body), Some(RETURN_REPRESENTATION))
            .await?;
        Ok(rows)
    }

    async fn insert_row<T>(&self, table: &str, body: Value) -> Result<T, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let path = format!("/rest/v1/{}", table);
        let rows: Vec<T> = self
            .supabase
            .request_with_prefer(Method::POST, &path, None, Some(body), Some(RETURN_REPRESENTATION))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend(format!("Insert into {} returned no rows", table)))
    }

    async fn fetch_first<T>(&self, path: &str) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let rows: Vec<T> = self.supabase.request(Method::GET, path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    /// Explains why a conditional appointment/payment write matched no rows.
    async fn classify_miss(&self, table: &str, id: Uuid, status_hint: &str) -> StoreError {
        let path = format!("/rest/v1/{}?id=eq.{}&select=status", table, id);
        match self.fetch_first::<Value>(&path).await {
            Ok(Some(row)) => StoreError::PreconditionFailed(format!(
                "{} {} is {}", status_hint, id, row["status"].as_str().unwrap_or("unknown")
            )),
            Ok(None) => StoreError::NotFound(format!("{} {}", status_hint, id)),
            Err(e) => e,
        }
    }
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses
        .iter()
        .map(|status| status.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ScheduleRepository for PostgrestStore {
    async fn register_day(&self, day: ScheduleDay) -> Result<ScheduleDay, StoreError> {
        day.validate().map_err(StoreError::PreconditionFailed)?;

        let header = ScheduleRow {
            id: day.id,
            doctor_id: day.doctor_id,
            date: day.date,
            is_available: day.is_available,
            created_at: day.created_at,
        };
        let _: ScheduleRow = self.insert_row("schedules", serde_json::to_value(&header)?).await?;

        let rows: Vec<SlotRow> = day
            .slots
            .iter()
            .map(|slot| SlotRow {
                schedule_id: day.id,
                doctor_id: day.doctor_id,
                date: day.date,
                start_time: slot.start_time,
                end_time: slot.end_time,
                is_booked: slot.is_booked,
                appointment_id: slot.appointment_id,
            })
            .collect();

        if !rows.is_empty() {
            let inserted: Result<Vec<SlotRow>, anyhow::Error> = self
                .supabase
                .request_with_prefer(
                    Method::POST,
                    "/rest/v1/schedule_slots",
                    None,
                    Some(serde_json::to_value(&rows)?),
                    Some(RETURN_REPRESENTATION),
                )
                .await;

            if let Err(e) = inserted {
                warn!("Slot insert failed for schedule {}, removing header", day.id);
                let path = format!("/rest/v1/schedules?id=eq.{}", day.id);
                let _ = self
                    .supabase
                    .request_with_prefer::<Value>(Method::DELETE, &path, None, None, Some(RETURN_REPRESENTATION))
                    .await;
                return Err(e.into());
            }
        }

        debug!("Registered schedule {} for doctor {} on {}", day.id, day.doctor_id, day.date);
        Ok(day)
    }

    async fn find_day(&self, doctor_id: Uuid, date: NaiveDate)
        -> Result<Option<ScheduleDay>, StoreError> {
        let path = format!("/rest/v1/schedules?doctor_id=eq.{}&date=eq.{}", doctor_id, date);
        let Some(header) = self.fetch_first::<ScheduleRow>(&path).await? else {
            return Ok(None);
        };

        let path = format!(
            "/rest/v1/schedule_slots?schedule_id=eq.{}&order=start_time.asc",
            header.id
        );
        let rows: Vec<SlotRow> = self.supabase.request(Method::GET, &path, None, None).await?;

        Ok(Some(ScheduleDay {
            id: header.id,
            doctor_id: header.doctor_id,
            date: header.date,
            slots: rows.into_iter().map(Slot::from).collect(),
            is_available: header.is_available,
            created_at: header.created_at,
        }))
    }

    async fn claim_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<Slot, StoreError> {
        let path = format!("/rest/v1/schedule_slots?{}&is_booked=eq.false", Self::slot_filter(&key));
        let rows: Vec<SlotRow> = self
            .patch_rows(&path, json!({ "is_booked": true, "appointment_id": appointment_id }))
            .await?;

        rows.into_iter().next().map(Slot::from).ok_or_else(|| {
            StoreError::PreconditionFailed(format!(
                "Slot {} on {} is not free", format_time(&key.start_time), key.date
            ))
        })
    }

    async fn release_slot(&self, key: SlotKey, appointment_id: Uuid) -> Result<bool, StoreError> {
        let path = format!(
            "/rest/v1/schedule_slots?{}&is_booked=eq.true&appointment_id=eq.{}",
            Self::slot_filter(&key),
            appointment_id
        );
        let rows: Vec<SlotRow> = self
            .patch_rows(&path, json!({ "is_booked": false, "appointment_id": null }))
            .await?;

        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl AppointmentRepository for PostgrestStore {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.insert_row("appointments", serde_json::to_value(&appointment)?).await
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.fetch_first(&format!("/rest/v1/appointments?id=eq.{}", id)).await
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        allowed_from: &[AppointmentStatus],
        transition: AppointmentTransition,
    ) -> Result<Appointment, StoreError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=in.({})",
            id,
            status_list(allowed_from)
        );

        let mut body = serde_json::to_value(&transition)?;
        body["updated_at"] = json!(Utc::now());

        let rows: Vec<Appointment> = self.patch_rows(&path, body).await?;
        match rows.into_iter().next() {
            Some(appointment) => Ok(appointment),
            None => Err(self.classify_miss("appointments", id, "Appointment").await),
        }
    }
}

#[async_trait]
impl ProfileRepository for PostgrestStore {
    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>, StoreError> {
        self.fetch_first(&format!("/rest/v1/doctors?id=eq.{}", id)).await
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<PatientSummary>, StoreError> {
        self.fetch_first(&format!(
            "/rest/v1/patients?id=eq.{}&select=id,first_name,last_name,email,date_of_birth,gender,blood_group",
            id
        ))
        .await
    }

    async fn get_symptoms(&self, ids: &[Uuid]) -> Result<Vec<SymptomSummary>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let list = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        let path = format!("/rest/v1/symptoms?id=in.({})&select=id,name,category,severity", list);
        let rows: Vec<SymptomSummary> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows)
    }

    async fn increment_doctor_appointments(&self, doctor_id: Uuid) -> Result<u32, StoreError> {
        let total: Option<u32> = self
            .supabase
            .rpc("increment_doctor_appointments", json!({ "p_doctor_id": doctor_id }))
            .await?;

        total.ok_or_else(|| StoreError::NotFound(format!("Doctor {}", doctor_id)))
    }
}

#[async_trait]
impl PaymentRepository for PostgrestStore {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        self.insert_row("payments", serde_json::to_value(&payment)?).await
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        self.fetch_first(&format!("/rest/v1/payments?id=eq.{}", id)).await
    }

    async fn find_active_payment(&self, appointment_id: Uuid)
        -> Result<Option<Payment>, StoreError> {
        self.fetch_first(&format!(
            "/rest/v1/payments?appointment_id=eq.{}&status=neq.failed&order=created_at.desc&limit=1",
            appointment_id
        ))
        .await
    }

    async fn attach_order(&self, payment_id: Uuid, provider_order_id: &str)
        -> Result<Payment, StoreError> {
        let path = format!("/rest/v1/payments?id=eq.{}&status=eq.pending", payment_id);
        let rows: Vec<Payment> = self
            .patch_rows(&path, json!({
                "provider_order_id": provider_order_id,
                "updated_at": Utc::now()
            }))
            .await?;

        match rows.into_iter().next() {
            Some(payment) => Ok(payment),
            None => Err(self.classify_miss("payments", payment_id, "Payment").await),
        }
    }

    async fn settle_payment(&self, settlement: Settlement)
        -> Result<(Payment, Appointment), StoreError> {
        let settled: Option<SettlementRow> = self
            .supabase
            .rpc("settle_payment", json!({
                "p_payment_id": settlement.payment_id,
                "p_provider_payment_id": settlement.provider_payment_id,
                "p_provider_signature": settlement.provider_signature,
                "p_settled_at": settlement.settled_at,
            }))
            .await?;

        settled
            .map(|row| (row.payment, row.appointment))
            .ok_or_else(|| StoreError::PreconditionFailed(format!(
                "Payment {} could not be settled", settlement.payment_id
            )))
    }

    async fn mark_payment_failed(&self, payment_id: Uuid, reason: &str)
        -> Result<Payment, StoreError> {
        let path = format!("/rest/v1/payments?id=eq.{}&status=eq.pending", payment_id);
        let rows: Vec<Payment> = self
            .patch_rows(&path, json!({
                "status": "failed",
                "failure_reason": reason,
                "updated_at": Utc::now()
            }))
            .await?;

        match rows.into_iter().next() {
            Some(payment) => Ok(payment),
            None => Err(self.classify_miss("payments", payment_id, "Payment").await),
        }
    }
}
