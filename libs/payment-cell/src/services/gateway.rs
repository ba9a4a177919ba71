use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use appointment_cell::services::notification::{
    dispatch_in_background, NotificationDispatcher, NotificationTemplate,
};
use shared_database::{
    AppointmentRepository, PaymentRepository, ProfileRepository, Repositories, StoreError,
};
use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::auth::User;
use shared_models::payment::{Payment, PaymentStatus, Settlement};
use shared_utils::reference::next_reference;

use crate::models::{
    CreatedOrder, OrderNotes, OrderRequest, PaymentError, VerifyPaymentRequest,
};
use crate::services::razorpay::PaymentProvider;
use crate::services::signature;

/// Order creation and settlement. Settlement is the only path that marks an
/// appointment paid or confirmed.
pub struct PaymentService {
    appointments: Arc<dyn AppointmentRepository>,
    profiles: Arc<dyn ProfileRepository>,
    payments: Arc<dyn PaymentRepository>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn NotificationDispatcher>,
    currency: String,
}

fn db(e: StoreError) -> PaymentError {
    PaymentError::DatabaseError(e.to_string())
}

impl PaymentService {
    pub fn new(
        repos: Repositories,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            appointments: repos.appointments,
            profiles: repos.profiles,
            payments: repos.payments,
            provider,
            notifier,
            currency: currency.into(),
        }
    }

    /// Creates (or reuses) the pending payment for an appointment and opens a
    /// provider order for it. Appointment state is not touched.
    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<CreatedOrder, PaymentError> {
        let appointment = self
            .appointments
            .get_appointment(appointment_id)
            .await
            .map_err(db)?
            .ok_or(PaymentError::AppointmentNotFound)?;

        if appointment.patient_id != patient_id {
            return Err(PaymentError::Forbidden);
        }
        if appointment.is_paid || appointment.status != AppointmentStatus::Scheduled {
            return Err(PaymentError::InvalidState(format!(
                "Appointment is {} and not awaiting payment", appointment.status
            )));
        }

        let doctor = self
            .profiles
            .get_doctor(appointment.doctor_id)
            .await
            .map_err(db)?
            .ok_or(PaymentError::DoctorNotFound)?;

        let amount = doctor.consultation_fee * 100;
        if amount <= 0 {
            return Err(PaymentError::ValidationError(
                "Doctor has no consultation fee configured".to_string(),
            ));
        }

        let payment = self.pending_payment_for(&appointment, amount).await?;

        let order_request = OrderRequest {
            amount: payment.amount,
            currency: payment.currency.clone(),
            receipt: format!("receipt_{}", appointment.appointment_number),
            notes: OrderNotes {
                appointment_id: appointment.id,
                patient_id: appointment.patient_id,
                doctor_id: appointment.doctor_id,
            },
        };

        let order = match self.provider.create_order(&order_request).await {
            Ok(order) => order,
            Err(e) => {
                warn!("Order creation failed; payment {} stays pending: {}", payment.id, e);
                return Err(e);
            }
        };

        let payment = self
            .payments
            .attach_order(payment.id, &order.id)
            .await
            .map_err(|e| match e {
                StoreError::PreconditionFailed(msg) => PaymentError::InvalidState(msg),
                other => db(other),
            })?;

        info!("Payment {} awaiting checkout for order {}", payment.payment_number, order.id);

        Ok(CreatedOrder {
            order,
            payment,
            key: self.provider.key_id().to_string(),
        })
    }

    /// Checks the callback signature first; nothing is read or written for a
    /// forged callback.
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id, order_id = %request.razorpay_order_id))]
    pub async fn verify_payment(
        &self,
        patient_id: Uuid,
        request: VerifyPaymentRequest,
    ) -> Result<(Payment, Appointment), PaymentError> {
        let valid = signature::verify(
            self.provider.key_secret(),
            &request.razorpay_order_id,
            &request.razorpay_payment_id,
            &request.razorpay_signature,
        );
        if !valid {
            warn!(target: "security",
                  payment_id = %request.payment_id,
                  order_id = %request.razorpay_order_id,
                  patient_id = %patient_id,
                  "Payment signature mismatch");
            return Err(PaymentError::InvalidSignature);
        }

        let payment = self
            .payments
            .get_payment(request.payment_id)
            .await
            .map_err(db)?
            .ok_or(PaymentError::NotFound)?;

        if payment.patient_id != patient_id {
            return Err(PaymentError::Forbidden);
        }

        if payment.provider_order_id.as_deref() != Some(request.razorpay_order_id.as_str()) {
            warn!(target: "security",
                  payment_id = %payment.id,
                  order_id = %request.razorpay_order_id,
                  "Signed order does not belong to payment");
            return Err(PaymentError::OrderMismatch);
        }

        let settlement = Settlement {
            payment_id: payment.id,
            provider_payment_id: request.razorpay_payment_id,
            provider_signature: request.razorpay_signature,
            settled_at: Utc::now(),
        };

        let (payment, appointment) = self
            .payments
            .settle_payment(settlement)
            .await
            .map_err(|e| match e {
                StoreError::PreconditionFailed(msg) => {
                    warn!("Settlement rejected for payment {}: {}", payment.id, msg);
                    PaymentError::InvalidState(
                        "Payment is not pending or the appointment is no longer awaiting payment".to_string(),
                    )
                }
                StoreError::NotFound(_) => PaymentError::NotFound,
                other => db(other),
            })?;

        info!("Payment {} settled; appointment {} confirmed", payment.payment_number, appointment.appointment_number);

        self.send_receipt(&payment, &appointment);
        Ok((payment, appointment))
    }

    /// The patient abandoned or failed checkout. Only pending payments move.
    pub async fn report_failure(
        &self,
        patient_id: Uuid,
        payment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Payment, PaymentError> {
        let payment = self
            .payments
            .get_payment(payment_id)
            .await
            .map_err(db)?
            .ok_or(PaymentError::NotFound)?;

        if payment.patient_id != patient_id {
            return Err(PaymentError::Forbidden);
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Checkout failed".to_string());

        let failed = self
            .payments
            .mark_payment_failed(payment_id, &reason)
            .await
            .map_err(|e| match e {
                StoreError::PreconditionFailed(_) => PaymentError::InvalidState(format!(
                    "Payment is {} and cannot be marked failed", payment.status
                )),
                other => db(other),
            })?;

        info!("Payment {} marked failed: {}", failed.payment_number, reason);
        Ok(failed)
    }

    pub async fn get_payment(&self, user: &User, payment_id: Uuid) -> Result<Payment, PaymentError> {
        let payment = self
            .payments
            .get_payment(payment_id)
            .await
            .map_err(db)?
            .ok_or(PaymentError::NotFound)?;

        let allowed = user.is_admin() || payment.patient_id == user.id || payment.doctor_id == user.id;
        if !allowed {
            return Err(PaymentError::Forbidden);
        }
        Ok(payment)
    }

    /// At most one non-failed payment per appointment: a pending one is
    /// reused, a settled one is final.
    async fn pending_payment_for(&self, appointment: &Appointment, amount: i64) -> Result<Payment, PaymentError> {
        if let Some(existing) = self.payments.find_active_payment(appointment.id).await.map_err(db)? {
            return match existing.status {
                PaymentStatus::Pending => {
                    info!("Reusing pending payment {} for appointment {}", existing.id, appointment.id);
                    Ok(existing)
                }
                status => Err(PaymentError::InvalidState(format!(
                    "Appointment already has a {} payment", status
                ))),
            };
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            payment_number: next_reference("PAY"),
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            amount,
            currency: self.currency.clone(),
            status: PaymentStatus::Pending,
            provider_order_id: None,
            provider_payment_id: None,
            provider_signature: None,
            failure_reason: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        };

        self.payments.insert_payment(payment).await.map_err(|e| match e {
            StoreError::Duplicate(_) => {
                PaymentError::InvalidState("A payment for this appointment is already in progress".to_string())
            }
            other => db(other),
        })
    }

    fn send_receipt(&self, payment: &Payment, appointment: &Appointment) {
        let profiles = self.profiles.clone();
        let notifier = self.notifier.clone();
        let patient_id = payment.patient_id;
        let data = json!({
            "paymentNumber": payment.payment_number,
            "appointmentNumber": appointment.appointment_number,
            "amount": payment.amount,
            "currency": payment.currency,
            "providerPaymentId": payment.provider_payment_id,
        });

        tokio::spawn(async move {
            let destination = match profiles.get_patient(patient_id).await {
                Ok(Some(patient)) => patient.email.unwrap_or_else(|| patient_id.to_string()),
                _ => patient_id.to_string(),
            };
            if let Err(e) = dispatch_in_background(notifier, destination, NotificationTemplate::PaymentReceipt, data).await {
                warn!("Receipt task for patient {} aborted: {}", patient_id, e);
            }
        });
    }
}
