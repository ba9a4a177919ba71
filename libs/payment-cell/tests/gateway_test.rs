use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, BookingRequest};
use appointment_cell::services::booking::ReservationCoordinator;
use appointment_cell::services::notification::{
    NotificationDispatcher, NotificationError, NotificationTemplate, TracingNotifier,
};
use payment_cell::models::{OrderRequest, PaymentError, ProviderOrder, VerifyPaymentRequest};
use payment_cell::services::gateway::PaymentService;
use payment_cell::services::razorpay::PaymentProvider;
use payment_cell::services::signature;
use shared_database::{
    AppointmentRepository, InMemoryDatabase, PaymentRepository, Repositories, ScheduleRepository,
};
use shared_models::appointment::{Appointment, AppointmentStatus, ConsultationType};
use shared_models::auth::Role;
use shared_models::payment::PaymentStatus;
use shared_models::schedule::{parse_time, ScheduleDay, Slot};
use shared_utils::test_utils::{MockSupabaseResponses, TestUser};

const SECRET: &str = "rzp_test_secret";

/// Hands out sequential order ids, or fails every call.
struct StubProvider {
    orders: AtomicU32,
    fail: bool,
}

impl StubProvider {
    fn working() -> Arc<Self> {
        Arc::new(Self { orders: AtomicU32::new(0), fail: false })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { orders: AtomicU32::new(0), fail: true })
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    async fn create_order(&self, request: &OrderRequest) -> Result<ProviderOrder, PaymentError> {
        if self.fail {
            return Err(PaymentError::Provider("HTTP 503: upstream unavailable".to_string()));
        }
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderOrder {
            id: format!("order_{}", n),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: Some("created".to_string()),
        })
    }

    fn key_id(&self) -> &str {
        "rzp_test_key"
    }

    fn key_secret(&self) -> &str {
        SECRET
    }
}

struct Fixture {
    db: Arc<InMemoryDatabase>,
    coordinator: ReservationCoordinator,
    patient_id: Uuid,
    doctor_id: Uuid,
    appointment: Appointment,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_fee(500).await
    }

    async fn with_fee(fee: i64) -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        let doctor = MockSupabaseResponses::doctor(fee);
        db.upsert_doctor(doctor.clone()).await;
        db.register_day(ScheduleDay::new(doctor.id, may_first(), vec![
            Slot::open(parse_time("10:00").unwrap(), parse_time("10:30").unwrap()),
        ]))
        .await
        .unwrap();

        let coordinator = ReservationCoordinator::new(
            Repositories::from_store(db.clone()),
            Arc::new(TracingNotifier),
        );
        let patient_id = Uuid::new_v4();
        let booked = coordinator
            .book_appointment(patient_id, BookingRequest {
                doctor_id: doctor.id,
                date: may_first(),
                time: parse_time("10:00").unwrap(),
                consultation_type: ConsultationType::Video,
                symptoms: vec![],
                symptoms_description: None,
            })
            .await
            .unwrap();

        Self { db, coordinator, patient_id, doctor_id: doctor.id, appointment: booked.appointment }
    }

    fn service(&self, provider: Arc<dyn PaymentProvider>) -> PaymentService {
        self.service_with_notifier(provider, Arc::new(TracingNotifier))
    }

    fn service_with_notifier(
        &self,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> PaymentService {
        PaymentService::new(Repositories::from_store(self.db.clone()), provider, notifier, "INR")
    }

    async fn stored_appointment(&self) -> Appointment {
        self.db.get_appointment(self.appointment.id).await.unwrap().unwrap()
    }

    async fn slot(&self) -> Slot {
        let day = self.db.find_day(self.doctor_id, may_first()).await.unwrap().unwrap();
        day.slot_at(parse_time("10:00").unwrap()).cloned().unwrap()
    }
}

fn may_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

/// Receipt sender that panics inside its task.
struct PanickingNotifier;

#[async_trait]
impl NotificationDispatcher for PanickingNotifier {
    async fn send(&self, _: &str, _: NotificationTemplate, _: serde_json::Value) -> Result<(), NotificationError> {
        panic!("template renderer crashed");
    }
}

fn callback(order_id: &str, payment_id: Uuid, signature: String) -> VerifyPaymentRequest {
    VerifyPaymentRequest {
        razorpay_order_id: order_id.to_string(),
        razorpay_payment_id: "pay_29QQoUBi66xm2f".to_string(),
        razorpay_signature: signature,
        payment_id,
    }
}

fn signed_callback(order_id: &str, payment_id: Uuid) -> VerifyPaymentRequest {
    callback(order_id, payment_id, signature::sign(SECRET, order_id, "pay_29QQoUBi66xm2f"))
}

#[tokio::test]
async fn test_create_order_opens_pending_payment_without_touching_appointment() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());

    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    assert_eq!(created.order.id, "order_1");
    assert_eq!(created.order.amount, 50_000);
    assert_eq!(created.key, "rzp_test_key");
    assert_eq!(created.payment.status, PaymentStatus::Pending);
    assert_eq!(created.payment.amount, 50_000);
    assert_eq!(created.payment.currency, "INR");
    assert_eq!(created.payment.provider_order_id.as_deref(), Some("order_1"));
    assert!(created.payment.payment_number.starts_with("PAY"));
    assert_eq!(
        created.order.receipt.as_deref(),
        Some(format!("receipt_{}", fixture.appointment.appointment_number).as_str())
    );

    let appointment = fixture.stored_appointment().await;
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert!(!appointment.is_paid);
    assert_eq!(appointment.payment_id, None);
}

#[tokio::test]
async fn test_tampered_signature_changes_nothing() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    let mut forged = signature::sign(SECRET, "order_1", "pay_29QQoUBi66xm2f");
    forged.replace_range(0..1, if forged.starts_with('0') { "1" } else { "0" });
    let result = service
        .verify_payment(fixture.patient_id, callback("order_1", created.payment.id, forged))
        .await;

    assert_matches!(result, Err(PaymentError::InvalidSignature));
    let payment = fixture.db.get_payment(created.payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.provider_payment_id, None);
    let appointment = fixture.stored_appointment().await;
    assert!(!appointment.is_paid);
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn test_valid_signature_settles_payment_and_confirms_appointment() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    let (payment, appointment) = service
        .verify_payment(fixture.patient_id, signed_callback("order_1", created.payment.id))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Successful);
    assert_eq!(payment.provider_payment_id.as_deref(), Some("pay_29QQoUBi66xm2f"));
    assert!(payment.settled_at.is_some());
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert!(appointment.is_paid);
    assert_eq!(appointment.payment_id, Some(payment.id));

    let stored = fixture.stored_appointment().await;
    assert!(stored.is_paid);
    assert_eq!(stored.status, AppointmentStatus::Confirmed);

    let replay = service
        .verify_payment(fixture.patient_id, signed_callback("order_1", created.payment.id))
        .await;
    assert_matches!(replay, Err(PaymentError::InvalidState(_)));

    let again = service.create_order(fixture.patient_id, fixture.appointment.id).await;
    assert_matches!(again, Err(PaymentError::InvalidState(_)));
}

#[tokio::test]
async fn test_signature_for_another_order_is_an_integrity_error() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    let result = service
        .verify_payment(fixture.patient_id, signed_callback("order_999", created.payment.id))
        .await;

    assert_matches!(result, Err(PaymentError::OrderMismatch));
    assert!(!fixture.stored_appointment().await.is_paid);
}

#[tokio::test]
async fn test_provider_failure_leaves_pending_payment_and_retry_reuses_it() {
    let fixture = Fixture::new().await;

    let result = fixture
        .service(StubProvider::failing())
        .create_order(fixture.patient_id, fixture.appointment.id)
        .await;
    assert_matches!(result, Err(PaymentError::Provider(_)));

    let dangling = fixture.db.find_active_payment(fixture.appointment.id).await.unwrap().unwrap();
    assert_eq!(dangling.status, PaymentStatus::Pending);
    assert_eq!(dangling.provider_order_id, None);
    assert!(!fixture.stored_appointment().await.is_paid);

    let created = fixture
        .service(StubProvider::working())
        .create_order(fixture.patient_id, fixture.appointment.id)
        .await
        .unwrap();
    assert_eq!(created.payment.id, dangling.id);
    assert_eq!(created.payment.provider_order_id.as_deref(), Some("order_1"));
}

#[tokio::test]
async fn test_settlement_of_cancelled_appointment_is_rejected() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    fixture
        .coordinator
        .cancel_appointment(fixture.appointment.id, Role::Patient, "changed plans".to_string())
        .await
        .unwrap();

    let result = service
        .verify_payment(fixture.patient_id, signed_callback("order_1", created.payment.id))
        .await;

    assert_matches!(result, Err(PaymentError::InvalidState(_)));
    let payment = fixture.db.get_payment(created.payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    let appointment = fixture.stored_appointment().await;
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert!(!appointment.is_paid);
    assert_eq!(appointment.payment_id, None);
}

#[tokio::test]
async fn test_only_the_owning_patient_creates_orders() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());

    let result = service.create_order(Uuid::new_v4(), fixture.appointment.id).await;
    assert_matches!(result, Err(PaymentError::Forbidden));

    let result = service.create_order(fixture.patient_id, Uuid::new_v4()).await;
    assert_matches!(result, Err(PaymentError::AppointmentNotFound));
}

#[tokio::test]
async fn test_zero_fee_is_a_validation_error() {
    let fixture = Fixture::with_fee(0).await;
    let service = fixture.service(StubProvider::working());

    let result = service.create_order(fixture.patient_id, fixture.appointment.id).await;

    assert_matches!(result, Err(PaymentError::ValidationError(_)));
    assert!(fixture.db.find_active_payment(fixture.appointment.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reported_failure_allows_a_fresh_payment() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());
    let first = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    let failed = service
        .report_failure(fixture.patient_id, first.payment.id, Some("card declined".to_string()))
        .await
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("card declined"));

    let again = service.report_failure(fixture.patient_id, first.payment.id, None).await;
    assert_matches!(again, Err(PaymentError::InvalidState(_)));

    let second = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();
    assert_ne!(second.payment.id, first.payment.id);
    assert_eq!(second.order.id, "order_2");
}

#[tokio::test]
async fn test_payment_visibility() {
    let fixture = Fixture::new().await;
    let service = fixture.service(StubProvider::working());
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    let patient = TestUser::patient("p@example.com").with_id(fixture.patient_id).to_user();
    let doctor = TestUser::doctor("d@example.com").with_id(fixture.doctor_id).to_user();
    let admin = TestUser::admin("a@example.com").to_user();
    let stranger = TestUser::patient("s@example.com").to_user();

    assert!(service.get_payment(&patient, created.payment.id).await.is_ok());
    assert!(service.get_payment(&doctor, created.payment.id).await.is_ok());
    assert!(service.get_payment(&admin, created.payment.id).await.is_ok());
    assert_matches!(service.get_payment(&stranger, created.payment.id).await, Err(PaymentError::Forbidden));
    assert_matches!(service.get_payment(&admin, Uuid::new_v4()).await, Err(PaymentError::NotFound));
}

#[tokio::test]
async fn test_cancelling_a_paid_appointment_releases_its_slot() {
    let fixture = Fixture::new().await;
    assert_eq!(fixture.slot().await.appointment_id, Some(fixture.appointment.id));

    let service = fixture.service(StubProvider::working());
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();
    let (_, confirmed) = service
        .verify_payment(fixture.patient_id, signed_callback("order_1", created.payment.id))
        .await
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert!(confirmed.is_paid);

    let cancelled = fixture
        .coordinator
        .cancel_appointment(fixture.appointment.id, Role::Patient, "travelling".to_string())
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(Role::Patient));
    let slot = fixture.slot().await;
    assert!(!slot.is_booked);
    assert_eq!(slot.appointment_id, None);
    assert!(fixture.db.slots_held_by(fixture.appointment.id).await.is_empty());

    let again = fixture
        .coordinator
        .cancel_appointment(fixture.appointment.id, Role::Patient, "again".to_string())
        .await;
    assert_matches!(again, Err(AppointmentError::InvalidStatusTransition { from: AppointmentStatus::Cancelled, .. }));
}

#[tokio::test]
async fn test_crashing_receipt_sender_does_not_undo_settlement() {
    let fixture = Fixture::new().await;
    let service = fixture.service_with_notifier(StubProvider::working(), Arc::new(PanickingNotifier));
    let created = service.create_order(fixture.patient_id, fixture.appointment.id).await.unwrap();

    let (payment, _) = service
        .verify_payment(fixture.patient_id, signed_callback("order_1", created.payment.id))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stored = fixture.db.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Successful);
    assert_eq!(fixture.stored_appointment().await.status, AppointmentStatus::Confirmed);
}
