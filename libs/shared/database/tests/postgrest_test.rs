use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::supabase::SupabaseClient;
use shared_database::{
    AppointmentRepository, PaymentRepository, PostgrestStore, ProfileRepository,
    ScheduleRepository, StoreError,
};
use shared_models::appointment::{AppointmentStatus, AppointmentTransition};
use shared_models::payment::Settlement;
use shared_models::schedule::{parse_time, SlotKey};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> PostgrestStore {
    let mut config = TestConfig::default();
    config.supabase_url = server.uri();
    PostgrestStore::new(Arc::new(SupabaseClient::new(&config.to_app_config())))
}

fn slot_key(doctor_id: Uuid) -> SlotKey {
    SlotKey::new(
        doctor_id,
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        parse_time("10:00").unwrap(),
    )
}

#[tokio::test]
async fn test_claim_slot_is_a_conditional_patch() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("date", "eq.2024-05-01"))
        .and(query_param("start_time", "eq.10:00"))
        .and(query_param("is_booked", "eq.false"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "is_booked": true, "appointment_id": appointment_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(&doctor_id.to_string(), "2024-05-01", "10:00:00", Some(&appointment_id.to_string()))
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let slot = store.claim_slot(slot_key(doctor_id), appointment_id).await.unwrap();

    assert!(slot.is_booked);
    assert_eq!(slot.appointment_id, Some(appointment_id));
    assert_eq!(slot.start_time, parse_time("10:00").unwrap());
}

#[tokio::test]
async fn test_claim_slot_with_no_matching_row_is_a_lost_race() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/schedule_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let result = store.claim_slot(slot_key(Uuid::new_v4()), Uuid::new_v4()).await;

    assert_matches!(result, Err(StoreError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_release_slot_filters_on_holder() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let stale = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/schedule_slots"))
        .and(query_param("appointment_id", format!("eq.{}", stale)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let released = store.release_slot(slot_key(doctor_id), stale).await.unwrap();

    assert!(!released);
}

#[tokio::test]
async fn test_live_claim_violation_maps_to_slot_taken() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "duplicate key value violates unique constraint \"appointments_live_claim\"",
            "23505",
        )))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let appointment = serde_json::from_value(
        MockSupabaseResponses::appointment_response(&patient_id.to_string(), &doctor_id.to_string()),
    )
    .unwrap();

    let result = store.insert_appointment(appointment).await;
    assert_matches!(result, Err(StoreError::SlotTaken(msg)) if msg.contains("appointments_live_claim"));
}

#[tokio::test]
async fn test_other_unique_violations_stay_duplicates() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "duplicate key value violates unique constraint \"appointments_appointment_number_key\"",
            "23505",
        )))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let appointment = serde_json::from_value(MockSupabaseResponses::appointment_response(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
    ))
    .unwrap();

    let result = store.insert_appointment(appointment).await;
    assert_matches!(result, Err(StoreError::Duplicate(msg)) if msg.contains("appointment_number"));
}

#[tokio::test]
async fn test_transition_miss_on_existing_row_is_precondition_failure() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "in.(ongoing)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "status": "completed" }])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let result = store
        .transition_appointment(
            appointment_id,
            &[AppointmentStatus::Ongoing],
            AppointmentTransition::completed(Utc::now(), None),
        )
        .await;

    assert_matches!(result, Err(StoreError::PreconditionFailed(msg)) if msg.contains("completed"));
}

#[tokio::test]
async fn test_settlement_null_result_writes_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/settle_payment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let result = store
        .settle_payment(Settlement {
            payment_id: Uuid::new_v4(),
            provider_payment_id: "pay_123".to_string(),
            provider_signature: "abc".to_string(),
            settled_at: Utc::now(),
        })
        .await;

    assert_matches!(result, Err(StoreError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_increment_counter_uses_rpc() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/increment_doctor_appointments"))
        .and(body_partial_json(json!({ "p_doctor_id": doctor_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(8)))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(store.increment_doctor_appointments(doctor_id).await.unwrap(), 8);
}
