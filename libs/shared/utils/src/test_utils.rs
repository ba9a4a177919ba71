use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::profile::Doctor;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_base_url: String,
    pub notification_webhook_url: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            razorpay_key_id: "rzp_test_key".to_string(),
            razorpay_key_secret: "rzp_test_secret".to_string(),
            razorpay_base_url: "http://localhost:54322".to_string(),
            notification_webhook_url: None,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            razorpay_key_id: self.razorpay_key_id.clone(),
            razorpay_key_secret: self.razorpay_key_secret.clone(),
            razorpay_base_url: self.razorpay_base_url.clone(),
            payment_currency: "INR".to_string(),
            notification_webhook_url: self.notification_webhook_url.clone(),
            app_env: "test".to_string(),
            port: 0,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    /// Raw role claim; tests may set values that are not valid roles.
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::patient("test@example.com")
    }
}

impl TestUser {
    pub fn new(email: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, Role::Doctor)
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, Role::Patient)
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, Role::Admin)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: Some(self.email.clone()),
            role: self.role.parse().unwrap_or(Role::Patient),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }

    pub fn bearer(user: &TestUser, secret: &str) -> String {
        format!("Bearer {}", Self::create_test_token(user, secret, Some(1)))
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn doctor_response(doctor_id: &str, consultation_fee: i64) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "first_name": "Asha",
            "last_name": "Menon",
            "email": "asha.menon@example.com",
            "specialization": ["General Medicine"],
            "consultation_fee": consultation_fee,
            "verified": true,
            "certificates_verified": true,
            "total_appointments": 0
        })
    }

    /// A verified doctor ready to take bookings.
    pub fn doctor(consultation_fee: i64) -> Doctor {
        serde_json::from_value(Self::doctor_response(&Uuid::new_v4().to_string(), consultation_fee))
            .expect("doctor fixture matches the model")
    }

    pub fn patient_response(patient_id: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "first_name": "Ravi",
            "last_name": "Kumar",
            "email": "ravi.kumar@example.com",
            "date_of_birth": "1990-01-01",
            "gender": "male",
            "blood_group": "O+"
        })
    }

    pub fn slot_row(doctor_id: &str, date: &str, start: &str, appointment_id: Option<&str>) -> serde_json::Value {
        json!({
            "schedule_id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "date": date,
            "start_time": start,
            "end_time": "23:59:00",
            "is_booked": appointment_id.is_some(),
            "appointment_id": appointment_id
        })
    }

    pub fn appointment_response(patient_id: &str, doctor_id: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "appointment_number": "APT17000000000000000",
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "schedule_id": null,
            "appointment_date": "2024-12-25",
            "appointment_time": "10:00",
            "duration_minutes": 30,
            "symptoms": [],
            "symptoms_description": null,
            "status": "scheduled",
            "consultation_type": "in-person",
            "is_paid": false,
            "payment_id": null,
            "prescription": null,
            "cancelled_by": null,
            "cancellation_reason": null,
            "cancelled_at": null,
            "completed_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn payment_response(appointment_id: &str, status: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "payment_number": "PAY17000000000000000",
            "appointment_id": appointment_id,
            "patient_id": Uuid::new_v4(),
            "doctor_id": Uuid::new_v4(),
            "amount": 50000,
            "currency": "INR",
            "status": status,
            "provider_order_id": "order_test_1",
            "provider_payment_id": null,
            "provider_signature": null,
            "failure_reason": null,
            "settled_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "code": code,
            "message": message,
            "details": null,
            "hint": null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_models::appointment::Appointment;
    use shared_models::payment::Payment;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(app_config.is_payment_configured());
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::doctor("doc@example.com");
        assert_eq!(user.email, "doc@example.com");
        assert_eq!(user.role, "doctor");

        let user_model = user.to_user();
        assert_eq!(user_model.email, Some(user.email.clone()));
        assert_eq!(user_model.role, Role::Doctor);
        assert_eq!(user_model.id, user.id);
    }

    #[test]
    fn test_fixtures_match_models() {
        let appointment: Appointment = serde_json::from_value(
            MockSupabaseResponses::appointment_response(&Uuid::new_v4().to_string(), &Uuid::new_v4().to_string()),
        )
        .unwrap();
        assert!(appointment.holds_claim());

        let payment: Payment = serde_json::from_value(
            MockSupabaseResponses::payment_response(&appointment.id.to_string(), "pending"),
        )
        .unwrap();
        assert_eq!(payment.appointment_id, appointment.id);

        assert!(MockSupabaseResponses::doctor(500).is_bookable());
    }
}
