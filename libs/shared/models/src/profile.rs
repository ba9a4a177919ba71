// Read-only views of records owned by the doctor and patient profile services.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub specialization: Vec<String>,
    /// Whole currency units.
    pub consultation_fee: i64,
    pub verified: bool,
    pub certificates_verified: bool,
    pub total_appointments: u32,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
    }

    /// A doctor can take bookings once both the account and the uploaded
    /// credentials have been verified.
    pub fn is_bookable(&self) -> bool {
        self.verified && self.certificates_verified
    }

    pub fn summary(&self) -> DoctorSummary {
        DoctorSummary {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            specialization: self.specialization.clone(),
            consultation_fee: self.consultation_fee,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub specialization: Vec<String>,
    pub consultation_fee: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub blood_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymptomSummary {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub severity: Option<String>,
}
