use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A conditional write found the record in a different state than required.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A live appointment already holds this (doctor, date, time).
    #[error("Slot already taken: {0}")]
    SlotTaken(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Unique index guarding live appointments; see migrations/001_reservations.sql.
pub const LIVE_CLAIM_INDEX: &str = "appointments_live_claim";

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<crate::supabase::ApiError>() {
            Some(api) if api.is_conflict() && api.body.contains(LIVE_CLAIM_INDEX) => {
                StoreError::SlotTaken(api.body.clone())
            }
            Some(api) if api.is_conflict() => StoreError::Duplicate(api.body.clone()),
            Some(api) if api.is_not_found() => StoreError::NotFound(api.body.clone()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}
