use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_database::{AppointmentRepository, ProfileRepository, StoreError};
use shared_models::appointment::{
    Appointment, AppointmentStatus, AppointmentTransition, Prescription,
};
use shared_models::auth::Role;

use crate::models::AppointmentError;

const ALL_STATUSES: [AppointmentStatus; 6] = [
    AppointmentStatus::Scheduled,
    AppointmentStatus::Confirmed,
    AppointmentStatus::Ongoing,
    AppointmentStatus::Completed,
    AppointmentStatus::Cancelled,
    AppointmentStatus::NoShow,
];

/// Status state machine. Every transition is written conditionally on the
/// current status, so concurrent callers cannot both move the same
/// appointment out of a given state.
pub struct AppointmentLifecycle {
    appointments: Arc<dyn AppointmentRepository>,
    profiles: Arc<dyn ProfileRepository>,
}

impl AppointmentLifecycle {
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        profiles: Arc<dyn ProfileRepository>,
    ) -> Self {
        Self { appointments, profiles }
    }

    /// All valid next statuses for a given current status.
    pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current {
            AppointmentStatus::Scheduled => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Ongoing,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::Ongoing,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Ongoing => &[
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => &[],
        }
    }

    /// Statuses from which `target` may be entered.
    pub fn allowed_sources(target: AppointmentStatus) -> Vec<AppointmentStatus> {
        ALL_STATUSES
            .into_iter()
            .filter(|from| Self::valid_transitions(*from).contains(&target))
            .collect()
    }

    pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
        Self::valid_transitions(from).contains(&to)
    }

    pub async fn start(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(id, AppointmentTransition::to(AppointmentStatus::Ongoing)).await
    }

    /// `ongoing` → `completed`, then bumps the doctor's counter. Only the
    /// caller whose conditional write succeeded reaches the increment.
    pub async fn complete(
        &self,
        id: Uuid,
        prescription: Option<Prescription>,
    ) -> Result<Appointment, AppointmentError> {
        let completed = self
            .transition(id, AppointmentTransition::completed(Utc::now(), prescription))
            .await?;

        match self.profiles.increment_doctor_appointments(completed.doctor_id).await {
            Ok(total) => {
                debug!("Doctor {} now has {} completed appointments", completed.doctor_id, total);
            }
            Err(e) => {
                error!("Appointment {} completed but counter update for doctor {} failed: {}",
                       completed.id, completed.doctor_id, e);
            }
        }

        Ok(completed)
    }

    pub async fn mark_no_show(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(id, AppointmentTransition::to(AppointmentStatus::NoShow)).await
    }

    /// Status change only; the caller releases the slot.
    pub async fn cancel(
        &self,
        id: Uuid,
        actor: Role,
        reason: String,
    ) -> Result<Appointment, AppointmentError> {
        self.transition(id, AppointmentTransition::cancelled(actor, reason, Utc::now())).await
    }

    /// Doctor-driven status update. `confirmed` is reachable only through
    /// payment settlement and `cancelled` only through cancellation.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        prescription: Option<Prescription>,
    ) -> Result<Appointment, AppointmentError> {
        match status {
            AppointmentStatus::Ongoing => self.start(id).await,
            AppointmentStatus::Completed => self.complete(id, prescription).await,
            AppointmentStatus::NoShow => self.mark_no_show(id).await,
            AppointmentStatus::Confirmed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::Scheduled => {
                let current = self.current_status(id).await?;
                warn!("Rejected direct status update of appointment {} to {}", id, status);
                Err(AppointmentError::InvalidStatusTransition { from: current, to: status })
            }
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: AppointmentTransition,
    ) -> Result<Appointment, AppointmentError> {
        let target = transition.status;
        let allowed = Self::allowed_sources(target);

        match self.appointments.transition_appointment(id, &allowed, transition).await {
            Ok(appointment) => {
                info!("Appointment {} moved to {}", id, target);
                Ok(appointment)
            }
            Err(StoreError::NotFound(_)) => Err(AppointmentError::NotFound),
            Err(StoreError::PreconditionFailed(_)) => {
                let current = self.current_status(id).await?;
                warn!("Invalid status transition attempted on {}: {} -> {}", id, current, target);
                Err(AppointmentError::InvalidStatusTransition { from: current, to: target })
            }
            Err(e) => Err(AppointmentError::DatabaseError(e.to_string())),
        }
    }

    async fn current_status(&self, id: Uuid) -> Result<AppointmentStatus, AppointmentError> {
        self.appointments
            .get_appointment(id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .map(|appointment| appointment.status)
            .ok_or(AppointmentError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in ALL_STATUSES {
            assert_eq!(status.is_terminal(), AppointmentLifecycle::valid_transitions(status).is_empty());
        }
    }

    #[test]
    fn test_completion_only_from_ongoing() {
        assert_eq!(
            AppointmentLifecycle::allowed_sources(AppointmentStatus::Completed),
            vec![AppointmentStatus::Ongoing]
        );
        assert!(!AppointmentLifecycle::can_transition(AppointmentStatus::Scheduled, AppointmentStatus::Completed));
    }

    #[test]
    fn test_confirmation_only_from_scheduled() {
        assert_eq!(
            AppointmentLifecycle::allowed_sources(AppointmentStatus::Confirmed),
            vec![AppointmentStatus::Scheduled]
        );
    }

    #[test]
    fn test_cancellation_sources() {
        assert_eq!(
            AppointmentLifecycle::allowed_sources(AppointmentStatus::Cancelled),
            vec![AppointmentStatus::Scheduled, AppointmentStatus::Confirmed, AppointmentStatus::Ongoing]
        );
    }
}
