use axum::{
    extract::{Path, State, Extension},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_models::schedule::ScheduleDay;
use shared_utils::extractor::require_role;

use crate::models::{
    parse_date, AppointmentError, BookAppointmentRequest, CancelAppointmentRequest,
    RegisterScheduleRequest, UpdateStatusRequest,
};
use crate::router::AppointmentState;

/// Patients, the treating doctor, and admins may act on an appointment.
fn ensure_participant(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin() || appointment.is_participant(user.id) {
        Ok(())
    } else {
        Err(AppointmentError::Forbidden.into())
    }
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, &[Role::Patient])?;

    let booking = request.validate()?;
    let booked = state.coordinator.book_appointment(user.id, booking).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "message": "Appointment booked successfully",
        "appointment": booked.appointment,
        "doctor": booked.doctor,
    }))))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.coordinator.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;

    let details = state.coordinator.appointment_details(appointment).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": details,
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let reason = request.validate()?;

    let appointment = state.coordinator.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;

    debug!("{} {} cancelling appointment {}", user.role, user.id, appointment_id);
    let cancelled = state
        .coordinator
        .cancel_appointment(appointment_id, user.role, reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled successfully",
        "appointment": cancelled,
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Doctor, Role::Admin])?;

    let appointment = state.coordinator.get_appointment(appointment_id).await?;
    if !user.is_admin() && appointment.doctor_id != user.id {
        return Err(AppError::Forbidden("Only the treating doctor can update this appointment".to_string()));
    }

    let updated = state
        .coordinator
        .update_status(appointment_id, request.status, request.prescription)
        .await?;

    let message = match updated.status {
        AppointmentStatus::Ongoing => "Appointment started",
        AppointmentStatus::Completed => "Appointment completed",
        _ => "Appointment status updated",
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "appointment": updated,
    })))
}

#[axum::debug_handler]
pub async fn register_schedule(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<RegisterScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, &[Role::Doctor, Role::Admin])?;
    if !user.is_admin() && request.doctor_id != user.id {
        return Err(AppError::Forbidden("Doctors can only manage their own schedule".to_string()));
    }

    let date = parse_date(&request.date)?;
    let slots = request.slots.into_iter().map(Into::into).collect();
    let day = state
        .coordinator
        .register_day(ScheduleDay::new(request.doctor_id, date, slots))
        .await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "message": "Schedule registered",
        "schedule": day,
    }))))
}
