use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::guard::require;
use crate::models::{Appointment, AppointmentStatus, AppointmentUpdate};
use crate::permissions::{Permission, Role};
use crate::session::Authenticated;
use crate::store::{AppointmentScope, NewAppointment};
use crate::{breaks, proceeds, AppState, Error, Payload};

const MANAGE: &[Permission] = &[Permission::ManageAppointments];

pub async fn list_appointments(
    Authenticated(auth): Authenticated,
    Extension(state): Extension<AppState>,
) -> Payload<AppointmentList> {
    require(&auth, &[], MANAGE, "/appointments")?;
    let scope = AppointmentScope::for_role(auth.role, auth.user_id());
    let appointments = state.appointments.list_appointments(scope).await?;
    proceeds(AppointmentList { appointments })
}

pub async fn book_appointment(
    Authenticated(auth): Authenticated,
    Extension(state): Extension<AppState>,
    Json(booking): Json<BookAppointment>,
) -> Payload<Appointment> {
    require(&auth, &[], MANAGE, "/appointments")?;

    // Patients book for themselves; staff book on a patient's behalf.
    let patient_id = match (auth.role, booking.patient_id) {
        (Role::Patient, None) => auth.user_id(),
        (Role::Patient, Some(id)) if id == auth.user_id() => id,
        (Role::Patient, Some(_)) => {
            return breaks(Error::Unauthorized {
                redirect_to: crate::guard::UNAUTHORIZED_PATH.to_string(),
                from: "/appointments".to_string(),
            })
        }
        (_, Some(id)) => id,
        (_, None) => return breaks(Error::invalid_payload("`patient_id` is required")),
    };

    if booking.appointment_date <= Utc::now() {
        return breaks(Error::invalid_payload(
            "`appointment_date` must be in the future",
        ));
    }
    let doctor = match state.profiles.fetch_profile(booking.doctor_id).await {
        Ok(profile) if profile.role == Role::Doctor => profile,
        Ok(_) | Err(Error::NotFound { .. }) => {
            return breaks(Error::invalid_payload(format!(
                "`{}` is not a doctor",
                booking.doctor_id
            )))
        }
        Err(other) => return Err(other),
    };
    if doctor.id == patient_id {
        return breaks(Error::invalid_payload("Doctors cannot book themselves"));
    }

    let appointment = state
        .appointments
        .insert_appointment(NewAppointment {
            patient_id,
            doctor_id: doctor.id,
            appointment_date: booking.appointment_date,
            notes: booking.notes.filter(|n| !n.trim().is_empty()),
        })
        .await?;
    log::info!(
        "{} booked {} with {} for {}",
        auth.user_id(),
        appointment.id,
        doctor.id,
        appointment.appointment_date
    );
    proceeds(appointment)
}

pub async fn update_appointment(
    Authenticated(auth): Authenticated,
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<AppointmentUpdate>,
) -> Payload<Appointment> {
    let from = format!("/appointments/{}", id);
    require(&auth, &[], MANAGE, &from)?;
    if update.status.is_none() && update.notes.is_none() && update.appointment_date.is_none() {
        return breaks(Error::invalid_payload("Nothing to update"));
    }

    let current = state.appointments.fetch_appointment(id).await?;
    if !auth.is_admin && !current.involves(auth.user_id()) {
        return breaks(Error::Unauthorized {
            redirect_to: crate::guard::UNAUTHORIZED_PATH.to_string(),
            from,
        });
    }
    if auth.role == Role::Patient && update.status == Some(AppointmentStatus::Completed) {
        return breaks(Error::invalid_payload(
            "Only the doctor can mark an appointment completed",
        ));
    }
    if matches!(update.appointment_date, Some(date) if date <= Utc::now()) {
        return breaks(Error::invalid_payload(
            "`appointment_date` must be in the future",
        ));
    }

    let updated = state
        .appointments
        .update_appointment(id, update, Utc::now())
        .await?;
    proceeds(updated)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointment {
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub appointment_date: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentList {
    pub appointments: Vec<Appointment>,
}
