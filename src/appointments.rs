use chrono::Duration;

use crate::availability::{self, AvailabilityKind};
use crate::catalog;
use crate::config::overlaps;
use crate::db::new_id;
use crate::error::{conflict_or_data, ScheduleError};
use crate::models::{AppointmentRow, AppointmentStatus, AppointmentType};
use crate::queue;
use crate::slots::{self, BookingRequest};
use crate::state::{Notification, Scheduler};

/// Request-then-confirm flow: the booking lands as `pending` and holds no
/// queue position until the barber accepts it. Scheduled-type requests do
/// reserve their time slot immediately (the unique slot index covers pending
/// rows), so two customers cannot request the same time.
pub async fn request_booking(
    scheduler: &Scheduler,
    request: BookingRequest,
) -> Result<AppointmentRow, ScheduleError> {
    if request.service_ids.is_empty() {
        return Err(ScheduleError::Validation(
            "select at least one service".to_string(),
        ));
    }

    let total_duration = catalog::resolve_duration(
        &scheduler.db,
        &scheduler.config,
        &request.service_ids,
        &request.add_on_ids,
    )
    .await?;

    let verdict = availability::resolve(
        scheduler,
        &request.barber_id,
        request.date,
        request.time_slot.filter(|_| !request.walk_in),
    )
    .await;

    match verdict.kind {
        AvailabilityKind::NotFound => return Err(ScheduleError::NotFound("barber")),
        AvailabilityKind::Offline
        | AvailabilityKind::DayOff
        | AvailabilityKind::OutsideHours => {
            return Err(ScheduleError::BarberUnavailable(verdict.reason))
        }
        _ => {}
    }

    let total_price =
        catalog::resolve_price(&scheduler.db, &request.service_ids, &request.add_on_ids).await?;

    // A requested time that would run past closing, into lunch, or that has
    // already passed degrades to a queue request, same as book_slot.
    let time = request.time_slot.filter(|&t| {
        !request.walk_in
            && verdict.available
            && slots::fits_within_day(scheduler, request.date, t, total_duration)
    });
    let appointment_type = if time.is_some() {
        AppointmentType::Scheduled
    } else {
        AppointmentType::Queue
    };

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, barber_id, customer_id, appointment_date, appointment_time, appointment_type,
            queue_position, status, is_urgent, total_duration, total_price, services, add_ons,
            notes, created_at)
           VALUES (?, ?, ?, ?, ?, ?, NULL, 'pending', ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&request.barber_id)
    .bind(&request.customer_id)
    .bind(request.date)
    .bind(time)
    .bind(appointment_type)
    .bind(request.is_urgent)
    .bind(total_duration)
    .bind(total_price)
    .bind(serde_json::to_string(&request.service_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&request.add_on_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(&request.notes)
    .bind(scheduler.clock.now())
    .execute(&scheduler.db)
    .await
    .map_err(|err| conflict_or_data(err, "booking request"))?;

    let appointment = fetch(scheduler, &id).await?;
    scheduler.notify(Notification::for_appointment(
        "appointment_requested",
        &appointment,
        "Booking request received",
        "We'll confirm your appointment shortly.",
    ));
    Ok(appointment)
}

/// Barber accepts a pending request. Scheduled bookings re-validate their
/// slot; queue bookings receive their position here, both inside one
/// transaction.
pub async fn accept(
    scheduler: &Scheduler,
    appointment_id: &str,
) -> Result<AppointmentRow, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;
    let row = queue::fetch_appointment(&mut tx, appointment_id).await?;
    if row.status != AppointmentStatus::Pending {
        return Err(ScheduleError::Validation(format!(
            "appointment is {}, only pending requests can be accepted",
            row.status.as_str()
        )));
    }

    if let (AppointmentType::Scheduled, Some(time)) = (row.appointment_type, row.appointment_time) {
        // The slot may have stopped fitting while the request sat pending,
        // e.g. the start time has passed by now.
        if !slots::fits_within_day(scheduler, row.appointment_date, time, row.total_duration) {
            return Err(ScheduleError::Validation(format!(
                "slot {time} no longer fits within working hours"
            )));
        }
        let end = time + Duration::minutes(row.total_duration);
        let conflicting = sqlx::query_as::<_, (chrono::NaiveTime, i64)>(
            r#"SELECT appointment_time, total_duration FROM appointments
               WHERE barber_id = ? AND appointment_date = ? AND id != ?
                 AND appointment_time IS NOT NULL
                 AND status IN ('scheduled', 'confirmed', 'ongoing')"#,
        )
        .bind(&row.barber_id)
        .bind(row.appointment_date)
        .bind(appointment_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .any(|(t, d)| overlaps(time, end, t, t + Duration::minutes(d)));
        if conflicting {
            return Err(ScheduleError::SlotConflict(format!(
                "slot {time} was taken while the request was pending"
            )));
        }
    }

    sqlx::query("UPDATE appointments SET status = 'scheduled' WHERE id = ?")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;

    if row.appointment_type == AppointmentType::Queue {
        queue::assign_in_tx(
            &mut tx,
            &row.barber_id,
            row.appointment_date,
            appointment_id,
            row.is_urgent,
        )
        .await?;
    }

    let appointment = queue::fetch_appointment(&mut tx, appointment_id).await?;
    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "booking acceptance"))?;

    scheduler.notify(Notification::for_appointment(
        "appointment_accepted",
        &appointment,
        "Booking confirmed",
        "Your barber accepted the appointment.",
    ));
    Ok(appointment)
}

pub async fn decline(
    scheduler: &Scheduler,
    appointment_id: &str,
    reason: &str,
) -> Result<AppointmentRow, ScheduleError> {
    let row = fetch(scheduler, appointment_id).await?;
    if row.status != AppointmentStatus::Pending {
        return Err(ScheduleError::Validation(format!(
            "appointment is {}, only pending requests can be declined",
            row.status.as_str()
        )));
    }
    cancel(scheduler, appointment_id, reason).await
}

/// Barber begins the service. At most one ongoing appointment per barber and
/// day; a queue entry gives up its position on start, and whoever moves up
/// to position 1 is told they're next.
pub async fn start(
    scheduler: &Scheduler,
    appointment_id: &str,
) -> Result<AppointmentRow, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;
    let row = queue::fetch_appointment(&mut tx, appointment_id).await?;
    if !matches!(
        row.status,
        AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
    ) {
        return Err(ScheduleError::Validation(format!(
            "appointment is {}, cannot start the service",
            row.status.as_str()
        )));
    }

    let ongoing = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM appointments
           WHERE barber_id = ? AND appointment_date = ? AND status = 'ongoing'"#,
    )
    .bind(&row.barber_id)
    .bind(row.appointment_date)
    .fetch_one(&mut *tx)
    .await?;
    if ongoing > 0 {
        return Err(ScheduleError::Validation(
            "barber already has an ongoing appointment".to_string(),
        ));
    }

    let previous_head = queue::head_id(&mut tx, &row.barber_id, row.appointment_date).await?;

    sqlx::query("UPDATE appointments SET status = 'ongoing', queue_position = NULL WHERE id = ?")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;

    queue::renumber_in_tx(&mut tx, &row.barber_id, row.appointment_date).await?;

    let new_head = match queue::head_id(&mut tx, &row.barber_id, row.appointment_date).await? {
        Some(id) => Some(queue::fetch_appointment(&mut tx, &id).await?),
        None => None,
    };
    let appointment = queue::fetch_appointment(&mut tx, appointment_id).await?;

    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "service start"))?;

    if let Some(head) = new_head {
        if previous_head.as_deref() != Some(head.id.as_str()) {
            scheduler.notify(Notification::for_appointment(
                "queue_next",
                &head,
                "You're next in line",
                "Your barber will be ready for you shortly.",
            ));
        }
    }
    scheduler.notify(Notification::for_appointment(
        "service_started",
        &appointment,
        "Service started",
        "Your barber has started your service.",
    ));
    Ok(appointment)
}

/// Marks an ongoing service done. Status flip, position release and queue
/// re-pack all commit together; a failure leaves the appointment untouched.
pub async fn complete(
    scheduler: &Scheduler,
    appointment_id: &str,
) -> Result<AppointmentRow, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;
    let row = queue::fetch_appointment(&mut tx, appointment_id).await?;
    if row.status != AppointmentStatus::Ongoing {
        return Err(ScheduleError::Validation(format!(
            "appointment is {}, only an ongoing service can be completed",
            row.status.as_str()
        )));
    }

    let previous_head = queue::head_id(&mut tx, &row.barber_id, row.appointment_date).await?;

    sqlx::query("UPDATE appointments SET status = 'done', queue_position = NULL WHERE id = ?")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;

    queue::renumber_in_tx(&mut tx, &row.barber_id, row.appointment_date).await?;

    let new_head = match queue::head_id(&mut tx, &row.barber_id, row.appointment_date).await? {
        Some(id) => Some(queue::fetch_appointment(&mut tx, &id).await?),
        None => None,
    };
    let appointment = queue::fetch_appointment(&mut tx, appointment_id).await?;

    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "service completion"))?;

    if let Some(head) = new_head {
        if previous_head.as_deref() != Some(head.id.as_str()) {
            scheduler.notify(Notification::for_appointment(
                "queue_next",
                &head,
                "You're next in line",
                "Your barber will be ready for you shortly.",
            ));
        }
    }
    scheduler.notify(Notification::for_appointment(
        "service_completed",
        &appointment,
        "Thanks for coming in",
        "Your service is complete.",
    ));
    Ok(appointment)
}

/// Any non-terminal appointment can be cancelled; an occupied queue position
/// is vacated and the remainder re-packed in the same transaction.
pub async fn cancel(
    scheduler: &Scheduler,
    appointment_id: &str,
    reason: &str,
) -> Result<AppointmentRow, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;
    let row = queue::fetch_appointment(&mut tx, appointment_id).await?;
    if row.status.is_terminal() {
        return Err(ScheduleError::Validation(format!(
            "appointment is already {}",
            row.status.as_str()
        )));
    }

    let previous_head = queue::head_id(&mut tx, &row.barber_id, row.appointment_date).await?;

    sqlx::query(
        r#"UPDATE appointments
           SET status = 'cancelled', queue_position = NULL, cancellation_reason = ?
           WHERE id = ?"#,
    )
    .bind(reason)
    .bind(appointment_id)
    .execute(&mut *tx)
    .await?;

    queue::renumber_in_tx(&mut tx, &row.barber_id, row.appointment_date).await?;

    let new_head = match queue::head_id(&mut tx, &row.barber_id, row.appointment_date).await? {
        Some(id) => Some(queue::fetch_appointment(&mut tx, &id).await?),
        None => None,
    };
    let appointment = queue::fetch_appointment(&mut tx, appointment_id).await?;

    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "cancellation"))?;

    if let Some(head) = new_head {
        if previous_head.as_deref() != Some(head.id.as_str()) {
            scheduler.notify(Notification::for_appointment(
                "queue_next",
                &head,
                "You're next in line",
                "Your barber will be ready for you shortly.",
            ));
        }
    }
    scheduler.notify(Notification::for_appointment(
        "appointment_cancelled",
        &appointment,
        "Appointment cancelled",
        reason,
    ));
    Ok(appointment)
}

pub async fn fetch(
    scheduler: &Scheduler,
    appointment_id: &str,
) -> Result<AppointmentRow, ScheduleError> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {} FROM appointments WHERE id = ?",
        queue::APPOINTMENT_COLUMNS
    ))
    .bind(appointment_id)
    .fetch_optional(&scheduler.db)
    .await?
    .ok_or(ScheduleError::NotFound("appointment"))
}
