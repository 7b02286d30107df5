use chrono::NaiveDate;
use sqlx::SqliteConnection;

use crate::error::{conflict_or_data, ScheduleError};
use crate::models::{AppointmentRow, AppointmentStatus, AppointmentType};
use crate::state::{Notification, Scheduler};

pub const APPOINTMENT_COLUMNS: &str = "id, barber_id, customer_id, appointment_date, appointment_time, appointment_type, \
     queue_position, status, is_urgent, total_duration, total_price, services, add_ons, notes, \
     cancellation_reason, created_at";

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub total_in_queue: i64,
    pub currently_serving: i64,
    pub waiting: Vec<AppointmentRow>,
}

/// Assigns a queue position to an accepted walk-in. Non-urgent entries go to
/// the tail; urgent entries take position 1 and shift everyone else down by
/// one. Both paths are single-transaction and survive concurrent callers.
pub async fn assign(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
    appointment_id: &str,
    is_urgent: bool,
) -> Result<i64, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;
    let position = assign_in_tx(&mut tx, barber_id, date, appointment_id, is_urgent).await?;
    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "queue position assignment"))?;
    Ok(position)
}

pub(crate) async fn assign_in_tx(
    conn: &mut SqliteConnection,
    barber_id: &str,
    date: NaiveDate,
    appointment_id: &str,
    is_urgent: bool,
) -> Result<i64, ScheduleError> {
    let row = fetch_appointment(conn, appointment_id).await?;
    if row.appointment_type != AppointmentType::Queue {
        return Err(ScheduleError::Validation(
            "appointment is not a queue booking".to_string(),
        ));
    }
    if row.status != AppointmentStatus::Scheduled {
        return Err(ScheduleError::Validation(format!(
            "appointment is {}, cannot take a queue position",
            row.status.as_str()
        )));
    }

    if is_urgent {
        // Renumber in two passes through negative values so the unique
        // (barber, date, position) index never sees a transient duplicate.
        sqlx::query(
            r#"UPDATE appointments SET queue_position = -(queue_position + 1)
               WHERE barber_id = ? AND appointment_date = ?
                 AND appointment_type = 'queue' AND status = 'scheduled'
                 AND queue_position IS NOT NULL"#,
        )
        .bind(barber_id)
        .bind(date)
        .execute(&mut *conn)
        .await
        .map_err(|err| conflict_or_data(err, "urgent queue renumbering"))?;

        sqlx::query(
            r#"UPDATE appointments SET queue_position = -queue_position
               WHERE barber_id = ? AND appointment_date = ? AND queue_position < 0"#,
        )
        .bind(barber_id)
        .bind(date)
        .execute(&mut *conn)
        .await
        .map_err(|err| conflict_or_data(err, "urgent queue renumbering"))?;

        sqlx::query("UPDATE appointments SET queue_position = 1, is_urgent = 1 WHERE id = ?")
            .bind(appointment_id)
            .execute(&mut *conn)
            .await
            .map_err(|err| conflict_or_data(err, "urgent queue insertion"))?;

        return Ok(1);
    }

    // Tail insertion as one atomic read-modify-write statement; two racing
    // callers cannot observe the same max.
    sqlx::query(
        r#"UPDATE appointments SET queue_position = (
               SELECT COALESCE(MAX(queue_position), 0) + 1 FROM appointments
               WHERE barber_id = ? AND appointment_date = ?
                 AND appointment_type = 'queue' AND status = 'scheduled'
                 AND queue_position IS NOT NULL
           )
           WHERE id = ?"#,
    )
    .bind(barber_id)
    .bind(date)
    .bind(appointment_id)
    .execute(&mut *conn)
    .await
    .map_err(|err| conflict_or_data(err, "queue position assignment"))?;

    let position =
        sqlx::query_scalar::<_, i64>("SELECT queue_position FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(position)
}

/// Clears the finished appointment's position and re-packs the remainder to
/// a dense 1..n. Whoever newly lands at position 1 gets a "next in line"
/// notification after commit.
pub async fn advance(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
    completed_appointment_id: &str,
) -> Result<(), ScheduleError> {
    let mut tx = scheduler.db.begin().await?;

    let previous_head = head_id(&mut tx, barber_id, date).await?;

    sqlx::query("UPDATE appointments SET queue_position = NULL WHERE id = ?")
        .bind(completed_appointment_id)
        .execute(&mut *tx)
        .await?;

    renumber_in_tx(&mut tx, barber_id, date).await?;

    let new_head = match head_id(&mut tx, barber_id, date).await? {
        Some(id) => Some(fetch_appointment(&mut tx, &id).await?),
        None => None,
    };

    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "queue advancement"))?;

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

    Ok(())
}

pub async fn status(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
) -> Result<QueueStatus, ScheduleError> {
    let waiting = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"SELECT {APPOINTMENT_COLUMNS} FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_type = 'queue' AND status = 'scheduled'
             AND queue_position IS NOT NULL
           ORDER BY queue_position"#
    ))
    .bind(barber_id)
    .bind(date)
    .fetch_all(&scheduler.db)
    .await?;

    let serving = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM appointments
           WHERE barber_id = ? AND appointment_date = ? AND status = 'ongoing'"#,
    )
    .bind(barber_id)
    .bind(date)
    .fetch_one(&scheduler.db)
    .await?;

    Ok(QueueStatus {
        total_in_queue: waiting.len() as i64,
        currently_serving: serving.min(1),
        waiting,
    })
}

/// Compacts the surviving positions to a dense 1..n. Order is whatever the
/// insertions established (urgent entries were already placed at the head),
/// so re-packing preserves it and never re-sorts. Two passes through
/// negatives keep the unique index satisfied at every row step.
pub(crate) async fn renumber_in_tx(
    conn: &mut SqliteConnection,
    barber_id: &str,
    date: NaiveDate,
) -> Result<(), ScheduleError> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"SELECT id FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_type = 'queue' AND status = 'scheduled'
             AND queue_position IS NOT NULL
           ORDER BY queue_position"#,
    )
    .bind(barber_id)
    .bind(date)
    .fetch_all(&mut *conn)
    .await?;

    for (index, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE appointments SET queue_position = ? WHERE id = ?")
            .bind(-((index as i64) + 1))
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        r#"UPDATE appointments SET queue_position = -queue_position
           WHERE barber_id = ? AND appointment_date = ? AND queue_position < 0"#,
    )
    .bind(barber_id)
    .bind(date)
    .execute(&mut *conn)
    .await
    .map_err(|err| conflict_or_data(err, "queue renumbering"))?;

    Ok(())
}

pub(crate) async fn head_id(
    conn: &mut SqliteConnection,
    barber_id: &str,
    date: NaiveDate,
) -> Result<Option<String>, ScheduleError> {
    Ok(sqlx::query_scalar::<_, String>(
        r#"SELECT id FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_type = 'queue' AND status = 'scheduled'
             AND queue_position = 1"#,
    )
    .bind(barber_id)
    .bind(date)
    .fetch_optional(&mut *conn)
    .await?)
}

pub(crate) async fn fetch_appointment(
    conn: &mut SqliteConnection,
    appointment_id: &str,
) -> Result<AppointmentRow, ScheduleError> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
    ))
    .bind(appointment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ScheduleError::NotFound("appointment"))
}
