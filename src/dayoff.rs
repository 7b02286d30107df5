use chrono::NaiveDate;

use crate::db::new_id;
use crate::error::{conflict_or_data, ScheduleError};
use crate::models::{AppointmentRow, DayOffKind, DayOffRow};
use crate::queue;
use crate::state::{Notification, Scheduler};

/// Declares an unavailability window and cascade-cancels every conflicting
/// appointment in it. The window insert, the cancellations and the queue
/// re-packs commit as one transaction; customer notifications go out only
/// after the commit.
pub async fn declare_unavailable(
    scheduler: &Scheduler,
    barber_id: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    kind: DayOffKind,
    reason: &str,
) -> Result<DayOffRow, ScheduleError> {
    if start_date > end_date {
        return Err(ScheduleError::InvalidRange(format!(
            "{start_date} is after {end_date}"
        )));
    }

    let barber_exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM barbers WHERE id = ? AND active = 1",
    )
    .bind(barber_id)
    .fetch_one(&scheduler.db)
    .await?;
    if barber_exists == 0 {
        return Err(ScheduleError::NotFound("barber"));
    }

    let mut tx = scheduler.db.begin().await?;

    let overlapping = sqlx::query_as::<_, DayOffRow>(
        r#"SELECT id, barber_id, start_date, end_date, kind, reason, is_active, created_at
           FROM barber_days_off
           WHERE barber_id = ? AND is_active = 1 AND start_date <= ? AND end_date >= ?
           LIMIT 1"#,
    )
    .bind(barber_id)
    .bind(end_date)
    .bind(start_date)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(existing) = overlapping {
        return Err(ScheduleError::Overlap {
            kind: existing.kind.as_str().to_string(),
            start_date: existing.start_date,
            end_date: existing.end_date,
        });
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO barber_days_off (id, barber_id, start_date, end_date, kind, reason, is_active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(barber_id)
    .bind(start_date)
    .bind(end_date)
    .bind(kind)
    .bind(reason)
    .bind(scheduler.clock.now())
    .execute(&mut *tx)
    .await
    .map_err(|err| conflict_or_data(err, "day-off declaration"))?;

    let affected = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"SELECT {} FROM appointments
           WHERE barber_id = ? AND appointment_date BETWEEN ? AND ?
             AND status IN ('pending', 'scheduled', 'confirmed')
           ORDER BY appointment_date"#,
        queue::APPOINTMENT_COLUMNS
    ))
    .bind(barber_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(&mut *tx)
    .await?;

    let cascade_reason = format!("Barber unavailable ({}): {reason}", kind.as_str().replace('_', " "));
    sqlx::query(
        r#"UPDATE appointments
           SET status = 'cancelled', queue_position = NULL, cancellation_reason = ?
           WHERE barber_id = ? AND appointment_date BETWEEN ? AND ?
             AND status IN ('pending', 'scheduled', 'confirmed')"#,
    )
    .bind(&cascade_reason)
    .bind(barber_id)
    .bind(start_date)
    .bind(end_date)
    .execute(&mut *tx)
    .await?;

    // Cancelled walk-ins vacate queue slots; keep every affected day dense.
    let mut dates: Vec<NaiveDate> = affected.iter().map(|a| a.appointment_date).collect();
    dates.dedup();
    for date in dates {
        queue::renumber_in_tx(&mut tx, barber_id, date).await?;
    }

    let window = sqlx::query_as::<_, DayOffRow>(
        r#"SELECT id, barber_id, start_date, end_date, kind, reason, is_active, created_at
           FROM barber_days_off WHERE id = ?"#,
    )
    .bind(&id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "day-off declaration"))?;

    for appointment in &affected {
        scheduler.notify(Notification::for_appointment(
            "appointment_cancelled",
            appointment,
            "Appointment cancelled",
            &cascade_reason,
        ));
    }
    log::info!(
        "barber {barber_id} unavailable {start_date}..{end_date} ({}), {} appointments cancelled",
        kind.as_str(),
        affected.len()
    );

    Ok(window)
}

/// Soft revoke. Cancellations already cascaded are not resurrected; the
/// customers were told, the slots are gone.
pub async fn revoke(scheduler: &Scheduler, day_off_id: &str) -> Result<DayOffRow, ScheduleError> {
    let result = sqlx::query("UPDATE barber_days_off SET is_active = 0 WHERE id = ?")
        .bind(day_off_id)
        .execute(&scheduler.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ScheduleError::NotFound("day-off window"));
    }

    Ok(sqlx::query_as::<_, DayOffRow>(
        r#"SELECT id, barber_id, start_date, end_date, kind, reason, is_active, created_at
           FROM barber_days_off WHERE id = ?"#,
    )
    .bind(day_off_id)
    .fetch_one(&scheduler.db)
    .await?)
}

pub async fn active_windows(
    scheduler: &Scheduler,
    barber_id: &str,
) -> Result<Vec<DayOffRow>, ScheduleError> {
    Ok(sqlx::query_as::<_, DayOffRow>(
        r#"SELECT id, barber_id, start_date, end_date, kind, reason, is_active, created_at
           FROM barber_days_off
           WHERE barber_id = ? AND is_active = 1
           ORDER BY start_date"#,
    )
    .bind(barber_id)
    .fetch_all(&scheduler.db)
    .await?)
}
