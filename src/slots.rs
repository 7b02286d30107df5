use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::availability::{self, Availability, AvailabilityKind};
use crate::catalog;
use crate::config::{overlaps, ScheduleConfig};
use crate::db::new_id;
use crate::error::{conflict_or_data, ScheduleError};
use crate::models::{AppointmentRow, AppointmentType};
use crate::queue;
use crate::state::{Notification, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Available,
    Scheduled,
    Queue,
    Lunch,
    Full,
}

#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub time: NaiveTime,
    pub slot_type: SlotType,
    pub can_book: bool,
    pub reason: Option<String>,
    pub queue_position: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub barber_id: String,
    pub date: NaiveDate,
    pub time_slot: Option<NaiveTime>,
    pub customer_id: Option<String>,
    pub service_ids: Vec<String>,
    pub add_on_ids: Vec<String>,
    pub notes: Option<String>,
    /// Forces queue placement regardless of the requested time.
    pub walk_in: bool,
    pub is_urgent: bool,
}

#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub appointment: AppointmentRow,
    pub booking_type: AppointmentType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlternativeBarber {
    pub barber_id: String,
    pub display_name: String,
    pub rating: f64,
    pub earliest_slot: NaiveTime,
    pub open_slots: i64,
    pub queue_length: i64,
    pub score: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TimedAppointment {
    appointment_time: NaiveTime,
    total_duration: i64,
    appointment_type: AppointmentType,
}

impl TimedAppointment {
    fn end(&self) -> NaiveTime {
        self.appointment_time + Duration::minutes(self.total_duration)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct QueuedAppointment {
    queue_position: i64,
    total_duration: i64,
}

/// Discretizes the barber's day into slot-width increments and classifies
/// each one. Pure read; the grid carries no reservation and is rebuilt fresh
/// on every call.
pub async fn build_slot_grid(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
    total_duration: i64,
) -> Result<Vec<Slot>, ScheduleError> {
    let day_verdict = availability::resolve(scheduler, barber_id, date, None).await;
    if day_verdict.kind == AvailabilityKind::NotFound {
        return Err(ScheduleError::NotFound("barber"));
    }

    let timed = timed_appointments(scheduler, barber_id, date).await?;
    let projected = project_queue(scheduler, barber_id, date, &timed).await?;

    let config = &scheduler.config;
    let step = Duration::minutes(config.slot_minutes as i64);
    let today = scheduler.clock.today();
    let now = scheduler.clock.time_now();

    let mut grid = Vec::new();
    let mut time = config.opening;
    while time < config.closing {
        grid.push(classify_slot(
            config,
            &day_verdict,
            &timed,
            &projected,
            time,
            total_duration,
            date == today,
            now,
        ));
        time = time + step;
    }
    Ok(grid)
}

#[allow(clippy::too_many_arguments)]
fn classify_slot(
    config: &ScheduleConfig,
    day_verdict: &Availability,
    timed: &[TimedAppointment],
    projected: &[(NaiveTime, NaiveTime, i64)],
    time: NaiveTime,
    total_duration: i64,
    is_today: bool,
    now: NaiveTime,
) -> Slot {
    let step = Duration::minutes(config.slot_minutes as i64);
    let slot_end = time + step;

    if config.in_lunch(time) {
        return Slot {
            time,
            slot_type: SlotType::Lunch,
            can_book: false,
            reason: Some("Lunch break".to_string()),
            queue_position: None,
        };
    }

    if let Some(appointment) = timed
        .iter()
        .find(|a| overlaps(time, slot_end, a.appointment_time, a.end()))
    {
        let slot_type = if appointment.appointment_time == time {
            match appointment.appointment_type {
                AppointmentType::Scheduled => SlotType::Scheduled,
                AppointmentType::Queue => SlotType::Queue,
            }
        } else {
            SlotType::Full
        };
        return Slot {
            time,
            slot_type,
            can_book: false,
            reason: Some(format!("Booked until {}", appointment.end())),
            queue_position: None,
        };
    }

    if let Some(&(_, end, position)) = projected
        .iter()
        .find(|(start, end, _)| overlaps(time, slot_end, *start, *end))
    {
        return Slot {
            time,
            slot_type: SlotType::Queue,
            can_book: false,
            reason: Some(format!("Estimated walk-in service until {end}")),
            queue_position: Some(position),
        };
    }

    // Open increment; bookability depends on the requested duration fitting
    // before lunch, before closing, and clear of later appointments.
    let service_end = time + Duration::minutes(total_duration);

    let (can_book, reason) = if !day_verdict.available {
        (false, Some(day_verdict.reason.clone()))
    } else if is_today && time < now {
        (false, Some("Time has passed".to_string()))
    } else if service_end > config.closing || service_end < time {
        (false, Some("Not enough time before closing".to_string()))
    } else if config
        .lunch_start
        .zip(config.lunch_end)
        .is_some_and(|(ls, le)| overlaps(time, service_end, ls, le))
    {
        (false, Some("Would run into the lunch break".to_string()))
    } else if timed
        .iter()
        .any(|a| overlaps(time, service_end, a.appointment_time, a.end()))
    {
        (false, Some("Would run into the next appointment".to_string()))
    } else {
        (true, None)
    };

    Slot {
        time,
        slot_type: SlotType::Available,
        can_book,
        reason,
        queue_position: None,
    }
}

/// Whether a service of `total_duration` minutes starting at `time` stays
/// inside the working day: not in the past (today), not past closing or
/// wrapped around midnight, and clear of the lunch break. The same check
/// gates direct bookings and the pending request flow.
pub(crate) fn fits_within_day(
    scheduler: &Scheduler,
    date: NaiveDate,
    time: NaiveTime,
    total_duration: i64,
) -> bool {
    let config = &scheduler.config;
    let service_end = time + Duration::minutes(total_duration);
    if date == scheduler.clock.today() && time < scheduler.clock.time_now() {
        return false;
    }
    if service_end > config.closing || service_end < time {
        return false;
    }
    !config
        .lunch_start
        .zip(config.lunch_end)
        .is_some_and(|(ls, le)| overlaps(time, service_end, ls, le))
}

/// Books a slot, or falls back to the walk-in queue when the requested time
/// is not bookable (or the caller asked for queue placement outright).
/// Availability is re-validated inside the booking transaction; a stale grid
/// snapshot is never trusted.
pub async fn book_slot(
    scheduler: &Scheduler,
    request: BookingRequest,
) -> Result<BookingOutcome, ScheduleError> {
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
        // A taken slot or a busy barber degrades to queue placement below.
        _ => {}
    }

    let total_price =
        catalog::resolve_price(&scheduler.db, &request.service_ids, &request.add_on_ids).await?;

    let scheduled_time = request.time_slot.filter(|&time| {
        !request.walk_in
            && verdict.available
            && fits_within_day(scheduler, request.date, time, total_duration)
    });

    let outcome = match scheduled_time {
        Some(time) => book_scheduled(scheduler, &request, time, total_duration, total_price).await?,
        None => book_queued(scheduler, &request, total_duration, total_price).await?,
    };

    scheduler.notify(Notification::for_appointment(
        "appointment_booked",
        &outcome.appointment,
        "Booking confirmed",
        &outcome.message,
    ));

    Ok(outcome)
}

async fn book_scheduled(
    scheduler: &Scheduler,
    request: &BookingRequest,
    time: NaiveTime,
    total_duration: i64,
    total_price: f64,
) -> Result<BookingOutcome, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;

    // Commit-time re-validation against every active timed appointment; the
    // partial unique index on (barber, date, time) backstops exact-time races.
    let existing = sqlx::query_as::<_, TimedAppointment>(
        r#"SELECT appointment_time, total_duration, appointment_type
           FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_time IS NOT NULL
             AND status IN ('scheduled', 'confirmed', 'ongoing')"#,
    )
    .bind(&request.barber_id)
    .bind(request.date)
    .fetch_all(&mut *tx)
    .await?;

    let requested_end = time + Duration::minutes(total_duration);
    if existing
        .iter()
        .any(|a| overlaps(time, requested_end, a.appointment_time, a.end()))
    {
        return Err(ScheduleError::SlotConflict(format!(
            "slot {time} was taken while booking"
        )));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, barber_id, customer_id, appointment_date, appointment_time, appointment_type,
            queue_position, status, is_urgent, total_duration, total_price, services, add_ons,
            notes, created_at)
           VALUES (?, ?, ?, ?, ?, 'scheduled', NULL, 'scheduled', 0, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&request.barber_id)
    .bind(&request.customer_id)
    .bind(request.date)
    .bind(time)
    .bind(total_duration)
    .bind(total_price)
    .bind(serde_json::to_string(&request.service_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&request.add_on_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(&request.notes)
    .bind(scheduler.clock.now())
    .execute(&mut *tx)
    .await
    .map_err(|err| conflict_or_data(err, "time slot booking"))?;

    let appointment = queue::fetch_appointment(&mut tx, &id).await?;
    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "time slot booking"))?;

    Ok(BookingOutcome {
        message: format!("Booked {} at {}", appointment.appointment_date, time),
        booking_type: AppointmentType::Scheduled,
        appointment,
    })
}

async fn book_queued(
    scheduler: &Scheduler,
    request: &BookingRequest,
    total_duration: i64,
    total_price: f64,
) -> Result<BookingOutcome, ScheduleError> {
    let mut tx = scheduler.db.begin().await?;

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, barber_id, customer_id, appointment_date, appointment_time, appointment_type,
            queue_position, status, is_urgent, total_duration, total_price, services, add_ons,
            notes, created_at)
           VALUES (?, ?, ?, ?, NULL, 'queue', NULL, 'scheduled', ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&request.barber_id)
    .bind(&request.customer_id)
    .bind(request.date)
    .bind(request.is_urgent)
    .bind(total_duration)
    .bind(total_price)
    .bind(serde_json::to_string(&request.service_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&request.add_on_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(&request.notes)
    .bind(scheduler.clock.now())
    .execute(&mut *tx)
    .await
    .map_err(|err| conflict_or_data(err, "queue booking"))?;

    let position =
        queue::assign_in_tx(&mut tx, &request.barber_id, request.date, &id, request.is_urgent)
            .await?;

    let appointment = queue::fetch_appointment(&mut tx, &id).await?;
    tx.commit()
        .await
        .map_err(|err| conflict_or_data(err, "queue booking"))?;

    Ok(BookingOutcome {
        message: format!("Added to the walk-in queue at position {position}"),
        booking_type: AppointmentType::Queue,
        appointment,
    })
}

/// Advisory ranking of other barbers for a date. No reservation is held;
/// callers present it and book through `book_slot` as usual.
pub async fn alternative_barbers(
    scheduler: &Scheduler,
    exclude_barber_id: &str,
    date: NaiveDate,
    total_duration: i64,
) -> Result<Vec<AlternativeBarber>, ScheduleError> {
    let barbers = sqlx::query_as::<_, (String, String, f64)>(
        "SELECT id, display_name, rating FROM barbers WHERE active = 1 AND id != ?",
    )
    .bind(exclude_barber_id)
    .fetch_all(&scheduler.db)
    .await?;

    let mut ranked = Vec::new();
    for (barber_id, display_name, rating) in barbers {
        let grid = build_slot_grid(scheduler, &barber_id, date, total_duration).await?;
        let open_slots = grid.iter().filter(|s| s.can_book).count() as i64;
        let earliest = grid.iter().find(|s| s.can_book).map(|s| s.time);
        let Some(earliest_slot) = earliest else {
            continue;
        };

        let queue_length = queue::status(scheduler, &barber_id, date)
            .await?
            .total_in_queue;

        let minutes_until = (earliest_slot - scheduler.config.opening).num_minutes() as f64;
        let score = open_slots as f64 + rating * 2.0
            - queue_length as f64 * 1.5
            - minutes_until / scheduler.config.slot_minutes as f64;

        ranked.push(AlternativeBarber {
            barber_id,
            display_name,
            rating,
            earliest_slot,
            open_slots,
            queue_length,
            score,
        });
    }

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(ranked)
}

async fn timed_appointments(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
) -> Result<Vec<TimedAppointment>, ScheduleError> {
    Ok(sqlx::query_as::<_, TimedAppointment>(
        r#"SELECT appointment_time, total_duration, appointment_type
           FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_time IS NOT NULL
             AND status IN ('scheduled', 'confirmed', 'ongoing')
           ORDER BY appointment_time"#,
    )
    .bind(barber_id)
    .bind(date)
    .fetch_all(&scheduler.db)
    .await?)
}

/// Queue entries have no fixed time; estimate where they land by packing
/// them, in position order, into the free space after the current service
/// (today) or from opening. These are display estimates and never gate a
/// booking transaction.
async fn project_queue(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
    timed: &[TimedAppointment],
) -> Result<Vec<(NaiveTime, NaiveTime, i64)>, ScheduleError> {
    let queued = sqlx::query_as::<_, QueuedAppointment>(
        r#"SELECT queue_position, total_duration
           FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_type = 'queue' AND status = 'scheduled'
             AND queue_position IS NOT NULL
           ORDER BY queue_position"#,
    )
    .bind(barber_id)
    .bind(date)
    .fetch_all(&scheduler.db)
    .await?;

    if queued.is_empty() {
        return Ok(Vec::new());
    }

    let config = &scheduler.config;
    let mut cursor = if date == scheduler.clock.today() {
        scheduler.clock.time_now().max(config.opening)
    } else {
        config.opening
    };

    let mut projections = Vec::with_capacity(queued.len());
    for entry in queued {
        // skip past lunch and timed bookings
        loop {
            if config.in_lunch(cursor) {
                cursor = config.lunch_end.unwrap_or(cursor);
                continue;
            }
            let end = cursor + Duration::minutes(entry.total_duration);
            if let Some(blocking) = timed
                .iter()
                .find(|a| overlaps(cursor, end, a.appointment_time, a.end()))
            {
                cursor = blocking.end();
                continue;
            }
            break;
        }
        let end = cursor + Duration::minutes(entry.total_duration);
        if cursor >= config.closing {
            break;
        }
        projections.push((cursor, end, entry.queue_position));
        cursor = end;
    }
    Ok(projections)
}
