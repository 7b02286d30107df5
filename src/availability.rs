use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::config::overlaps;
use crate::models::{AppointmentStatus, BarberRow, BarberStatus, DayOffRow};
use crate::state::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityKind {
    Available,
    Offline,
    DayOff,
    OutsideHours,
    AtCapacity,
    CurrentlyBusy,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub available: bool,
    pub kind: AvailabilityKind,
    pub reason: String,
    /// Next open slot on the grid, populated for `at_capacity`.
    pub next_free: Option<NaiveTime>,
    /// Estimated end of the current service, populated for `currently_busy`.
    pub free_at: Option<NaiveTime>,
}

impl Availability {
    fn available() -> Self {
        Self {
            available: true,
            kind: AvailabilityKind::Available,
            reason: "Available".to_string(),
            next_free: None,
            free_at: None,
        }
    }

    fn blocked(kind: AvailabilityKind, reason: String) -> Self {
        Self {
            available: false,
            kind,
            reason,
            next_free: None,
            free_at: None,
        }
    }
}

/// An appointment window on the day, as used by capacity and busy checks.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BookedWindow {
    pub appointment_time: NaiveTime,
    pub total_duration: i64,
    pub status: AppointmentStatus,
}

impl BookedWindow {
    pub fn end(&self) -> NaiveTime {
        self.appointment_time + Duration::minutes(self.total_duration)
    }
}

/// Ordered short-circuit resolution: existence, operational status, day-off,
/// business-hours bounds, slot capacity, current busyness. A day-off must
/// dominate a capacity reading, and hours bounds are independent of barber
/// state, hence the fixed order.
///
/// Read-path policy is fail-open: a data-access failure yields "available"
/// and a degraded-mode warning, so a transient fault never blocks bookings.
pub async fn resolve(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
    time_slot: Option<NaiveTime>,
) -> Availability {
    match resolve_strict(scheduler, barber_id, date, time_slot).await {
        Ok(availability) => availability,
        Err(err) => {
            log::warn!("availability resolution degraded for barber {barber_id}: {err}");
            Availability::available()
        }
    }
}

async fn resolve_strict(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
    time_slot: Option<NaiveTime>,
) -> Result<Availability, sqlx::Error> {
    let config = &scheduler.config;

    let barber = sqlx::query_as::<_, BarberRow>(
        "SELECT id, display_name, status, rating, active, created_at FROM barbers WHERE id = ? AND active = 1",
    )
    .bind(barber_id)
    .fetch_optional(&scheduler.db)
    .await?;

    let barber = match barber {
        Some(barber) => barber,
        None => {
            return Ok(Availability::blocked(
                AvailabilityKind::NotFound,
                "Barber not found".to_string(),
            ))
        }
    };

    if barber.status == BarberStatus::Offline {
        return Ok(Availability::blocked(
            AvailabilityKind::Offline,
            format!("{} is currently offline", barber.display_name),
        ));
    }

    if let Some(window) = day_off_covering(scheduler, barber_id, date).await? {
        return Ok(Availability::blocked(
            AvailabilityKind::DayOff,
            format!(
                "{} is on {} until {}",
                barber.display_name,
                window.kind.as_str().replace('_', " "),
                window.end_date
            ),
        ));
    }

    if date < scheduler.clock.today() {
        return Ok(Availability::blocked(
            AvailabilityKind::OutsideHours,
            "Date is in the past".to_string(),
        ));
    }
    if let Some(time) = time_slot {
        if !config.within_hours(time) {
            return Ok(Availability::blocked(
                AvailabilityKind::OutsideHours,
                format!("Outside business hours ({} - {})", config.opening, config.closing),
            ));
        }
    }

    let windows = booked_windows(scheduler, barber_id, date).await?;

    if let Some(time) = time_slot {
        let probe_end = time + Duration::minutes(config.slot_minutes as i64);
        let taken = windows
            .iter()
            .any(|w| overlaps(time, probe_end, w.appointment_time, w.end()));
        if taken {
            let mut blocked = Availability::blocked(
                AvailabilityKind::AtCapacity,
                "Time slot is already booked".to_string(),
            );
            blocked.next_free = next_free_slot(&windows, config, time);
            return Ok(blocked);
        }
    }

    if date == scheduler.clock.today() {
        let now = scheduler.clock.time_now();
        let busy = windows.iter().find(|w| {
            matches!(
                w.status,
                AppointmentStatus::Ongoing | AppointmentStatus::Confirmed
            ) && w.appointment_time <= now
                && now < w.end()
        });
        if let Some(current) = busy {
            let mut blocked = Availability::blocked(
                AvailabilityKind::CurrentlyBusy,
                format!("{} is with a customer until {}", barber.display_name, current.end()),
            );
            blocked.free_at = Some(current.end());
            return Ok(blocked);
        }
    }

    Ok(Availability::available())
}

pub async fn day_off_covering(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
) -> Result<Option<DayOffRow>, sqlx::Error> {
    sqlx::query_as::<_, DayOffRow>(
        r#"SELECT id, barber_id, start_date, end_date, kind, reason, is_active, created_at
           FROM barber_days_off
           WHERE barber_id = ? AND is_active = 1 AND start_date <= ? AND end_date >= ?
           ORDER BY start_date
           LIMIT 1"#,
    )
    .bind(barber_id)
    .bind(date)
    .bind(date)
    .fetch_optional(&scheduler.db)
    .await
}

pub async fn booked_windows(
    scheduler: &Scheduler,
    barber_id: &str,
    date: NaiveDate,
) -> Result<Vec<BookedWindow>, sqlx::Error> {
    sqlx::query_as::<_, BookedWindow>(
        r#"SELECT appointment_time, total_duration, status
           FROM appointments
           WHERE barber_id = ? AND appointment_date = ?
             AND appointment_time IS NOT NULL
             AND status IN ('scheduled', 'confirmed', 'ongoing')
           ORDER BY appointment_time"#,
    )
    .bind(barber_id)
    .bind(date)
    .fetch_all(&scheduler.db)
    .await
}

/// Linear scan forward through the day's grid for the first increment that
/// does not collide with an existing booking or the lunch window.
pub fn next_free_slot(
    windows: &[BookedWindow],
    config: &crate::config::ScheduleConfig,
    after: NaiveTime,
) -> Option<NaiveTime> {
    let step = Duration::minutes(config.slot_minutes as i64);
    let mut candidate = after + step;
    while config.within_hours(candidate) {
        let candidate_end = candidate + step;
        let collides = config.in_lunch(candidate)
            || windows
                .iter()
                .any(|w| overlaps(candidate, candidate_end, w.appointment_time, w.end()));
        if !collides {
            return Some(candidate);
        }
        candidate = candidate + step;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, minutes: i64) -> BookedWindow {
        BookedWindow {
            appointment_time: start,
            total_duration: minutes,
            status: AppointmentStatus::Scheduled,
        }
    }

    #[test]
    fn next_free_skips_bookings_and_lunch() {
        let config = ScheduleConfig::default();
        let windows = vec![window(t(10, 30), 60)];
        // 10:00 probe collides at 10:30; 11:00 still inside the booking,
        // 11:30 is the first clear increment.
        assert_eq!(next_free_slot(&windows, &config, t(10, 0)), Some(t(11, 30)));
        // from 11:30 the next increment lands in lunch, so 13:00 wins
        let windows = vec![window(t(11, 30), 30)];
        assert_eq!(next_free_slot(&windows, &config, t(11, 30)), Some(t(13, 0)));
    }

    #[test]
    fn next_free_is_none_when_day_is_exhausted() {
        let config = ScheduleConfig::default();
        assert_eq!(next_free_slot(&[], &config, t(16, 30)), None);
    }
}
