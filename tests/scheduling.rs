use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use trimline::{
    appointments, availability, dayoff, db, queue, slots, AppointmentStatus, AppointmentType,
    AvailabilityKind, BookingRequest, DayOffKind, FixedClock, ScheduleConfig, ScheduleError,
    Scheduler, SlotType,
};

const BARBER: &str = "b1";
const OTHER_BARBER: &str = "b2";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn now() -> NaiveDateTime {
    // fixed "today": 2024-06-01 09:00
    date(2024, 6, 1).and_hms_opt(9, 0, 0).unwrap()
}

async fn scheduler_with(pool: sqlx::SqlitePool) -> Scheduler {
    let _ = env_logger::builder().is_test(true).try_init();
    db::run_migrations(&pool).await.unwrap();
    db::seed_barber(&pool, BARBER, "Marco", 4.5).await.unwrap();
    db::seed_barber(&pool, OTHER_BARBER, "Luca", 4.8).await.unwrap();
    db::seed_service(&pool, "cut", "Haircut", 30, 25.0).await.unwrap();
    db::seed_service(&pool, "cut45", "Cut and style", 45, 35.0).await.unwrap();
    db::seed_add_on(&pool, "beard", "Beard trim", 15, 10.0).await.unwrap();
    Scheduler::with_clock(pool, ScheduleConfig::default(), Arc::new(FixedClock(now())))
}

async fn scheduler() -> Scheduler {
    let pool = db::connect("sqlite::memory:", 1).await.unwrap();
    scheduler_with(pool).await
}

fn walk_in(barber: &str, day: NaiveDate, urgent: bool) -> BookingRequest {
    BookingRequest {
        barber_id: barber.to_string(),
        date: day,
        time_slot: None,
        customer_id: Some("customer".to_string()),
        service_ids: vec!["cut".to_string()],
        add_on_ids: vec![],
        notes: None,
        walk_in: true,
        is_urgent: urgent,
    }
}

fn timed(barber: &str, day: NaiveDate, at: NaiveTime) -> BookingRequest {
    BookingRequest {
        time_slot: Some(at),
        walk_in: false,
        ..walk_in(barber, day, false)
    }
}

async fn positions(scheduler: &Scheduler, barber: &str, day: NaiveDate) -> Vec<i64> {
    queue::status(scheduler, barber, day)
        .await
        .unwrap()
        .waiting
        .iter()
        .map(|a| a.queue_position.unwrap())
        .collect()
}

#[tokio::test]
async fn resolver_rejects_out_of_hours_and_past_dates() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let before_opening = availability::resolve(&s, BARBER, day, Some(time(7, 30))).await;
    assert_eq!(before_opening.kind, AvailabilityKind::OutsideHours);

    let at_closing = availability::resolve(&s, BARBER, day, Some(time(17, 0))).await;
    assert_eq!(at_closing.kind, AvailabilityKind::OutsideHours);

    let yesterday = availability::resolve(&s, BARBER, date(2024, 5, 31), None).await;
    assert_eq!(yesterday.kind, AvailabilityKind::OutsideHours);

    let open = availability::resolve(&s, BARBER, day, Some(time(8, 0))).await;
    assert!(open.available);
}

#[tokio::test]
async fn resolver_reports_unknown_and_offline_barbers() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let missing = availability::resolve(&s, "nobody", day, None).await;
    assert_eq!(missing.kind, AvailabilityKind::NotFound);

    sqlx::query("UPDATE barbers SET status = 'offline' WHERE id = ?")
        .bind(BARBER)
        .execute(&s.db)
        .await
        .unwrap();
    let offline = availability::resolve(&s, BARBER, day, None).await;
    assert_eq!(offline.kind, AvailabilityKind::Offline);
}

#[tokio::test]
async fn day_off_dominates_every_other_check() {
    let s = scheduler().await;
    dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 10),
        date(2024, 6, 12),
        DayOffKind::Vacation,
        "family trip",
    )
    .await
    .unwrap();

    // even with a bookable time supplied the day-off wins
    let verdict = availability::resolve(&s, BARBER, date(2024, 6, 11), Some(time(10, 0))).await;
    assert_eq!(verdict.kind, AvailabilityKind::DayOff);
    assert!(verdict.reason.contains("vacation"));

    let outside = availability::resolve(&s, BARBER, date(2024, 6, 13), None).await;
    assert!(outside.available);
}

#[tokio::test]
async fn booked_slot_reports_capacity_and_next_free() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let outcome = slots::book_slot(&s, timed(BARBER, day, time(10, 0))).await.unwrap();
    assert_eq!(outcome.booking_type, AppointmentType::Scheduled);

    let verdict = availability::resolve(&s, BARBER, day, Some(time(10, 0))).await;
    assert_eq!(verdict.kind, AvailabilityKind::AtCapacity);
    assert_eq!(verdict.next_free, Some(time(10, 30)));
}

#[tokio::test]
async fn resolver_fails_open_when_the_store_is_down() {
    let s = scheduler().await;
    s.db.close().await;

    let verdict = availability::resolve(&s, BARBER, date(2024, 6, 3), Some(time(10, 0))).await;
    assert!(verdict.available);
    assert_eq!(verdict.kind, AvailabilityKind::Available);
}

#[tokio::test]
async fn grid_blocks_lunch_overrun_and_closing_overrun() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let grid = slots::build_slot_grid(&s, BARBER, day, 45).await.unwrap();
    let slot_at = |t: NaiveTime| grid.iter().find(|slot| slot.time == t).unwrap();

    // 18 increments between 08:00 and 17:00
    assert_eq!(grid.len(), 18);

    assert_eq!(slot_at(time(12, 0)).slot_type, SlotType::Lunch);
    assert!(!slot_at(time(12, 0)).can_book);

    // a 45 minute service at 11:30 would run into lunch
    assert!(!slot_at(time(11, 30)).can_book);
    // and at 16:30 it would run past closing
    assert!(!slot_at(time(16, 30)).can_book);

    assert!(slot_at(time(11, 0)).can_book);
    assert!(slot_at(time(13, 0)).can_book);
    assert!(slot_at(time(16, 0)).can_book);
}

#[tokio::test]
async fn grid_marks_booked_slots_and_past_times_today() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);
    slots::book_slot(&s, timed(BARBER, day, time(10, 0))).await.unwrap();

    let grid = slots::build_slot_grid(&s, BARBER, day, 30).await.unwrap();
    let slot_at = |t: NaiveTime| grid.iter().find(|slot| slot.time == t).unwrap().clone();

    assert_eq!(slot_at(time(10, 0)).slot_type, SlotType::Scheduled);
    assert!(!slot_at(time(10, 0)).can_book);
    assert!(slot_at(time(10, 30)).can_book);

    // today's grid refuses increments that already passed (fixed clock 09:00)
    let today_grid = slots::build_slot_grid(&s, BARBER, date(2024, 6, 1), 30).await.unwrap();
    let morning = today_grid.iter().find(|slot| slot.time == time(8, 0)).unwrap();
    assert!(!morning.can_book);
    let later = today_grid.iter().find(|slot| slot.time == time(9, 30)).unwrap();
    assert!(later.can_book);
}

#[tokio::test]
async fn booking_an_occupied_time_falls_back_to_the_queue() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    slots::book_slot(&s, timed(BARBER, day, time(10, 0))).await.unwrap();
    let second = slots::book_slot(&s, timed(BARBER, day, time(10, 0))).await.unwrap();

    assert_eq!(second.booking_type, AppointmentType::Queue);
    assert_eq!(second.appointment.appointment_time, None);
    assert_eq!(second.appointment.queue_position, Some(1));
}

#[tokio::test]
async fn booking_invariants_hold_for_both_types() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let scheduled = slots::book_slot(&s, timed(BARBER, day, time(14, 0))).await.unwrap();
    assert_eq!(scheduled.appointment.appointment_type, AppointmentType::Scheduled);
    assert_eq!(scheduled.appointment.queue_position, None);
    assert_eq!(scheduled.appointment.appointment_time, Some(time(14, 0)));

    let queued = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    assert_eq!(queued.appointment.appointment_type, AppointmentType::Queue);
    assert_eq!(queued.appointment.appointment_time, None);
    assert_eq!(queued.appointment.queue_position, Some(1));
}

#[tokio::test]
async fn empty_service_selection_is_rejected() {
    let s = scheduler().await;
    let mut request = walk_in(BARBER, date(2024, 6, 3), false);
    request.service_ids.clear();

    let err = slots::book_slot(&s, request).await.unwrap_err();
    assert!(matches!(err, ScheduleError::Validation(_)));
}

#[tokio::test]
async fn urgent_insertion_takes_the_head_and_shifts_the_rest() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    assert_eq!(a.appointment.queue_position, Some(1));
    assert_eq!(b.appointment.queue_position, Some(2));

    let urgent = slots::book_slot(&s, walk_in(BARBER, day, true)).await.unwrap();
    assert_eq!(urgent.appointment.queue_position, Some(1));

    let status = queue::status(&s, BARBER, day).await.unwrap();
    let order: Vec<(String, i64)> = status
        .waiting
        .iter()
        .map(|row| (row.id.clone(), row.queue_position.unwrap()))
        .collect();
    assert_eq!(
        order,
        vec![
            (urgent.appointment.id.clone(), 1),
            (a.appointment.id.clone(), 2),
            (b.appointment.id.clone(), 3),
        ]
    );
}

#[tokio::test]
async fn completing_the_head_repacks_and_signals_exactly_one_next_in_line() {
    let s = scheduler().await;
    let day = date(2024, 6, 1); // today, so the service can start
    let mut events = s.subscribe();

    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let c = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();

    appointments::start(&s, &a.appointment.id).await.unwrap();
    appointments::complete(&s, &a.appointment.id).await.unwrap();

    assert_eq!(positions(&s, BARBER, day).await, vec![1, 2]);
    let status = queue::status(&s, BARBER, day).await.unwrap();
    assert_eq!(status.waiting[0].id, b.appointment.id);
    assert_eq!(status.waiting[1].id, c.appointment.id);

    let mut next_in_line = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.kind == "queue_next" {
            next_in_line.push(event.appointment_id.unwrap());
        }
    }
    assert_eq!(next_in_line, vec![b.appointment.id.clone()]);
}

#[tokio::test]
async fn cancelling_a_middle_entry_repacks_without_signalling() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);
    let mut events = s.subscribe();

    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let c = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();

    appointments::cancel(&s, &b.appointment.id, "changed plans").await.unwrap();

    assert_eq!(positions(&s, BARBER, day).await, vec![1, 2]);
    let status = queue::status(&s, BARBER, day).await.unwrap();
    assert_eq!(status.waiting[0].id, a.appointment.id);
    assert_eq!(status.waiting[1].id, c.appointment.id);

    while let Ok(event) = events.try_recv() {
        assert_ne!(event.kind, "queue_next");
    }

    let cancelled = appointments::fetch(&s, &b.appointment.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.queue_position, None);
}

#[tokio::test]
async fn only_one_ongoing_appointment_per_barber_and_day() {
    let s = scheduler().await;
    let day = date(2024, 6, 1);

    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();

    appointments::start(&s, &a.appointment.id).await.unwrap();
    let err = appointments::start(&s, &b.appointment.id).await.unwrap_err();
    assert!(matches!(err, ScheduleError::Validation(_)));

    let status = queue::status(&s, BARBER, day).await.unwrap();
    assert_eq!(status.currently_serving, 1);
    assert_eq!(status.total_in_queue, 1);
}

#[tokio::test]
async fn pending_request_flow_assigns_position_at_acceptance() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let request = appointments::request_booking(&s, walk_in(BARBER, day, false)).await.unwrap();
    assert_eq!(request.status, AppointmentStatus::Pending);
    assert_eq!(request.queue_position, None);
    assert_eq!(positions(&s, BARBER, day).await, Vec::<i64>::new());

    let accepted = appointments::accept(&s, &request.id).await.unwrap();
    assert_eq!(accepted.status, AppointmentStatus::Scheduled);
    assert_eq!(accepted.queue_position, Some(1));
}

#[tokio::test]
async fn duplicate_pending_request_for_the_same_time_is_a_conflict() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    appointments::request_booking(&s, timed(BARBER, day, time(10, 0))).await.unwrap();
    let err = appointments::request_booking(&s, timed(BARBER, day, time(10, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::SlotConflict(_)));
}

#[tokio::test]
async fn acceptance_revalidates_overlapping_slots() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    // 45-minute pending request at 10:00 and a 30-minute one at 10:30
    let mut first = timed(BARBER, day, time(10, 0));
    first.service_ids = vec!["cut45".to_string()];
    let first = appointments::request_booking(&s, first).await.unwrap();
    let second = appointments::request_booking(&s, timed(BARBER, day, time(10, 30)))
        .await
        .unwrap();

    appointments::accept(&s, &first.id).await.unwrap();
    let err = appointments::accept(&s, &second.id).await.unwrap_err();
    assert!(matches!(err, ScheduleError::SlotConflict(_)));
}

#[tokio::test]
async fn declining_a_request_cancels_it() {
    let s = scheduler().await;
    let request = appointments::request_booking(&s, walk_in(BARBER, date(2024, 6, 3), false))
        .await
        .unwrap();

    let declined = appointments::decline(&s, &request.id, "fully booked").await.unwrap();
    assert_eq!(declined.status, AppointmentStatus::Cancelled);

    let err = appointments::accept(&s, &request.id).await.unwrap_err();
    assert!(matches!(err, ScheduleError::Validation(_)));
}

#[tokio::test]
async fn day_off_cascade_cancels_exactly_the_conflicting_appointments() {
    let s = scheduler().await;
    let mut events = s.subscribe();

    let inside = slots::book_slot(&s, walk_in(BARBER, date(2024, 6, 11), false)).await.unwrap();
    let inside_timed = slots::book_slot(&s, timed(BARBER, date(2024, 6, 10), time(10, 0)))
        .await
        .unwrap();
    let outside = slots::book_slot(&s, walk_in(BARBER, date(2024, 6, 13), false)).await.unwrap();
    let other_barber = slots::book_slot(&s, walk_in(OTHER_BARBER, date(2024, 6, 11), false))
        .await
        .unwrap();
    while events.try_recv().is_ok() {}

    dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 10),
        date(2024, 6, 12),
        DayOffKind::SickLeave,
        "flu",
    )
    .await
    .unwrap();

    for id in [&inside.appointment.id, &inside_timed.appointment.id] {
        let row = appointments::fetch(&s, id).await.unwrap();
        assert_eq!(row.status, AppointmentStatus::Cancelled);
        assert_eq!(row.queue_position, None);
        assert!(row.cancellation_reason.unwrap().contains("sick leave"));
    }

    let kept = appointments::fetch(&s, &outside.appointment.id).await.unwrap();
    assert_eq!(kept.status, AppointmentStatus::Scheduled);
    assert_eq!(kept.queue_position, Some(1));

    let untouched = appointments::fetch(&s, &other_barber.appointment.id).await.unwrap();
    assert_eq!(untouched.status, AppointmentStatus::Scheduled);
    assert_eq!(untouched.queue_position, Some(1));

    let mut cancelled_ids = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.kind == "appointment_cancelled" {
            cancelled_ids.push(event.appointment_id.unwrap());
        }
    }
    cancelled_ids.sort();
    let mut expected = vec![inside.appointment.id, inside_timed.appointment.id];
    expected.sort();
    assert_eq!(cancelled_ids, expected);
}

#[tokio::test]
async fn day_off_cascade_repacks_the_surviving_queue() {
    let s = scheduler().await;
    let day = date(2024, 6, 11);

    // build a queue of three, serve out the head so B and C sit at 1 and 2
    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let _b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let c = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    appointments::cancel(&s, &a.appointment.id, "no show").await.unwrap();
    assert_eq!(positions(&s, BARBER, day).await, vec![1, 2]);

    // cancel the new head directly; the former position-3 entry ends at 1
    let status = queue::status(&s, BARBER, day).await.unwrap();
    appointments::cancel(&s, &status.waiting[0].id, "left").await.unwrap();

    let remaining = queue::status(&s, BARBER, day).await.unwrap();
    assert_eq!(remaining.waiting.len(), 1);
    assert_eq!(remaining.waiting[0].id, c.appointment.id);
    assert_eq!(remaining.waiting[0].queue_position, Some(1));
}

#[tokio::test]
async fn overlapping_day_off_windows_are_rejected() {
    let s = scheduler().await;
    dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 10),
        date(2024, 6, 12),
        DayOffKind::Vacation,
        "",
    )
    .await
    .unwrap();

    let err = dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 12),
        date(2024, 6, 14),
        DayOffKind::DayOff,
        "",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ScheduleError::Overlap { .. }));

    // adjacent but not overlapping is fine
    dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 13),
        date(2024, 6, 14),
        DayOffKind::DayOff,
        "",
    )
    .await
    .unwrap();

    let err = dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 20),
        date(2024, 6, 18),
        DayOffKind::DayOff,
        "",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidRange(_)));
}

#[tokio::test]
async fn revoking_a_day_off_reopens_the_dates_but_not_the_cancellations() {
    let s = scheduler().await;
    let day = date(2024, 6, 11);

    let booking = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let window = dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 10),
        date(2024, 6, 12),
        DayOffKind::Emergency,
        "",
    )
    .await
    .unwrap();

    dayoff::revoke(&s, &window.id).await.unwrap();

    let verdict = availability::resolve(&s, BARBER, day, None).await;
    assert!(verdict.available);
    assert!(dayoff::active_windows(&s, BARBER).await.unwrap().is_empty());

    // the cascade is one-way
    let row = appointments::fetch(&s, &booking.appointment.id).await.unwrap();
    assert_eq!(row.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn alternative_barbers_are_ranked_and_advisory() {
    let s = scheduler().await;
    let day = date(2024, 6, 11);

    dayoff::declare_unavailable(
        &s,
        BARBER,
        date(2024, 6, 10),
        date(2024, 6, 12),
        DayOffKind::Vacation,
        "",
    )
    .await
    .unwrap();

    let alternatives = slots::alternative_barbers(&s, BARBER, day, 30).await.unwrap();
    assert_eq!(alternatives.len(), 1);
    assert_eq!(alternatives[0].barber_id, OTHER_BARBER);
    assert_eq!(alternatives[0].earliest_slot, time(8, 0));
    assert!(alternatives[0].open_slots > 0);
    assert_eq!(alternatives[0].queue_length, 0);
}

#[tokio::test]
async fn unknown_catalog_entries_fall_back_to_default_durations() {
    let s = scheduler().await;

    let duration = trimline::catalog::resolve_duration(
        &s.db,
        &s.config,
        &["cut".to_string(), "mystery".to_string()],
        &["beard".to_string()],
    )
    .await
    .unwrap();
    // 30 known + 30 fallback + 15 add-on
    assert_eq!(duration, 75);
}

#[tokio::test]
async fn repacking_keeps_urgent_entries_ahead_of_earlier_arrivals() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);
    let mut events = s.subscribe();

    // two urgent entries: the later one takes the head on insertion
    let first_urgent = slots::book_slot(&s, walk_in(BARBER, day, true)).await.unwrap();
    let second_urgent = slots::book_slot(&s, walk_in(BARBER, day, true)).await.unwrap();
    let tail = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    assert_eq!(second_urgent.appointment.queue_position, Some(1));
    while events.try_recv().is_ok() {}

    appointments::cancel(&s, &tail.appointment.id, "left").await.unwrap();

    // the re-pack compacts positions without re-sorting the survivors
    let status = queue::status(&s, BARBER, day).await.unwrap();
    let order: Vec<(String, i64)> = status
        .waiting
        .iter()
        .map(|row| (row.id.clone(), row.queue_position.unwrap()))
        .collect();
    assert_eq!(
        order,
        vec![
            (second_urgent.appointment.id.clone(), 1),
            (first_urgent.appointment.id.clone(), 2),
        ]
    );

    // the head did not change, so nobody is told they're next
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.kind, "queue_next");
    }
}

#[tokio::test]
async fn lunch_overrunning_request_degrades_to_a_queue_booking() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    // a 45-minute service at 11:30 would run into lunch
    let mut request = timed(BARBER, day, time(11, 30));
    request.service_ids = vec!["cut45".to_string()];
    let pending = appointments::request_booking(&s, request).await.unwrap();
    assert_eq!(pending.appointment_type, AppointmentType::Queue);
    assert_eq!(pending.appointment_time, None);

    let accepted = appointments::accept(&s, &pending.id).await.unwrap();
    assert_eq!(accepted.appointment_time, None);
    assert_eq!(accepted.queue_position, Some(1));
}

#[tokio::test]
async fn acceptance_rejects_a_time_that_has_passed() {
    let s = scheduler().await;
    let today = date(2024, 6, 1);

    // fits at request time (clock 09:00)
    let pending = appointments::request_booking(&s, timed(BARBER, today, time(9, 30)))
        .await
        .unwrap();
    assert_eq!(pending.appointment_type, AppointmentType::Scheduled);

    // an hour later the slot start has passed
    let later = Scheduler::with_clock(
        s.db.clone(),
        ScheduleConfig::default(),
        Arc::new(FixedClock(today.and_hms_opt(10, 0, 0).unwrap())),
    );
    let err = appointments::accept(&later, &pending.id).await.unwrap_err();
    assert!(matches!(err, ScheduleError::Validation(_)));

    let row = appointments::fetch(&s, &pending.id).await.unwrap();
    assert_eq!(row.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn completion_releases_the_position_in_the_same_commit() {
    let s = scheduler().await;
    let day = date(2024, 6, 1);

    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let _b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();

    appointments::start(&s, &a.appointment.id).await.unwrap();
    let done = appointments::complete(&s, &a.appointment.id).await.unwrap();
    assert_eq!(done.status, AppointmentStatus::Done);
    assert_eq!(done.queue_position, None);
    assert_eq!(positions(&s, BARBER, day).await, vec![1]);
}

#[tokio::test]
async fn advance_repacks_after_an_external_status_change() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);
    let mut events = s.subscribe();

    let a = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    let b = slots::book_slot(&s, walk_in(BARBER, day, false)).await.unwrap();
    while events.try_recv().is_ok() {}

    // appointment finished through some other path; only the queue needs fixing
    sqlx::query("UPDATE appointments SET status = 'done' WHERE id = ?")
        .bind(&a.appointment.id)
        .execute(&s.db)
        .await
        .unwrap();

    queue::advance(&s, BARBER, day, &a.appointment.id).await.unwrap();

    assert_eq!(positions(&s, BARBER, day).await, vec![1]);
    let status = queue::status(&s, BARBER, day).await.unwrap();
    assert_eq!(status.waiting[0].id, b.appointment.id);

    let mut next_in_line = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.kind == "queue_next" {
            next_in_line.push(event.appointment_id.unwrap());
        }
    }
    assert_eq!(next_in_line, vec![b.appointment.id.clone()]);
}

#[tokio::test]
async fn booking_records_the_catalog_price() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);

    let mut request = timed(BARBER, day, time(10, 0));
    request.add_on_ids = vec!["beard".to_string()];
    let outcome = slots::book_slot(&s, request).await.unwrap();
    // 25.00 haircut + 10.00 beard trim
    assert_eq!(outcome.appointment.total_price, 35.0);

    let pending = appointments::request_booking(&s, walk_in(BARBER, day, false))
        .await
        .unwrap();
    assert_eq!(pending.total_price, 25.0);
}

#[tokio::test]
async fn a_service_longer_than_the_day_cannot_take_a_time_slot() {
    let s = scheduler().await;
    let day = date(2024, 6, 3);
    db::seed_service(&s.db, "marathon", "Full makeover", 1380, 400.0)
        .await
        .unwrap();

    // 23 hours from 10:00 wraps around midnight to 09:00
    let mut request = timed(BARBER, day, time(10, 0));
    request.service_ids = vec!["marathon".to_string()];
    let outcome = slots::book_slot(&s, request).await.unwrap();
    assert_eq!(outcome.booking_type, AppointmentType::Queue);
    assert_eq!(outcome.appointment.appointment_time, None);
}

#[tokio::test]
async fn concurrent_walk_ins_never_share_a_position() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("trimline.db").display());
    let pool = db::connect(&url, 5).await.unwrap();
    let s = scheduler_with(pool).await;
    let day = date(2024, 6, 3);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                match slots::book_slot(&s, walk_in(BARBER, day, false)).await {
                    Ok(_) => return,
                    Err(err) if err.is_retryable() => {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                    Err(err) => panic!("booking failed: {err}"),
                }
            }
            panic!("booking never succeeded");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let got = positions(&s, BARBER, day).await;
    assert_eq!(got, (1..=8).collect::<Vec<i64>>());
}
