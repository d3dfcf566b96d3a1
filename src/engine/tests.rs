use super::*;
use crate::calendar::{DateOverride, WeeklyHours};
use crate::limits::*;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// A Friday.
fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 5).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_time(t(h, m))
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("maitre_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new()), EngineSettings::default()).unwrap()
}

/// Restaurant open 17:00–22:00 every day.
async fn open_restaurant(engine: &Engine, slot_minutes: u32) -> Ulid {
    let rid = Ulid::new();
    engine
        .create_restaurant(rid, "Chez Test".into(), format!("chez-{rid}"), slot_minutes)
        .await
        .unwrap();
    for weekday in 0..7 {
        engine
            .set_weekly_hours(
                rid,
                WeeklyHours {
                    weekday,
                    opens_at: t(17, 0),
                    closes_at: t(22, 0),
                    is_closed: false,
                },
            )
            .await
            .unwrap();
    }
    rid
}

/// Tables numbered 1.. with the given capacities.
async fn add_tables(engine: &Engine, rid: Ulid, capacities: &[u32]) -> Vec<Ulid> {
    let mut ids = Vec::new();
    for (i, &capacity) in capacities.iter().enumerate() {
        let id = Ulid::new();
        engine.add_table(id, rid, i as u32 + 1, capacity).await.unwrap();
        ids.push(id);
    }
    ids
}

async fn request(engine: &Engine, rid: Ulid, time: NaiveTime, party_size: u32) -> RequestOutcome {
    engine
        .request_booking(Ulid::new(), rid, day(), time, party_size, Some("guest".into()), None)
        .await
        .unwrap()
}

fn confirmed(outcome: RequestOutcome) -> (Ulid, Ulid) {
    match outcome {
        RequestOutcome::Confirmed { booking_id, table_id } => (booking_id, table_id),
        other => panic!("expected confirmation, got {other:?}"),
    }
}

fn waitlisted(outcome: RequestOutcome) -> (Ulid, u32) {
    match outcome {
        RequestOutcome::Waitlisted {
            entry_id,
            priority_order,
        } => (entry_id, priority_order),
        other => panic!("expected waitlist, got {other:?}"),
    }
}

async fn table_status(engine: &Engine, id: Ulid) -> TableStatus {
    engine.table_info(id).await.unwrap().status
}

#[tokio::test]
async fn smallest_sufficient_table_wins() {
    let engine = new_engine("smallest_fit.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[2, 4, 4, 6]).await;

    let candidates = engine.find_candidate_tables(rid, day(), t(19, 0), 3).await.unwrap();
    let numbers: Vec<u32> = candidates.iter().map(|c| c.table_number).collect();
    assert_eq!(numbers, vec![2, 3, 4]);

    let (booking_id, table_id) = confirmed(request(&engine, rid, t(19, 0), 3).await);
    assert_eq!(table_id, tables[1]);
    assert_eq!(table_status(&engine, table_id).await, TableStatus::Reserved);

    let booking = engine.booking_info(booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.assignment_method, AssignmentMethod::Auto);
    assert_eq!(booking.duration_minutes, 60);
    assert!(!booking.was_on_waitlist);

    // Next party of three takes the other four-top.
    let (_, second) = confirmed(request(&engine, rid, t(19, 0), 3).await);
    assert_eq!(second, tables[2]);
}

#[tokio::test]
async fn adjacent_bookings_share_a_table() {
    let engine = new_engine("adjacent.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let (_, a) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    let (_, b) = confirmed(request(&engine, rid, t(20, 0), 2).await);
    assert_eq!(a, tables[0]);
    assert_eq!(b, tables[0]);
}

#[tokio::test]
async fn closed_times_are_an_outcome_not_an_error() {
    let engine = new_engine("closed_outcome.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    assert_eq!(request(&engine, rid, t(12, 0), 2).await, RequestOutcome::Closed);
    assert_eq!(request(&engine, rid, t(22, 0), 2).await, RequestOutcome::Closed);

    engine
        .set_date_override(rid, day(), DateOverride::Closed)
        .await
        .unwrap();
    assert_eq!(request(&engine, rid, t(19, 0), 2).await, RequestOutcome::Closed);
    assert!(engine.find_candidate_tables(rid, day(), t(19, 0), 2).await.unwrap().is_empty());
    assert!(engine.get_available_slots(rid, day(), 2).await.unwrap().is_empty());

    engine.remove_date_override(rid, day()).await.unwrap();
    confirmed(request(&engine, rid, t(19, 0), 2).await);
}

#[tokio::test]
async fn unconfigured_weekday_is_closed() {
    let engine = new_engine("unconfigured_weekday.wal");
    let rid = Ulid::new();
    engine.create_restaurant(rid, "Fridays".into(), "fridays".into(), 60).await.unwrap();
    engine
        .set_weekly_hours(
            rid,
            WeeklyHours {
                weekday: 5,
                opens_at: t(17, 0),
                closes_at: t(22, 0),
                is_closed: false,
            },
        )
        .await
        .unwrap();
    add_tables(&engine, rid, &[4]).await;

    let saturday = day().succ_opt().unwrap();
    assert!(!engine.is_open(rid, saturday, t(19, 0)).await.unwrap());
    assert!(engine.generate_slots(rid, saturday).await.unwrap().is_empty());
    let outcome = engine
        .request_booking(Ulid::new(), rid, saturday, t(19, 0), 2, None, None)
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Closed);

    assert!(engine.is_open(rid, day(), t(19, 0)).await.unwrap());
    assert_eq!(engine.generate_slots(rid, day()).await.unwrap().len(), 5);
}

#[tokio::test]
async fn custom_hours_replace_weekly_hours() {
    let engine = new_engine("custom_hours.wal");
    let rid = open_restaurant(&engine, 60).await;
    engine
        .set_date_override(
            rid,
            day(),
            DateOverride::Custom {
                opens_at: t(12, 0),
                closes_at: t(14, 0),
                is_closed: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(engine.generate_slots(rid, day()).await.unwrap(), vec![t(12, 0), t(13, 0)]);
    assert!(!engine.is_open(rid, day(), t(19, 0)).await.unwrap());

    let err = engine
        .set_date_override(
            rid,
            day(),
            DateOverride::Custom {
                opens_at: t(14, 0),
                closes_at: t(12, 0),
                is_closed: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn off_grid_time_is_rejected() {
    let engine = new_engine("off_grid.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let err = engine
        .request_booking(Ulid::new(), rid, day(), t(19, 30), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotBookableSlot { .. }));
    // 21:30 is open, but a 60 minute slot would run past closing.
    let err = engine
        .request_booking(Ulid::new(), rid, day(), t(21, 30), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotBookableSlot { .. }));
}

#[tokio::test]
async fn request_validation() {
    let engine = new_engine("request_validation.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let err = engine
        .request_booking(Ulid::new(), rid, day(), t(19, 0), 0, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = engine
        .request_booking(Ulid::new(), rid, day(), t(19, 0), MAX_PARTY_SIZE + 1, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let id = Ulid::new();
    engine
        .request_booking(id, rid, day(), t(19, 0), 2, None, None)
        .await
        .unwrap();
    let err = engine
        .request_booking(id, rid, day(), t(20, 0), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(dup) if dup == id));

    let err = engine
        .request_booking(Ulid::new(), Ulid::new(), day(), t(19, 0), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn full_slot_waitlists_in_arrival_order() {
    let engine = new_engine("waitlist_fifo.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    confirmed(request(&engine, rid, t(19, 0), 2).await);
    let (b, pb) = waitlisted(request(&engine, rid, t(19, 0), 2).await);
    let (c, pc) = waitlisted(request(&engine, rid, t(19, 0), 4).await);
    assert_eq!((pb, pc), (1, 2));

    // A different bucket has its own sequence.
    confirmed(request(&engine, rid, t(20, 0), 2).await);
    let (_, other) = waitlisted(request(&engine, rid, t(20, 0), 2).await);
    assert_eq!(other, 1);

    let entries = engine.list_waitlist(rid, Some(day())).await.unwrap();
    let at_seven: Vec<Ulid> = entries.iter().filter(|e| e.time == t(19, 0)).map(|e| e.id).collect();
    assert_eq!(at_seven, vec![b, c]);
    assert!(entries.iter().all(|e| e.status == WaitlistStatus::Waiting));
}

#[tokio::test]
async fn cancellation_promotes_the_first_waiting_entry() {
    let engine = new_engine("cancel_promotes.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let (a, table) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    let (b, _) = waitlisted(request(&engine, rid, t(19, 0), 3).await);
    let (c, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    let cancelled = engine
        .update_booking_status(a, BookingStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let entry_b = engine.waitlist_entry(b).await.unwrap();
    assert_eq!(entry_b.status, WaitlistStatus::Promoted);
    let promoted = engine.booking_info(entry_b.booking_id.unwrap()).await.unwrap();
    assert_eq!(promoted.status, BookingStatus::Confirmed);
    assert_eq!(promoted.table_id, Some(table));
    assert_eq!(promoted.party_size, 3);
    assert!(promoted.was_on_waitlist);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Reserved);

    let entry_c = engine.waitlist_entry(c).await.unwrap();
    assert_eq!(entry_c.status, WaitlistStatus::Waiting);
    assert_eq!(entry_c.priority_order, 2);
}

#[tokio::test]
async fn promotion_is_idempotent() {
    let engine = new_engine("promote_idempotent.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let (a, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    let (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    assert_eq!(
        engine.promote_waitlist_entry(entry).await.unwrap(),
        Promotion::StillWaiting
    );

    engine.update_booking_status(a, BookingStatus::NoShow).await.unwrap();
    let booking_id = engine.waitlist_entry(entry).await.unwrap().booking_id.unwrap();

    for _ in 0..3 {
        assert_eq!(
            engine.promote_waitlist_entry(entry).await.unwrap(),
            Promotion::AlreadyPromoted { booking_id }
        );
    }
    let from_waitlist = engine
        .list_bookings(rid, Some(day()))
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.was_on_waitlist)
        .count();
    assert_eq!(from_waitlist, 1);
}

#[tokio::test]
async fn cancelled_entries_are_never_promoted() {
    let engine = new_engine("cancelled_entry.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let (a, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    let (first, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);
    let (second, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    let entry = engine.cancel_waitlist_entry(first).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Cancelled);
    // Cancelling twice is a no-op.
    assert_eq!(
        engine.cancel_waitlist_entry(first).await.unwrap().status,
        WaitlistStatus::Cancelled
    );
    let err = engine.promote_waitlist_entry(first).await.unwrap_err();
    assert!(matches!(err, EngineError::WaitlistEntryClosed(id) if id == first));

    engine.update_booking_status(a, BookingStatus::Cancelled).await.unwrap();
    assert_eq!(
        engine.waitlist_entry(first).await.unwrap().status,
        WaitlistStatus::Cancelled
    );
    assert_eq!(
        engine.waitlist_entry(second).await.unwrap().status,
        WaitlistStatus::Promoted
    );

    // A promoted entry stays promoted.
    assert_eq!(
        engine.cancel_waitlist_entry(second).await.unwrap().status,
        WaitlistStatus::Promoted
    );
}

#[tokio::test]
async fn entry_that_does_not_fit_does_not_block_the_queue() {
    let engine = new_engine("non_blocking_queue.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[2]).await;

    let (a, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    let (big, _) = waitlisted(request(&engine, rid, t(19, 0), 4).await);
    let (small, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    engine.update_booking_status(a, BookingStatus::Cancelled).await.unwrap();
    assert_eq!(engine.waitlist_entry(big).await.unwrap().status, WaitlistStatus::Waiting);
    assert_eq!(engine.waitlist_entry(small).await.unwrap().status, WaitlistStatus::Promoted);
}

#[tokio::test]
async fn freed_interval_reaches_overlapping_buckets() {
    let engine = new_engine("overlapping_buckets.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let (a, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);

    // Finer slots from now on; the existing booking keeps its hour.
    engine.set_slot_duration(rid, 30).await.unwrap();
    assert_eq!(engine.booking_info(a).await.unwrap().duration_minutes, 60);

    let (half_past, _) = waitlisted(request(&engine, rid, t(19, 30), 2).await);
    confirmed(request(&engine, rid, t(20, 0), 2).await);

    engine.update_booking_status(a, BookingStatus::Cancelled).await.unwrap();
    let entry = engine.waitlist_entry(half_past).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Promoted);
    let promoted = engine.booking_info(entry.booking_id.unwrap()).await.unwrap();
    assert_eq!(promoted.table_id, Some(tables[0]));
    assert_eq!(promoted.duration_minutes, 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_the_last_table() {
    let settings = EngineSettings {
        lock_timeout: std::time::Duration::from_secs(5),
        ..EngineSettings::default()
    };
    let engine = Arc::new(
        Engine::new(test_wal_path("race.wal"), Arc::new(NotifyHub::new()), settings).unwrap(),
    );
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let n = 16;
    let mut handles = Vec::new();
    for _ in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.request_booking(Ulid::new(), rid, day(), t(19, 0), 2, None, None)
                .await
        }));
    }

    let mut confirmations = 0;
    let mut priorities = Vec::new();
    for h in handles {
        match h.await.unwrap().unwrap() {
            RequestOutcome::Confirmed { .. } => confirmations += 1,
            RequestOutcome::Waitlisted { priority_order, .. } => priorities.push(priority_order),
            RequestOutcome::Closed => panic!("restaurant is open"),
        }
    }
    assert_eq!(confirmations, 1);
    priorities.sort_unstable();
    assert_eq!(priorities, (1..n as u32).collect::<Vec<_>>());

    let holding = engine
        .list_bookings(rid, Some(day()))
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.holds_table())
        .count();
    assert_eq!(holding, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_release_and_request_never_loses_an_entry() {
    let engine = Arc::new(new_engine("release_race.wal"));
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    for _ in 0..10 {
        let (holder, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
        let eng = engine.clone();
        let release = tokio::spawn(async move {
            eng.update_booking_status(holder, BookingStatus::Cancelled).await
        });
        let outcome = engine
            .request_booking(Ulid::new(), rid, day(), t(19, 0), 2, None, None)
            .await
            .unwrap();
        release.await.unwrap().unwrap();

        // Whichever way the race went, the table ends up held by the newcomer.
        let holders: Vec<Booking> = engine
            .list_bookings(rid, Some(day()))
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.holds_table())
            .collect();
        assert_eq!(holders.len(), 1, "outcome {outcome:?}");
        assert_eq!(holders[0].table_id, Some(tables[0]));

        let id = holders[0].id;
        engine.update_booking_status(id, BookingStatus::Cancelled).await.unwrap();
    }
}

#[tokio::test]
async fn state_machine_drives_table_status() {
    let engine = new_engine("state_machine.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;
    let table = tables[0];

    let (a, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    assert_eq!(table_status(&engine, table).await, TableStatus::Reserved);

    engine.update_booking_status(a, BookingStatus::Seated).await.unwrap();
    assert_eq!(table_status(&engine, table).await, TableStatus::Occupied);

    let err = engine
        .update_booking_status(a, BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: BookingStatus::Seated,
            to: BookingStatus::Cancelled
        }
    ));

    engine.update_booking_status(a, BookingStatus::Completed).await.unwrap();
    assert_eq!(table_status(&engine, table).await, TableStatus::Available);

    let err = engine
        .update_booking_status(a, BookingStatus::Seated)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(engine.booking_info(a).await.unwrap().status, BookingStatus::Completed);

    let (b, _) = confirmed(request(&engine, rid, t(20, 0), 2).await);
    engine.update_booking_status(b, BookingStatus::NoShow).await.unwrap();
    assert_eq!(table_status(&engine, table).await, TableStatus::Available);
}

#[tokio::test]
async fn releasing_one_booking_keeps_a_seated_table_occupied() {
    let engine = new_engine("seated_stays_occupied.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let (early, _) = confirmed(request(&engine, rid, t(18, 0), 2).await);
    let (late, _) = confirmed(request(&engine, rid, t(20, 0), 2).await);
    engine.update_booking_status(early, BookingStatus::Seated).await.unwrap();
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Occupied);

    // A later confirmation does not flip an occupied table back to reserved.
    confirmed(request(&engine, rid, t(21, 0), 2).await);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Occupied);

    engine.update_booking_status(late, BookingStatus::Cancelled).await.unwrap();
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Occupied);
}

#[tokio::test]
async fn pending_booking_gets_a_table_on_confirmation() {
    let engine = new_engine("pending_confirm.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[2, 6]).await;

    let pending = engine
        .create_pending_booking(Ulid::new(), rid, day(), t(19, 0), 5, Some("Ines".into()), None)
        .await
        .unwrap();
    assert_eq!(pending.status, BookingStatus::Pending);
    assert_eq!(pending.table_id, None);
    assert_eq!(table_status(&engine, tables[1]).await, TableStatus::Available);

    let booking = engine
        .update_booking_status(pending.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(booking.table_id, Some(tables[1]));
    assert_eq!(booking.assignment_method, AssignmentMethod::Auto);
    assert_eq!(table_status(&engine, tables[1]).await, TableStatus::Reserved);
}

#[tokio::test]
async fn pending_confirmation_without_a_table_is_rejected() {
    let engine = new_engine("pending_no_table.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[2]).await;

    let pending = engine
        .create_pending_booking(Ulid::new(), rid, day(), t(19, 0), 4, None, None)
        .await
        .unwrap();
    let err = engine
        .update_booking_status(pending.id, BookingStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoTableAvailable));
    assert_eq!(
        engine.booking_info(pending.id).await.unwrap().status,
        BookingStatus::Pending
    );

    let cancelled = engine
        .update_booking_status(pending.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn pending_booking_with_a_table_holds_it() {
    let engine = new_engine("pending_holds.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let pending = engine
        .create_pending_booking(Ulid::new(), rid, day(), t(19, 0), 2, None, None)
        .await
        .unwrap();
    engine.assign_table_manually(pending.id, tables[0]).await.unwrap();
    // Pending assignments hold capacity but leave the status alone.
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Available);
    let (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    engine
        .update_booking_status(pending.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(engine.waitlist_entry(entry).await.unwrap().status, WaitlistStatus::Promoted);
}

#[tokio::test]
async fn manual_assignment_checks_the_table() {
    let engine = new_engine("manual_assign.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[2, 4, 4, 1]).await;
    engine.set_table_maintenance(tables[2], true).await.unwrap();

    let (a, on) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    assert_eq!(on, tables[0]);

    let err = engine.assign_table_manually(a, tables[2]).await.unwrap_err();
    assert!(matches!(err, EngineError::TableInMaintenance(id) if id == tables[2]));
    let err = engine.assign_table_manually(a, tables[3]).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientCapacity { capacity: 1, party_size: 2, .. }));

    // Same table is a no-op.
    let same = engine.assign_table_manually(a, tables[0]).await.unwrap();
    assert_eq!(same.assignment_method, AssignmentMethod::Auto);

    let moved = engine.assign_table_manually(a, tables[1]).await.unwrap();
    assert_eq!(moved.table_id, Some(tables[1]));
    assert_eq!(moved.assignment_method, AssignmentMethod::Manual);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Available);
    assert_eq!(table_status(&engine, tables[1]).await, TableStatus::Reserved);

    // Nothing seats three now; moving back frees the four-top for them.
    let (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 3).await);
    engine.assign_table_manually(a, tables[0]).await.unwrap();
    let entry = engine.waitlist_entry(entry).await.unwrap();
    assert_eq!(entry.status, WaitlistStatus::Promoted);
    let promoted = engine.booking_info(entry.booking_id.unwrap()).await.unwrap();
    assert_eq!(promoted.table_id, Some(tables[1]));

    let (b, _) = confirmed(request(&engine, rid, t(20, 0), 2).await);
    let err = engine.assign_table_manually(b, tables[1]).await;
    assert!(err.is_ok(), "20:00 does not overlap 19:00");
    let err = engine.assign_table_manually(a, tables[1]).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    engine.update_booking_status(b, BookingStatus::Seated).await.unwrap();
    let err = engine.assign_table_manually(b, tables[0]).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn walk_in_occupies_and_release_promotes() {
    let engine = new_engine("walk_in.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let walk_in = engine
        .mark_table_occupied(Ulid::new(), tables[0], Some(2), at(19, 20))
        .await
        .unwrap();
    assert!(walk_in.is_walk_in);
    assert_eq!(walk_in.status, BookingStatus::Seated);
    assert_eq!(walk_in.time, t(19, 0));
    assert_eq!(walk_in.customer, None);
    assert_eq!(walk_in.assignment_method, AssignmentMethod::Manual);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Occupied);

    let (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    engine.mark_table_available(tables[0]).await.unwrap();
    assert_eq!(
        engine.booking_info(walk_in.id).await.unwrap().status,
        BookingStatus::Completed
    );
    assert_eq!(engine.waitlist_entry(entry).await.unwrap().status, WaitlistStatus::Promoted);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Reserved);
}

#[tokio::test]
async fn walk_in_needs_a_free_table() {
    let engine = new_engine("walk_in_conflict.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    confirmed(request(&engine, rid, t(19, 0), 2).await);
    let err = engine
        .mark_table_occupied(Ulid::new(), tables[0], None, at(19, 45))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    // Party defaults to the table's capacity.
    let walk_in = engine
        .mark_table_occupied(Ulid::new(), tables[0], None, at(20, 5))
        .await
        .unwrap();
    assert_eq!(walk_in.party_size, 4);
}

#[tokio::test]
async fn maintenance_blocks_and_returning_promotes() {
    let engine = new_engine("maintenance.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    engine.set_table_maintenance(tables[0], true).await.unwrap();
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Maintenance);
    let slots = engine.get_available_slots(rid, day(), 2).await.unwrap();
    assert!(slots.iter().all(|s| !s.available));

    let (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);

    let table = engine.set_table_maintenance(tables[0], false).await.unwrap();
    assert_eq!(engine.waitlist_entry(entry).await.unwrap().status, WaitlistStatus::Promoted);
    assert_eq!(table.id, tables[0]);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Reserved);
}

#[tokio::test]
async fn maintenance_survives_booking_side_effects() {
    let engine = new_engine("maintenance_sticky.wal");
    let rid = open_restaurant(&engine, 60).await;
    let tables = add_tables(&engine, rid, &[4]).await;

    let (a, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    engine.set_table_maintenance(tables[0], true).await.unwrap();
    engine.update_booking_status(a, BookingStatus::Cancelled).await.unwrap();
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Maintenance);

    engine.mark_table_available(tables[0]).await.unwrap();
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Available);
}

#[tokio::test]
async fn available_slots_reflect_bookings() {
    let engine = new_engine("available_slots.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    confirmed(request(&engine, rid, t(19, 0), 2).await);
    let slots = engine.get_available_slots(rid, day(), 2).await.unwrap();
    let times: Vec<NaiveTime> = slots.iter().map(|s| s.time).collect();
    assert_eq!(times, vec![t(17, 0), t(18, 0), t(19, 0), t(20, 0), t(21, 0)]);
    let open: Vec<bool> = slots.iter().map(|s| s.available).collect();
    assert_eq!(open, vec![true, true, false, true, true]);

    // Nobody seats six.
    let slots = engine.get_available_slots(rid, day(), 6).await.unwrap();
    assert!(slots.iter().all(|s| !s.available));
}

#[tokio::test]
async fn inventory_validation() {
    let engine = new_engine("inventory.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let err = engine.add_table(Ulid::new(), rid, 1, 2).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTableNumber(1)));
    let err = engine.add_table(Ulid::new(), rid, 2, 0).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    let err = engine
        .add_table(Ulid::new(), rid, 2, MAX_TABLE_CAPACITY + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine
        .create_restaurant(Ulid::new(), "Dup".into(), format!("chez-{rid}"), 60)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    let err = engine
        .create_restaurant(Ulid::new(), "Odd".into(), "odd".into(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine
        .set_weekly_hours(
            rid,
            WeeklyHours {
                weekday: 7,
                opens_at: t(17, 0),
                closes_at: t(22, 0),
                is_closed: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let tables = engine.list_tables(rid).await.unwrap();
    assert_eq!(tables.len(), 1);
}

#[tokio::test]
async fn lock_contention_surfaces_as_retryable_error() {
    let settings = EngineSettings {
        lock_timeout: std::time::Duration::from_millis(20),
        lock_attempts: 2,
        lock_backoff: std::time::Duration::from_millis(1),
    };
    let engine = Engine::new(
        test_wal_path("contention.wal"),
        Arc::new(NotifyHub::new()),
        settings,
    )
    .unwrap();
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4, 4]).await;

    let key = BucketKey {
        restaurant_id: rid,
        date: day(),
        time: t(19, 0),
    };
    let held = engine.try_reserve(key, 2).await.unwrap().expect("a table is free");
    assert_eq!(held.table().table_number, 1);

    let err = engine
        .request_booking(Ulid::new(), rid, day(), t(19, 0), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Contention { attempts: 2 }));
    assert!(err.is_transient());

    // Dropping an uncommitted reservation leaves the table untouched.
    drop(held);
    let (_, table) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    assert_eq!(engine.table_info(table).await.unwrap().table_number, 1);
}

#[tokio::test]
async fn subscribers_see_committed_events() {
    let engine = new_engine("subscribe.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4]).await;

    let mut rx = engine.subscribe(rid);
    let (booking_id, _) = confirmed(request(&engine, rid, t(19, 0), 2).await);
    match rx.recv().await.unwrap() {
        Event::BookingCreated { booking, table_status } => {
            assert_eq!(booking.id, booking_id);
            assert_eq!(table_status, Some(TableStatus::Reserved));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let notify = Arc::new(NotifyHub::new());
    let (rid, tables, a, entry, tail);
    {
        let engine = Engine::new(path.clone(), notify.clone(), EngineSettings::default()).unwrap();
        rid = open_restaurant(&engine, 60).await;
        tables = add_tables(&engine, rid, &[4, 2]).await;
        engine
            .set_date_override(rid, day().succ_opt().unwrap(), DateOverride::Closed)
            .await
            .unwrap();

        (a, _) = confirmed(request(&engine, rid, t(19, 0), 4).await);
        (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 3).await);
        (tail, _) = waitlisted(request(&engine, rid, t(19, 0), 4).await);
        engine.update_booking_status(a, BookingStatus::Cancelled).await.unwrap();
        engine
            .mark_table_occupied(Ulid::new(), tables[1], Some(2), at(18, 10))
            .await
            .unwrap();
    }

    let engine = Engine::new(path, notify, EngineSettings::default()).unwrap();
    assert_eq!(engine.booking_info(a).await.unwrap().status, BookingStatus::Cancelled);
    let promoted = engine.waitlist_entry(entry).await.unwrap();
    assert_eq!(promoted.status, WaitlistStatus::Promoted);
    let booking = engine.booking_info(promoted.booking_id.unwrap()).await.unwrap();
    assert_eq!(booking.table_id, Some(tables[0]));
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Reserved);
    assert_eq!(table_status(&engine, tables[1]).await, TableStatus::Occupied);
    assert!(!engine.is_open(rid, day().succ_opt().unwrap(), t(19, 0)).await.unwrap());

    // Allocations were rebuilt: the four-top is still taken at 19:00.
    assert!(
        engine
            .find_candidate_tables(rid, day(), t(19, 0), 3)
            .await
            .unwrap()
            .is_empty()
    );
    // Priorities keep counting from where they were.
    let (_, next) = waitlisted(request(&engine, rid, t(19, 0), 4).await);
    assert_eq!(next, 3);
    assert_eq!(engine.waitlist_entry(tail).await.unwrap().priority_order, 2);
}

#[tokio::test]
async fn compact_wal_survives_restart() {
    let path = test_wal_path("compact_restart.wal");
    let notify = Arc::new(NotifyHub::new());
    let (rid, tables, entry);
    let before;
    {
        let engine = Engine::new(path.clone(), notify.clone(), EngineSettings::default()).unwrap();
        rid = open_restaurant(&engine, 60).await;
        tables = add_tables(&engine, rid, &[4]).await;

        // Churn.
        for _ in 0..10 {
            let (id, _) = confirmed(request(&engine, rid, t(18, 0), 2).await);
            engine.update_booking_status(id, BookingStatus::Cancelled).await.unwrap();
        }
        confirmed(request(&engine, rid, t(19, 0), 2).await);
        (entry, _) = waitlisted(request(&engine, rid, t(19, 0), 2).await);
        assert!(engine.wal_appends_since_compact().await > 0);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Appends after compaction land in the new file.
        engine.set_table_maintenance(tables[0], true).await.unwrap();
        before = engine.list_bookings(rid, None).await.unwrap();
    }

    let engine = Engine::new(path, notify, EngineSettings::default()).unwrap();
    assert_eq!(engine.list_bookings(rid, None).await.unwrap(), before);
    assert_eq!(table_status(&engine, tables[0]).await, TableStatus::Maintenance);
    assert_eq!(engine.waitlist_entry(entry).await.unwrap().status, WaitlistStatus::Waiting);
    assert_eq!(engine.list_restaurants().await.len(), 1);
    assert_eq!(engine.generate_slots(rid, day()).await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_retries_of_one_request_book_once() {
    let engine = Arc::new(new_engine("same_id_race.wal"));
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[4, 4]).await;

    for _ in 0..20 {
        let id = Ulid::new();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let eng = engine.clone();
                tokio::spawn(async move {
                    eng.request_booking(id, rid, day(), t(19, 0), 2, None, None).await
                })
            })
            .collect();
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(outcome) => {
                    confirmed(outcome);
                    ok += 1;
                }
                Err(EngineError::AlreadyExists(dup)) => assert_eq!(dup, id),
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert_eq!(ok, 1);

        // Exactly one table was taken, and cancelling gives it back.
        let free = engine.find_candidate_tables(rid, day(), t(19, 0), 2).await.unwrap();
        assert_eq!(free.len(), 1);
        engine.update_booking_status(id, BookingStatus::Cancelled).await.unwrap();
        let free = engine.find_candidate_tables(rid, day(), t(19, 0), 2).await.unwrap();
        assert_eq!(free.len(), 2);
    }

    // A late retry of a settled request is refused too.
    let (id, _) = confirmed(request(&engine, rid, t(20, 0), 2).await);
    let err = engine
        .request_booking(id, rid, day(), t(20, 0), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    let err = engine
        .mark_table_occupied(id, Ulid::new(), None, at(18, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compaction_during_writes_keeps_every_event() {
    let path = test_wal_path("compact_race.wal");
    let notify = Arc::new(NotifyHub::new());
    let settings = EngineSettings {
        lock_timeout: std::time::Duration::from_secs(5),
        ..EngineSettings::default()
    };
    let rid;
    let (bookings, waitlist);
    {
        let engine = Arc::new(Engine::new(path.clone(), notify.clone(), settings).unwrap());
        rid = open_restaurant(&engine, 60).await;
        add_tables(&engine, rid, &[4; 30]).await;

        let mut handles = Vec::new();
        for i in 0..200u32 {
            let eng = engine.clone();
            let time = t(17 + i % 5, 0);
            handles.push(tokio::spawn(async move {
                eng.request_booking(Ulid::new(), rid, day(), time, 2, None, None)
                    .await
                    .map(|_| ())
            }));
            if i % 10 == 0 {
                let eng = engine.clone();
                handles.push(tokio::spawn(async move { eng.compact_wal().await }));
            }
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        bookings = engine.list_bookings(rid, None).await.unwrap();
        waitlist = engine.list_waitlist(rid, None).await.unwrap();
        assert_eq!(bookings.len() + waitlist.len(), 200);
    }

    let engine = Engine::new(path, notify, settings).unwrap();
    assert_eq!(engine.list_bookings(rid, None).await.unwrap(), bookings);
    assert_eq!(engine.list_waitlist(rid, None).await.unwrap(), waitlist);
    // Every four-top is held for every slot, so nothing is free after restart.
    for hour in 17..22 {
        assert!(
            engine
                .find_candidate_tables(rid, day(), t(hour, 0), 2)
                .await
                .unwrap()
                .is_empty()
        );
    }
}

#[tokio::test]
async fn buckets_live_only_while_someone_waits() {
    let engine = new_engine("bucket_pruning.wal");
    let rid = open_restaurant(&engine, 60).await;
    add_tables(&engine, rid, &[2]).await;

    // Confirmations leave nothing behind.
    let (a, _) = confirmed(request(&engine, rid, t(18, 0), 2).await);
    confirmed(request(&engine, rid, t(19, 0), 2).await);
    assert_eq!(engine.buckets.len(), 0);

    // A queue keeps its bucket until it drains.
    let (first, p1) = waitlisted(request(&engine, rid, t(18, 0), 2).await);
    let (second, p2) = waitlisted(request(&engine, rid, t(18, 0), 2).await);
    assert_eq!((p1, p2), (1, 2));
    assert_eq!(engine.buckets.len(), 1);

    engine.cancel_waitlist_entry(first).await.unwrap();
    assert_eq!(engine.buckets.len(), 1);
    engine.update_booking_status(a, BookingStatus::Cancelled).await.unwrap();
    assert_eq!(engine.waitlist_entry(second).await.unwrap().status, WaitlistStatus::Promoted);
    assert_eq!(engine.buckets.len(), 0);

    // A drained slot keeps counting where it left off.
    let (_, next) = waitlisted(request(&engine, rid, t(18, 0), 2).await);
    assert_eq!(next, 3);
    assert_eq!(engine.prune_idle_buckets(), 1);
}

#[tokio::test]
async fn hours_past_midnight_are_refused() {
    let engine = new_engine("overnight_hours.wal");
    let rid = open_restaurant(&engine, 60).await;

    let overnight = WeeklyHours {
        weekday: 5,
        opens_at: t(18, 0),
        closes_at: t(1, 0),
        is_closed: false,
    };
    let err = engine.set_weekly_hours(rid, overnight).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = engine
        .set_date_override(
            rid,
            day(),
            DateOverride::Custom {
                opens_at: t(18, 0),
                closes_at: t(1, 0),
                is_closed: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    // The day keeps its earlier hours.
    assert_eq!(engine.generate_slots(rid, day()).await.unwrap().len(), 5);
}
