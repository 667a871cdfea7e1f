use chrono::{NaiveDate, Utc};

use super::*;
use crate::notify::{DomainEvent, NewNotification};

// ── Helpers ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("campusbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn slot(start: &str, end: &str) -> TimeSlot {
    TimeSlot::parse(start, end).unwrap()
}

/// Insert a user without paying for a password hash.
async fn seed_user(engine: &Engine, email: &str, role: Role) -> Ulid {
    let user = User {
        id: Ulid::new(),
        number: engine.next_user_number.fetch_add(1, Ordering::Relaxed),
        name: email.split('@').next().unwrap_or(email).to_string(),
        email: email.to_string(),
        role,
        password_hash: String::new(),
        contact: "9876543210".into(),
        department: "Computer Science".into(),
        registered_at: now_ms(),
    };
    let id = user.id;
    engine
        .persist_and_apply(None, Event::UserRegistered { user })
        .await
        .unwrap();
    id
}

fn facility_input(name: &str) -> FacilityInput {
    FacilityInput {
        name: name.into(),
        kind: FacilityType::SeminarHall,
        capacity: 80,
        location: "Academic Block B".into(),
        description: "Modern seminar hall".into(),
        amenities: vec!["Projector".into(), "AC".into()],
        hours: Facility::default_hours(),
        status: FacilityStatus::Active,
    }
}

async fn seed_facility(engine: &Engine, admin: Ulid, name: &str) -> Ulid {
    engine
        .create_facility(admin, facility_input(name))
        .await
        .unwrap()
        .id
}

struct World {
    engine: Engine,
    admin: Ulid,
    alice: Ulid,
    bob: Ulid,
    hall: Ulid,
}

async fn world(name: &str) -> World {
    let engine = new_engine(name);
    let admin = seed_user(&engine, "admin@campus.edu", Role::Admin).await;
    let alice = seed_user(&engine, "alice@campus.edu", Role::User).await;
    let bob = seed_user(&engine, "bob@campus.edu", Role::User).await;
    let hall = seed_facility(&engine, admin, "Seminar Hall A").await;
    World {
        engine,
        admin,
        alice,
        bob,
        hall,
    }
}

// ── Booking conflicts ────────────────────────────────────

#[tokio::test]
async fn request_then_query_round_trip() {
    let w = world("round_trip.wal").await;
    let b = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "Workshop")
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Pending);

    let mine = w.engine.user_bookings(w.alice);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].booking.id, b.id);
    assert_eq!(mine[0].facility_name(), "Seminar Hall A");

    assert!(
        !is_available(&w.engine, w.hall, d("2024-05-01"), &slot("09:00", "10:00"), None)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn approved_morning_slot_blocks_overlaps_only() {
    let w = world("approved_morning.wal").await;
    let first = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "Lecture")
        .await
        .unwrap();
    w.engine
        .set_booking_status(first.id, BookingStatus::Approved, None)
        .await
        .unwrap();

    let overlap = w
        .engine
        .request_booking(w.bob, w.hall, d("2024-05-01"), slot("09:30", "10:30"), "Club")
        .await;
    match overlap {
        Err(EngineError::Conflict(id)) => assert_eq!(id, first.id),
        other => panic!("expected conflict, got {other:?}"),
    }

    w.engine
        .request_booking(w.bob, w.hall, d("2024-05-01"), slot("10:00", "11:00"), "Club")
        .await
        .unwrap();
    w.engine
        .request_booking(w.bob, w.hall, d("2024-05-02"), slot("09:00", "10:00"), "Club")
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_and_rejected_never_block() {
    let w = world("released.wal").await;
    let date = d("2024-05-01");
    let a = w
        .engine
        .request_booking(w.alice, w.hall, date, slot("09:00", "10:00"), "Talk")
        .await
        .unwrap();
    w.engine.cancel_booking(w.alice, a.id).await.unwrap();

    let b = w
        .engine
        .request_booking(w.bob, w.hall, date, slot("09:00", "10:00"), "Talk")
        .await
        .unwrap();
    w.engine
        .set_booking_status(b.id, BookingStatus::Rejected, Some("Exam week".into()))
        .await
        .unwrap();

    assert!(
        is_available(&w.engine, w.hall, date, &slot("09:00", "10:00"), None)
            .await
            .unwrap()
    );
    w.engine
        .request_booking(w.alice, w.hall, date, slot("09:00", "10:00"), "Talk again")
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_must_fit_hours_and_active_facility() {
    let w = world("bookable.wal").await;
    let early = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("08:00", "09:30"), "Early")
        .await;
    assert!(matches!(early, Err(EngineError::OutsideOperatingHours(_))));

    w.engine.toggle_facility(w.hall).await.unwrap();
    let closed = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("10:00", "11:00"), "Closed")
        .await;
    assert!(matches!(closed, Err(EngineError::FacilityUnavailable(_))));

    let blank = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("10:00", "11:00"), "   ")
        .await;
    assert!(matches!(blank, Err(EngineError::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_slot_have_one_winner() {
    let w = world("concurrent_slot.wal").await;
    let engine = Arc::new(w.engine);
    let mut users = Vec::new();
    for i in 0..16 {
        users.push(seed_user(&engine, &format!("student{i}@campus.edu"), Role::User).await);
    }

    let mut handles = Vec::new();
    for user in users {
        let eng = engine.clone();
        let hall = w.hall;
        handles.push(tokio::spawn(async move {
            eng.request_booking(user, hall, d("2024-06-10"), slot("13:00", "15:00"), "Rehearsal")
                .await
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => lost += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(lost, 15);
    assert_eq!(engine.all_bookings(None).len(), 1);
}

/// Every pair of occupying bookings on one facility and date is disjoint,
/// and every refused request really collided with an accepted one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_spread_of_slots_never_overlaps() {
    let w = world("slot_spread.wal").await;
    let engine = Arc::new(w.engine);
    let users = [w.alice, w.bob];
    let dates = [d("2024-07-01"), d("2024-07-02")];

    // 25-minute grid across 09:00-17:00, every start/end pair.
    let points: Vec<ClockTime> = (0..20)
        .map(|k| {
            let m = 9 * 60 + k * 25;
            ClockTime::from_hm(m / 60, m % 60).unwrap()
        })
        .collect();
    let mut requests = Vec::new();
    for (i, &start) in points.iter().enumerate() {
        for &end in &points[i + 1..] {
            for date in dates {
                requests.push((date, TimeSlot::new(start, end)));
            }
        }
    }

    let mut handles = Vec::new();
    for (n, (date, slot)) in requests.into_iter().enumerate() {
        let eng = engine.clone();
        let user = users[n % users.len()];
        let hall = w.hall;
        handles.push(tokio::spawn(async move {
            let result = eng.request_booking(user, hall, date, slot, "Spread").await;
            (date, slot, result)
        }));
    }

    let mut refused = Vec::new();
    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            (_, _, Ok(_)) => accepted += 1,
            (date, slot, Err(EngineError::Conflict(blocking))) => refused.push((date, slot, blocking)),
            (_, _, Err(e)) => panic!("unexpected error: {e}"),
        }
    }
    assert!(accepted >= 2);

    // Approve every other winner; approval keeps the calendar as it is.
    let bookings = engine.all_bookings(None);
    for b in bookings.iter().step_by(2) {
        engine
            .set_booking_status(b.booking.id, BookingStatus::Approved, None)
            .await
            .unwrap();
    }

    let occupying: Vec<Booking> = engine
        .all_bookings(None)
        .into_iter()
        .map(|b| b.booking)
        .filter(|b| b.status.is_occupying())
        .collect();
    assert_eq!(occupying.len(), accepted);
    for (i, a) in occupying.iter().enumerate() {
        for b in &occupying[i + 1..] {
            if a.facility_id == b.facility_id && a.date == b.date {
                assert!(
                    a.slot.end <= b.slot.start || b.slot.end <= a.slot.start,
                    "{} and {} overlap on {}",
                    a.slot,
                    b.slot,
                    a.date
                );
            }
        }
    }

    for (date, slot, blocking) in refused {
        let winner = occupying
            .iter()
            .find(|b| b.id == blocking)
            .expect("blocking booking was accepted");
        assert_eq!(winner.date, date);
        assert!(winner.slot.overlaps(&slot), "{slot} refused by non-overlapping {}", winner.slot);
    }
}

// ── Rescheduling and transitions ─────────────────────────

#[tokio::test]
async fn reschedule_excludes_itself() {
    let w = world("reschedule_self.wal").await;
    let date = d("2024-05-01");
    let b = w
        .engine
        .request_booking(w.alice, w.hall, date, slot("09:00", "10:00"), "Meeting")
        .await
        .unwrap();

    let moved = w
        .engine
        .reschedule_booking(w.alice, b.id, date, slot("09:30", "10:30"))
        .await
        .unwrap();
    assert_eq!(moved.slot, slot("09:30", "10:30"));

    // Old slot is free again, new one is held.
    assert!(is_available(&w.engine, w.hall, date, &slot("09:00", "09:30"), None).await.unwrap());
    assert!(!is_available(&w.engine, w.hall, date, &slot("10:00", "10:30"), None).await.unwrap());
}

#[tokio::test]
async fn reschedule_rules() {
    let w = world("reschedule_rules.wal").await;
    let date = d("2024-05-01");
    let mine = w
        .engine
        .request_booking(w.alice, w.hall, date, slot("09:00", "10:00"), "Mine")
        .await
        .unwrap();
    let theirs = w
        .engine
        .request_booking(w.bob, w.hall, date, slot("11:00", "12:00"), "Theirs")
        .await
        .unwrap();

    let onto_theirs = w
        .engine
        .reschedule_booking(w.alice, mine.id, date, slot("11:30", "12:30"))
        .await;
    assert!(matches!(onto_theirs, Err(EngineError::Conflict(id)) if id == theirs.id));

    let not_mine = w
        .engine
        .reschedule_booking(w.alice, theirs.id, date, slot("14:00", "15:00"))
        .await;
    assert!(matches!(not_mine, Err(EngineError::NotOwner(_))));

    w.engine
        .set_booking_status(mine.id, BookingStatus::Approved, None)
        .await
        .unwrap();
    let approved = w
        .engine
        .reschedule_booking(w.alice, mine.id, date, slot("14:00", "15:00"))
        .await;
    assert!(matches!(approved, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn reopening_is_conflict_checked() {
    let w = world("reopen_conflict.wal").await;
    let date = d("2024-05-01");
    let a = w
        .engine
        .request_booking(w.alice, w.hall, date, slot("09:00", "10:00"), "A")
        .await
        .unwrap();
    w.engine
        .set_booking_status(a.id, BookingStatus::Rejected, None)
        .await
        .unwrap();
    let b = w
        .engine
        .request_booking(w.bob, w.hall, date, slot("09:00", "10:00"), "B")
        .await
        .unwrap();

    let reopen = w.engine.set_booking_status(a.id, BookingStatus::Approved, None).await;
    assert!(matches!(reopen, Err(EngineError::Conflict(id)) if id == b.id));

    w.engine.cancel_booking(w.bob, b.id).await.unwrap();
    let reopened = w
        .engine
        .set_booking_status(a.id, BookingStatus::Approved, None)
        .await
        .unwrap();
    assert_eq!(reopened.status, BookingStatus::Approved);
}

#[tokio::test]
async fn invalid_transitions_rejected() {
    let w = world("invalid_transition.wal").await;
    let b = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "X")
        .await
        .unwrap();
    w.engine
        .set_booking_status(b.id, BookingStatus::Approved, None)
        .await
        .unwrap();

    let back = w.engine.set_booking_status(b.id, BookingStatus::Pending, None).await;
    assert!(matches!(
        back,
        Err(EngineError::InvalidTransition {
            from: BookingStatus::Approved,
            to: BookingStatus::Pending
        })
    ));

    w.engine.cancel_booking(w.alice, b.id).await.unwrap();
    let again = w.engine.cancel_booking(w.alice, b.id).await;
    assert!(matches!(again, Err(EngineError::InvalidTransition { .. })));

    let other = w.engine.cancel_booking(w.bob, b.id).await;
    assert!(matches!(other, Err(EngineError::NotOwner(_))));
}

#[tokio::test]
async fn deleted_facility_keeps_bookings() {
    let w = world("deleted_facility.wal").await;
    let b = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "X")
        .await
        .unwrap();
    w.engine
        .set_booking_status(b.id, BookingStatus::Rejected, None)
        .await
        .unwrap();
    w.engine.delete_facility(w.hall).await.unwrap();

    let mine = w.engine.user_bookings(w.alice);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].facility_name(), "Unknown");

    let reopen = w.engine.set_booking_status(b.id, BookingStatus::Pending, None).await;
    assert!(matches!(reopen, Err(EngineError::NotFound(id)) if id == w.hall));

    tokio_test::assert_ok!(w.engine.delete_booking(b.id).await);
    tokio_test::assert_err!(w.engine.delete_booking(b.id).await);
    assert!(w.engine.user_bookings(w.alice).is_empty());
}

#[tokio::test]
async fn free_windows_follow_bookings() {
    let w = world("free_windows.wal").await;
    let date = d("2024-05-01");
    w.engine
        .request_booking(w.alice, w.hall, date, slot("10:00", "11:00"), "A")
        .await
        .unwrap();
    w.engine
        .request_booking(w.bob, w.hall, date, slot("13:00", "14:30"), "B")
        .await
        .unwrap();

    assert_eq!(
        w.engine.free_windows(w.hall, date).await.unwrap(),
        vec![slot("09:00", "10:00"), slot("11:00", "13:00"), slot("14:30", "17:00")]
    );
    assert_eq!(
        w.engine.free_windows(w.hall, d("2024-05-02")).await.unwrap(),
        vec![Facility::default_hours()]
    );
    assert!(matches!(
        w.engine.free_windows(Ulid::new(), date).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_documents_and_calendars() {
    let path = test_wal_path("replay_all.wal");
    let notify = Arc::new(NotifyHub::new());
    let (alice, hall, kept) = {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        let admin = seed_user(&engine, "admin@campus.edu", Role::Admin).await;
        let alice = seed_user(&engine, "alice@campus.edu", Role::User).await;
        let hall = seed_facility(&engine, admin, "Seminar Hall A").await;
        let kept = engine
            .request_booking(alice, hall, d("2024-05-01"), slot("09:00", "10:00"), "Kept")
            .await
            .unwrap();
        let gone = engine
            .request_booking(alice, hall, d("2024-05-01"), slot("11:00", "12:00"), "Gone")
            .await
            .unwrap();
        engine.cancel_booking(alice, gone.id).await.unwrap();
        (alice, hall, kept.id)
    };

    let engine = Engine::new(path, notify).unwrap();
    assert_eq!(engine.user_count(), 2);
    assert_eq!(engine.user_bookings(alice).len(), 2);
    assert!(matches!(
        engine
            .request_booking(alice, hall, d("2024-05-01"), slot("09:30", "10:30"), "Again")
            .await,
        Err(EngineError::Conflict(id)) if id == kept
    ));
    engine
        .request_booking(alice, hall, d("2024-05-01"), slot("11:00", "12:00"), "Free")
        .await
        .unwrap();

    // Numbering continues after the replayed maximum.
    let next = seed_facility(&engine, alice, "Physics Lab").await;
    assert_eq!(engine.facility(&next).unwrap().number, FIRST_FACILITY_NUMBER + 1);
}

#[tokio::test]
async fn compaction_keeps_state_and_later_appends() {
    let path = test_wal_path("compaction.wal");
    let notify = Arc::new(NotifyHub::new());
    let (alice, booking) = {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        let admin = seed_user(&engine, "admin@campus.edu", Role::Admin).await;
        let alice = seed_user(&engine, "alice@campus.edu", Role::User).await;
        let hall = seed_facility(&engine, admin, "Seminar Hall A").await;
        for _ in 0..5 {
            engine.toggle_facility(hall).await.unwrap();
        }
        engine.toggle_facility(hall).await.unwrap();
        let b = engine
            .request_booking(alice, hall, d("2024-05-01"), slot("09:00", "10:00"), "X")
            .await
            .unwrap();
        engine
            .set_booking_status(b.id, BookingStatus::Approved, None)
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await >= 10);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        engine
            .submit_complaint(
                alice,
                NewComplaint {
                    subject: "Projector".into(),
                    description: "Flickers".into(),
                    category: ComplaintCategory::Facility,
                    priority: ComplaintPriority::High,
                },
            )
            .await
            .unwrap();
        (alice, b.id)
    };

    let engine = Engine::new(path, notify).unwrap();
    assert_eq!(engine.booking(&booking).unwrap().status, BookingStatus::Approved);
    assert_eq!(engine.user_complaints(alice).len(), 1);
    assert_eq!(engine.facilities_by_name()[0].status, FacilityStatus::Active);
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
    let admin = seed_user(&engine, "admin@campus.edu", Role::Admin).await;

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_facility(admin, facility_input(&format!("Room {i}"))).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.facilities_by_name().len(), n);

    let engine2 = Engine::new(path, notify).unwrap();
    let mut numbers: Vec<u32> = engine2.facilities_by_name().iter().map(|f| f.number).collect();
    numbers.sort();
    assert_eq!(numbers, (1..=n as u32).collect::<Vec<_>>());
}

// ── Users ────────────────────────────────────────────────

fn new_user(email: &str) -> NewUser {
    NewUser {
        name: "Asha Rao".into(),
        email: email.into(),
        password: "campus123".into(),
        contact: "98765 43210".into(),
        department: "Computer Science".into(),
        role: Role::User,
    }
}

#[tokio::test]
async fn register_and_authenticate() {
    let engine = new_engine("register.wal");
    let user = engine.register_user(new_user("Asha@Campus.edu")).await.unwrap();
    assert_eq!(user.email, "asha@campus.edu");
    assert_eq!(user.contact, "9876543210");
    assert_eq!(user.number, FIRST_USER_NUMBER);

    let dup = engine.register_user(new_user("ASHA@campus.edu")).await;
    assert!(matches!(dup, Err(EngineError::EmailTaken(_))));

    let found = engine.authenticate(" asha@campus.edu ", "campus123").await.unwrap();
    assert_eq!(found.id, user.id);
    assert!(matches!(
        engine.authenticate("asha@campus.edu", "wrong").await,
        Err(EngineError::InvalidCredentials)
    ));
    assert!(matches!(
        engine.authenticate("nobody@campus.edu", "campus123").await,
        Err(EngineError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn registration_validation() {
    let engine = new_engine("register_invalid.wal");
    assert!(matches!(
        engine.register_user(new_user("not-an-email")).await,
        Err(EngineError::Validation(_))
    ));

    let mut short = new_user("short@campus.edu");
    short.password = "abc".into();
    assert!(matches!(engine.register_user(short).await, Err(EngineError::Validation(_))));

    let mut phone = new_user("phone@campus.edu");
    phone.contact = "12345".into();
    assert!(matches!(engine.register_user(phone).await, Err(EngineError::Validation(_))));
    assert_eq!(engine.user_count(), 0);
}

#[tokio::test]
async fn admins_cannot_demote_or_delete_themselves() {
    let w = world("self_admin.wal").await;
    assert!(matches!(
        w.engine.set_user_role(w.admin, w.admin, Role::User).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        w.engine.delete_user(w.admin, w.admin).await,
        Err(EngineError::Validation(_))
    ));

    let promoted = w.engine.set_user_role(w.admin, w.bob, Role::Admin).await.unwrap();
    assert_eq!(promoted.role, Role::Admin);
}

#[tokio::test]
async fn deleting_user_keeps_their_bookings() {
    let w = world("delete_user.wal").await;
    let b = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "X")
        .await
        .unwrap();
    tokio_test::assert_ok!(w.engine.delete_user(w.admin, w.alice).await);

    assert!(w.engine.user(&w.alice).is_none());
    assert!(w.engine.user_by_email("alice@campus.edu").is_none());
    let all = w.engine.all_bookings(None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].booking.id, b.id);
    assert!(all[0].user.is_none());
}

// ── Facilities ───────────────────────────────────────────

#[tokio::test]
async fn facility_names_unique_and_validated() {
    let w = world("facility_names.wal").await;
    let dup = w.engine.create_facility(w.admin, facility_input("seminar hall a")).await;
    assert!(matches!(dup, Err(EngineError::Validation(_))));

    let mut zero = facility_input("Empty Room");
    zero.capacity = 0;
    assert!(matches!(
        w.engine.create_facility(w.admin, zero).await,
        Err(EngineError::Validation(_))
    ));

    let mut renamed = facility_input("Seminar Hall A");
    renamed.capacity = 120;
    let updated = w.engine.update_facility(w.hall, renamed).await.unwrap();
    assert_eq!(updated.capacity, 120);
    assert_eq!(updated.number, FIRST_FACILITY_NUMBER);
}

#[tokio::test]
async fn toggle_back_to_active_announces_reopening() {
    let w = world("toggle_reopen.wal").await;
    w.engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "X")
        .await
        .unwrap();
    let mut rx = w.engine.notify.subscribe();

    let off = w.engine.toggle_facility(w.hall).await.unwrap();
    assert_eq!(off.status, FacilityStatus::Inactive);
    let on = w.engine.toggle_facility(w.hall).await.unwrap();
    assert_eq!(on.status, FacilityStatus::Active);

    match rx.recv().await.unwrap() {
        DomainEvent::FacilityReopened { facility_id, recipients, .. } => {
            assert_eq!(facility_id, w.hall);
            assert_eq!(recipients, vec![w.alice]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

// ── Complaints & notifications ───────────────────────────

#[tokio::test]
async fn status_change_becomes_notification() {
    let w = world("status_notification.wal").await;
    let mut rx = w.engine.notify.subscribe();
    let b = w
        .engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "X")
        .await
        .unwrap();
    w.engine
        .set_booking_status(b.id, BookingStatus::Rejected, Some("Exam week".into()))
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    crate::notify::dispatch(&w.engine, &event).await;

    let page = w.engine.notifications(w.alice, NotificationFilter::All, 1);
    assert_eq!(page.total, 1);
    let n = &page.notifications[0];
    assert_eq!(n.title, "Booking Rejected");
    assert!(n.message.ends_with("Reason: Exam week"));
    assert_eq!(n.related, Some(RelatedRef::Booking(b.id)));
    assert_eq!(w.engine.unread_count(w.alice), 1);
}

#[tokio::test]
async fn complaint_response_flow() {
    let w = world("complaint_flow.wal").await;
    let c = w
        .engine
        .submit_complaint(
            w.alice,
            NewComplaint {
                subject: "Broken projector".into(),
                description: "Seminar Hall A projector flickers".into(),
                category: ComplaintCategory::default(),
                priority: ComplaintPriority::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(c.number, FIRST_COMPLAINT_NUMBER);
    assert_eq!(c.category, ComplaintCategory::Other);
    assert_eq!(c.priority, ComplaintPriority::Medium);

    let mut rx = w.engine.notify.subscribe();
    let answered = w
        .engine
        .respond_to_complaint(w.admin, c.id, "Technician booked", Some(ComplaintStatus::Resolved))
        .await
        .unwrap();
    assert_eq!(answered.admin_response.as_deref(), Some("Technician booked"));
    assert_eq!(answered.resolved_by, Some(w.admin));
    assert!(answered.resolved_at.is_some());

    assert!(matches!(rx.recv().await.unwrap(), DomainEvent::ComplaintResponded { .. }));
    assert!(matches!(
        rx.recv().await.unwrap(),
        DomainEvent::ComplaintStatusChanged { status: ComplaintStatus::Resolved, .. }
    ));

    assert!(w.engine.complaint_for(w.alice, c.id).is_ok());
    assert!(matches!(w.engine.complaint_for(w.bob, c.id), Err(EngineError::NotFound(_))));
    assert_eq!(w.engine.all_complaints(Some(ComplaintStatus::Resolved)).len(), 1);
    assert!(w.engine.all_complaints(Some(ComplaintStatus::Submitted)).is_empty());
}

async fn notify_user(engine: &Engine, user: Ulid, kind: NotificationKind, title: &str) -> Notification {
    engine
        .create_notification(NewNotification {
            user_id: user,
            title: title.into(),
            message: format!("{title} body"),
            kind,
            priority: NotificationPriority::Medium,
            related: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn notification_paging_filters_and_ownership() {
    let w = world("notification_pages.wal").await;
    for i in 0..12 {
        let kind = if i % 3 == 0 { NotificationKind::System } else { NotificationKind::Booking };
        notify_user(&w.engine, w.alice, kind, &format!("N{i}")).await;
    }
    let bobs = notify_user(&w.engine, w.bob, NotificationKind::General, "Bob's").await;

    let first = w.engine.notifications(w.alice, NotificationFilter::All, 1);
    assert_eq!((first.total, first.total_pages, first.notifications.len()), (12, 2, 10));
    let second = w.engine.notifications(w.alice, NotificationFilter::All, 2);
    assert_eq!(second.notifications.len(), 2);

    let system = w
        .engine
        .notifications(w.alice, NotificationFilter::Kind(NotificationKind::System), 1);
    assert_eq!(system.total, 4);

    let counts = w.engine.notification_counts(w.alice);
    assert_eq!((counts.total, counts.unread, counts.booking, counts.system), (12, 12, 8, 4));

    // Someone else's notification is invisible.
    assert!(matches!(
        w.engine.mark_notification_read(w.alice, bobs.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        w.engine.delete_notification(w.alice, bobs.id).await,
        Err(EngineError::NotFound(_))
    ));

    let one = first.notifications[0].id;
    w.engine.mark_notification_read(w.alice, one).await.unwrap();
    assert_eq!(w.engine.unread_count(w.alice), 11);
    assert_eq!(w.engine.mark_all_read(w.alice).await.unwrap(), 11);
    assert_eq!(w.engine.mark_all_read(w.alice).await.unwrap(), 0);
    assert_eq!(w.engine.notifications(w.alice, NotificationFilter::Read, 1).total, 12);

    w.engine.delete_notification(w.alice, one).await.unwrap();
    let (recent, unread) = w.engine.recent_notifications(w.alice);
    assert_eq!(recent.len(), 10);
    assert_eq!(unread, 0);
    assert_eq!(w.engine.unread_count(w.bob), 1);
}

#[tokio::test]
async fn notification_page_past_the_end_is_empty() {
    let w = world("notification_far_page.wal").await;
    for i in 0..3 {
        notify_user(&w.engine, w.alice, NotificationKind::General, &format!("N{i}")).await;
    }
    let far = w.engine.notifications(w.alice, NotificationFilter::All, usize::MAX);
    assert!(far.notifications.is_empty());
    assert_eq!((far.total, far.total_pages), (3, 1));

    let zero = w.engine.notifications(w.alice, NotificationFilter::All, 0);
    assert_eq!((zero.page, zero.notifications.len()), (1, 3));
}

#[tokio::test]
async fn announcement_reaches_every_user() {
    let w = world("announcement.wal").await;
    let mut rx = w.engine.notify.subscribe();
    assert_eq!(w.engine.broadcast_announcement("Maintenance", "Down Sunday").unwrap(), 3);

    let event = rx.recv().await.unwrap();
    crate::notify::dispatch(&w.engine, &event).await;
    for user in [w.admin, w.alice, w.bob] {
        let counts = w.engine.notification_counts(user);
        assert_eq!(counts.system, 1);
    }
    assert!(matches!(
        w.engine.broadcast_announcement(" ", "x"),
        Err(EngineError::Validation(_))
    ));
}

// ── Dashboards, search, reports ──────────────────────────

#[tokio::test]
async fn dashboards_count_by_status() {
    let w = world("dashboards.wal").await;
    let date = d("2024-05-01");
    for (i, start) in ["09:00", "10:00", "11:00"].iter().enumerate() {
        let end = format!("{}:00", 10 + i);
        let b = w
            .engine
            .request_booking(w.alice, w.hall, date, slot(start, &end), "Class")
            .await
            .unwrap();
        if i == 0 {
            w.engine
                .set_booking_status(b.id, BookingStatus::Approved, None)
                .await
                .unwrap();
        }
    }

    let mine = w.engine.user_dashboard(w.alice);
    assert_eq!((mine.bookings.total, mine.bookings.pending, mine.bookings.approved), (3, 2, 1));
    assert_eq!(mine.available_facilities, 1);
    assert_eq!(mine.recent_bookings.len(), 3);

    let admin = w.engine.admin_dashboard();
    assert_eq!(admin.total_users, 3);
    assert_eq!(admin.bookings.total, 3);
    assert_eq!(admin.open_complaints, 0);
    assert_eq!(
        w.engine.all_bookings(Some(BookingStatus::Approved)).len(),
        1
    );
}

#[tokio::test]
async fn search_is_scoped_to_own_documents() {
    let w = world("search.wal").await;
    seed_facility(&w.engine, w.admin, "Computer Lab 1").await;
    w.engine
        .request_booking(w.alice, w.hall, d("2024-05-01"), slot("09:00", "10:00"), "Robotics club")
        .await
        .unwrap();
    w.engine
        .request_booking(w.bob, w.hall, d("2024-05-01"), slot("10:00", "11:00"), "Robotics demo")
        .await
        .unwrap();

    let found = w.engine.search(w.alice, "ROBOTICS", SearchScope::All);
    assert_eq!(found.bookings.len(), 1);
    assert!(found.facilities.is_empty());

    let labs = w.engine.search(w.alice, "lab", SearchScope::Facilities);
    assert_eq!(labs.facilities.len(), 1);
    assert!(labs.bookings.is_empty());

    let by_status = w.engine.search(w.alice, "pending", SearchScope::Bookings);
    assert_eq!(by_status.total(), 1);
    assert_eq!(w.engine.search(w.alice, "   ", SearchScope::All).total(), 0);
}

#[tokio::test]
async fn report_counts_usage_and_trend() {
    let w = world("report.wal").await;
    let lab = seed_facility(&w.engine, w.admin, "Computer Lab 1").await;
    for start in ["09:00", "10:00"] {
        let end = if start == "09:00" { "10:00" } else { "11:00" };
        w.engine
            .request_booking(w.alice, w.hall, d("2024-05-01"), slot(start, end), "Hall")
            .await
            .unwrap();
    }
    w.engine
        .request_booking(w.alice, lab, d("2024-05-01"), slot("09:00", "10:00"), "Lab")
        .await
        .unwrap();

    let report = w.engine.user_report(w.alice, ReportPeriod::ThreeMonths, Utc::now());
    assert_eq!(report.booking_counts.total, 3);
    assert_eq!(
        report.facility_usage,
        vec![("Seminar Hall A".to_string(), 2), ("Computer Lab 1".to_string(), 1)]
    );
    assert_eq!(report.monthly_trend.len(), 6);
    assert_eq!(report.monthly_trend.last().unwrap().1, 3);

    let past = ReportPeriod::Custom {
        from: d("2020-01-01"),
        to: d("2020-12-31"),
    };
    assert_eq!(w.engine.user_report(w.alice, past, Utc::now()).booking_counts.total, 0);
}
