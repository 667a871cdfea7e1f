use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::future::join_all;
use ulid::Ulid;

use campusbook::engine::{Engine, EngineError, FacilityInput, NewUser};
use campusbook::model::{ClockTime, Facility, FacilityStatus, FacilityType, Role, TimeSlot};
use campusbook::notify::NotifyHub;

/// Half-hour slots inside the default 09:00-17:00 operating hours.
const SLOTS_PER_DAY: u16 = 16;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

/// The `i`th half-hour slot, rolling over to the next day when a day fills up.
fn nth_slot(i: usize) -> (NaiveDate, TimeSlot) {
    let day = first_day() + Days::new((i / SLOTS_PER_DAY as usize) as u64);
    let start = 9 * 60 + (i % SLOTS_PER_DAY as usize) as u16 * 30;
    let at = |m: u16| ClockTime::from_hm(m / 60, m % 60).unwrap();
    (day, TimeSlot::new(at(start), at(start + 30)))
}

async fn new_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("campusbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(Engine::new(dir.join("bench.wal"), Arc::new(NotifyHub::new())).unwrap())
}

async fn register(engine: &Engine, n: usize) -> Vec<Ulid> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let user = engine
            .register_user(NewUser {
                name: format!("Bench User {i}"),
                email: format!("bench{i}@campus.edu"),
                password: "benchpass".into(),
                contact: "9876543210".into(),
                department: "Physics".into(),
                role: if i == 0 { Role::Admin } else { Role::User },
            })
            .await
            .unwrap();
        ids.push(user.id);
    }
    ids
}

async fn add_facilities(engine: &Engine, admin: Ulid, range: std::ops::Range<usize>) -> Vec<Ulid> {
    let mut ids = Vec::with_capacity(range.len());
    for i in range {
        let facility = engine
            .create_facility(
                admin,
                FacilityInput {
                    name: format!("Bench Hall {i}"),
                    kind: FacilityType::SeminarHall,
                    capacity: 60,
                    location: "Bench Block".into(),
                    description: String::new(),
                    amenities: vec!["Projector".into()],
                    hours: Facility::default_hours(),
                    status: FacilityStatus::Active,
                },
            )
            .await
            .unwrap();
        ids.push(facility.id);
    }
    ids
}

async fn phase1_sequential(engine: &Engine, user: Ulid, facility: Ulid) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (date, slot) = nth_slot(i);
        let t = Instant::now();
        engine
            .request_booking(user, facility, date, slot, "Sequential load")
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task books its own facility, so nothing conflicts and the only
/// shared resource is the event log.
async fn phase2_parallel(engine: &Arc<Engine>, users: &[Ulid], facilities: &[Ulid]) {
    let n_per_task = 200;
    let start = Instant::now();

    let tasks = facilities.iter().enumerate().map(|(i, &facility)| {
        let engine = engine.clone();
        let user = users[i % users.len()];
        tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_task);
            for j in 0..n_per_task {
                let (date, slot) = nth_slot(j);
                let t = Instant::now();
                engine
                    .request_booking(user, facility, date, slot, "Parallel load")
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        })
    });
    let mut latencies: Vec<Duration> = join_all(tasks)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    let elapsed = start.elapsed();
    let total = latencies.len();
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} tasks x {n_per_task} = {total} bookings in {:.2}s = {ops:.0} ops/sec",
        facilities.len(),
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

/// Many users race for the same slots. Exactly one request per slot may win.
async fn phase3_contention(engine: &Arc<Engine>, users: &[Ulid], facility: Ulid) {
    let rounds = 100;
    let mut winners = 0;
    let mut conflicts = 0;
    let start = Instant::now();

    for round in 0..rounds {
        let (date, slot) = nth_slot(round);
        let attempts = users.iter().map(|&user| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .request_booking(user, facility, date, slot, "Contended slot")
                    .await
            })
        });
        for result in join_all(attempts).await {
            match result.unwrap() {
                Ok(_) => winners += 1,
                Err(EngineError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    let elapsed = start.elapsed();
    println!(
        "  {rounds} slots x {} users in {:.2}s: {winners} winners, {conflicts} conflicts",
        users.len(),
        elapsed.as_secs_f64()
    );
    assert_eq!(winners, rounds, "each contended slot must have exactly one winner");
}

async fn phase4_reads(engine: &Engine, facility: Ulid) {
    let n = 5000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (date, slot) = nth_slot(i % 4000);
        let t = Instant::now();
        engine
            .check_availability(facility, date, &slot, None)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} availability checks in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("read latency", &mut latencies);
}

async fn phase5_compaction(engine: &Engine) {
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_wal().await.unwrap();
    println!(
        "  compacted {appends} appends in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

fn main() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let engine = new_engine().await;
        println!("setup");
        let users = register(&engine, 16).await;
        let facilities = add_facilities(&engine, users[0], 0..10).await;
        println!("  {} users, {} facilities", users.len(), facilities.len());

        println!("phase 1: sequential booking requests");
        phase1_sequential(&engine, users[1], facilities[0]).await;

        println!("phase 2: parallel booking requests, one facility per task");
        phase2_parallel(&engine, &users[1..], &facilities[1..]).await;

        println!("phase 3: contended slots");
        let contested = add_facilities(&engine, users[0], 10..11).await;
        phase3_contention(&engine, &users[1..], contested[0]).await;

        println!("phase 4: availability checks");
        phase4_reads(&engine, facilities[0]).await;

        println!("phase 5: compaction");
        phase5_compaction(&engine).await;
    });
}
