mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{
    BookingStore, blocking_booking, find_conflict, free_windows, is_available, merge_overlapping,
    subtract_slots,
};
pub use conflict::now_ms;
pub use error::EngineError;
pub use mutations::{FacilityInput, NewComplaint, NewUser, parse_amenities};
pub use queries::{NotificationFilter, ReportPeriod, SearchScope};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<Schedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
///
/// A non-append command found while draining ends the batch; the batch is
/// committed before that command runs.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes never prefix the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory document store rebuilt from the event log.
///
/// Document maps are plain `DashMap`s. Every facility additionally owns a
/// [`Schedule`] of occupying bookings behind its own lock; any mutation that
/// can occupy a slot holds that lock across the conflict check, the log
/// append and the apply.
pub struct Engine {
    pub(super) users: DashMap<Ulid, User>,
    /// Lower-cased email → user id.
    pub(super) emails: DashMap<String, Ulid>,
    pub(super) facilities: DashMap<Ulid, Facility>,
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    pub(super) complaints: DashMap<Ulid, Complaint>,
    pub(super) notifications: DashMap<Ulid, Notification>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serializes uniqueness checks (emails, facility names) with their inserts.
    pub(super) uniqueness: Mutex<()>,
    /// Held shared by every commit, exclusively by compaction, so a snapshot
    /// never misses an event that lands between snapshot and file swap.
    pub(super) commit_gate: RwLock<()>,
    pub(super) next_user_number: AtomicU32,
    pub(super) next_facility_number: AtomicU32,
    pub(super) next_complaint_number: AtomicU32,
    pub(super) next_notification_number: AtomicU64,
}

/// Keep a facility calendar in step with a booking event. The booking map
/// must already reflect the event.
fn apply_to_schedule(schedule: &mut Schedule, event: &Event, bookings: &DashMap<Ulid, Booking>) {
    match event {
        Event::BookingRequested { booking } => {
            if booking.status.is_occupying() {
                schedule.insert(Occupancy {
                    booking_id: booking.id,
                    date: booking.date,
                    slot: booking.slot,
                });
            }
        }
        Event::BookingStatusChanged { id, .. } | Event::BookingRescheduled { id, .. } => {
            schedule.remove(*id);
            if let Some(b) = bookings.get(id)
                && b.status.is_occupying()
            {
                schedule.insert(Occupancy {
                    booking_id: b.id,
                    date: b.date,
                    slot: b.slot,
                });
            }
        }
        Event::BookingDeleted { id, .. } => {
            schedule.remove(*id);
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(path = %wal_path.display(), "discarded torn tail of event log");
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut engine = Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            facilities: DashMap::new(),
            schedules: DashMap::new(),
            bookings: DashMap::new(),
            complaints: DashMap::new(),
            notifications: DashMap::new(),
            wal_tx,
            notify,
            uniqueness: Mutex::new(()),
            commit_gate: RwLock::new(()),
            next_user_number: AtomicU32::new(FIRST_USER_NUMBER),
            next_facility_number: AtomicU32::new(FIRST_FACILITY_NUMBER),
            next_complaint_number: AtomicU32::new(FIRST_COMPLAINT_NUMBER),
            next_notification_number: AtomicU64::new(1),
        };

        for event in &replay.events {
            engine.apply_documents(event);
        }
        engine.rebuild_schedules();
        engine.reset_counters();

        info!(
            events = replay.events.len(),
            users = engine.users.len(),
            facilities = engine.facilities.len(),
            bookings = engine.bookings.len(),
            "engine loaded"
        );
        Ok(engine)
    }

    /// Apply an event to the document maps. Calendars are handled separately.
    fn apply_documents(&self, event: &Event) {
        match event {
            Event::UserRegistered { user } => {
                self.emails.insert(user.email.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::UserRoleChanged { id, role } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    user.role = *role;
                }
            }
            Event::UserDeleted { id } => {
                if let Some((_, user)) = self.users.remove(id) {
                    self.emails.remove(&user.email);
                }
            }
            Event::FacilityCreated { facility } => {
                self.schedules
                    .entry(facility.id)
                    .or_insert_with(|| Arc::new(RwLock::new(Schedule::new(facility.id))));
                self.facilities.insert(facility.id, facility.clone());
            }
            Event::FacilityUpdated { facility } => {
                self.facilities.insert(facility.id, facility.clone());
            }
            Event::FacilityDeleted { id } => {
                self.facilities.remove(id);
                self.schedules.remove(id);
            }
            Event::BookingRequested { booking } => {
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingStatusChanged { id, status, at, .. } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.status = *status;
                    b.updated_at = *at;
                }
            }
            Event::BookingRescheduled { id, date, slot, at, .. } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.date = *date;
                    b.slot = *slot;
                    b.updated_at = *at;
                }
            }
            Event::BookingDeleted { id, .. } => {
                self.bookings.remove(id);
            }
            Event::ComplaintSubmitted { complaint } | Event::ComplaintUpdated { complaint } => {
                self.complaints.insert(complaint.id, complaint.clone());
            }
            Event::NotificationCreated { notification } => {
                self.notifications.insert(notification.id, notification.clone());
            }
            Event::NotificationsRead { user_id, ids, at } => {
                for id in ids {
                    if let Some(mut n) = self.notifications.get_mut(id)
                        && n.user_id == *user_id
                    {
                        n.read = true;
                        n.updated_at = *at;
                    }
                }
            }
            Event::NotificationDeleted { id, user_id } => {
                self.notifications.remove_if(id, |_, n| n.user_id == *user_id);
            }
        }
    }

    /// Rebuild every facility calendar from the booking map. Startup only:
    /// the engine is not shared yet, so `get_mut` on the lock cannot block.
    fn rebuild_schedules(&mut self) {
        for booking in self.bookings.iter() {
            if !booking.status.is_occupying() {
                continue;
            }
            if let Some(mut entry) = self.schedules.get_mut(&booking.facility_id)
                && let Some(schedule) = Arc::get_mut(entry.value_mut())
            {
                schedule.get_mut().insert(Occupancy {
                    booking_id: booking.id,
                    date: booking.date,
                    slot: booking.slot,
                });
            }
        }
    }

    fn reset_counters(&self) {
        let next = |max: Option<u32>, first: u32| max.map_or(first, |n| (n + 1).max(first));
        self.next_user_number.store(
            next(self.users.iter().map(|u| u.number).max(), FIRST_USER_NUMBER),
            Ordering::Relaxed,
        );
        self.next_facility_number.store(
            next(self.facilities.iter().map(|f| f.number).max(), FIRST_FACILITY_NUMBER),
            Ordering::Relaxed,
        );
        self.next_complaint_number.store(
            next(self.complaints.iter().map(|c| c.number).max(), FIRST_COMPLAINT_NUMBER),
            Ordering::Relaxed,
        );
        let notifications = self.notifications.iter().map(|n| n.number).max().unwrap_or(0);
        self.next_notification_number
            .store(notifications + 1, Ordering::Relaxed);
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. A booking event also updates `schedule`, whose
    /// lock the caller holds.
    pub(super) async fn persist_and_apply(
        &self,
        schedule: Option<&mut Schedule>,
        event: Event,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply_documents(&event);
        if let Some(schedule) = schedule {
            apply_to_schedule(schedule, &event, &self.bookings);
        }
        Ok(())
    }

    pub(super) fn schedule(&self, facility_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(facility_id).map(|e| e.value().clone())
    }

    /// The minimal event set that recreates the current state.
    fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.users.len()
                + self.facilities.len()
                + self.bookings.len()
                + self.complaints.len()
                + self.notifications.len(),
        );
        events.extend(self.users.iter().map(|u| Event::UserRegistered { user: u.clone() }));
        events.extend(
            self.facilities
                .iter()
                .map(|f| Event::FacilityCreated { facility: f.clone() }),
        );
        events.extend(
            self.bookings
                .iter()
                .map(|b| Event::BookingRequested { booking: b.clone() }),
        );
        events.extend(
            self.complaints
                .iter()
                .map(|c| Event::ComplaintSubmitted { complaint: c.clone() }),
        );
        events.extend(
            self.notifications
                .iter()
                .map(|n| Event::NotificationCreated { notification: n.clone() }),
        );
        events
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "event log compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
