use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

// ── Facility availability resolver ───────────────────────────────

/// The resolver's only data dependency: the occupying (Pending/Approved)
/// bookings of one facility on one date.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn occupying(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Occupancy>, EngineError>;
}

#[async_trait]
impl BookingStore for Engine {
    async fn occupying(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Occupancy>, EngineError> {
        let schedule = self
            .schedule(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = schedule.read().await;
        Ok(guard.on(date).to_vec())
    }
}

/// First entry whose slot overlaps `slot` under the half-open rule,
/// skipping `exclude`.
pub fn find_conflict(entries: &[Occupancy], slot: &TimeSlot, exclude: Option<Ulid>) -> Option<Ulid> {
    entries
        .iter()
        .filter(|e| Some(e.booking_id) != exclude)
        .find(|e| e.slot.overlaps(slot))
        .map(|e| e.booking_id)
}

/// The booking that blocks `slot`, if any. Store errors propagate.
pub async fn blocking_booking<S: BookingStore + ?Sized>(
    store: &S,
    facility_id: Ulid,
    date: NaiveDate,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Result<Option<Ulid>, EngineError> {
    let entries = store.occupying(facility_id, date).await?;
    Ok(find_conflict(&entries, slot, exclude))
}

/// True when no occupying booking overlaps `slot`. A store error is an
/// error, never "available".
pub async fn is_available<S: BookingStore + ?Sized>(
    store: &S,
    facility_id: Ulid,
    date: NaiveDate,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Result<bool, EngineError> {
    Ok(blocking_booking(store, facility_id, date, slot, exclude)
        .await?
        .is_none())
}

// ── Free windows ──────────────────────────────────────────────────

/// Merge sorted overlapping/adjacent slots into disjoint slots.
pub fn merge_overlapping(sorted: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut merged: Vec<TimeSlot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_slots(base: &[TimeSlot], to_remove: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeSlot::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(TimeSlot::new(current_start, b.end));
        }
    }

    result
}

/// Unoccupied parts of `hours`, in order.
pub fn free_windows(hours: TimeSlot, occupied: &[Occupancy]) -> Vec<TimeSlot> {
    let mut busy: Vec<TimeSlot> = occupied.iter().map(|o| o.slot).collect();
    busy.sort_by_key(|s| s.start);
    subtract_slots(&[hours], &merge_overlapping(&busy))
}
