use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Fails with the blocking booking's id if `slot` overlaps an occupying
/// booking on `date`. `exclude` skips the booking being moved.
pub(crate) fn check_no_conflict(
    schedule: &Schedule,
    date: NaiveDate,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let blocking = schedule
        .overlapping(date, slot)
        .find(|e| Some(e.booking_id) != exclude);
    match blocking {
        Some(e) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(e.booking_id))
        }
        None => Ok(()),
    }
}

/// The facility must be open for booking and the slot inside its hours.
pub(crate) fn check_bookable(facility: &Facility, slot: &TimeSlot) -> Result<(), EngineError> {
    if facility.status != FacilityStatus::Active {
        return Err(EngineError::FacilityUnavailable(facility.id));
    }
    if !facility.hours.contains_slot(slot) {
        return Err(EngineError::OutsideOperatingHours(facility.hours));
    }
    Ok(())
}

/// Trimmed, non-empty, at most `max` characters.
pub(crate) fn required_text(
    value: &str,
    max: usize,
    field: &'static str,
) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    bounded_text(value, max, field)
}

pub(crate) fn bounded_text(
    value: &str,
    max: usize,
    field: &'static str,
) -> Result<String, EngineError> {
    let value = value.trim();
    if value.chars().count() > max {
        return Err(EngineError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}
