use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::auth;
use crate::limits::*;
use crate::model::*;
use crate::notify::{DomainEvent, NewNotification};

use super::conflict::{bounded_text, check_bookable, check_no_conflict, now_ms, required_text};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub contact: String,
    pub department: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct FacilityInput {
    pub name: String,
    pub kind: FacilityType,
    pub capacity: u32,
    pub location: String,
    pub description: String,
    pub amenities: Vec<String>,
    pub hours: TimeSlot,
    pub status: FacilityStatus,
}

#[derive(Debug, Clone)]
pub struct NewComplaint {
    pub subject: String,
    pub description: String,
    pub category: ComplaintCategory,
    pub priority: ComplaintPriority,
}

/// `local@domain.tld`: no whitespace, one `@`, a dot with text on both sides.
pub(crate) fn valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .char_indices()
            .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Digits only; exactly ten of them.
pub(crate) fn normalize_contact(contact: &str) -> Option<String> {
    let digits: String = contact.chars().filter(char::is_ascii_digit).collect();
    (digits.len() == 10).then_some(digits)
}

/// Split a comma-separated amenity field into trimmed, de-duplicated tags.
pub fn parse_amenities(field: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    field
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty() && seen.insert(a.to_lowercase()))
        .map(String::from)
        .collect()
}

fn validate_facility(input: FacilityInput) -> Result<FacilityInput, EngineError> {
    let name = required_text(&input.name, MAX_NAME_LEN, "Facility name")?;
    let location = required_text(&input.location, MAX_LOCATION_LEN, "Location")?;
    let description = bounded_text(&input.description, MAX_DESCRIPTION_LEN, "Description")?;
    if input.capacity == 0 {
        return Err(EngineError::Validation("Capacity must be at least 1".into()));
    }
    if input.capacity > MAX_FACILITY_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if input.amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    let mut amenities = Vec::with_capacity(input.amenities.len());
    for amenity in &input.amenities {
        let amenity = bounded_text(amenity, MAX_AMENITY_LEN, "Amenity")?;
        if !amenity.is_empty() {
            amenities.push(amenity);
        }
    }
    Ok(FacilityInput {
        name,
        location,
        description,
        amenities,
        ..input
    })
}

async fn hash_off_runtime(password: String) -> Result<String, EngineError> {
    tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
        .map_err(|e| EngineError::Internal(e.to_string()))
}

impl Engine {
    // ── Users ────────────────────────────────────────────────────

    pub async fn register_user(&self, input: NewUser) -> Result<User, EngineError> {
        let name = required_text(&input.name, MAX_NAME_LEN, "Full name")?;
        let email = input.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(EngineError::Validation("Email address is required".into()));
        }
        if !valid_email(&email) {
            return Err(EngineError::Validation("Please enter a valid email address".into()));
        }
        let contact = normalize_contact(&input.contact).ok_or_else(|| {
            EngineError::Validation("Please enter a valid 10-digit phone number".into())
        })?;
        let department = required_text(&input.department, MAX_NAME_LEN, "Department")?;
        let password_len = input.password.chars().count();
        if password_len < MIN_PASSWORD_LEN {
            return Err(EngineError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters long"
            )));
        }
        if password_len > MAX_PASSWORD_LEN {
            return Err(EngineError::LimitExceeded("password too long"));
        }
        if self.emails.contains_key(&email) {
            return Err(EngineError::EmailTaken(email));
        }

        let password_hash = hash_off_runtime(input.password).await?;

        let _unique = self.uniqueness.lock().await;
        if self.emails.contains_key(&email) {
            return Err(EngineError::EmailTaken(email));
        }
        let user = User {
            id: Ulid::new(),
            number: self.next_user_number.fetch_add(1, Ordering::Relaxed),
            name,
            email,
            role: input.role,
            password_hash,
            contact,
            department,
            registered_at: now_ms(),
        };
        self.persist_and_apply(None, Event::UserRegistered { user: user.clone() })
            .await?;
        info!(user = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    pub async fn set_user_role(&self, actor: Ulid, id: Ulid, role: Role) -> Result<User, EngineError> {
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if actor == id && role != Role::Admin {
            return Err(EngineError::Validation(
                "You cannot remove your own admin role".into(),
            ));
        }
        self.persist_and_apply(None, Event::UserRoleChanged { id, role })
            .await?;
        info!(user = %id, %role, by = %actor, "role changed");
        self.user(&id).ok_or(EngineError::NotFound(id))
    }

    /// Bookings and complaints of a deleted user are kept.
    pub async fn delete_user(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        if actor == id {
            return Err(EngineError::Validation("You cannot delete your own account".into()));
        }
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(None, Event::UserDeleted { id }).await?;
        info!(user = %id, by = %actor, "user deleted");
        Ok(())
    }

    // ── Facilities ───────────────────────────────────────────────

    fn name_taken(&self, name: &str, except: Option<Ulid>) -> bool {
        self.facilities
            .iter()
            .any(|f| Some(f.id) != except && f.name.eq_ignore_ascii_case(name))
    }

    pub async fn create_facility(
        &self,
        created_by: Ulid,
        input: FacilityInput,
    ) -> Result<Facility, EngineError> {
        let input = validate_facility(input)?;

        let _unique = self.uniqueness.lock().await;
        if self.name_taken(&input.name, None) {
            return Err(EngineError::Validation(format!(
                "A facility named \"{}\" already exists",
                input.name
            )));
        }
        let now = now_ms();
        let facility = Facility {
            id: Ulid::new(),
            number: self.next_facility_number.fetch_add(1, Ordering::Relaxed),
            name: input.name,
            kind: input.kind,
            capacity: input.capacity,
            location: input.location,
            description: input.description,
            amenities: input.amenities,
            hours: input.hours,
            status: input.status,
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            None,
            Event::FacilityCreated {
                facility: facility.clone(),
            },
        )
        .await?;
        info!(facility = %facility.id, name = %facility.name, "facility created");
        Ok(facility)
    }

    pub async fn update_facility(&self, id: Ulid, input: FacilityInput) -> Result<Facility, EngineError> {
        let input = validate_facility(input)?;
        let _unique = self.uniqueness.lock().await;
        if self.name_taken(&input.name, Some(id)) {
            return Err(EngineError::Validation(format!(
                "A facility named \"{}\" already exists",
                input.name
            )));
        }
        self.replace_facility(id, |f| {
            f.name = input.name;
            f.kind = input.kind;
            f.capacity = input.capacity;
            f.location = input.location;
            f.description = input.description;
            f.amenities = input.amenities;
            f.hours = input.hours;
            f.status = input.status;
        })
        .await
    }

    /// Active becomes inactive; inactive or maintenance becomes active.
    pub async fn toggle_facility(&self, id: Ulid) -> Result<Facility, EngineError> {
        self.replace_facility(id, |f| {
            f.status = match f.status {
                FacilityStatus::Active => FacilityStatus::Inactive,
                FacilityStatus::Inactive | FacilityStatus::Maintenance => FacilityStatus::Active,
            };
        })
        .await
    }

    /// Rewrite a facility under its calendar lock, so no booking can slip in
    /// against the old status or hours.
    async fn replace_facility(
        &self,
        id: Ulid,
        edit: impl FnOnce(&mut Facility),
    ) -> Result<Facility, EngineError> {
        let schedule = self.schedule(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = schedule.write().await;
        let before = self.facility(&id).ok_or(EngineError::NotFound(id))?;

        let mut facility = before.clone();
        edit(&mut facility);
        facility.updated_at = now_ms();
        self.persist_and_apply(
            Some(&mut *guard),
            Event::FacilityUpdated {
                facility: facility.clone(),
            },
        )
        .await?;
        drop(guard);
        info!(facility = %id, status = %facility.status, "facility updated");

        if before.status != FacilityStatus::Active && facility.status == FacilityStatus::Active {
            let recipients: BTreeSet<Ulid> = self
                .bookings
                .iter()
                .filter(|b| b.facility_id == id)
                .map(|b| b.user_id)
                .collect();
            self.notify.emit(DomainEvent::FacilityReopened {
                facility_id: id,
                name: facility.name.clone(),
                recipients: recipients.into_iter().collect(),
            });
        }
        Ok(facility)
    }

    /// Bookings of the facility are kept and show the facility as unknown.
    pub async fn delete_facility(&self, id: Ulid) -> Result<(), EngineError> {
        let schedule = self.schedule(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = schedule.write().await;
        if !self.facilities.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(Some(&mut *guard), Event::FacilityDeleted { id })
            .await?;
        info!(facility = %id, "facility deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// New Pending booking. Conflict check and insert happen under the
    /// facility's calendar lock.
    pub async fn request_booking(
        &self,
        user_id: Ulid,
        facility_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
        purpose: &str,
    ) -> Result<Booking, EngineError> {
        let purpose = required_text(purpose, MAX_PURPOSE_LEN, "Purpose")?;
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::NotFound(user_id));
        }
        let schedule = self
            .schedule(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let mut guard = schedule.write().await;
        let facility = self
            .facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        check_bookable(&facility, &slot)?;
        check_no_conflict(&guard, date, &slot, None)?;

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            facility_id,
            user_id,
            date,
            slot,
            purpose,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            Some(&mut *guard),
            Event::BookingRequested {
                booking: booking.clone(),
            },
        )
        .await?;
        metrics::counter!(crate::observability::BOOKINGS_REQUESTED_TOTAL).increment(1);
        info!(booking = %booking.id, facility = %facility_id, %date, %slot, "booking requested");
        Ok(booking)
    }

    /// Move the owner's Pending booking. The booking is excluded from its
    /// own conflict scan.
    pub async fn reschedule_booking(
        &self,
        user_id: Ulid,
        id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> Result<Booking, EngineError> {
        let facility_id = self.owned_booking(user_id, id)?.facility_id;
        let schedule = self
            .schedule(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let mut guard = schedule.write().await;

        let booking = self.owned_booking(user_id, id)?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::Validation(
                "Only pending bookings can be rescheduled".into(),
            ));
        }
        let facility = self
            .facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        check_bookable(&facility, &slot)?;
        check_no_conflict(&guard, date, &slot, Some(id))?;

        self.persist_and_apply(
            Some(&mut *guard),
            Event::BookingRescheduled {
                id,
                facility_id,
                date,
                slot,
                at: now_ms(),
            },
        )
        .await?;
        info!(booking = %id, %date, %slot, "booking rescheduled");
        self.booking(&id).ok_or(EngineError::NotFound(id))
    }

    /// The owner withdraws a Pending or Approved booking.
    pub async fn cancel_booking(&self, user_id: Ulid, id: Ulid) -> Result<Booking, EngineError> {
        self.owned_booking(user_id, id)?;
        self.transition(id, BookingStatus::Cancelled, |b| b.user_id == user_id)
            .await
    }

    /// Admin status change. A move back into Pending/Approved is
    /// conflict-checked; the user is told about every change.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let reason = reason
            .map(|r| bounded_text(&r, MAX_RESPONSE_LEN, "Reason"))
            .transpose()?
            .filter(|r| !r.is_empty());
        let booking = self.transition(id, status, |_| true).await?;

        let facility_name = self
            .facility(&booking.facility_id)
            .map_or_else(|| "Unknown".to_string(), |f| f.name);
        self.notify.emit(DomainEvent::BookingStatusChanged {
            booking_id: booking.id,
            user_id: booking.user_id,
            facility_name,
            date: booking.date,
            status,
            reason,
        });
        Ok(booking)
    }

    async fn transition(
        &self,
        id: Ulid,
        to: BookingStatus,
        allowed: impl Fn(&Booking) -> bool,
    ) -> Result<Booking, EngineError> {
        let facility_id = self.booking(&id).ok_or(EngineError::NotFound(id))?.facility_id;
        let schedule = self.schedule(&facility_id);
        let mut guard = match &schedule {
            Some(s) => Some(s.write().await),
            None => None,
        };

        let booking = self.booking(&id).ok_or(EngineError::NotFound(id))?;
        if !allowed(&booking) {
            return Err(EngineError::NotOwner(id));
        }
        if !booking.status.can_become(to) {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to,
            });
        }
        if to.is_occupying() && !booking.status.is_occupying() {
            // Reoccupying needs a calendar: the facility must still exist.
            let calendar = guard.as_deref().ok_or(EngineError::NotFound(facility_id))?;
            check_no_conflict(calendar, booking.date, &booking.slot, Some(id))?;
        }

        self.persist_and_apply(
            guard.as_deref_mut(),
            Event::BookingStatusChanged {
                id,
                facility_id,
                status: to,
                at: now_ms(),
            },
        )
        .await?;
        metrics::counter!(crate::observability::BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str())
            .increment(1);
        info!(booking = %id, from = %booking.status, %to, "booking status changed");
        self.booking(&id).ok_or(EngineError::NotFound(id))
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let facility_id = self.booking(&id).ok_or(EngineError::NotFound(id))?.facility_id;
        let schedule = self.schedule(&facility_id);
        let mut guard = match &schedule {
            Some(s) => Some(s.write().await),
            None => None,
        };
        if !self.bookings.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(guard.as_deref_mut(), Event::BookingDeleted { id, facility_id })
            .await?;
        info!(booking = %id, "booking deleted");
        Ok(())
    }

    fn owned_booking(&self, user_id: Ulid, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.booking(&id).ok_or(EngineError::NotFound(id))?;
        if booking.user_id != user_id {
            return Err(EngineError::NotOwner(id));
        }
        Ok(booking)
    }

    // ── Complaints ───────────────────────────────────────────────

    pub async fn submit_complaint(
        &self,
        user_id: Ulid,
        input: NewComplaint,
    ) -> Result<Complaint, EngineError> {
        let subject = required_text(&input.subject, MAX_SUBJECT_LEN, "Subject")?;
        let description = required_text(&input.description, MAX_COMPLAINT_LEN, "Description")?;
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::NotFound(user_id));
        }
        let now = now_ms();
        let complaint = Complaint {
            id: Ulid::new(),
            number: self.next_complaint_number.fetch_add(1, Ordering::Relaxed),
            user_id,
            subject,
            description,
            category: input.category,
            priority: input.priority,
            status: ComplaintStatus::Submitted,
            admin_response: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            None,
            Event::ComplaintSubmitted {
                complaint: complaint.clone(),
            },
        )
        .await?;
        info!(complaint = %complaint.id, category = %complaint.category, "complaint submitted");
        Ok(complaint)
    }

    /// Store the admin's response and optionally move the status along.
    pub async fn respond_to_complaint(
        &self,
        admin_id: Ulid,
        id: Ulid,
        response: &str,
        status: Option<ComplaintStatus>,
    ) -> Result<Complaint, EngineError> {
        let response = required_text(response, MAX_RESPONSE_LEN, "Response")?;
        let before = self.complaint(&id).ok_or(EngineError::NotFound(id))?;

        let mut complaint = before.clone();
        complaint.admin_response = Some(response.clone());
        if let Some(status) = status {
            apply_complaint_status(&mut complaint, status, admin_id);
        }
        complaint.updated_at = now_ms();
        self.persist_and_apply(
            None,
            Event::ComplaintUpdated {
                complaint: complaint.clone(),
            },
        )
        .await?;
        info!(complaint = %id, by = %admin_id, "complaint answered");

        self.notify.emit(DomainEvent::ComplaintResponded {
            complaint_id: id,
            user_id: complaint.user_id,
            subject: complaint.subject.clone(),
            response,
        });
        if complaint.status != before.status {
            self.emit_complaint_status(&complaint);
        }
        Ok(complaint)
    }

    pub async fn set_complaint_status(
        &self,
        admin_id: Ulid,
        id: Ulid,
        status: ComplaintStatus,
    ) -> Result<Complaint, EngineError> {
        let before = self.complaint(&id).ok_or(EngineError::NotFound(id))?;
        if before.status == status {
            return Ok(before);
        }
        let mut complaint = before;
        apply_complaint_status(&mut complaint, status, admin_id);
        complaint.updated_at = now_ms();
        self.persist_and_apply(
            None,
            Event::ComplaintUpdated {
                complaint: complaint.clone(),
            },
        )
        .await?;
        info!(complaint = %id, %status, by = %admin_id, "complaint status changed");
        self.emit_complaint_status(&complaint);
        Ok(complaint)
    }

    fn emit_complaint_status(&self, complaint: &Complaint) {
        self.notify.emit(DomainEvent::ComplaintStatusChanged {
            complaint_id: complaint.id,
            user_id: complaint.user_id,
            subject: complaint.subject.clone(),
            status: complaint.status,
        });
    }

    // ── Notifications ────────────────────────────────────────────

    pub async fn create_notification(&self, new: NewNotification) -> Result<Notification, EngineError> {
        let title = required_text(&new.title, MAX_NOTIFICATION_TITLE_LEN, "Title")?;
        let message = required_text(&new.message, MAX_NOTIFICATION_MESSAGE_LEN, "Message")?;
        if !self.users.contains_key(&new.user_id) {
            return Err(EngineError::NotFound(new.user_id));
        }
        let now = now_ms();
        let notification = Notification {
            id: Ulid::new(),
            number: self.next_notification_number.fetch_add(1, Ordering::Relaxed),
            user_id: new.user_id,
            title,
            message,
            kind: new.kind,
            priority: new.priority,
            read: false,
            related: new.related,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            None,
            Event::NotificationCreated {
                notification: notification.clone(),
            },
        )
        .await?;
        Ok(notification)
    }

    pub async fn mark_notification_read(&self, user_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let read = self
            .notifications
            .get(&id)
            .filter(|n| n.user_id == user_id)
            .map(|n| n.read)
            .ok_or(EngineError::NotFound(id))?;
        if read {
            return Ok(());
        }
        self.persist_and_apply(
            None,
            Event::NotificationsRead {
                user_id,
                ids: vec![id],
                at: now_ms(),
            },
        )
        .await
    }

    /// Returns how many notifications changed.
    pub async fn mark_all_read(&self, user_id: Ulid) -> Result<usize, EngineError> {
        let ids: Vec<Ulid> = self
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .map(|n| n.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();
        self.persist_and_apply(
            None,
            Event::NotificationsRead {
                user_id,
                ids,
                at: now_ms(),
            },
        )
        .await?;
        Ok(count)
    }

    pub async fn delete_notification(&self, user_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let owned = self
            .notifications
            .get(&id)
            .is_some_and(|n| n.user_id == user_id);
        if !owned {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(None, Event::NotificationDeleted { id, user_id })
            .await
    }

    /// Queue a system notification for every user. Returns the recipient count.
    pub fn broadcast_announcement(&self, title: &str, message: &str) -> Result<usize, EngineError> {
        let title = required_text(title, MAX_NOTIFICATION_TITLE_LEN, "Title")?;
        let message = required_text(message, MAX_NOTIFICATION_MESSAGE_LEN, "Message")?;
        let recipients: Vec<Ulid> = self.users.iter().map(|u| u.id).collect();
        let count = recipients.len();
        self.notify.emit(DomainEvent::Announcement {
            title,
            message,
            recipients,
        });
        info!(recipients = count, "announcement queued");
        Ok(count)
    }
}

fn apply_complaint_status(complaint: &mut Complaint, status: ComplaintStatus, admin_id: Ulid) {
    complaint.status = status;
    if status == ComplaintStatus::Resolved {
        complaint.resolved_by = Some(admin_id);
        complaint.resolved_at = Some(now_ms());
    }
}
