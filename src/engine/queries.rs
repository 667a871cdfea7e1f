use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use ulid::Ulid;

use crate::auth;
use crate::limits::*;
use crate::model::*;

use super::availability::{blocking_booking, free_windows};
use super::{Engine, EngineError};

/// Which notifications a listing shows. Unknown filter text means `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationFilter {
    #[default]
    All,
    Unread,
    Read,
    Kind(NotificationKind),
}

impl NotificationFilter {
    pub fn parse(s: &str) -> Self {
        match s {
            "unread" => NotificationFilter::Unread,
            "read" => NotificationFilter::Read,
            other => other
                .parse()
                .map(NotificationFilter::Kind)
                .unwrap_or(NotificationFilter::All),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationFilter::All => "all",
            NotificationFilter::Unread => "unread",
            NotificationFilter::Read => "read",
            NotificationFilter::Kind(kind) => kind.as_str(),
        }
    }

    fn matches(self, n: &Notification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Unread => !n.read,
            NotificationFilter::Read => n.read,
            NotificationFilter::Kind(kind) => n.kind == kind,
        }
    }
}

/// Creation-time window for the user report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    /// Both days inclusive.
    Custom { from: NaiveDate, to: NaiveDate },
    All,
}

impl ReportPeriod {
    /// Defaults to three months. `custom` without both dates covers everything.
    pub fn parse(period: Option<&str>, from: Option<&str>, to: Option<&str>) -> Self {
        match period.unwrap_or("3months") {
            "1month" => ReportPeriod::OneMonth,
            "3months" => ReportPeriod::ThreeMonths,
            "6months" => ReportPeriod::SixMonths,
            "1year" => ReportPeriod::OneYear,
            "custom" => {
                let day = |s: Option<&str>| s.and_then(|s| s.trim().parse::<NaiveDate>().ok());
                match (day(from), day(to)) {
                    (Some(from), Some(to)) => ReportPeriod::Custom { from, to },
                    _ => ReportPeriod::All,
                }
            }
            _ => ReportPeriod::All,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportPeriod::OneMonth => "1month",
            ReportPeriod::ThreeMonths => "3months",
            ReportPeriod::SixMonths => "6months",
            ReportPeriod::OneYear => "1year",
            ReportPeriod::Custom { .. } => "custom",
            ReportPeriod::All => "all",
        }
    }

    /// `[from, to)` in unix ms; `None` is unbounded.
    fn bounds(self, now: DateTime<Utc>) -> (Option<Ms>, Option<Ms>) {
        let back = |months: u32| {
            now.checked_sub_months(Months::new(months))
                .map(|t| t.timestamp_millis())
        };
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp_millis());
        match self {
            ReportPeriod::OneMonth => (back(1), None),
            ReportPeriod::ThreeMonths => (back(3), None),
            ReportPeriod::SixMonths => (back(6), None),
            ReportPeriod::OneYear => (back(12), None),
            ReportPeriod::Custom { from, to } => (midnight(from), to.succ_opt().and_then(midnight)),
            ReportPeriod::All => (None, None),
        }
    }
}

/// Which collections a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    #[default]
    All,
    Facilities,
    Bookings,
    Complaints,
}

impl SearchScope {
    pub fn parse(s: &str) -> Self {
        match s {
            "facilities" => SearchScope::Facilities,
            "bookings" => SearchScope::Bookings,
            "complaints" => SearchScope::Complaints,
            _ => SearchScope::All,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchScope::All => "all",
            SearchScope::Facilities => "facilities",
            SearchScope::Bookings => "bookings",
            SearchScope::Complaints => "complaints",
        }
    }

    fn covers(self, other: SearchScope) -> bool {
        self == SearchScope::All || self == other
    }
}

fn month_label(ms: Ms) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(|t| t.format("%b %Y").to_string())
}

/// Labels of the six months ending with `now`'s month, oldest first.
fn last_six_months(now: DateTime<Utc>) -> Vec<String> {
    let Some(first) = now.date_naive().with_day(1) else {
        return Vec::new();
    };
    (0..6u32)
        .rev()
        .filter_map(|back| first.checked_sub_months(Months::new(back)))
        .map(|d| d.format("%b %Y").to_string())
        .collect()
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (Ms, Ulid)) {
    items.sort_by_key(|item| Reverse(key(item)));
}

impl Engine {
    // ── Lookups ──────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.trim().to_lowercase())?;
        self.user(&id)
    }

    pub fn facility(&self, id: &Ulid) -> Option<Facility> {
        self.facilities.get(id).map(|f| f.clone())
    }

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.clone())
    }

    pub fn complaint(&self, id: &Ulid) -> Option<Complaint> {
        self.complaints.get(id).map(|c| c.clone())
    }

    /// Verify a login. Unknown email and wrong password look the same.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, EngineError> {
        let user = self
            .user_by_email(email)
            .ok_or(EngineError::InvalidCredentials)?;
        let hash = user.password_hash.clone();
        let password = password.to_string();
        let ok = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        if ok {
            Ok(user)
        } else {
            Err(EngineError::InvalidCredentials)
        }
    }

    // ── Users & facilities ───────────────────────────────────────

    pub fn list_users(&self) -> Vec<UserProfile> {
        let mut users: Vec<UserProfile> = self.users.iter().map(|u| UserProfile::from(&*u)).collect();
        users.sort_by_key(|u| u.number);
        users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn facilities_by_name(&self) -> Vec<Facility> {
        let mut facilities: Vec<Facility> = self.facilities.iter().map(|f| f.clone()).collect();
        facilities.sort_by_cached_key(|f| f.name.to_lowercase());
        facilities
    }

    pub fn facilities_newest_first(&self) -> Vec<Facility> {
        let mut facilities: Vec<Facility> = self.facilities.iter().map(|f| f.clone()).collect();
        newest_first(&mut facilities, |f| (f.created_at, f.id));
        facilities
    }

    pub fn active_facilities(&self) -> Vec<Facility> {
        let mut facilities = self.facilities_by_name();
        facilities.retain(|f| f.status == FacilityStatus::Active);
        facilities
    }

    // ── Bookings ─────────────────────────────────────────────────

    pub fn booking_details(&self, booking: Booking) -> BookingDetails {
        let facility = self.facilities.get(&booking.facility_id).map(|f| FacilitySummary {
            id: f.id,
            name: f.name.clone(),
            kind: f.kind,
            location: f.location.clone(),
            capacity: f.capacity,
        });
        let user = self.users.get(&booking.user_id).map(|u| UserSummary {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
        });
        BookingDetails {
            booking,
            facility,
            user,
        }
    }

    fn bookings_where(&self, keep: impl Fn(&Booking) -> bool) -> Vec<BookingDetails> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| keep(b))
            .map(|b| b.clone())
            .collect();
        newest_first(&mut bookings, |b| (b.created_at, b.id));
        bookings
            .into_iter()
            .map(|b| self.booking_details(b))
            .collect()
    }

    /// The user's bookings, newest first.
    pub fn user_bookings(&self, user_id: Ulid) -> Vec<BookingDetails> {
        self.bookings_where(|b| b.user_id == user_id)
    }

    /// Every booking, newest first, optionally one status only.
    pub fn all_bookings(&self, status: Option<BookingStatus>) -> Vec<BookingDetails> {
        self.bookings_where(|b| status.is_none_or(|s| b.status == s))
    }

    /// Whether `slot` is free on `date`; reports the blocking booking if not.
    pub async fn check_availability(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
        slot: &TimeSlot,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, EngineError> {
        blocking_booking(self, facility_id, date, slot, exclude).await
    }

    /// Free parts of the facility's operating hours on `date`.
    pub async fn free_windows(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        let facility = self
            .facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let schedule = self
            .schedule(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = schedule.read().await;
        Ok(free_windows(facility.hours, guard.on(date)))
    }

    // ── Dashboards ───────────────────────────────────────────────

    pub fn admin_dashboard(&self) -> AdminDashboard {
        let mut recent = self.all_bookings(None);
        recent.truncate(ADMIN_DASHBOARD_RECENT);
        AdminDashboard {
            bookings: BookingCounts::tally(self.bookings.iter().map(|b| b.status)),
            total_users: self.users.len(),
            active_facilities: self
                .facilities
                .iter()
                .filter(|f| f.status == FacilityStatus::Active)
                .count(),
            open_complaints: self.complaints.iter().filter(|c| c.status.is_open()).count(),
            recent_bookings: recent,
        }
    }

    pub fn user_dashboard(&self, user_id: Ulid) -> UserDashboard {
        let mut bookings = self.user_bookings(user_id);
        let counts = BookingCounts::tally(bookings.iter().map(|b| b.booking.status));
        bookings.truncate(USER_DASHBOARD_RECENT);
        UserDashboard {
            bookings: counts,
            available_facilities: self
                .facilities
                .iter()
                .filter(|f| f.status == FacilityStatus::Active)
                .count(),
            recent_bookings: bookings,
            unread_notifications: self.unread_count(user_id),
        }
    }

    // ── Complaints ───────────────────────────────────────────────

    fn complaints_where(&self, keep: impl Fn(&Complaint) -> bool) -> Vec<Complaint> {
        let mut complaints: Vec<Complaint> = self
            .complaints
            .iter()
            .filter(|c| keep(c))
            .map(|c| c.clone())
            .collect();
        newest_first(&mut complaints, |c| (c.created_at, c.id));
        complaints
    }

    pub fn user_complaints(&self, user_id: Ulid) -> Vec<Complaint> {
        self.complaints_where(|c| c.user_id == user_id)
    }

    pub fn all_complaints(&self, status: Option<ComplaintStatus>) -> Vec<Complaint> {
        self.complaints_where(|c| status.is_none_or(|s| c.status == s))
    }

    /// A complaint as seen by its author. Other users' complaints are not found.
    pub fn complaint_for(&self, user_id: Ulid, id: Ulid) -> Result<Complaint, EngineError> {
        self.complaint(&id)
            .filter(|c| c.user_id == user_id)
            .ok_or(EngineError::NotFound(id))
    }

    // ── Notifications ────────────────────────────────────────────

    fn notifications_where(&self, keep: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| keep(n))
            .map(|n| n.clone())
            .collect();
        newest_first(&mut notifications, |n| (n.created_at, n.id));
        notifications
    }

    /// One page (1-based) of the user's notifications, newest first.
    pub fn notifications(
        &self,
        user_id: Ulid,
        filter: NotificationFilter,
        page: usize,
    ) -> NotificationPage {
        let all = self.notifications_where(|n| n.user_id == user_id && filter.matches(n));
        let total = all.len();
        let page = page.max(1);
        let notifications = all
            .into_iter()
            .skip((page - 1).saturating_mul(NOTIFICATIONS_PER_PAGE))
            .take(NOTIFICATIONS_PER_PAGE)
            .collect();
        NotificationPage {
            notifications,
            total,
            page,
            total_pages: total.div_ceil(NOTIFICATIONS_PER_PAGE),
        }
    }

    pub fn notification_counts(&self, user_id: Ulid) -> NotificationCounts {
        let mut counts = NotificationCounts::default();
        for n in self.notifications.iter().filter(|n| n.user_id == user_id) {
            counts.total += 1;
            if !n.read {
                counts.unread += 1;
            }
            match n.kind {
                NotificationKind::Booking => counts.booking += 1,
                NotificationKind::Complaint => counts.complaint += 1,
                NotificationKind::System => counts.system += 1,
                NotificationKind::Facility => counts.facility += 1,
                NotificationKind::General => {}
            }
        }
        counts
    }

    pub fn unread_count(&self, user_id: Ulid) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count()
    }

    /// The newest few notifications plus the unread total.
    pub fn recent_notifications(&self, user_id: Ulid) -> (Vec<Notification>, usize) {
        let mut recent = self.notifications_where(|n| n.user_id == user_id);
        recent.truncate(RECENT_NOTIFICATIONS);
        (recent, self.unread_count(user_id))
    }

    // ── Search & reports ─────────────────────────────────────────

    /// Case-insensitive substring search over all facilities and the user's
    /// own bookings and complaints. A blank term finds nothing.
    pub fn search(&self, user_id: Ulid, term: &str, scope: SearchScope) -> SearchResults {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return SearchResults::default();
        }
        let mut results = SearchResults::default();

        if scope.covers(SearchScope::Facilities) {
            results.facilities = self
                .facilities_by_name()
                .into_iter()
                .filter(|f| {
                    contains_ci(&f.name, &needle)
                        || contains_ci(f.kind.as_str(), &needle)
                        || contains_ci(&f.location, &needle)
                        || contains_ci(&f.description, &needle)
                })
                .take(MAX_SEARCH_RESULTS)
                .collect();
        }
        if scope.covers(SearchScope::Bookings) {
            results.bookings = self.bookings_where(|b| {
                b.user_id == user_id
                    && (contains_ci(&b.purpose, &needle) || contains_ci(b.status.as_str(), &needle))
            });
            results.bookings.truncate(MAX_SEARCH_RESULTS);
        }
        if scope.covers(SearchScope::Complaints) {
            results.complaints = self.complaints_where(|c| {
                c.user_id == user_id
                    && (contains_ci(&c.subject, &needle)
                        || contains_ci(&c.description, &needle)
                        || contains_ci(c.category.as_str(), &needle)
                        || contains_ci(c.status.as_str(), &needle))
            });
            results.complaints.truncate(MAX_SEARCH_RESULTS);
        }
        results
    }

    /// Booking and complaint statistics for one user over `period`.
    pub fn user_report(&self, user_id: Ulid, period: ReportPeriod, now: DateTime<Utc>) -> UserReport {
        let (from, to) = period.bounds(now);
        let in_period =
            |at: Ms| from.is_none_or(|from| at >= from) && to.is_none_or(|to| at < to);

        let bookings = self.bookings_where(|b| b.user_id == user_id && in_period(b.created_at));
        let complaints =
            self.complaints_where(|c| c.user_id == user_id && in_period(c.created_at));

        let mut usage: HashMap<String, usize> = HashMap::new();
        for b in &bookings {
            if let Some(f) = &b.facility {
                *usage.entry(f.name.clone()).or_default() += 1;
            }
        }
        let mut facility_usage: Vec<(String, usize)> = usage.into_iter().collect();
        facility_usage.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut monthly_trend: Vec<(String, usize)> =
            last_six_months(now).into_iter().map(|m| (m, 0)).collect();
        for b in &bookings {
            if let Some(label) = month_label(b.booking.created_at)
                && let Some(slot) = monthly_trend.iter_mut().find(|(m, _)| *m == label)
            {
                slot.1 += 1;
            }
        }

        UserReport {
            booking_counts: BookingCounts::tally(bookings.iter().map(|b| b.booking.status)),
            total_complaints: complaints.len(),
            resolved_complaints: complaints
                .iter()
                .filter(|c| c.status == ComplaintStatus::Resolved)
                .count(),
            open_complaints: complaints.iter().filter(|c| c.status.is_open()).count(),
            facility_usage,
            monthly_trend,
            bookings,
            complaints,
        }
    }
}
