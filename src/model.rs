use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every timestamp uses it.
pub type Ms = i64;

// ── Time of day ──────────────────────────────────────────────────

/// Wall-clock time with minute precision, written as zero-padded `HH:MM`.
///
/// Stored as minutes since midnight, so ordering matches the lexicographic
/// ordering of the canonical string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(ClockTime(hour * 60 + minute))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for ClockTime {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimeError::Malformed(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(malformed());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(malformed());
        }
        let hour = u16::from(digits[0] - b'0') * 10 + u16::from(digits[1] - b'0');
        let minute = u16::from(digits[2] - b'0') * 10 + u16::from(digits[3] - b'0');
        ClockTime::from_hm(hour, minute).ok_or_else(malformed)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Malformed(String),
    EmptySlot { start: ClockTime, end: ClockTime },
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeError::Malformed(s) => write!(f, "invalid time {s:?}, expected HH:MM"),
            TimeError::EmptySlot { start, end } => {
                write!(f, "end time {end} must be after start time {start}")
            }
        }
    }
}

impl std::error::Error for TimeError {}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeSlot {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: ClockTime, end: ClockTime) -> Result<Self, TimeError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(TimeError::EmptySlot { start, end })
        }
    }

    /// Parse two `HH:MM` strings into a non-empty slot.
    pub fn parse(start: &str, end: &str) -> Result<Self, TimeError> {
        Self::try_new(start.trim().parse()?, end.trim().parse()?)
    }

    pub fn minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_slot(&self, other: &TimeSlot) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ── Closed vocabularies ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Enum whose variants round-trip through fixed display strings
/// (form values, JSON, CSV and templates all use the same text).
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: stringify!($name), value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(Role {
    Admin => "admin",
    User => "user",
});

impl Role {
    /// Admins may do anything a user may do.
    pub fn permits(self, required: Role) -> bool {
        self == Role::Admin || self == required
    }
}

string_enum!(BookingStatus {
    Pending => "Pending",
    Approved => "Approved",
    Rejected => "Rejected",
    Cancelled => "Cancelled",
});

impl BookingStatus {
    /// Pending and Approved bookings hold their slot; the rest never block.
    pub fn is_occupying(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn can_become(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Cancelled)
                | (Approved, Rejected | Cancelled)
                | (Rejected, Pending | Approved)
                | (Cancelled, Pending)
        )
    }
}

string_enum!(FacilityType {
    Auditorium => "Auditorium",
    SeminarHall => "Seminar Hall",
    ComputerLab => "Computer Lab",
    PhysicsLab => "Physics Lab",
    ChemistryLab => "Chemistry Lab",
    ConferenceRoom => "Conference Room",
    SportsGround => "Sports Ground",
    LibraryHall => "Library Hall",
    Classroom => "Classroom",
});

string_enum!(FacilityStatus {
    Active => "active",
    Inactive => "inactive",
    Maintenance => "maintenance",
});

string_enum!(ComplaintCategory {
    Facility => "Facility",
    Booking => "Booking",
    Technical => "Technical",
    Staff => "Staff",
    Other => "Other",
});

impl Default for ComplaintCategory {
    fn default() -> Self {
        ComplaintCategory::Other
    }
}

string_enum!(ComplaintPriority {
    Low => "Low",
    Medium => "Medium",
    High => "High",
    Urgent => "Urgent",
});

impl Default for ComplaintPriority {
    fn default() -> Self {
        ComplaintPriority::Medium
    }
}

string_enum!(ComplaintStatus {
    Submitted => "Submitted",
    InProgress => "In Progress",
    Resolved => "Resolved",
    Closed => "Closed",
});

impl ComplaintStatus {
    pub fn is_open(self) -> bool {
        matches!(self, ComplaintStatus::Submitted | ComplaintStatus::InProgress)
    }
}

string_enum!(NotificationKind {
    Booking => "booking",
    Complaint => "complaint",
    System => "system",
    Facility => "facility",
    General => "general",
});

string_enum!(NotificationPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

/// What a notification points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelatedRef {
    Booking(Ulid),
    Complaint(Ulid),
    Facility(Ulid),
}

// ── Documents ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub number: u32,
    pub name: String,
    /// Always lower-cased.
    pub email: String,
    pub role: Role,
    pub password_hash: String,
    pub contact: String,
    pub department: String,
    pub registered_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: Ulid,
    pub number: u32,
    pub name: String,
    pub kind: FacilityType,
    pub capacity: u32,
    pub location: String,
    pub description: String,
    pub amenities: Vec<String>,
    /// Operating hours; bookings must fall inside this window.
    pub hours: TimeSlot,
    pub status: FacilityStatus,
    pub created_by: Ulid,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Facility {
    pub fn default_hours() -> TimeSlot {
        TimeSlot::new(ClockTime(9 * 60), ClockTime(17 * 60))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub purpose: String,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: Ulid,
    pub number: u32,
    pub user_id: Ulid,
    pub subject: String,
    pub description: String,
    pub category: ComplaintCategory,
    pub priority: ComplaintPriority,
    pub status: ComplaintStatus,
    pub admin_response: Option<String>,
    pub resolved_by: Option<Ulid>,
    pub resolved_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub number: u64,
    pub user_id: Ulid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub read: bool,
    pub related: Option<RelatedRef>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── Facility calendar ────────────────────────────────────────────

/// One occupying (Pending/Approved) booking on a facility's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
}

/// Occupied slots of one facility, sorted by `(date, slot.start)`.
/// Guarded by a per-facility lock so check-and-insert is atomic.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub facility_id: Ulid,
    pub entries: Vec<Occupancy>,
}

impl Schedule {
    pub fn new(facility_id: Ulid) -> Self {
        Self {
            facility_id,
            entries: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `(date, slot.start)`.
    pub fn insert(&mut self, entry: Occupancy) {
        let key = (entry.date, entry.slot.start);
        let pos = self
            .entries
            .binary_search_by_key(&key, |e| (e.date, e.slot.start))
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Remove entry by booking id.
    pub fn remove(&mut self, booking_id: Ulid) -> Option<Occupancy> {
        let pos = self.entries.iter().position(|e| e.booking_id == booking_id)?;
        Some(self.entries.remove(pos))
    }

    /// All entries on one day, in start order.
    pub fn on(&self, date: NaiveDate) -> &[Occupancy] {
        let lo = self.entries.partition_point(|e| e.date < date);
        let hi = self.entries.partition_point(|e| e.date <= date);
        &self.entries[lo..hi]
    }

    /// Entries on `date` whose slot overlaps `slot`.
    pub fn overlapping(&self, date: NaiveDate, slot: &TimeSlot) -> impl Iterator<Item = &Occupancy> {
        let day = self.on(date);
        // Everything at index >= right_bound starts at or after slot.end → can't overlap.
        let right_bound = day.partition_point(|e| e.slot.start < slot.end);
        day[..right_bound]
            .iter()
            .filter(move |e| e.slot.end > slot.start)
    }
}

// ── Log records ──────────────────────────────────────────────────

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    UserRoleChanged {
        id: Ulid,
        role: Role,
    },
    UserDeleted {
        id: Ulid,
    },
    FacilityCreated {
        facility: Facility,
    },
    /// Full replacement of the facility document.
    FacilityUpdated {
        facility: Facility,
    },
    FacilityDeleted {
        id: Ulid,
    },
    BookingRequested {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        facility_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    BookingRescheduled {
        id: Ulid,
        facility_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
        at: Ms,
    },
    BookingDeleted {
        id: Ulid,
        facility_id: Ulid,
    },
    ComplaintSubmitted {
        complaint: Complaint,
    },
    /// Full replacement of the complaint document.
    ComplaintUpdated {
        complaint: Complaint,
    },
    NotificationCreated {
        notification: Notification,
    },
    NotificationsRead {
        user_id: Ulid,
        ids: Vec<Ulid>,
        at: Ms,
    },
    NotificationDeleted {
        id: Ulid,
        user_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilitySummary {
    pub id: Ulid,
    pub name: String,
    pub kind: FacilityType,
    pub location: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

/// A booking joined with its facility and user. Either side may be gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingDetails {
    pub booking: Booking,
    pub facility: Option<FacilitySummary>,
    pub user: Option<UserSummary>,
}

impl BookingDetails {
    pub fn facility_name(&self) -> &str {
        self.facility.as_ref().map_or("Unknown", |f| f.name.as_str())
    }
}

/// A user as shown to other people: no password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: Ulid,
    pub number: u32,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub contact: String,
    pub department: String,
    pub registered_at: Ms,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            number: user.number,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            contact: user.contact.clone(),
            department: user.department.clone(),
            registered_at: user.registered_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookingCounts {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub cancelled: usize,
}

impl BookingCounts {
    pub fn tally(statuses: impl IntoIterator<Item = BookingStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status {
                BookingStatus::Pending => counts.pending += 1,
                BookingStatus::Approved => counts.approved += 1,
                BookingStatus::Rejected => counts.rejected += 1,
                BookingStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminDashboard {
    pub bookings: BookingCounts,
    pub total_users: usize,
    pub active_facilities: usize,
    pub open_complaints: usize,
    pub recent_bookings: Vec<BookingDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserDashboard {
    pub bookings: BookingCounts,
    pub available_facilities: usize,
    pub recent_bookings: Vec<BookingDetails>,
    pub unread_notifications: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationCounts {
    pub total: usize,
    pub unread: usize,
    pub booking: usize,
    pub complaint: usize,
    pub system: usize,
    pub facility: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub facilities: Vec<Facility>,
    pub bookings: Vec<BookingDetails>,
    pub complaints: Vec<Complaint>,
}

impl SearchResults {
    pub fn total(&self) -> usize {
        self.facilities.len() + self.bookings.len() + self.complaints.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReport {
    pub bookings: Vec<BookingDetails>,
    pub complaints: Vec<Complaint>,
    pub booking_counts: BookingCounts,
    pub total_complaints: usize,
    pub resolved_complaints: usize,
    pub open_complaints: usize,
    /// `(facility name, bookings)`, most used first.
    pub facility_usage: Vec<(String, usize)>,
    /// `(month label, bookings created)`, oldest first, always six entries.
    pub monthly_trend: Vec<(String, usize)>,
}
