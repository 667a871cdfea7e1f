use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::*;

const CHANNEL_CAPACITY: usize = 1024;

/// A state change somebody should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    BookingStatusChanged {
        booking_id: Ulid,
        user_id: Ulid,
        facility_name: String,
        date: NaiveDate,
        status: BookingStatus,
        reason: Option<String>,
    },
    ComplaintResponded {
        complaint_id: Ulid,
        user_id: Ulid,
        subject: String,
        response: String,
    },
    ComplaintStatusChanged {
        complaint_id: Ulid,
        user_id: Ulid,
        subject: String,
        status: ComplaintStatus,
    },
    FacilityReopened {
        facility_id: Ulid,
        name: String,
        recipients: Vec<Ulid>,
    },
    Announcement {
        title: String,
        message: String,
        recipients: Vec<Ulid>,
    },
}

/// A notification record about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: Ulid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub related: Option<RelatedRef>,
}

/// Broadcast hub for domain events.
pub struct NotifyHub {
    tx: broadcast::Sender<DomainEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn emit(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

/// The notification records an event produces. Pure; no delivery.
pub fn notification_for(event: &DomainEvent) -> Vec<NewNotification> {
    match event {
        DomainEvent::BookingStatusChanged {
            booking_id,
            user_id,
            facility_name,
            date,
            status,
            reason,
        } => {
            let on = format!("Your booking for {facility_name} on {date}");
            let (title, message, priority) = match status {
                BookingStatus::Approved => (
                    "Booking Approved",
                    format!("{on} has been approved by the admin."),
                    NotificationPriority::High,
                ),
                BookingStatus::Rejected => (
                    "Booking Rejected",
                    match reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                        Some(r) => format!("{on} has been rejected. Reason: {r}"),
                        None => format!("{on} has been rejected by the admin."),
                    },
                    NotificationPriority::High,
                ),
                BookingStatus::Cancelled => (
                    "Booking Cancelled",
                    format!("{on} has been cancelled by the admin."),
                    NotificationPriority::Medium,
                ),
                BookingStatus::Pending => (
                    "Booking Reopened",
                    format!("{on} is pending review again."),
                    NotificationPriority::Low,
                ),
            };
            vec![NewNotification {
                user_id: *user_id,
                title: title.into(),
                message,
                kind: NotificationKind::Booking,
                priority,
                related: Some(RelatedRef::Booking(*booking_id)),
            }]
        }
        DomainEvent::ComplaintResponded {
            complaint_id,
            user_id,
            subject,
            response,
        } => vec![NewNotification {
            user_id: *user_id,
            title: "Admin Response to Your Complaint".into(),
            message: format!("Admin has responded to your complaint \"{subject}\": {response}"),
            kind: NotificationKind::Complaint,
            priority: NotificationPriority::High,
            related: Some(RelatedRef::Complaint(*complaint_id)),
        }],
        DomainEvent::ComplaintStatusChanged {
            complaint_id,
            user_id,
            subject,
            status,
        } => {
            let detail = match status {
                ComplaintStatus::InProgress => " Your complaint is now being reviewed by our team.",
                ComplaintStatus::Resolved => {
                    " Your complaint has been resolved. Thank you for your patience."
                }
                ComplaintStatus::Closed => " Your complaint has been closed.",
                ComplaintStatus::Submitted => "",
            };
            vec![NewNotification {
                user_id: *user_id,
                title: format!("Complaint Status: {status}"),
                message: format!(
                    "Your complaint \"{subject}\" status has been updated to {status}.{detail}"
                ),
                kind: NotificationKind::Complaint,
                priority: NotificationPriority::Medium,
                related: Some(RelatedRef::Complaint(*complaint_id)),
            }]
        }
        DomainEvent::FacilityReopened {
            facility_id,
            name,
            recipients,
        } => recipients
            .iter()
            .map(|user_id| NewNotification {
                user_id: *user_id,
                title: "Facility Now Available".into(),
                message: format!("The facility \"{name}\" is now available for booking."),
                kind: NotificationKind::Facility,
                priority: NotificationPriority::Low,
                related: Some(RelatedRef::Facility(*facility_id)),
            })
            .collect(),
        DomainEvent::Announcement {
            title,
            message,
            recipients,
        } => recipients
            .iter()
            .map(|user_id| NewNotification {
                user_id: *user_id,
                title: title.clone(),
                message: message.clone(),
                kind: NotificationKind::System,
                priority: NotificationPriority::Medium,
                related: None,
            })
            .collect(),
    }
}

/// Turns domain events into notification records. Failures are logged and
/// counted; they never reach the action that raised the event.
pub async fn run_dispatcher(engine: Arc<Engine>, mut rx: broadcast::Receiver<DomainEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification dispatcher lagged");
                metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL)
                    .increment(skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        dispatch(&engine, &event).await;
    }
    debug!("notification dispatcher stopped");
}

pub(crate) async fn dispatch(engine: &Engine, event: &DomainEvent) {
    for new in notification_for(event) {
        let user_id = new.user_id;
        match engine.create_notification(new).await {
            Ok(_) => {
                metrics::counter!(crate::observability::NOTIFICATIONS_DISPATCHED_TOTAL).increment(1);
            }
            Err(e) => {
                error!(%user_id, error = %e, "failed to create notification");
                metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            }
        }
    }
}
