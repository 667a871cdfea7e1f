use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::Utc;
use minijinja::context;
use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::engine::{EngineError, FacilityInput, parse_amenities};
use crate::export;
use crate::model::*;

use super::error::AppError;
use super::flash::{self, Flash};
use super::session::RequestContext;
use super::user::csv_download;
use super::views::value;
use super::{AppState, show};

const FACILITIES: &str = "/admin/manageFacilities";
const BOOKINGS: &str = "/admin/bookings";
const COMPLAINTS: &str = "/admin/complaints";
const USERS: &str = "/admin/users";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/manageFacilities", get(facilities))
        .route("/manageFacilities/add", post(add_facility))
        .route("/manageFacilities/update/{id}", post(update_facility))
        .route("/manageFacilities/delete/{id}", post(delete_facility))
        .route("/manageFacilities/toggle/{id}", post(toggle_facility))
        .route("/bookings", get(bookings))
        .route("/bookings/export", get(export_bookings))
        .route("/bookings/{id}/status", post(booking_status))
        .route("/bookings/{id}/delete", post(delete_booking))
        .route("/complaints", get(complaints))
        .route("/complaints/{id}/respond", post(respond_to_complaint))
        .route("/complaints/{id}/status", post(complaint_status))
        .route("/users", get(users))
        .route("/users/{id}/role", post(change_role))
        .route("/users/{id}/delete", post(delete_user))
        .route("/notify", post(announce))
}

/// Redirect to `path` with a success message, or the error's user message.
fn outcome<T>(path: &str, result: Result<T, EngineError>, success: &str) -> Redirect {
    match result {
        Ok(_) => flash::success(path, success),
        Err(e) => flash::error(path, &e.user_message()),
    }
}

fn optional_choice<T>(raw: Option<&str>) -> Result<Option<T>, EngineError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Ok(Some(s.parse()?)),
    }
}

async fn dashboard(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let dashboard = state.engine.admin_dashboard();
    Ok(show(
        &state,
        &ctx,
        &flash,
        "admin/dashboard.html",
        context! { dashboard => value(&dashboard) },
    )?
    .into_response())
}

// ── Facilities ───────────────────────────────────────────────────

async fn facilities(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let facilities = state.engine.facilities_newest_first();
    Ok(show(
        &state,
        &ctx,
        &flash,
        "admin/facilities.html",
        context! {
            facilities => value(&facilities),
            types => FacilityType::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            statuses => FacilityStatus::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct FacilityForm {
    #[serde(default)]
    pub facility_name: String,
    #[serde(default)]
    pub facility_type: String,
    #[serde(default)]
    pub capacity: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amenities: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    pub status: Option<String>,
}

impl FacilityForm {
    fn into_input(self) -> Result<FacilityInput, EngineError> {
        if [&self.facility_name, &self.facility_type, &self.location, &self.capacity]
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(EngineError::Validation(
                "Please fill in all required fields (Name, Type, Location, Capacity)".into(),
            ));
        }
        let capacity = self
            .capacity
            .trim()
            .parse()
            .map_err(|_| EngineError::Validation("Capacity must be a whole number".into()))?;
        let hours = match (self.start_time.trim(), self.end_time.trim()) {
            ("", "") => Facility::default_hours(),
            (start, end) => TimeSlot::parse(start, end)?,
        };
        Ok(FacilityInput {
            name: self.facility_name,
            kind: self.facility_type.trim().parse()?,
            capacity,
            location: self.location,
            description: self.description,
            amenities: parse_amenities(&self.amenities),
            hours,
            status: optional_choice(self.status.as_deref())?.unwrap_or(FacilityStatus::Active),
        })
    }
}

async fn add_facility(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<FacilityForm>,
) -> Redirect {
    let result = match form.into_input() {
        Ok(input) => state.engine.create_facility(ctx.id(), input).await,
        Err(e) => Err(e),
    };
    outcome(FACILITIES, result, "Facility added successfully!")
}

async fn update_facility(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Form(form): Form<FacilityForm>,
) -> Redirect {
    let result = match form.into_input() {
        Ok(input) => state.engine.update_facility(id, input).await,
        Err(e) => Err(e),
    };
    outcome(FACILITIES, result, "Facility updated successfully!")
}

async fn delete_facility(State(state): State<AppState>, Path(id): Path<Ulid>) -> Redirect {
    let result = state.engine.delete_facility(id).await;
    outcome(FACILITIES, result, "Facility deleted successfully!")
}

async fn toggle_facility(State(state): State<AppState>, Path(id): Path<Ulid>) -> Redirect {
    let result = state.engine.toggle_facility(id).await;
    outcome(FACILITIES, result, "Facility status updated successfully!")
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

async fn bookings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
    Query(filter): Query<StatusFilter>,
) -> Result<Response, AppError> {
    // An unknown filter value shows everything.
    let status: Option<BookingStatus> = optional_choice(filter.status.as_deref()).unwrap_or(None);
    let bookings = state.engine.all_bookings(status);
    Ok(show(
        &state,
        &ctx,
        &flash,
        "admin/bookings.html",
        context! {
            bookings => value(&bookings),
            current_status => status.map(BookingStatus::as_str),
            statuses => BookingStatus::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct BookingStatusForm {
    pub status: String,
    pub reason: Option<String>,
}

async fn booking_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
    Form(form): Form<BookingStatusForm>,
) -> Redirect {
    let status = match form.status.trim().parse::<BookingStatus>() {
        Ok(status) => status,
        Err(e) => return flash::error(BOOKINGS, &EngineError::from(e).user_message()),
    };
    let result = state.engine.set_booking_status(id, status, form.reason).await;
    if result.is_ok() {
        info!(booking = %id, %status, by = %ctx.id(), "admin changed booking status");
    }
    let message = format!("Booking {} successfully", status.as_str().to_lowercase());
    outcome(BOOKINGS, result, &message)
}

async fn delete_booking(State(state): State<AppState>, Path(id): Path<Ulid>) -> Redirect {
    let result = state.engine.delete_booking(id).await;
    outcome(BOOKINGS, result, "Booking deleted successfully")
}

async fn export_bookings(State(state): State<AppState>) -> Result<Response, AppError> {
    let bookings = state.engine.all_bookings(None);
    let body = export::all_bookings_csv(&bookings)?;
    let filename = format!("all-bookings-{}.csv", Utc::now().format("%Y-%m-%d"));
    Ok(csv_download(body, &filename))
}

// ── Complaints ───────────────────────────────────────────────────

async fn complaints(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
    Query(filter): Query<StatusFilter>,
) -> Result<Response, AppError> {
    let status: Option<ComplaintStatus> =
        optional_choice(filter.status.as_deref()).unwrap_or(None);
    let complaints: Vec<_> = state
        .engine
        .all_complaints(status)
        .into_iter()
        .map(|c| {
            let author = state.engine.user(&c.user_id).map(|u| UserProfile::from(&u));
            context! { complaint => value(&c), author => value(&author) }
        })
        .collect();
    Ok(show(
        &state,
        &ctx,
        &flash,
        "admin/complaints.html",
        context! {
            complaints => complaints,
            current_status => status.map(ComplaintStatus::as_str),
            statuses => ComplaintStatus::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct RespondForm {
    #[serde(default)]
    pub response: String,
    pub status: Option<String>,
}

async fn respond_to_complaint(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
    Form(form): Form<RespondForm>,
) -> Redirect {
    let result = match optional_choice(form.status.as_deref()) {
        Ok(status) => {
            state
                .engine
                .respond_to_complaint(ctx.id(), id, &form.response, status)
                .await
        }
        Err(e) => Err(e),
    };
    outcome(COMPLAINTS, result, "Response sent successfully")
}

#[derive(Debug, Deserialize)]
pub struct ComplaintStatusForm {
    pub status: String,
}

async fn complaint_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
    Form(form): Form<ComplaintStatusForm>,
) -> Redirect {
    let result = match form.status.trim().parse::<ComplaintStatus>() {
        Ok(status) => state.engine.set_complaint_status(ctx.id(), id, status).await,
        Err(e) => Err(e.into()),
    };
    outcome(COMPLAINTS, result, "Complaint status updated successfully")
}

// ── Users & announcements ────────────────────────────────────────

async fn users(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let users = state.engine.list_users();
    Ok(show(
        &state,
        &ctx,
        &flash,
        "admin/users.html",
        context! {
            users => value(&users),
            roles => Role::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct RoleForm {
    pub role: String,
}

async fn change_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
    Form(form): Form<RoleForm>,
) -> Redirect {
    let result = match form.role.trim().parse::<Role>() {
        Ok(role) => state.engine.set_user_role(ctx.id(), id, role).await,
        Err(e) => Err(e.into()),
    };
    outcome(USERS, result, "User role updated successfully")
}

async fn delete_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
) -> Redirect {
    let result = state.engine.delete_user(ctx.id(), id).await;
    outcome(USERS, result, "User deleted successfully")
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

async fn announce(State(state): State<AppState>, Form(form): Form<AnnouncementForm>) -> Redirect {
    match state.engine.broadcast_announcement(&form.title, &form.message) {
        Ok(count) => flash::success(
            "/admin/dashboard",
            &format!("Announcement sent to {count} users"),
        ),
        Err(e) => flash::error("/admin/dashboard", &e.user_message()),
    }
}
