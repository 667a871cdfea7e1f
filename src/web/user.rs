use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::{NaiveDate, Utc};
use minijinja::context;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{EngineError, NewComplaint, ReportPeriod, SearchScope};
use crate::export;
use crate::model::*;

use super::error::{AppError, JsonError};
use super::flash::{self, Flash};
use super::session::RequestContext;
use super::views::value;
use super::{AppState, show};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/profile", get(profile))
        .route("/facilities", get(facilities))
        .route("/booking", get(booking_form))
        .route("/book-facility", post(book_facility))
        .route("/bookings", get(bookings))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/reschedule", post(reschedule_booking))
        .route("/availability", get(availability))
        .route("/complaints", get(complaints))
        .route("/submit-complaint", post(submit_complaint))
        .route("/complaints/{id}", get(complaint_details))
        .route("/search", get(search))
        .route("/reports", get(reports))
        .route("/reports/export", get(export_reports))
}

// ── Form parsing ─────────────────────────────────────────────────

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Ulid, EngineError> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::Validation(format!("Selected {what} not found")))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::Validation("Please choose a valid date".into()))
}

/// Empty means "use the default"; anything else must name a variant.
pub(crate) fn parse_or_default<T>(raw: Option<&str>) -> Result<T, EngineError>
where
    T: std::str::FromStr<Err = UnknownVariant> + Default,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(s) => Ok(s.parse()?),
    }
}

// ── Pages ────────────────────────────────────────────────────────

async fn dashboard(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let dashboard = state.engine.user_dashboard(ctx.id());
    let (notifications, _) = state.engine.recent_notifications(ctx.id());
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/dashboard.html",
        context! { dashboard => value(&dashboard), notifications => value(&notifications) },
    )?
    .into_response())
}

async fn profile(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let counts = state.engine.user_dashboard(ctx.id()).bookings;
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/profile.html",
        context! { profile => value(&UserProfile::from(&ctx.user)), counts => value(&counts) },
    )?
    .into_response())
}

async fn facilities(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let facilities = state.engine.facilities_by_name();
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/facilities.html",
        context! { facilities => value(&facilities) },
    )?
    .into_response())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BookingForm {
    #[serde(default)]
    pub facility_id: String,
    #[serde(default)]
    pub booking_date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub facility: Option<String>,
}

fn booking_page(
    state: &AppState,
    ctx: &RequestContext,
    flash: &Flash,
    form: &BookingForm,
) -> Result<axum::response::Html<String>, AppError> {
    let facilities = state.engine.active_facilities();
    show(
        state,
        ctx,
        flash,
        "user/booking.html",
        context! { facilities => value(&facilities), form => value(form) },
    )
}

async fn booking_form(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
    Query(query): Query<BookingQuery>,
) -> Result<Response, AppError> {
    let form = BookingForm {
        facility_id: query.facility.unwrap_or_default(),
        ..BookingForm::default()
    };
    Ok(booking_page(&state, &ctx, &flash, &form)?.into_response())
}

async fn request_from_form(
    state: &AppState,
    ctx: &RequestContext,
    form: &BookingForm,
) -> Result<Booking, EngineError> {
    if form.facility_id.trim().is_empty()
        || form.booking_date.trim().is_empty()
        || form.start_time.trim().is_empty()
        || form.end_time.trim().is_empty()
        || form.purpose.trim().is_empty()
    {
        return Err(EngineError::Validation("All fields are required".into()));
    }
    let facility_id = parse_id(&form.facility_id, "facility")?;
    let date = parse_date(&form.booking_date)?;
    let slot = TimeSlot::parse(form.start_time.trim(), form.end_time.trim())?;
    state
        .engine
        .request_booking(ctx.id(), facility_id, date, slot, &form.purpose)
        .await
}

/// Failed requests re-render the form with the user's input.
async fn book_facility(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<BookingForm>,
) -> Result<Response, AppError> {
    match request_from_form(&state, &ctx, &form).await {
        Ok(_) => Ok(flash::success(
            "/user/bookings",
            "Booking request submitted successfully! It is pending admin approval.",
        )
        .into_response()),
        Err(e) if !e.is_retryable() && !matches!(e, EngineError::Internal(_)) => {
            let flash = Flash::error(e.user_message());
            let status = AppError::from(e).status();
            Ok((status, booking_page(&state, &ctx, &flash, &form)?).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn bookings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let bookings = state.engine.user_bookings(ctx.id());
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/bookings.html",
        context! { bookings => value(&bookings) },
    )?
    .into_response())
}

fn back_to_bookings(result: Result<&str, EngineError>) -> Redirect {
    match result {
        Ok(message) => flash::success("/user/bookings", message),
        Err(e) => flash::error("/user/bookings", &e.user_message()),
    }
}

async fn cancel_booking(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
) -> Redirect {
    let result = state.engine.cancel_booking(ctx.id(), id).await;
    back_to_bookings(result.map(|_| "Booking cancelled successfully"))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleForm {
    pub booking_date: String,
    pub start_time: String,
    pub end_time: String,
}

async fn reschedule_booking(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
    Form(form): Form<RescheduleForm>,
) -> Redirect {
    let result = async {
        let date = parse_date(&form.booking_date)?;
        let slot = TimeSlot::parse(form.start_time.trim(), form.end_time.trim())?;
        state.engine.reschedule_booking(ctx.id(), id, date, slot).await
    }
    .await;
    back_to_bookings(result.map(|_| "Booking rescheduled successfully"))
}

// ── Availability (JSON) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub facility_id: String,
    pub date: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub exclude: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub facility_id: Ulid,
    pub date: NaiveDate,
    /// Present only when a slot was asked about.
    pub available: Option<bool>,
    pub conflict_with: Option<Ulid>,
    pub free_windows: Vec<String>,
}

async fn availability(
    State(state): State<AppState>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, JsonError> {
    let facility_id = parse_id(&q.facility_id, "facility")?;
    let date = parse_date(&q.date)?;
    let exclude = match q.exclude.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_id(raw, "booking")?),
    };
    let free_windows = state
        .engine
        .free_windows(facility_id, date)
        .await?
        .iter()
        .map(ToString::to_string)
        .collect();

    let (available, conflict_with) = match (q.start_time.as_deref(), q.end_time.as_deref()) {
        (Some(start), Some(end)) if !start.trim().is_empty() && !end.trim().is_empty() => {
            let slot = TimeSlot::parse(start.trim(), end.trim()).map_err(EngineError::from)?;
            let blocking = state
                .engine
                .check_availability(facility_id, date, &slot, exclude)
                .await?;
            (Some(blocking.is_none()), blocking)
        }
        _ => (None, None),
    };

    Ok(Json(AvailabilityResponse {
        facility_id,
        date,
        available,
        conflict_with,
        free_windows,
    }))
}

// ── Complaints ───────────────────────────────────────────────────

async fn complaints(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let complaints = state.engine.user_complaints(ctx.id());
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/complaints.html",
        context! {
            complaints => value(&complaints),
            categories => ComplaintCategory::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            priorities => ComplaintPriority::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ComplaintForm {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    pub priority: Option<String>,
}

async fn submit_complaint(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<ComplaintForm>,
) -> Redirect {
    if form.subject.trim().is_empty() || form.description.trim().is_empty() {
        return flash::error("/user/complaints", "Subject and description are required");
    }
    let result = async {
        let input = NewComplaint {
            subject: form.subject,
            description: form.description,
            category: parse_or_default(form.category.as_deref())?,
            priority: parse_or_default(form.priority.as_deref())?,
        };
        state.engine.submit_complaint(ctx.id(), input).await
    }
    .await;
    match result {
        Ok(_) => flash::success(
            "/user/complaints",
            "Complaint submitted successfully! We will review it soon.",
        ),
        Err(e) => flash::error("/user/complaints", &e.user_message()),
    }
}

async fn complaint_details(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    let Ok(complaint) = state.engine.complaint_for(ctx.id(), id) else {
        return Ok(flash::error("/user/complaints", "Complaint not found").into_response());
    };
    let resolver = complaint
        .resolved_by
        .and_then(|admin| state.engine.user(&admin))
        .map(|u| u.name);
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/complaint_details.html",
        context! { complaint => value(&complaint), resolved_by_name => resolver },
    )?
    .into_response())
}

// ── Search & reports ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub scope: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<SearchQuery>,
) -> Result<Response, AppError> {
    let term = query.q.unwrap_or_default();
    let scope = SearchScope::parse(query.scope.as_deref().unwrap_or("all"));
    let results = state.engine.search(ctx.id(), &term, scope);
    Ok(show(
        &state,
        &ctx,
        &Flash::default(),
        "user/search.html",
        context! {
            term => term.trim(),
            scope => scope.as_str(),
            results => value(&results),
            total => results.total(),
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

async fn reports(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, AppError> {
    let period = ReportPeriod::parse(
        query.period.as_deref(),
        query.start_date.as_deref(),
        query.end_date.as_deref(),
    );
    let report = state.engine.user_report(ctx.id(), period, Utc::now());
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/reports.html",
        context! {
            report => value(&report),
            period => period.as_str(),
            start_date => query.start_date,
            end_date => query.end_date,
        },
    )?
    .into_response())
}

pub(crate) fn csv_download(body: Vec<u8>, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_reports(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Response, AppError> {
    let bookings = state.engine.user_bookings(ctx.id());
    let body = export::user_bookings_csv(&bookings)?;
    let filename = format!("my-bookings-{}.csv", Utc::now().format("%Y-%m-%d"));
    Ok(csv_download(body, &filename))
}
