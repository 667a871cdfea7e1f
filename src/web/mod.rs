pub mod admin;
pub mod auth;
pub mod error;
pub mod flash;
pub mod notifications;
pub mod session;
pub mod user;
pub mod views;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::Config;
use crate::engine::Engine;
use crate::observability;

use self::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionStore>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let user_routes = user::routes()
        .nest("/notifications", notifications::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), session::require_user));
    let admin_routes = admin::routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), session::require_admin));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .nest("/auth", auth::routes())
        .nest("/user", user_routes)
        .nest("/admin", admin_routes)
        .fallback(not_found)
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

/// Where a signed-in user lands.
pub fn home_for(ctx: &session::RequestContext) -> &'static str {
    if ctx.is_admin() {
        "/admin/dashboard"
    } else {
        "/user/dashboard"
    }
}

/// Render a page inside the signed-in layout.
pub(crate) fn show(
    state: &AppState,
    ctx: &session::RequestContext,
    flash: &flash::Flash,
    template: &str,
    extra: minijinja::Value,
) -> Result<Html<String>, error::AppError> {
    let unread = state.engine.unread_count(ctx.id());
    Ok(views::page(template, ctx, unread, flash, extra)?)
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Redirect {
    match session::current(&state, &headers) {
        Some(ctx) => Redirect::to(home_for(&ctx)),
        None => Redirect::to("/auth/login"),
    }
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "users": state.engine.user_count(),
    }))
}

async fn not_found() -> Response {
    views::not_found()
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = observability::status_class(response.status().as_u16());
    metrics::counter!(observability::HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response.into_response()
}
