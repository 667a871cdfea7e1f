use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use minijinja::context;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::NotificationFilter;
use crate::model::Notification;

use super::error::AppError;
use super::flash::{self, Flash};
use super::session::RequestContext;
use super::views::value;
use super::{AppState, show};

const PAGE: &str = "/user/notifications";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/read/{id}", post(mark_read))
        .route("/read-all", post(mark_all_read))
        .route("/delete/{id}", post(delete))
        .route("/api/unread-count", get(unread_count))
        .route("/api/recent", get(recent))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub filter: Option<String>,
    pub page: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(flash): Query<Flash>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let filter = NotificationFilter::parse(query.filter.as_deref().unwrap_or("all"));
    let page = query
        .page
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(1);
    let page = state.engine.notifications(ctx.id(), filter, page);
    let counts = state.engine.notification_counts(ctx.id());
    Ok(show(
        &state,
        &ctx,
        &flash,
        "user/notifications.html",
        context! {
            page => value(&page),
            counts => value(&counts),
            current_filter => filter.as_str(),
        },
    )?
    .into_response())
}

async fn mark_read(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
) -> Redirect {
    match state.engine.mark_notification_read(ctx.id(), id).await {
        Ok(()) => flash::success(PAGE, "Notification marked as read"),
        Err(_) => flash::error(PAGE, "Failed to mark notification as read"),
    }
}

async fn mark_all_read(State(state): State<AppState>, ctx: RequestContext) -> Redirect {
    match state.engine.mark_all_read(ctx.id()).await {
        Ok(_) => flash::success(PAGE, "All notifications marked as read"),
        Err(_) => flash::error(PAGE, "Failed to mark all notifications as read"),
    }
}

async fn delete(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Ulid>,
) -> Redirect {
    match state.engine.delete_notification(ctx.id(), id).await {
        Ok(()) => flash::success(PAGE, "Notification deleted successfully"),
        Err(_) => flash::error(PAGE, "Failed to delete notification"),
    }
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: usize,
}

async fn unread_count(State(state): State<AppState>, ctx: RequestContext) -> Json<UnreadCount> {
    Json(UnreadCount {
        unread: state.engine.unread_count(ctx.id()),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recent {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

async fn recent(State(state): State<AppState>, ctx: RequestContext) -> Json<Recent> {
    let (notifications, unread_count) = state.engine.recent_notifications(ctx.id());
    Json(Recent {
        notifications,
        unread_count,
    })
}
