use std::sync::LazyLock;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use chrono::DateTime;
use minijinja::{Environment, Value, context};
use serde::Serialize;
use tracing::error;

use crate::model::{Ms, UserProfile};

use super::flash::Flash;
use super::session::RequestContext;

macro_rules! templates {
    ($($name:literal),+ $(,)?) => {
        &[$(($name, include_str!(concat!("../../templates/", $name)))),+]
    };
}

const TEMPLATES: &[(&str, &str)] = templates![
    "base.html",
    "error.html",
    "404.html",
    "auth/login.html",
    "auth/signup.html",
    "user/dashboard.html",
    "user/profile.html",
    "user/facilities.html",
    "user/booking.html",
    "user/bookings.html",
    "user/complaints.html",
    "user/complaint_details.html",
    "user/search.html",
    "user/reports.html",
    "user/notifications.html",
    "admin/dashboard.html",
    "admin/facilities.html",
    "admin/bookings.html",
    "admin/complaints.html",
    "admin/users.html",
];

/// `dd Mon YYYY, HH:MM` (UTC) for a millisecond timestamp.
fn datetime(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%d %b %Y, %H:%M").to_string())
        .unwrap_or_default()
}

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_loader(|name| {
        Ok(TEMPLATES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, source)| source.to_string()))
    });
    env.add_filter("datetime", datetime);
    env
});

pub fn render(name: &str, ctx: Value) -> Result<Html<String>, minijinja::Error> {
    ENV.get_template(name)?.render(ctx).map(Html)
}

/// Render a page for a signed-in user. `extra` is merged over the common
/// layout values (current user, unread badge, flash).
pub fn page(
    name: &str,
    user: &RequestContext,
    unread: usize,
    flash: &Flash,
    extra: Value,
) -> Result<Html<String>, minijinja::Error> {
    render(
        name,
        context! {
            current_user => UserProfile::from(&user.user),
            is_admin => user.is_admin(),
            unread_count => unread,
            success => &flash.success,
            error => &flash.error,
            ..extra
        },
    )
}

pub fn error_page(status: StatusCode, message: &str) -> Response {
    let ctx = context! { status => status.as_u16(), message => message };
    match render("error.html", ctx) {
        Ok(html) => (status, html).into_response(),
        Err(e) => {
            error!(error = %e, "error page failed to render");
            (status, message.to_string()).into_response()
        }
    }
}

pub fn not_found() -> Response {
    match render("404.html", context! { title => "Page Not Found" }) {
        Ok(html) => (StatusCode::NOT_FOUND, html).into_response(),
        Err(e) => {
            error!(error = %e, "404 page failed to render");
            (StatusCode::NOT_FOUND, "Page not found").into_response()
        }
    }
}

/// Serialize into a template value.
pub fn value<T: Serialize>(v: &T) -> Value {
    Value::from_serialize(v)
}
