use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use minijinja::context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{EngineError, NewUser};
use crate::model::Role;

use super::error::AppError;
use super::flash::{self, Flash};
use super::session::{self, clear_cookie, session_cookie, token_from_headers};
use super::{AppState, home_for, views};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_form).post(login))
        .route("/signup", get(signup_form).post(signup))
        .route("/logout", get(logout))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// Signup fields, echoed back into the form when validation fails.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub confirm_password: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub department: String,
    pub terms: Option<String>,
}

fn login_page(flash: &Flash, email: &str) -> Result<Html<String>, AppError> {
    Ok(views::render(
        "auth/login.html",
        context! { success => &flash.success, error => &flash.error, email => email },
    )?)
}

fn signup_page(error: Option<&str>, form: &SignupForm) -> Result<Html<String>, AppError> {
    Ok(views::render(
        "auth/signup.html",
        context! { error => error, form => form },
    )?)
}

async fn login_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(flash): Query<Flash>,
) -> Result<Response, AppError> {
    if let Some(ctx) = session::current(&state, &headers) {
        return Ok(Redirect::to(home_for(&ctx)).into_response());
    }
    Ok(login_page(&flash, "")?.into_response())
}

async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    if form.email.trim().is_empty() || form.password.is_empty() {
        let flash = Flash::error("Email and password are required");
        return Ok(login_page(&flash, &form.email)?.into_response());
    }
    let user = match state.engine.authenticate(&form.email, &form.password).await {
        Ok(user) => user,
        Err(EngineError::InvalidCredentials) => {
            metrics::counter!(crate::observability::LOGIN_FAILURES_TOTAL).increment(1);
            warn!(email = %form.email.trim(), "login failed");
            let flash = Flash::error(EngineError::InvalidCredentials.to_string());
            return Ok(login_page(&flash, &form.email)?.into_response());
        }
        Err(e) => return Err(e.into()),
    };

    let token = state.sessions.create(user.id);
    info!(user = %user.id, role = %user.role, "logged in");
    let target = if user.role == Role::Admin {
        "/admin/dashboard"
    } else {
        "/user/dashboard"
    };
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, state.sessions.ttl()))],
        Redirect::to(target),
    )
        .into_response())
}

async fn signup_form(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(ctx) = session::current(&state, &headers) {
        return Ok(Redirect::to(home_for(&ctx)).into_response());
    }
    Ok(signup_page(None, &SignupForm::default())?.into_response())
}

/// Checks the registration rules can't: confirmation and terms.
fn signup_precheck(form: &SignupForm) -> Option<&'static str> {
    if form.password.trim().is_empty() {
        return Some("Password is required");
    }
    if form.confirm_password.trim().is_empty() {
        return Some("Password confirmation is required");
    }
    if form.password != form.confirm_password {
        return Some("Passwords do not match");
    }
    if form.terms.is_none() {
        return Some("Please accept the Terms of Service and Privacy Policy");
    }
    None
}

async fn signup(
    State(state): State<AppState>,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    if let Some(problem) = signup_precheck(&form) {
        return Ok(signup_page(Some(problem), &form)?.into_response());
    }
    let registered = state
        .engine
        .register_user(NewUser {
            name: form.name.clone(),
            email: form.email.clone(),
            password: form.password.clone(),
            contact: form.contact.clone(),
            department: form.department.clone(),
            role: Role::User,
        })
        .await;
    match registered {
        Ok(_) => Ok(flash::success(
            "/auth/login",
            "Account created successfully! Please login with your credentials.",
        )
        .into_response()),
        Err(EngineError::EmailTaken(_)) => Ok(signup_page(
            Some("Email already registered. Please use a different email or login."),
            &form,
        )?
        .into_response()),
        Err(e @ (EngineError::Validation(_) | EngineError::LimitExceeded(_))) => {
            Ok(signup_page(Some(&e.to_string()), &form)?.into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = token_from_headers(&headers) {
        state.sessions.destroy(token);
    }
    ([(header::SET_COOKIE, clear_cookie())], Redirect::to("/"))
}
