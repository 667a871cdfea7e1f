use std::time::{Duration, Instant};

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderMap, header, request::Parts};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::auth;
use crate::model::{Role, User};

use super::AppState;
use super::error::AppError;

pub const COOKIE_NAME: &str = "campusbook_session";

/// Longest session lifetime the store will hand out (one year).
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct Session {
    user_id: Ulid,
    expires_at: Instant,
}

/// Server-side sessions keyed by an opaque cookie token.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl` is capped at [`MAX_SESSION_TTL`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: ttl.min(MAX_SESSION_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self, user_id: Ulid) -> String {
        let token = auth::session_token();
        self.sessions.insert(
            token.clone(),
            Session {
                user_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.record_gauge();
        token
    }

    /// The session's user, if the token is known and not expired.
    pub fn get(&self, token: &str) -> Option<Ulid> {
        let session = self.sessions.get(token)?;
        (session.expires_at > Instant::now()).then_some(session.user_id)
    }

    pub fn destroy(&self, token: &str) {
        if self.sessions.remove(token).is_some() {
            self.record_gauge();
        }
    }

    /// Drop every session that expired before `now`. Returns how many went.
    pub fn reap_expired(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        let reaped = before.saturating_sub(self.sessions.len());
        if reaped > 0 {
            self.record_gauge();
        }
        reaped
    }

    fn record_gauge(&self) {
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    #[cfg(test)]
    pub(crate) fn expire_now(&self, token: &str) {
        if let Some(mut s) = self.sessions.get_mut(token) {
            s.expires_at = Instant::now();
        }
    }
}

pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value)
}

pub fn session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.as_secs()
    )
}

pub fn clear_cookie() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Who is making the request. Handlers receive it from the auth middleware;
/// nothing reads session state directly.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
}

impl RequestContext {
    pub fn id(&self) -> Ulid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

/// Resolve the cookie to a live user. A session whose user was deleted is
/// treated as logged out.
pub fn current(state: &AppState, headers: &HeaderMap) -> Option<RequestContext> {
    let user_id = state.sessions.get(token_from_headers(headers)?)?;
    let user = state.engine.user(&user_id)?;
    Some(RequestContext { user })
}

async fn authorize(state: AppState, required: Role, mut req: Request, next: Next) -> Response {
    let Some(ctx) = current(&state, req.headers()) else {
        debug!(path = %req.uri().path(), "no session, redirecting to login");
        return Redirect::to("/auth/login").into_response();
    };
    if !ctx.role().permits(required) {
        return AppError::Forbidden.into_response();
    }
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

pub async fn require_user(State(state): State<AppState>, req: Request, next: Next) -> Response {
    authorize(state, Role::User, req, next).await
}

pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    authorize(state, Role::Admin, req, next).await
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| Redirect::to("/auth/login"))
    }
}
