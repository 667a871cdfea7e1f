use axum::response::Redirect;
use serde::{Deserialize, Serialize};

/// One-shot message carried on the redirect target's query string.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Flash {
    pub success: Option<String>,
    pub error: Option<String>,
}

impl Flash {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: None,
            error: Some(message.into()),
        }
    }
}

fn redirect_with(path: &str, key: &str, message: &str) -> Redirect {
    let query = serde_urlencoded::to_string([(key, message)]).unwrap_or_default();
    let sep = if path.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{path}{sep}{query}"))
}

pub fn success(path: &str, message: &str) -> Redirect {
    redirect_with(path, "success", message)
}

pub fn error(path: &str, message: &str) -> Redirect {
    redirect_with(path, "error", message)
}
