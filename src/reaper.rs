use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::web::session::SessionStore;

/// Background task that periodically drops expired sessions.
pub async fn run_session_reaper(sessions: Arc<SessionStore>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let reaped = sessions.reap_expired(Instant::now());
        if reaped > 0 {
            info!(reaped, "expired sessions removed");
        }
    }
}

/// Background task that compacts the event log once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            debug!("compaction pass done");
        }
    }
}

/// True when a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!(appends, error = %e, "event log compaction failed");
            false
        }
    }
}
