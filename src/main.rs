use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use campusbook::config::Config;
use campusbook::engine::Engine;
use campusbook::notify::{NotifyHub, run_dispatcher};
use campusbook::web::session::SessionStore;
use campusbook::web::{self, AppState};
use campusbook::{observability, reaper, seed};

const SESSION_REAP_PERIOD: Duration = Duration::from_secs(60);
const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::load()?);
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify.clone())?);
    let sessions = Arc::new(SessionStore::new(config.session_ttl));

    tokio::spawn(run_dispatcher(engine.clone(), notify.subscribe()));
    tokio::spawn(reaper::run_session_reaper(sessions.clone(), SESSION_REAP_PERIOD));
    tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        COMPACT_CHECK_PERIOD,
    ));

    let admin = seed::ensure_admin(&engine, &config).await?;
    if config.seed_facilities {
        match &admin {
            Some(admin) => {
                seed::seed_facilities(&engine, admin.id).await?;
            }
            None => warn!("facility seeding needs CAMPUSBOOK_ADMIN_EMAIL and CAMPUSBOOK_ADMIN_PASSWORD"),
        }
    }

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("campusbook listening on http://{addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  users: {}", engine.user_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let app = web::router(AppState {
        engine,
        sessions,
        config,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("campusbook stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c; in-flight requests then drain.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
