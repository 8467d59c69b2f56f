use axum::{routing::get, Router};
use ledger::config::Config;
use ledger::repository::{PostgresLedgerStore, RedisRankingStore};
use ledger::state::AppState;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "text".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger=info,tower_http=info".into());

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = "ledger",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting ledger service"
    );

    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    // Install the recorder before anything emits metrics
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(Duration::from_millis(config.database.acquire_timeout_ms))
        .connect(&config.database.url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!(pool_size = config.database.pool_size, "Database connected and migrated");

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = redis_client.get_connection_manager().await?;
    tracing::info!("Redis connected");

    let store = Arc::new(PostgresLedgerStore::new(pool, config.lock_timeout()));
    let rankings = Arc::new(RedisRankingStore::new(redis_conn, config.ticket_thresholds()?));
    // No signed-random provider is wired here; pot outcomes come from round seeds
    let app_state = AppState::new(config.clone(), store, rankings, None)?;
    tracing::info!("Pot outcomes derived from committed round seeds");

    let reaper = tokio::spawn(reap_sessions(
        app_state.clone(),
        Duration::from_secs(config.sessions.reap_interval_seconds.max(1)),
    ));

    let app = ledger::build_router(app_state);
    let metrics_server = tokio::spawn(start_metrics_server(config.metrics_port, metrics_handle));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("Ledger API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    metrics_server.abort();
    tracing::info!("Ledger service stopped");

    Ok(())
}

/// Roll back sessions whose callers never finished them
async fn reap_sessions(state: AppState, every: Duration) {
    let max_age = state.config.session_max_age();
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let reaped = state.sessions.reap_abandoned(max_age).await;
        if reaped > 0 {
            tracing::warn!(reaped, "Abandoned sessions rolled back");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

async fn start_metrics_server(
    port: u16,
    handle: metrics_exporter_prometheus::PrometheusHandle,
) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
