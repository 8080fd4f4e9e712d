use std::sync::Arc;

use ride_dispatch::api::rest::router;
use ride_dispatch::config::Config;
use ride_dispatch::engine::spawn_background_tasks;
use ride_dispatch::error::AppError;
use ride_dispatch::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::new(&config));
    let app = router(shared_state.clone());

    let shutdown = CancellationToken::new();
    let background = spawn_background_tasks(&shared_state, &shutdown);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        match_tick_secs = config.matching.tick.as_secs(),
        match_radius_km = config.matching.radius_km,
        "http server started"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    // The server can also stop on its own error; the schedulers follow it down.
    shutdown.cancel();
    for handle in background {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "background task panicked");
        }
    }

    served.map_err(|err| AppError::Internal(format!("server error: {err}")))?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
