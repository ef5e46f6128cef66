use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use prompt_compiler::upstream::OpenAiClient;
use prompt_compiler::{app, AppConfig, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();

    let client = match OpenAiClient::new(&config.upstream) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream client");
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let environment = config.environment.clone();
    let state = AppState::new(config, Arc::new(client));

    if let Some(interval) = state.config.rate_limit.evict_interval {
        state.pipeline.admission().spawn_eviction(interval);
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to bind on {addr}");
            std::process::exit(1);
        });

    tracing::info!(%environment, "listening on {addr}");
    tracing::info!("health check available at http://localhost:{}/health", addr.port());
    tracing::info!(
        "compile endpoint available at http://localhost:{}/api/compile",
        addr.port()
    );

    let service = app(state).into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }

    tracing::info!("server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down gracefully"),
        () = terminate => tracing::info!("received SIGTERM, shutting down gracefully"),
    }
}
