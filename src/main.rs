/// bingo - bidirectional DID/handle lookup service for the AT Protocol identity directory.
///
/// Wires together the Binding Store (C1), Directory Ingester (C2), Handle
/// Validator (C3) and Lookup Service (C4) behind a Supervisor (C5): see
/// spec.md §2 for the component map and §4.5 for the startup sequence this
/// binary follows.
mod cache;
mod config;
mod context;
mod db;
mod error;
mod ingester;
mod lookup;
mod metrics;
mod rate_limit;
mod server;
mod store;
mod validator;

use config::ServerConfig;
use context::AppContext;
use error::BingoResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> BingoResult<()> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bingo=info,tower_http=info".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    let config = ServerConfig::from_env().map_err(|e| error::BingoError::Internal(e.to_string()))?;

    let ctx = AppContext::new(config).await?;
    let background = ctx.spawn_background_loops();

    let shutdown_cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("termination signal received, beginning graceful shutdown");
        shutdown_cancel.cancel();
    });

    server::serve(ctx.clone()).await?;

    ctx.cancel.cancel();
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

/// Wait for either Ctrl+C or, on Unix, SIGTERM — whichever arrives first.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
