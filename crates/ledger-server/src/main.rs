#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use ledger::{Checker, Inserter, MemoryStorage};
use server::config::{CliArgs, ServerConfig};
use server::service::handler::LedgerService;
use server::source::HttpTokenSource;
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    if config.separator.clone().install().is_err() {
        anyhow::bail!("error separator was installed twice");
    }

    let source = HttpTokenSource::new(
        config.source_url.clone(),
        config.source_timeout,
        config.source_retry,
    )?;
    if let Err(_e) = source.check().await {
        #[cfg(feature = "tracing")]
        tracing::warn!("Token generator at {} is not ready: {_e}", source.url());
    }

    let storage = Arc::new(MemoryStorage::new());
    storage.check().await?;

    let inserter = Inserter::new(storage, config.concurrency);
    let router = LedgerService::new(inserter, Arc::new(source), config.max_batch_size)
        .with_request_timeout(config.request_timeout)
        .router();

    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config);

    let res = run_server(listener, router, &config).await;
    providers.shutdown();
    res
}

async fn run_server(
    listener: TcpListener,
    router: axum::Router,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let serve = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let drain_limit = async {
        shutdown.cancelled().await;
        tokio::time::sleep(config.shutdown_timeout).await;
    };

    tokio::select! {
        res = serve => {
            res?;
            #[cfg(feature = "tracing")]
            tracing::info!("Service shut down successfully");
        }
        () = drain_limit => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Connections still open after {:?}, shutting down anyway",
                config.shutdown_timeout
            );
        }
    }

    Ok(())
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting ledger service on {} with full config: {:#?}",
            _config.server_addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting ledger service on {} with concurrency {}",
            _config.server_addr,
            _config.concurrency
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, draining in-flight batches...");

    shutdown.cancel();
}
