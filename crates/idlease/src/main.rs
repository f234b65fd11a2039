use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use idlease_core::{Allocator, IdleaseConfig, OwnerToken, logging, startup};
use idlease_storage::MetricsCollector;
use idlease_storage::factory::{StorageConfig, create_storage_backend};
use tokio::sync::broadcast;
use tokio::task::JoinError;

#[derive(Parser, Debug)]
#[command(name = "idlease")]
#[command(about = "Claims and holds a unique ID from a shared range", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Use JSON structured logging
    #[arg(long)]
    json_logs: bool,

    /// Environment (development, staging, production)
    #[arg(short, long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = IdleaseConfig::load(&args.config)?;
    config.validate()?;

    let use_json = args.json_logs || args.environment == "production";
    logging::init(&config.observability, use_json);

    if !use_json {
        let config_path = std::fs::canonicalize(&args.config)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| args.config.clone());

        let mut entries = vec![
            startup::ConfigEntry::new("General", "environment", &args.environment),
            startup::ConfigEntry::new("General", "config_file", config_path),
        ];
        entries.extend(startup::config_entries(&config));

        startup::StartupDisplay::new(startup::ServiceInfo {
            name: "idlease",
            version: env!("CARGO_PKG_VERSION"),
            environment: args.environment.clone(),
        })
        .entries(entries)
        .display();
    } else {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %args.environment,
            config_file = %args.config,
            table = %config.lease.table,
            min_id = config.lease.min_id,
            max_id = config.lease.max_id,
            ttl_seconds = config.lease.ttl_seconds,
            "Starting idlease"
        );
    }

    if config.observability.metrics_enabled {
        idlease_api::init_exporter().context("Failed to install metrics exporter")?;
        startup::log_initialized("Metrics");
    } else {
        startup::log_skipped("Metrics", "disabled in configuration");
    }

    // Storage backend
    let storage_config = match config.storage.backend.as_str() {
        "memory" => StorageConfig::memory(),
        "foundationdb" => StorageConfig::foundationdb(config.storage.fdb_cluster_file.clone()),
        other => anyhow::bail!("Invalid storage backend: {}", other),
    };
    let storage = Arc::new(create_storage_backend(&storage_config).await?);
    startup::log_initialized(&format!("Storage ({})", storage.kind()));

    // Claim an ID
    let owner = OwnerToken::generate();
    let allocator =
        Allocator::with_system_clock(storage.as_ref().clone(), config.lease.clone(), owner);
    let lease = allocator.obtain_id().await.context("Failed to obtain ID")?;
    startup::log_initialized(&format!("Lease (ID {})", lease.id));

    let mut renewal = allocator.renewer(lease.clone()).start();

    // HTTP surface
    let addr = format!("{}:{}", config.server.http_host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;

    let state = idlease_api::AppState::new(
        Arc::clone(&storage),
        config.lease.table.as_str(),
        &lease,
        renewal.expires_at(),
    )
    .with_metrics(config.observability.metrics_enabled);

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let mut server = tokio::spawn(idlease_api::serve(listener, state, async move {
        shutdown_rx.recv().await.ok();
    }));

    startup::log_ready("idlease", lease.id, &[("HTTP", addr.as_str())]);

    // Run until a shutdown signal arrives, the lease can no longer be trusted,
    // or the HTTP surface reporting it goes away
    let exit = tokio::select! {
        _ = idlease_api::shutdown_signal() => Exit::Signal,
        result = renewal.wait() => Exit::Renewal(result),
        result = &mut server => Exit::Server(result),
    };

    let outcome = match exit {
        Exit::Signal => {
            let stopped = renewal.stop().await.map_err(anyhow::Error::from);
            let _ = shutdown_tx.send(());
            server.await.context("HTTP server task failed")??;
            stopped
        }
        Exit::Renewal(result) => {
            let _ = shutdown_tx.send(());
            server.await.context("HTTP server task failed")??;
            match result {
                Ok(()) => Err(anyhow!("renewal loop exited without a stop request")),
                Err(e) => Err(e.into()),
            }
        }
        Exit::Server(result) => {
            let _ = renewal.stop().await;
            Err(server_exit_error(result))
        }
    };

    storage.metrics().log_metrics();

    match outcome {
        Ok(()) => {
            tracing::info!(id = lease.id, "Shut down cleanly, lease will lapse on its own");
            Ok(())
        }
        Err(e) => {
            tracing::error!(id = lease.id, error = %e, "Giving up ID and exiting");
            Err(e)
        }
    }
}

/// Why the main loop stopped waiting
enum Exit {
    Signal,
    Renewal(idlease_core::Result<()>),
    Server(Result<Result<()>, JoinError>),
}

/// An HTTP server that stops on its own is always fatal
fn server_exit_error(result: Result<Result<()>, JoinError>) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow!("HTTP server exited unexpectedly"),
        Ok(Err(e)) => e.context("HTTP server failed"),
        Err(e) => anyhow::Error::from(e).context("HTTP server task failed"),
    }
}
