use anyhow::{Context, Result};
use inbound_worker::telemetry::{init_telemetry, TelemetryConfig};
use inbound_worker::{InboundWorker, WorkerConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real deployments use the environment
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: inbound crates at debug)
    // - LOG_FORMAT=json: JSON lines
    let telemetry_config = TelemetryConfig::from_env();
    init_telemetry(&telemetry_config).context("Failed to initialize logging")?;

    tracing::info!("inbound-worker starting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        intake_address = %config.intake_bind_address,
        max_concurrency = config.max_concurrency,
        postgres = config.database_url.is_some(),
        "Starting inbound worker"
    );

    let worker = InboundWorker::new(config)
        .await
        .context("Failed to create inbound worker")?;

    let cancel = CancellationToken::new();
    let run = worker.run(cancel.clone());
    tokio::pin!(run);

    // Run the worker (blocks until shutdown)
    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            cancel.cancel();
            run.await?;
        }
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}
