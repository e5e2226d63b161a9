//! Worker assembly: sandbox, processor and queue adapter wired together.

use crate::RequestProcessor;
use anyhow::Context;
use script_executor_core::stats::ProcessorStats;
use script_executor_core::{TransportKind, WorkerConfig};
use script_executor_queue::{InMemoryTransport, NatsTransport, QueueAdapter, QueueTransport};
use script_executor_sandbox::{SandboxConfig, ScriptSandbox};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Connects the transport selected by `config.queue.transport`.
///
/// # Errors
///
/// Returns an error if the broker cannot be reached.
pub async fn connect_transport(config: &WorkerConfig) -> anyhow::Result<Arc<dyn QueueTransport>> {
    match config.queue.transport {
        TransportKind::Nats => {
            let transport = NatsTransport::connect(&config.queue.url)
                .await
                .with_context(|| format!("failed to connect to {}", config.queue.url))?
                .with_project_id(&config.queue.project_id);
            Ok(Arc::new(transport))
        }
        TransportKind::Memory => {
            tracing::warn!("Using the in-memory transport, no external requests will arrive");
            Ok(Arc::new(InMemoryTransport::new()))
        }
    }
}

/// Runs the worker on `transport` until `shutdown` fires.
///
/// Returns the processor statistics at shutdown.
///
/// # Errors
///
/// Returns an error if provisioning fails or the request stream ends
/// before shutdown.
pub async fn serve<T>(
    transport: Arc<T>,
    config: &WorkerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<ProcessorStats>
where
    T: QueueTransport + ?Sized,
{
    let sandbox_config = SandboxConfig::from_use_sandbox(config.script.use_sandbox);
    tracing::info!(mode = ?sandbox_config.mode(), "Script sandbox ready");
    let sandbox = Arc::new(ScriptSandbox::new(sandbox_config));

    let adapter = Arc::new(
        QueueAdapter::new(transport, config).context("invalid queue configuration")?,
    );
    adapter
        .init()
        .await
        .context("failed to provision the request topic")?;

    let processor = Arc::new(RequestProcessor::new(
        sandbox,
        Arc::clone(&adapter),
        &config.script,
    ));
    tracing::info!(
        topic = %config.request_topic,
        max_active_scripts = config.script.max_active_scripts,
        "Worker started"
    );

    let outcome = adapter.run(Arc::clone(&processor), shutdown).await;

    if let Err(err) = adapter.close().await {
        tracing::warn!("Failed to close the transport cleanly: {err}");
    }

    let stats = processor.collect_stats();
    match serde_json::to_string(&stats) {
        Ok(json) => tracing::info!("Processor stats: {json}"),
        Err(err) => tracing::warn!("Failed to serialize processor stats: {err}"),
    }

    outcome.context("request consumption failed")?;
    Ok(stats)
}
