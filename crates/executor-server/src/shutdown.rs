//! Process signal handling.
//!
//! SIGINT and SIGTERM cancel the worker's shutdown token. A signal that
//! cannot be listened for is logged and never fires.

use std::future::Future;
use std::io;
use tokio_util::sync::CancellationToken;

/// Waits for `signal` to arrive.
///
/// If listening fails, the error is logged and the returned future never
/// completes.
pub async fn wait_for<F>(signal: F, name: &str)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(err) = signal.await {
        tracing::error!("Cannot listen for {name}, it will be ignored: {err}");
        std::future::pending::<()>().await;
    }
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
pub async fn watch_signals(shutdown: CancellationToken) {
    let interrupt = wait_for(tokio::signal::ctrl_c(), "SIGINT");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let terminate = wait_for(
            async {
                let mut sigterm = signal(SignalKind::terminate())?;
                sigterm
                    .recv()
                    .await
                    .ok_or_else(|| io::Error::other("signal stream closed"))
            },
            "SIGTERM",
        );
        tokio::select! {
            () = interrupt => {}
            () = terminate => {}
        }
    }
    #[cfg(not(unix))]
    interrupt.await;

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
