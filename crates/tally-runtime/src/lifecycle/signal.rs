use tokio_util::sync::CancellationToken;

/// Cancel `cancel` on the first SIGINT or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and only the
/// remaining source is awaited.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tl_info!(sys, signal = "SIGINT", "received signal, shutting down");
                    }
                    _ = sigterm.recv() => {
                        tl_info!(sys, signal = "SIGTERM", "received signal, shutting down");
                    }
                }
            }
            Err(e) => {
                tl_warn!(sys, error = %e, "cannot listen for SIGTERM");
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;

    cancel.cancel();
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tl_info!(sys, signal = "SIGINT", "received signal, shutting down"),
        Err(e) => {
            tl_error!(sys, error = %e, "cannot listen for Ctrl-C, waiting forever");
            std::future::pending::<()>().await;
        }
    }
}
