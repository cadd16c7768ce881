use portico::config::{ConfigurationResolver, resolve_home};
use portico::{LifecycleCoordinator, logging};

#[tokio::main]
async fn main() {
    let log_handle = logging::init();

    let home = resolve_home();
    let mut lifecycle =
        LifecycleCoordinator::new(ConfigurationResolver::new(home)).with_logging(log_handle);

    let composition = match lifecycle.start() {
        Ok(composition) => composition,
        Err(e) => {
            tracing::error!("Failed to start: {e}");
            std::process::exit(1);
        }
    };

    let addr = match composition.listen_address() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid listener configuration: {e}");
            lifecycle.stop();
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {addr}: {e}");
            lifecycle.stop();
            std::process::exit(1);
        }
    };
    tracing::info!("listening on {addr}");

    if let Err(e) = axum::serve(listener, composition.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
    }

    let summary = lifecycle.stop();
    tracing::info!(
        "Shut down ({} provider(s) stopped, {} failed)",
        summary.providers.attempted,
        summary.providers.failed.len()
    );
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Stop signal received");
}
