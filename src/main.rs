use std::sync::Arc;

use log::info;
use pubsub_sendmail::{EventMailForwarder, ForwarderConfig, ProcessEnv, logs, push};

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received. Preparing graceful exit...");
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let verbose = ForwarderConfig::load(&ProcessEnv).debug.enabled();
    logs::init_logger(verbose).expect("Failed to initialize logger");

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .expect("PORT must be a valid u16");

    let forwarder = Arc::new(EventMailForwarder::new(ProcessEnv));

    if let Err(e) = push::run(forwarder, port, shutdown_signal()).await {
        log::error!("Push endpoint failed: {}", e);
        std::process::exit(1);
    }
}
