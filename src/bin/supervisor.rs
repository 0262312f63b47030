//! ghost-runner-supervisor binary (C8) — the long-lived process that admits
//! rooms, spawns `ghost-runner` children for them, and exposes the HTTP API
//! consumed by the room server.

use ghost_runner::config::SupervisorConfig;
use ghost_runner::supervisor::{http, ProductionSupervisor};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ghost_runner=info".parse().unwrap()),
        )
        .init();

    let config = SupervisorConfig::from_env();
    let port = config.port;
    log::info!(
        "ghost-runner-supervisor starting on :{} (max_active_rooms={}, autostart={})",
        port,
        config.max_active_rooms,
        config.runner_autostart
    );

    let (supervisor, exit_rx) = ProductionSupervisor::new(config);
    tokio::spawn(supervisor.clone().run_exit_loop(exit_rx));

    let app = http::build_router(supervisor);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("failed to bind supervisor listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("supervisor HTTP server failed");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log::info!("ghost-runner-supervisor shutting down");
}
