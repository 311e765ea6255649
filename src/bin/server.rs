use clap::Parser;
use coedit::engine::EngineConfig;
use coedit::{cli::Args, create_router_with_config, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coedit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Snapshot store: {}", args.store_dir.display());

    let (app, hub) = create_router_with_config(ServerConfig {
        store_dir: args.store_dir.clone(),
        engine: EngineConfig {
            debounce: Duration::from_millis(args.debounce_ms),
            tail_size: args.tail_size,
            idle_eviction: Duration::from_secs(args.idle_eviction_mins * 60),
        },
        allowed_origin: args.allowed_origin.clone(),
    })
    .await
    .expect("Failed to open snapshot store");

    // Run the server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .expect("Invalid address");

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Flush every live engine before exit, bounded by the drain deadline.
    let deadline = Duration::from_secs(args.shutdown_drain_secs);
    match tokio::time::timeout(deadline, hub.drain_all()).await {
        Ok(()) => tracing::info!("drained cleanly"),
        Err(_) => {
            tracing::error!("drain exceeded {:?} deadline", deadline);
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
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
    tracing::info!("shutdown signal received");
}
