use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use keystone_api::{ApiConfig, build_app, build_services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    keystone_observability::init();

    let config = ApiConfig::from_env()?;
    info!(config = ?config, "starting");

    let services = Arc::new(build_services(&config).await?);
    let sweeper = services.sweeper().spawn();

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
