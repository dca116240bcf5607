use std::net::SocketAddr;

use anyhow::Context;

use tollgate_api::app::{self, services};
use tollgate_infra::GateConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tollgate_observability::init();

    let config = GateConfig::from_env().context("invalid configuration")?;

    let storage = services::Storage::from_config(&config).await?;
    let services = services::build_services(storage, &config).await?;
    let monitor = services.lifecycle.monitor().clone();

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            monitor.shutdown();
        })
        .await
        .context("server error")
}
