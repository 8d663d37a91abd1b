use intake_infra::IntakeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    intake_observability::init();

    let config = IntakeConfig::from_env()?;
    let (app, services) = intake_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(kind = %config.kind, "listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Consumer threads block; join them off the async workers.
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}
