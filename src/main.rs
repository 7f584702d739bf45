use axum::serve;
use clap::Parser;
use color_eyre::{
    eyre::Context,
    Result,
};
use databricks_exporter::{
    init_errors,
    init_logging,
    router::create_router,
};
use databricks_exporter_collector::{
    DatabricksConnector,
    Orchestrator,
};
use databricks_exporter_config::{
    Args,
    Config,
};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn start_server(config: Arc<Config>) -> Result<()> {
    let connector = DatabricksConnector::new(Arc::clone(&config)).wrap_err("Failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(Arc::clone(&config), Arc::new(connector));
    let app = create_router(Arc::new(orchestrator), &config.telemetry_path);

    let listener = TcpListener::bind(config.listen_address)
        .await
        .wrap_err_with(|| format!("Failed to listen on {}", config.listen_address))?;
    tracing::info!(
        address = %config.listen_address,
        telemetry_path = %config.telemetry_path,
        warehouse_id = config.warehouse_id(),
        "Listening"
    );

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_errors()?;
    init_logging(&args.log_level)?;

    let config = Config::new(&args).wrap_err("Failed to load configuration")?;
    config.validate().wrap_err("Invalid configuration")?;
    tracing::debug!(?config, "Loaded configuration");

    start_server(Arc::new(config)).await
}
