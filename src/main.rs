use anyhow::Result;
use arbovirus_forecast::{api, config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let app_state = controller::AppState::new(cfg.clone()).await?;
    let app = api::router(app_state.clone(), &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("Server binding to 0.0.0.0, the API is reachable from the network");
    }

    info!(
        %addr,
        municipalities = cfg.collectors.municipalities.len(),
        artifacts = %cfg.artifacts.dir.display(),
        "starting Arbovirus Forecast"
    );

    controller::spawn_background_tasks(&app_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
