use tracing::info;

use clipcredit_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clipcredit_observability::init();

    let config = AppConfig::from_env()?;
    let services = clipcredit_worker::build_services(&config).await?;

    services.cleanup.start_scheduled_cleanup();
    info!("clipcredit worker running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    services.cleanup.stop_scheduled_cleanup().await;
    info!(stats = ?services.cleanup.get_stats(), "clipcredit worker stopped");
    Ok(())
}
