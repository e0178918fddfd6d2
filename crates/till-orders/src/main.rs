use till_orders::{
    config,
    OrdersService,
};
use tracing::info;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cfg = config::get().expect("failed to read configuration");
    telemetry::init(&cfg.log).expect("failed to initialize tracing");
    info!(api_listen_addr = %cfg.api_listen_addr, "initializing orders service");

    OrdersService::new(&cfg).await?.run_until_stopped().await;

    Ok(())
}
