use anyhow::Context;
use parley_gateway::config::{GatewayConfig, LogFormat};
use parley_gateway::server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();
    init_tracing(&config);

    server::run(config).await.context("parley gateway failed")
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
