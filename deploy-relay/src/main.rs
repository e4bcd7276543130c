use anyhow::Result;
use clap::Parser;
use deploy_relay::config::RelayConfig;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set. `RELAY_LOG_JSON=1` switches to one JSON object
/// per line for log shippers.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("deploy_relay=info,tower_http=warn"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("RELAY_LOG_JSON").as_deref() {
        Ok("1") => subscriber.json().init(),
        _ => subscriber.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = RelayConfig::parse();
    tracing::info!(addr = %config.listen_addr(), "starting deploy relay");
    deploy_relay::server::run(config).await
}
