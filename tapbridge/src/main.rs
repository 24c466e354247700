mod supervisor;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use supervisor::Supervisor;
use tb_common::ServerConfig;
use tokio_stream::StreamExt;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "error,tapbridge=info".parse().unwrap()),
        )
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let tls = match &config.tls {
        Some(tls) => match tb_ws::tls::load_server_config(tls) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                error!("TLS configuration error: {e}");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut supervisor = match Supervisor::build(&config, tls) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start: {e:#}");
            std::process::exit(1);
        }
    };

    supervisor.start().await?;
    info!("tapbridge running on {}:{}", config.host, config.port);

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    signals.next().await;
    info!("shutting down...");

    supervisor.stop().await;
    Ok(())
}
