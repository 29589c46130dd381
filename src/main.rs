mod admin;
mod audio;
mod config;
mod prompt;
mod protocol;
mod session;
mod upstream;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use admin::AdminClient;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load("config") {
        Ok(config) => config,
        Err(e) => {
            warn!("config load failed ({e}), using defaults");
            Config::default()
        }
    };
    info!(
        ws_path = %config.ws_path,
        default_agent = %config.default_agent,
        agents = ?config.agents.keys().collect::<Vec<_>>(),
        telephony_hz = config.telephony_sample_rate,
        upstream_in_hz = config.upstream_input_sample_rate,
        upstream_out_hz = config.upstream_output_sample_rate,
        input_chunk = config.input_chunk_samples,
        output_chunk = config.output_chunk_samples,
        "configuration loaded"
    );

    let admin = Arc::new(AdminClient::new(&config)?);
    let config = Arc::new(config);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "telephony bridge listening on ws://{}:{}{}",
        config.host, config.port, config.ws_path
    );

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                let config = Arc::clone(&config);
                let admin = Arc::clone(&admin);
                tokio::spawn(async move {
                    if let Err(e) = session::handle_connection(stream, peer, config, admin).await {
                        warn!(%peer, "session ended with error: {e:#}");
                    }
                });
            }
        }
    }

    Ok(())
}
