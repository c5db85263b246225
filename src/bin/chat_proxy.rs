//! chat-proxy - streaming OpenAI-compatible pass-through
//!
//! Configured from `PROXY_*` environment variables.

use termux_agent::{api, config::ProxyConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "termux_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProxyConfig::from_env()?;
    info!("Forwarding to {}", config.upstream_base);

    api::serve(config).await?;

    Ok(())
}
