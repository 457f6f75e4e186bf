//! Binary entry point for the gateway.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agent_gateway=info,tower_http=info")),
        )
        .init();

    let config = agent_gateway::Config::from_env();
    tracing::info!(bind = %config.bind_addr, "starting agent gateway");
    agent_gateway::api::serve(config).await
}
