use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use library_gateway::config::GatewayArgs;
use library_gateway::{AuthForwarder, FederationGateway, server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = GatewayArgs::parse();

    let services = args.service_definitions()?;
    let gateway = Arc::new(
        FederationGateway::from_services(services, Arc::new(AuthForwarder))
            .await
            .context("failed to load subgraph schemas")?,
    );

    // No retry: a bind failure ends the process.
    let listener = server::bind(args.listen).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Server ready at http://{}/", addr);

    server::serve(listener, gateway).await?;
    Ok(())
}
