use anyhow::Context;
use send_quote_request::{
    config::{env_lookup, listen_address, services_from_env, HandlerOptions},
    handler::QuoteRequestHandler,
    server::router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "send_quote_request=info,quote_server=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = HandlerOptions::from_env().context("Invalid request handling settings")?;
    let services = services_from_env();
    if let Err(error) = &services {
        error!("Quote requests will be rejected until configuration is fixed: {error}");
    }
    let handler = Arc::new(QuoteRequestHandler::new(options, services));

    let address = listen_address(env_lookup).context("Invalid listen address")?;
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Could not bind {address}"))?;
    info!("Listening for quote requests on {address}");
    axum::serve(listener, router(handler))
        .await
        .context("Server terminated")
}
