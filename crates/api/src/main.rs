use std::env;

use anyhow::Result;
use switchboard_api::build_app;
use switchboard_core::RouterConfig;
use switchboard_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("switchboard_api");

    let bind = env::var("SWITCHBOARD_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let config = RouterConfig::from_env();

    let app = build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "switchboard api started");

    axum::serve(listener, app).await?;
    Ok(())
}
