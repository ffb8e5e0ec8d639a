use std::env;

use anyhow::Result;
use promptgate_api::build_app;
use promptgate_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("promptgate_api");

    let config_dir = env::var("PROMPTGATE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let bind = env::var("PROMPTGATE_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let app = build_app(&config_dir)?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, config_dir = %config_dir, "promptgate api started");

    axum::serve(listener, app).await?;
    Ok(())
}
