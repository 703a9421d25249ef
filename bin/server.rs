// Livestock Gate Tracker - Web Server

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use livestock_gate::{api, logging, GateConfig, GateSystem};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GateConfig::load(None)?;
    logging::init_logging(&config.log_filter, false)?;

    println!("🌐 Livestock Gate Tracker - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let system = GateSystem::open(&config)?;
    println!("✓ Database opened: {:?}", config.database_path);

    let app = api::router(Arc::new(system));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "gate server listening");
    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   Scan: POST /api/pens/<pen_id>/gate");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;

    Ok(())
}
