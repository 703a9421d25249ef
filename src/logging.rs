// Tracing setup shared by the CLI and the server.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. RUST_LOG wins over `default_filter`;
/// `verbose` raises the default to debug.
pub fn init_logging(default_filter: &str, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("livestock_gate=debug")
        } else {
            EnvFilter::new(default_filter)
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
