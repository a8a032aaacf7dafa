//! Runs the hard disk demo to quiescence and prints the kernel report.
//!
//! ```text
//! harddisk-demo [config.json]
//! RUST_LOG=debug harddisk-demo
//! ```

use anyhow::{Context as _, Result};
use harddisk_demo::{registry, DemoConfig};
use machina_core::Kernel;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            DemoConfig::from_json(&raw).with_context(|| format!("parsing config {path}"))?
        }
        None => DemoConfig::default(),
    };
    info!(?config, "starting demo");

    let report = Kernel::builder()
        .with_registry(registry(&config))
        .build()
        .run(&config.root)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
