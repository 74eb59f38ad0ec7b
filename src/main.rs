use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use sigscraper::{
    config::{self, ClassifyConfig, RegionConfig},
    pipeline::{self, RebuildMode},
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Pre-build data pipeline for the SIGMINE mining-claim map: refreshes
/// the KMZ source, converts it to GeoJSON and writes the partitioned
/// project caches the front end reads.
#[derive(Debug, Parser)]
#[command(name = "sigscraper")]
struct Cli {
    /// YAML file declaring the zones to process (defaults to the rs zone).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Discard data before running: `cache` re-derives from the local
    /// archive, `everything` forces a re-download, `highlights`
    /// recomputes only the highlights file.
    #[arg(long, value_enum)]
    rebuild: Option<RebuildMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cli = Cli::parse();
    let zones = config::load_zones(cli.config.as_deref())?;
    let classify = ClassifyConfig::default();
    let client = Client::new();

    info!(zones = zones.len(), "startup");

    let mut failures = 0usize;
    for zone in &zones {
        let cfg = RegionConfig::from_zone(zone);
        if let Err(e) = pipeline::run(&client, &cfg, &classify, cli.rebuild).await {
            error!(region = %cfg.region, error = %e, "zone failed");
            failures += 1;
        }
    }

    anyhow::ensure!(failures == 0, "{failures} zone(s) failed");
    info!("all done");
    Ok(())
}
