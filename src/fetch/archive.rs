// src/fetch/archive.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::config::RegionConfig;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Whether `update_archive` replaced the local archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded,
    KeptLocal,
}

/// Refresh the local archive if it is missing or past the age limit.
///
/// A due download first purges the input directory and the derived cache
/// directory, since a new archive invalidates everything downstream.
/// Download failure after the attempt bound is logged and reported as
/// `KeptLocal`; the caller proceeds with whatever is left on disk.
#[instrument(level = "info", skip(client, cfg), fields(region = %cfg.region))]
pub async fn update_archive(client: &Client, cfg: &RegionConfig) -> Result<FetchOutcome> {
    if !archive_is_stale(cfg) {
        info!(path = %cfg.archive_path.display(), "local archive is fresh");
        return Ok(FetchOutcome::KeptLocal);
    }

    for dir in [&cfg.input_dir, &cfg.cache_dir] {
        if dir.exists() {
            fs::remove_dir_all(dir).with_context(|| format!("purging {:?}", dir))?;
            info!(dir = %dir.display(), "purged obsolete data");
        }
    }
    fs::create_dir_all(&cfg.input_dir)
        .with_context(|| format!("creating {:?}", cfg.input_dir))?;

    info!(url = %cfg.download_url, "downloading archive");
    match download_with_retry(client, &cfg.download_url, &cfg.input_dir).await {
        Ok(path) => {
            info!(path = %path.display(), "download completed");
            Ok(FetchOutcome::Downloaded)
        }
        Err(e) => {
            error!(error = %e, "download failed; continuing without a fresh archive");
            Ok(FetchOutcome::KeptLocal)
        }
    }
}

fn archive_is_stale(cfg: &RegionConfig) -> bool {
    let Ok(meta) = fs::metadata(&cfg.archive_path) else {
        return true;
    };
    let Ok(mtime) = meta.modified() else {
        return true;
    };
    let modified: DateTime<Utc> = mtime.into();
    Utc::now() - modified > cfg.archive_age_limit
}

/// Download `url_str` into `dest_dir` under its remote filename.
/// Returns the full path of the saved file.
async fn download_once(client: &Client, url_str: &str, dest_dir: &Path) -> Result<PathBuf> {
    let url = Url::parse(url_str).with_context(|| format!("invalid URL {url_str}"))?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.kmz");
    let dest_path = dest_dir.join(filename);

    let resp = client.get(url.as_str()).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;

    let path = dest_path.clone();
    tokio::task::spawn_blocking(move || crate::write::write_bytes_atomic(&path, &bytes))
        .await
        .context("archive write task panicked")??;

    Ok(dest_path)
}

async fn download_with_retry(client: &Client, url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let mut attempts = 0;
    loop {
        match download_once(client, url, dest_dir).await {
            Ok(path) => return Ok(path),
            Err(e) if attempts + 1 < MAX_ATTEMPTS => {
                attempts += 1;
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempts - 1);
                warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "retrying download");
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                error!(%url, error = %e, "exhausted download attempts");
                return Err(e);
            }
        }
    }
}
