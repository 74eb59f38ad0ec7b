// src/fetch/unpack.rs

use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{Context, Result};
use glob::glob;
use tracing::{info, instrument, warn};
use zip::ZipArchive;

use crate::config::RegionConfig;

/// Remove leftovers from a previous extraction, then unpack the KMZ into
/// the input directory. The archive carries one `doc.kml` plus ancillary
/// image assets (`legend*.png`).
#[instrument(level = "info", skip(cfg), fields(region = %cfg.region))]
pub fn unpack_archive(cfg: &RegionConfig) -> Result<()> {
    clean_stale_files(cfg);

    let file = File::open(&cfg.archive_path)
        .with_context(|| format!("opening archive {:?}", cfg.archive_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("reading archive {:?}", cfg.archive_path))?;
    let entries = archive.len();
    archive
        .extract(&cfg.input_dir)
        .with_context(|| format!("extracting {:?} into {:?}", cfg.archive_path, cfg.input_dir))?;

    info!(entries, dir = %cfg.input_dir.display(), "extracted archive");
    Ok(())
}

fn clean_stale_files(cfg: &RegionConfig) {
    let mut stale: Vec<PathBuf> = vec![cfg.kml_path.clone()];
    let pattern = cfg.input_dir.join("legend*.png");
    if let Ok(entries) = glob(&pattern.to_string_lossy()) {
        stale.extend(entries.flatten());
    }

    for path in stale {
        if !path.exists() {
            continue;
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove stale file");
        }
    }
}
