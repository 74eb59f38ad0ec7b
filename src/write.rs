// src/write.rs

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value).context("serializing JSON body")?;
    write_bytes_atomic(path, &body)
}

/// Write through a sibling temp file, then rename over `path`. A crash
/// mid-write leaves the previous file intact.
pub fn write_bytes_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {:?}", parent))?;
    tmp.write_all(body)
        .with_context(|| format!("writing {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("replacing {:?}", path))?;
    Ok(())
}

/// Async wrapper used by the output fan-out.
pub async fn write_bytes_file(path: PathBuf, body: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &body))
        .await
        .context("write task panicked")?
}
