// src/pipeline.rs

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use reqwest::Client;
use tracing::{info, instrument};

use crate::config::{ClassifyConfig, RegionConfig};
use crate::convert::{self, FeatureCollection};
use crate::extract;
use crate::fetch::{self, FetchOutcome};
use crate::partition;

/// How a stage satisfied its output: reused the on-disk copy or rebuilt
/// it. Stage failure is the `Err` arm of the surrounding `Result`.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Cached(T),
    Rebuilt(T),
}

impl<T> StageOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            StageOutcome::Cached(value) | StageOutcome::Rebuilt(value) => value,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, StageOutcome::Cached(_))
    }
}

/// What to discard before running, see the CLI help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RebuildMode {
    /// Discard derived caches, re-derive from the local archive.
    Cache,
    /// Discard the archive too, forcing a full re-download.
    Everything,
    /// Recompute only the highlights file from the record cache.
    Highlights,
}

/// Run the whole pipeline for one zone.
#[instrument(level = "info", skip(client, cfg, classify), fields(region = %cfg.region))]
pub async fn run(
    client: &Client,
    cfg: &RegionConfig,
    classify: &ClassifyConfig,
    rebuild: Option<RebuildMode>,
) -> Result<()> {
    match rebuild {
        Some(RebuildMode::Highlights) => {
            return partition::rebuild_highlights(cfg, classify);
        }
        Some(RebuildMode::Cache) => purge_dir(&cfg.cache_dir)?,
        Some(RebuildMode::Everything) => {
            purge_dir(&cfg.input_dir)?;
            purge_dir(&cfg.cache_dir)?;
        }
        None => {}
    }

    let fetched = fetch::update_archive(client, cfg).await?;
    if fetched == FetchOutcome::Downloaded {
        fetch::unpack_archive(cfg)?;
    }

    if fetched == FetchOutcome::KeptLocal && cfg.all_projects_path().exists() {
        info!("record cache is up to date; nothing to rebuild");
        return Ok(());
    }

    let collection = ensure_collection(cfg)?.into_inner();
    let projects = extract::extract_projects(&collection, classify);
    partition::write_partitions(cfg, classify, projects).await?;

    info!("pipeline complete");
    Ok(())
}

/// Produce the converted feature collection, triggering the upstream
/// unpack when the markup is absent. The fetch already ran by the time
/// this is called, so a missing archive here means the download failed
/// and there is nothing left to fall back to.
fn ensure_collection(cfg: &RegionConfig) -> Result<StageOutcome<FeatureCollection>> {
    if cfg.raw_geojson_path().exists() {
        return convert::load_or_convert(cfg);
    }
    if !cfg.kml_path.exists() {
        if !cfg.archive_path.exists() {
            bail!(
                "no local archive at {:?} and the download did not produce one",
                cfg.archive_path
            );
        }
        fetch::unpack_archive(cfg)?;
    }
    convert::load_or_convert(cfg)
}

fn purge_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).with_context(|| format!("purging {:?}", dir))?;
        info!(dir = %dir.display(), "purged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write;
    use std::fs;

    const SAMPLE_KML: &str = r#"<kml><Document>
      <Placemark>
        <description><![CDATA[<table>
          <tr><td>SIGMINE</td></tr>
          <tr><td></td><td>CAMPO</td><td>VALOR</td></tr>
          <tr><td></td><td>FASE</td><td>REQUERIMENTO DE PESQUISA</td></tr>
          <tr><td></td><td>SUBSTÂNCIA</td><td>CARVÃO</td></tr>
          <tr><td></td><td>ÚLTIMO EVENTO</td><td>EM 14/07/2014</td></tr>
        </table>]]></description>
        <Polygon><outerBoundaryIs><LinearRing><coordinates>
          -51.0,-30.0,0 -51.0,-29.0,0 -50.0,-29.0,0 -50.0,-30.0,0 -51.0,-30.0,0
        </coordinates></LinearRing></outerBoundaryIs></Polygon>
      </Placemark>
    </Document></kml>"#;

    fn cfg_in(dir: &Path) -> RegionConfig {
        let mut cfg = RegionConfig::for_region("rs");
        cfg.input_dir = dir.join("private");
        cfg.archive_path = cfg.input_dir.join("RS.kmz");
        cfg.kml_path = cfg.input_dir.join("doc.kml");
        cfg.cache_dir = dir.join("cache");
        cfg.municipalities_path = None;
        cfg
    }

    #[test]
    fn stage_outcome_unwraps_both_arms() {
        assert_eq!(StageOutcome::Cached(1).into_inner(), 1);
        assert_eq!(StageOutcome::Rebuilt(2).into_inner(), 2);
        assert!(StageOutcome::Cached(()).is_cached());
        assert!(!StageOutcome::Rebuilt(()).is_cached());
    }

    #[tokio::test]
    async fn fresh_archive_with_complete_cache_is_a_no_op() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = cfg_in(dir.path());
        fs::create_dir_all(&cfg.input_dir)?;
        fs::write(&cfg.archive_path, b"kmz")?;
        write::write_bytes_atomic(&cfg.all_projects_path(), br#"{"projects":[]}"#)?;
        let before = fs::read(cfg.all_projects_path())?;

        run(
            &Client::new(),
            &cfg,
            &ClassifyConfig::default(),
            None,
        )
        .await?;

        assert_eq!(fs::read(cfg.all_projects_path())?, before);
        Ok(())
    }

    #[tokio::test]
    async fn missing_record_cache_triggers_rebuild_from_kml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = cfg_in(dir.path());
        fs::create_dir_all(&cfg.input_dir)?;
        fs::write(&cfg.archive_path, b"placeholder")?;
        fs::write(&cfg.kml_path, SAMPLE_KML)?;

        run(&Client::new(), &cfg, &ClassifyConfig::default(), None).await?;

        let all = partition::read_projects_file(&cfg.all_projects_path())?;
        assert_eq!(all.projects.len(), 1);
        assert_eq!(all.projects[0].fase_slug, "requerimento_de_pesquisa");
        assert_eq!(all.projects[0].fase_id, Some(1));
        assert_eq!(all.projects[0].modified, "2014/07/14");
        assert!(cfg.raw_geojson_path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_cache_rederives_from_the_raw_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = cfg_in(dir.path());
        fs::create_dir_all(&cfg.input_dir)?;
        fs::write(&cfg.archive_path, b"placeholder")?;
        fs::write(&cfg.kml_path, SAMPLE_KML)?;

        run(&Client::new(), &cfg, &ClassifyConfig::default(), None).await?;
        let first = fs::read(cfg.all_projects_path())?;

        run(
            &Client::new(),
            &cfg,
            &ClassifyConfig::default(),
            Some(RebuildMode::Cache),
        )
        .await?;

        // Identical inputs, identical outputs.
        assert_eq!(fs::read(cfg.all_projects_path())?, first);
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_highlights_touches_only_highlights() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = cfg_in(dir.path());
        fs::create_dir_all(&cfg.input_dir)?;
        fs::write(&cfg.archive_path, b"placeholder")?;
        fs::write(&cfg.kml_path, SAMPLE_KML)?;

        run(&Client::new(), &cfg, &ClassifyConfig::default(), None).await?;
        let raw_before = fs::read(cfg.raw_geojson_path())?;
        fs::remove_file(cfg.highlights_path())?;

        run(
            &Client::new(),
            &cfg,
            &ClassifyConfig::default(),
            Some(RebuildMode::Highlights),
        )
        .await?;

        assert!(cfg.highlights_path().exists());
        assert_eq!(fs::read(cfg.raw_geojson_path())?, raw_before);
        Ok(())
    }
}
