// src/partition/mod.rs

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::try_join_all;
use geo::Intersects;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{ClassifyConfig, RegionConfig, ADVANCED_BUCKET_KEY};
use crate::convert::{geom, Geometry};
use crate::extract::text::slugify;
use crate::extract::Project;
use crate::write;

/// Wire shape of every output file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectsFile {
    pub projects: Vec<Project>,
}

#[derive(Serialize)]
struct ProjectsRef<'a> {
    projects: &'a [Project],
}

pub fn encode_projects(projects: &[Project]) -> Result<Vec<u8>> {
    serde_json::to_vec(&ProjectsRef { projects }).context("serializing projects file")
}

#[derive(Debug, Deserialize)]
struct MunicipalityCollection {
    features: Vec<MunicipalityFeature>,
}

#[derive(Debug, Deserialize)]
struct MunicipalityFeature {
    properties: MunicipalityProperties,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct MunicipalityProperties {
    name: String,
}

/// Run all groupings over the sorted records and write every output
/// file. Municipality assignment mutates the records, so it runs before
/// any bucket is materialized; the writes themselves are independent and
/// fan out concurrently.
#[instrument(level = "info", skip(cfg, classify, projects), fields(region = %cfg.region))]
pub async fn write_partitions(
    cfg: &RegionConfig,
    classify: &ClassifyConfig,
    mut projects: Vec<Project>,
) -> Result<()> {
    let municipality_buckets = match load_municipalities(cfg)? {
        Some(municipalities) => assign_municipalities(&mut projects, &municipalities),
        None => BTreeMap::new(),
    };

    let mut outputs: Vec<(PathBuf, Vec<u8>)> = Vec::new();

    for (slug, indexes) in municipality_buckets {
        let bucket: Vec<Project> = indexes.iter().map(|&i| projects[i].clone()).collect();
        outputs.push((
            cfg.bucket_path("by-municipality", &slug),
            encode_projects(&bucket)?,
        ));
    }

    for (slug, bucket) in arrange_by_phase(&projects, classify) {
        outputs.push((cfg.bucket_path("by-phase", &slug), encode_projects(&bucket)?));
    }

    for (slug, bucket) in arrange_by_substance(&projects, classify) {
        outputs.push((
            cfg.bucket_path("by-substance", &slug),
            encode_projects(&bucket)?,
        ));
    }

    let highlights = highlight_projects(&projects, &classify.highlight_filters);
    outputs.push((cfg.highlights_path(), encode_projects(&highlights)?));
    outputs.push((cfg.all_projects_path(), encode_projects(&projects)?));

    let files = outputs.len();
    try_join_all(
        outputs
            .into_iter()
            .map(|(path, body)| write::write_bytes_file(path, body)),
    )
    .await?;

    info!(files, highlights = highlights.len(), "wrote partition files");
    Ok(())
}

fn load_municipalities(cfg: &RegionConfig) -> Result<Option<MunicipalityCollection>> {
    let Some(path) = cfg.municipalities_path.as_deref() else {
        warn!(region = %cfg.region, "no municipality dataset configured; skipping that grouping");
        return Ok(None);
    };
    let file =
        File::open(path).with_context(|| format!("opening municipality dataset {:?}", path))?;
    let collection: MunicipalityCollection = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing municipality dataset {:?}", path))?;
    Ok(Some(collection))
}

/// Intersect every record against every municipality. Returns bucket
/// slug → record indexes, and stores the accumulated display names on
/// each record (comma-joined, in encounter order) in a single pass
/// afterwards, so no record is aliased while the tests run.
fn assign_municipalities(
    projects: &mut [Project],
    municipalities: &MunicipalityCollection,
) -> BTreeMap<String, Vec<usize>> {
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut names: Vec<Vec<String>> = vec![Vec::new(); projects.len()];

    let shapes: Vec<_> = projects
        .iter()
        .map(|p| geom::to_multi_polygon(&p.geometry.data))
        .collect();

    for municipality in &municipalities.features {
        let boundary = geom::to_multi_polygon(&municipality.geometry.data);
        let slug = slugify(&municipality.properties.name);
        for (i, shape) in shapes.iter().enumerate() {
            if shape.intersects(&boundary) {
                names[i].push(municipality.properties.name.clone());
                buckets.entry(slug.clone()).or_default().push(i);
            }
        }
    }

    for (project, names) in projects.iter_mut().zip(names) {
        if !names.is_empty() {
            project.municipality = Some(names.join(", "));
        }
    }

    buckets
}

/// Bucket records by phase slug, plus the synthesized union of all
/// advanced phases (each phase's internal order preserved, concatenated
/// in the declared advanced order). The union bucket is always written,
/// even empty; the front end requests it unconditionally.
fn arrange_by_phase(
    projects: &[Project],
    classify: &ClassifyConfig,
) -> BTreeMap<String, Vec<Project>> {
    let mut buckets: BTreeMap<String, Vec<Project>> = BTreeMap::new();
    for project in projects {
        if project.fase_slug.is_empty() {
            continue;
        }
        buckets
            .entry(project.fase_slug.clone())
            .or_default()
            .push(project.clone());
    }

    let mut advanced = Vec::new();
    for slug in &classify.advanced_phases {
        if let Some(bucket) = buckets.get(slug) {
            advanced.extend(bucket.iter().cloned());
        }
    }
    buckets.insert(ADVANCED_BUCKET_KEY.to_string(), advanced);

    buckets
}

fn arrange_by_substance(
    projects: &[Project],
    classify: &ClassifyConfig,
) -> BTreeMap<String, Vec<Project>> {
    let mut buckets: BTreeMap<String, Vec<Project>> = BTreeMap::new();
    for project in projects {
        if project.substance_slug.is_empty() {
            continue;
        }
        buckets
            .entry(project.substance_slug.clone())
            .or_default()
            .push(project.clone());
    }

    for slug in buckets.keys() {
        if classify.icon_for_substance(slug).is_none() {
            debug!(substance = %slug, "substance has no icon mapping");
        }
    }

    buckets
}

/// A record is highlighted iff, for every filter key, its value is in
/// that key's allow-list.
pub fn highlight_projects(
    projects: &[Project],
    filters: &BTreeMap<String, Vec<String>>,
) -> Vec<Project> {
    projects
        .iter()
        .filter(|project| {
            filters.iter().all(|(key, allowed)| {
                project
                    .filter_value(key)
                    .map(|value| allowed.iter().any(|a| a == value))
                    .unwrap_or(false)
            })
        })
        .cloned()
        .collect()
}

/// Recompute only the highlights file from the record cache.
#[instrument(level = "info", skip(cfg, classify), fields(region = %cfg.region))]
pub fn rebuild_highlights(cfg: &RegionConfig, classify: &ClassifyConfig) -> Result<()> {
    let path = cfg.all_projects_path();
    let data = read_projects_file(&path)
        .with_context(|| format!("loading record cache {:?}; run a full build first", path))?;
    let highlights = highlight_projects(&data.projects, &classify.highlight_filters);
    write::write_bytes_atomic(&cfg.highlights_path(), &encode_projects(&highlights)?)?;
    info!(
        highlights = highlights.len(),
        total = data.projects.len(),
        "rebuilt highlights"
    );
    Ok(())
}

pub fn read_projects_file(path: &Path) -> Result<ProjectsFile> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::GeometryData;
    use std::fs;

    fn project(fase: &str, substance: &str, modified: &str, x: f64) -> Project {
        let fase_slug = slugify(fase);
        let classify = ClassifyConfig::default();
        Project {
            attributes: [("fase".to_string(), fase.to_string())].into_iter().collect(),
            geometry: Geometry::new(GeometryData::Polygon {
                coordinates: vec![vec![
                    vec![x, 0.0],
                    vec![x + 1.0, 0.0],
                    vec![x + 1.0, 1.0],
                    vec![x, 1.0],
                    vec![x, 0.0],
                ]],
            }),
            modified: modified.to_string(),
            fase_id: classify.phases.get(&fase_slug).copied(),
            fase_slug,
            substance_slug: slugify(substance),
            municipality: None,
        }
    }

    fn municipality(name: &str, x: f64, size: f64) -> MunicipalityFeature {
        MunicipalityFeature {
            properties: MunicipalityProperties {
                name: name.to_string(),
            },
            geometry: Geometry::new(GeometryData::Polygon {
                coordinates: vec![vec![
                    vec![x, 0.0],
                    vec![x + size, 0.0],
                    vec![x + size, 1.0],
                    vec![x, 1.0],
                    vec![x, 0.0],
                ]],
            }),
        }
    }

    #[test]
    fn straddling_record_lands_in_both_buckets_with_joined_names() {
        // One record spanning [10, 11] sits across the boundary of two
        // adjacent municipalities; another at 0 touches only the first.
        let mut projects = vec![
            project("LICENCIAMENTO", "CARVÃO", "2020/01/01", 10.0),
            project("LICENCIAMENTO", "CARVÃO", "2019/01/01", 0.0),
        ];
        let municipalities = MunicipalityCollection {
            features: vec![
                municipality("Bagé", 0.0, 10.5),
                municipality("Pelotas", 10.5, 10.0),
            ],
        };

        let buckets = assign_municipalities(&mut projects, &municipalities);

        assert_eq!(buckets.get("bage").unwrap(), &vec![0, 1]);
        assert_eq!(buckets.get("pelotas").unwrap(), &vec![0]);
        assert_eq!(
            projects[0].municipality.as_deref(),
            Some("Bagé, Pelotas")
        );
        assert_eq!(projects[1].municipality.as_deref(), Some("Bagé"));
    }

    #[test]
    fn detached_record_joins_no_bucket() {
        let mut projects = vec![project("LICENCIAMENTO", "CARVÃO", "2020/01/01", 100.0)];
        let municipalities = MunicipalityCollection {
            features: vec![municipality("Bagé", 0.0, 1.0)],
        };
        let buckets = assign_municipalities(&mut projects, &municipalities);
        assert!(buckets.is_empty());
        assert_eq!(projects[0].municipality, None);
    }

    #[test]
    fn phase_buckets_include_the_advanced_union() {
        let classify = ClassifyConfig::default();
        let projects = vec![
            project("REQUERIMENTO DE PESQUISA", "AREIA", "2022/01/01", 0.0),
            project("LICENCIAMENTO", "CARVÃO", "2021/01/01", 0.0),
            project("CONCESSÃO DE LAVRA", "CARVÃO", "2020/01/01", 0.0),
            project("LICENCIAMENTO", "AREIA", "2019/01/01", 0.0),
        ];

        let buckets = arrange_by_phase(&projects, &classify);

        assert_eq!(buckets.get("requerimento_de_pesquisa").unwrap().len(), 1);
        assert_eq!(buckets.get("licenciamento").unwrap().len(), 2);

        // Advanced union concatenates in declared phase order, keeping
        // each phase's internal (modified-desc) order.
        let advanced = buckets.get(ADVANCED_BUCKET_KEY).unwrap();
        let order: Vec<&str> = advanced.iter().map(|p| p.modified.as_str()).collect();
        assert_eq!(order, vec!["2020/01/01", "2021/01/01", "2019/01/01"]);
    }

    #[test]
    fn advanced_union_exists_even_when_empty() {
        let classify = ClassifyConfig::default();
        let projects = vec![project("REQUERIMENTO DE PESQUISA", "AREIA", "2022/01/01", 0.0)];
        let buckets = arrange_by_phase(&projects, &classify);
        assert_eq!(buckets.get(ADVANCED_BUCKET_KEY).unwrap().len(), 0);
    }

    #[test]
    fn substance_buckets_skip_records_without_substance() {
        let classify = ClassifyConfig::default();
        let projects = vec![
            project("LICENCIAMENTO", "CARVÃO MINERAL", "2022/01/01", 0.0),
            project("LICENCIAMENTO", "", "2021/01/01", 0.0),
        ];
        let buckets = arrange_by_substance(&projects, &classify);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets.get("carvao_mineral").unwrap().len(), 1);
    }

    #[test]
    fn highlight_requires_every_filter_to_match() {
        let classify = ClassifyConfig::default();
        let qualified = project("LICENCIAMENTO", "CARVÃO", "2022/01/01", 0.0);
        let wrong_phase = project("REQUERIMENTO DE PESQUISA", "CARVÃO", "2022/01/01", 0.0);
        let wrong_substance = project("LICENCIAMENTO", "AREIA", "2022/01/01", 0.0);

        let projects = vec![qualified.clone(), wrong_phase, wrong_substance];
        let highlights = highlight_projects(&projects, &classify.highlight_filters);

        assert_eq!(highlights, vec![qualified]);
    }

    #[test]
    fn changing_one_field_removes_exactly_that_record() {
        let classify = ClassifyConfig::default();
        let mut projects = vec![
            project("LICENCIAMENTO", "CARVÃO", "2022/01/01", 0.0),
            project("CONCESSÃO DE LAVRA", "FERRO", "2021/01/01", 0.0),
        ];
        assert_eq!(
            highlight_projects(&projects, &classify.highlight_filters).len(),
            2
        );

        projects[1].substance_slug = "areia".to_string();
        let highlights = highlight_projects(&projects, &classify.highlight_filters);
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].fase_slug, "licenciamento");
    }

    #[tokio::test]
    async fn write_partitions_produces_the_file_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = RegionConfig::for_region("rs");
        cfg.cache_dir = dir.path().join("cache");
        // No municipality dataset in this test.
        cfg.municipalities_path = None;

        let classify = ClassifyConfig::default();
        let projects = vec![
            project("LICENCIAMENTO", "CARVÃO", "2022/01/01", 0.0),
            project("REQUERIMENTO DE PESQUISA", "AREIA", "2021/01/01", 5.0),
        ];

        write_partitions(&cfg, &classify, projects).await?;

        assert!(cfg.bucket_path("by-phase", "licenciamento").exists());
        assert!(cfg.bucket_path("by-phase", ADVANCED_BUCKET_KEY).exists());
        assert!(cfg.bucket_path("by-substance", "carvao").exists());
        assert!(cfg.highlights_path().exists());

        let all = read_projects_file(&cfg.all_projects_path())?;
        assert_eq!(all.projects.len(), 2);
        let highlights = read_projects_file(&cfg.highlights_path())?;
        assert_eq!(highlights.projects.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rerunning_partitions_is_byte_identical() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = RegionConfig::for_region("rs");
        cfg.cache_dir = dir.path().join("cache");
        cfg.municipalities_path = None;

        let classify = ClassifyConfig::default();
        let projects = vec![project("LICENCIAMENTO", "CARVÃO", "2022/01/01", 0.0)];

        write_partitions(&cfg, &classify, projects.clone()).await?;
        let first = fs::read(cfg.all_projects_path())?;
        write_partitions(&cfg, &classify, projects).await?;
        let second = fs::read(cfg.all_projects_path())?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn rebuild_highlights_uses_only_the_record_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = RegionConfig::for_region("rs");
        cfg.cache_dir = dir.path().to_path_buf();

        let classify = ClassifyConfig::default();
        let projects = vec![
            project("LICENCIAMENTO", "CARVÃO", "2022/01/01", 0.0),
            project("REQUERIMENTO DE PESQUISA", "AREIA", "2021/01/01", 0.0),
        ];
        write::write_bytes_atomic(&cfg.all_projects_path(), &encode_projects(&projects)?)?;

        rebuild_highlights(&cfg, &classify)?;

        let highlights = read_projects_file(&cfg.highlights_path())?;
        assert_eq!(highlights.projects.len(), 1);
        Ok(())
    }

    #[test]
    fn rebuild_highlights_without_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = RegionConfig::for_region("rs");
        cfg.cache_dir = dir.path().join("missing");
        assert!(rebuild_highlights(&cfg, &ClassifyConfig::default()).is_err());
    }
}
