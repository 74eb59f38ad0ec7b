// src/convert/mod.rs

pub mod geom;
pub mod kml;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;

use anyhow::{ensure, Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::RegionConfig;
use crate::pipeline::StageOutcome;
use crate::write;

pub type Position = Vec<f64>;
pub type Ring = Vec<Position>;
pub type PolygonRings = Vec<Ring>;

/// GeoJSON geometry variants this pipeline carries. The source data is
/// mining-claim polygons; anything else in the KML is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeometryData {
    Polygon { coordinates: PolygonRings },
    MultiPolygon { coordinates: Vec<PolygonRings> },
}

/// A geometry plus the augmented marker-anchor position computed during
/// extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(flatten)]
    pub data: GeometryData,
    #[serde(
        rename = "centerPoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub center_point: Option<Position>,
}

impl Geometry {
    pub fn new(data: GeometryData) -> Self {
        Self {
            data,
            center_point: None,
        }
    }

    pub fn has_coordinates(&self) -> bool {
        match &self.data {
            GeometryData::Polygon { coordinates } => {
                coordinates.iter().any(|ring| !ring.is_empty())
            }
            GeometryData::MultiPolygon { coordinates } => coordinates
                .iter()
                .flatten()
                .any(|ring| !ring.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

impl Default for Feature {
    fn default() -> Self {
        Self {
            kind: feature_type(),
            properties: BTreeMap::new(),
            geometry: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self {
            kind: collection_type(),
            features: Vec::new(),
        }
    }
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

/// Return the converted feature collection, reusing the on-disk cache
/// when present. A rebuild parses the KML, applies the optional debug
/// cap (uniform random sample), and persists the result.
#[instrument(level = "info", skip(cfg), fields(region = %cfg.region))]
pub fn load_or_convert(cfg: &RegionConfig) -> Result<StageOutcome<FeatureCollection>> {
    let cache_path = cfg.raw_geojson_path();
    if cache_path.exists() {
        let file = File::open(&cache_path)
            .with_context(|| format!("opening feature cache {:?}", cache_path))?;
        let collection: FeatureCollection = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing feature cache {:?}", cache_path))?;
        info!(
            features = collection.features.len(),
            "loaded converted features from cache"
        );
        return Ok(StageOutcome::Cached(collection));
    }

    let text = fs::read_to_string(&cfg.kml_path)
        .with_context(|| format!("reading KML {:?}", cfg.kml_path))?;
    let mut collection = kml::parse_document(&text)
        .with_context(|| format!("converting KML {:?}", cfg.kml_path))?;
    ensure!(
        !collection.features.is_empty(),
        "KML {:?} yielded no features",
        cfg.kml_path
    );

    if cfg.debug_cap_items > 0 && collection.features.len() > cfg.debug_cap_items {
        let mut rng = rand::thread_rng();
        collection.features.shuffle(&mut rng);
        collection.features.truncate(cfg.debug_cap_items);
        warn!(
            cap = cfg.debug_cap_items,
            "debug cap active; converted data is a random sample"
        );
    }

    write::write_json_atomic(&cache_path, &collection)?;
    info!(
        features = collection.features.len(),
        "converted KML and cached the result"
    );
    Ok(StageOutcome::Rebuilt(collection))
}
