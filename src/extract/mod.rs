// src/extract/mod.rs

pub mod desc;
pub mod text;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::ClassifyConfig;
use crate::convert::{geom, Feature, FeatureCollection, Geometry, Position};
use text::slugify;

/// Pole-of-inaccessibility precision handed to polylabel, in degrees.
const CENTER_POINT_PRECISION: f64 = 0.4;

/// One classified mining-claim record ("project"). The attribute map
/// holds whatever the description table declared, flattened into the
/// JSON object alongside the derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
    pub geometry: Geometry,
    /// `YYYY/MM/DD` of the last logged event; empty when no date parsed.
    pub modified: String,
    pub fase_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fase_id: Option<u32>,
    pub substance_slug: String,
    /// Comma-joined names of intersecting municipalities, assigned
    /// during partitioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
}

impl Project {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Value the highlight filter compares for `key`.
    pub fn filter_value(&self, key: &str) -> Option<&str> {
        match key {
            "fase_slug" => Some(self.fase_slug.as_str()),
            "substance_slug" => Some(self.substance_slug.as_str()),
            "modified" => Some(self.modified.as_str()),
            "municipality" => self.municipality.as_deref(),
            _ => self.attr(key),
        }
    }
}

/// Extract one record per usable feature and sort them newest first.
/// The zero-padded date format makes the string order match the
/// chronological order; records with no parseable date sort last.
#[instrument(level = "info", skip(collection, classify))]
pub fn extract_projects(collection: &FeatureCollection, classify: &ClassifyConfig) -> Vec<Project> {
    let mut projects: Vec<Project> = collection
        .features
        .iter()
        .filter_map(|feature| extract_project(feature, classify))
        .collect();

    projects.sort_by(|a, b| b.modified.cmp(&a.modified));

    info!(
        records = projects.len(),
        features = collection.features.len(),
        "extracted project records"
    );
    projects
}

fn extract_project(feature: &Feature, classify: &ClassifyConfig) -> Option<Project> {
    let description = feature.properties.get("description")?;
    if description.is_empty() {
        return None;
    }
    let geometry = feature.geometry.as_ref()?;
    if !geometry.has_coordinates() {
        return None;
    }

    let table = desc::parse_description(description);
    if table.attributes.is_empty() {
        return None;
    }

    let fase_slug = slugify(table.attributes.get("fase").map(String::as_str).unwrap_or(""));
    let fase_id = classify.phases.get(&fase_slug).copied();
    if fase_id.is_none() && !fase_slug.is_empty() {
        warn!(fase = %fase_slug, "phase is missing from the classification table");
    }
    let substance_slug = slugify(
        table
            .attributes
            .get("substancia")
            .map(String::as_str)
            .unwrap_or(""),
    );

    let mut geometry = geometry.clone();
    geometry.center_point = center_point(&geometry);

    Some(Project {
        attributes: table.attributes,
        geometry,
        modified: table.modified,
        fase_slug,
        fase_id,
        substance_slug,
        municipality: None,
    })
}

fn center_point(geometry: &Geometry) -> Option<Position> {
    let polygon = geom::representative_polygon(&geometry.data)?;
    match polylabel::polylabel(&polygon, &CENTER_POINT_PRECISION) {
        Ok(point) => Some(vec![point.x(), point.y()]),
        Err(e) => {
            warn!(error = %e, "center point computation failed");
            None
        }
    }
}
