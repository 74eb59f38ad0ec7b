// src/config.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;

use crate::extract::text::slugify;

/// Key of the synthesized bucket unioning every advanced phase.
/// The front end requests this exact file name.
pub const ADVANCED_BUCKET_KEY: &str = "phases_8_9_10_11_12_13";

/// Per-zone settings as read from the optional YAML zones file.
/// Unknown keys (e.g. map view hints consumed by the front end) are
/// tolerated and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneSettings {
    pub region: String,
    #[serde(default)]
    pub debug_cap_items: Option<usize>,
    #[serde(default)]
    pub archive_age_limit_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ZonesFile {
    zones: Vec<ZoneSettings>,
}

/// Load zone settings from `path`, or fall back to the single default zone.
pub fn load_zones(path: Option<&Path>) -> Result<Vec<ZoneSettings>> {
    let Some(path) = path else {
        return Ok(vec![ZoneSettings {
            region: "rs".to_string(),
            debug_cap_items: None,
            archive_age_limit_days: None,
        }]);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading zones file {:?}", path))?;
    let file: ZonesFile = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing zones file {:?}", path))?;
    anyhow::ensure!(!file.zones.is_empty(), "zones file {:?} declares no zones", path);
    Ok(file.zones)
}

/// Resolved paths and limits for one region. Built once, passed into each
/// stage by reference, never mutated.
#[derive(Debug, Clone)]
pub struct RegionConfig {
    pub region: String,
    pub download_url: String,
    pub input_dir: PathBuf,
    pub archive_path: PathBuf,
    pub kml_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Static municipality boundary dataset; `None` when no dataset is
    /// known for the region (municipality grouping is then skipped).
    pub municipalities_path: Option<PathBuf>,
    pub archive_age_limit: Duration,
    /// Restrict converted features to this many randomly sampled items.
    /// 0 = keep everything.
    pub debug_cap_items: usize,
}

/// IBGE dataset code backing the municipality boundary file.
// TODO complete the mapping when another state gets onboarded.
fn municipality_dataset_code(region: &str) -> Option<u32> {
    match region {
        "rs" => Some(43),
        _ => None,
    }
}

impl RegionConfig {
    pub fn for_region(region: &str) -> Self {
        let region = slugify(region);
        let upper = region.to_uppercase();
        let input_dir = PathBuf::from(format!("private/geo/brazil/{region}"));
        Self {
            download_url: format!(
                "https://app.anm.gov.br/dadosabertos/SIGMINE/PROCESSOS_MINERARIOS/{upper}.kmz"
            ),
            archive_path: input_dir.join(format!("{upper}.kmz")),
            kml_path: input_dir.join("doc.kml"),
            cache_dir: PathBuf::from(format!("static/data/cache/projects/brazil/{region}")),
            municipalities_path: municipality_dataset_code(&region).map(|code| {
                PathBuf::from(format!(
                    "static/data/geo/brazil/municipalities/geojs-{code}-mun.json"
                ))
            }),
            archive_age_limit: Duration::days(31),
            debug_cap_items: 0,
            input_dir,
            region,
        }
    }

    pub fn from_zone(zone: &ZoneSettings) -> Self {
        let mut cfg = Self::for_region(&zone.region);
        if let Some(cap) = zone.debug_cap_items {
            cfg.debug_cap_items = cap;
        }
        if let Some(days) = zone.archive_age_limit_days {
            cfg.archive_age_limit = Duration::days(days);
        }
        cfg
    }

    pub fn raw_geojson_path(&self) -> PathBuf {
        self.cache_dir.join("raw_geo.json")
    }

    pub fn all_projects_path(&self) -> PathBuf {
        self.cache_dir.join("all-projects.json")
    }

    pub fn highlights_path(&self) -> PathBuf {
        self.cache_dir.join("highlights.json")
    }

    pub fn bucket_path(&self, group: &str, slug: &str) -> PathBuf {
        self.cache_dir.join(group).join(format!("{slug}.json"))
    }
}

/// Fixed classification tables. The severity ordinals and the advanced
/// phase list drive both `fase_id` assignment and the highlight filter.
#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    /// Phase slug → severity ordinal (0 = unregistered).
    pub phases: BTreeMap<String, u32>,
    /// Phase slugs considered advanced, in severity order.
    pub advanced_phases: Vec<String>,
    /// Substance slug → front-end icon key.
    pub substance_icons: BTreeMap<String, String>,
    /// Record key → allowed values; a highlight matches every key.
    pub highlight_filters: BTreeMap<String, Vec<String>>,
}

impl ClassifyConfig {
    pub fn icon_for_substance(&self, slug: &str) -> Option<&str> {
        self.substance_icons.get(slug).map(String::as_str)
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        let phases: BTreeMap<String, u32> = [
            ("dado_nao_cadastrado", 0),
            ("dados_nao_cadastrados", 0),
            ("requerimento_de_pesquisa", 1),
            ("autorizacao_de_pesquisa", 2),
            ("direito_de_requerer_a_lavra", 3),
            ("requerimento_de_lavra", 4),
            ("concessao_de_lavra", 5),
            ("requerimento_de_lavra_garimpeira", 6),
            ("lavra_garimpeira", 7),
            ("requerimento_de_licenciamento", 8),
            ("licenciamento", 9),
            ("requerimento_de_registro_de_extracao", 10),
            ("registro_de_extracao", 11),
            ("manifesto_de_mina", 12),
            ("apto_para_disponibilidade", 13),
            ("disponibilidade", 14),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let advanced_phases: Vec<String> = [
            "direito_de_requerer_a_lavra",
            "requerimento_de_lavra",
            "concessao_de_lavra",
            "requerimento_de_lavra_garimpeira",
            "lavra_garimpeira",
            "requerimento_de_licenciamento",
            "licenciamento",
            "requerimento_de_registro_de_extracao",
            "registro_de_extracao",
            "manifesto_de_mina",
            "apto_para_disponibilidade",
            "disponibilidade",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let substance_icons: BTreeMap<String, String> = [
            ("antracito", "coal"),
            ("carvao", "coal"),
            ("carvao_mineral", "coal"),
            ("linhito", "coal"),
            ("chumbo", "lead"),
            ("minerio_de_chumbo", "lead"),
            ("cobre", "copper"),
            ("minerio_de_cobre", "copper"),
            ("diamante", "diamond"),
            ("ferro", "iron"),
            ("minerio_de_ferro", "iron"),
            ("folhelho_betuminoso", "shale"),
            ("folhelho_pirobetumino", "shale"),
            ("rocha_betuminosa", "shale"),
            ("fosfato", "phosphate"),
            ("minerio_de_ouro", "gold"),
            ("ouro", "gold"),
            ("minerio_de_prata", "silver"),
            ("prata", "silver"),
            ("minerio_de_titanio", "titanium"),
            ("titanio", "titanium"),
            ("minerio_de_zinco", "zinc"),
            ("agua_mineral", "water"),
            ("areia", "sand"),
            ("argila", "clay"),
            ("basalto", "stone"),
            ("calcario", "limestone"),
            ("granito", "stone"),
            ("saibro", "gravel"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let highlight_substances: Vec<String> = [
            "antracito",
            "carvao",
            "carvao_mineral",
            "chumbo",
            "cobre",
            "diamante",
            "ferro",
            "folhelho_betuminoso",
            "folhelho_pirobetumino",
            "fosfato",
            "linhito",
            "minerio_de_chumbo",
            "minerio_de_cobre",
            "minerio_de_ferro",
            "minerio_de_ouro",
            "minerio_de_prata",
            "minerio_de_titanio",
            "minerio_de_zinco",
            "prata",
            "rocha_betuminosa",
            "titanio",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let mut highlight_filters = BTreeMap::new();
        highlight_filters.insert("fase_slug".to_string(), advanced_phases.clone());
        highlight_filters.insert("substance_slug".to_string(), highlight_substances);

        Self {
            phases,
            advanced_phases,
            substance_icons,
            highlight_filters,
        }
    }
}
