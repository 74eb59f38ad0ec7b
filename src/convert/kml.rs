// src/convert/kml.rs

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{Feature, FeatureCollection, Geometry, GeometryData, PolygonRings, Ring};

/// Placemark child elements copied into the property bag.
const PROPERTY_TAGS: &[&str] = &["name", "description", "styleUrl", "address", "phoneNumber"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum RingRole {
    None,
    Outer,
    Inner,
}

#[derive(Debug)]
struct PlacemarkState {
    properties: BTreeMap<String, String>,
    property_tag: Option<String>,
    polygons: Vec<PolygonRings>,
    outer: Option<Ring>,
    inners: Vec<Ring>,
    ring_role: RingRole,
    in_coordinates: bool,
    coordinate_text: String,
}

impl PlacemarkState {
    fn new() -> Self {
        Self {
            properties: BTreeMap::new(),
            property_tag: None,
            polygons: Vec::new(),
            outer: None,
            inners: Vec::new(),
            ring_role: RingRole::None,
            in_coordinates: false,
            coordinate_text: String::new(),
        }
    }

    fn begin_polygon(&mut self) {
        self.outer = None;
        self.inners.clear();
    }

    fn end_polygon(&mut self) {
        if let Some(outer) = self.outer.take() {
            let mut rings: PolygonRings = vec![outer];
            rings.append(&mut self.inners);
            self.polygons.push(rings);
        } else {
            self.inners.clear();
        }
    }

    fn end_coordinates(&mut self) {
        let ring = parse_coordinates(&self.coordinate_text);
        self.coordinate_text.clear();
        self.in_coordinates = false;
        if ring.is_empty() {
            return;
        }
        match self.ring_role {
            RingRole::Outer => self.outer = Some(ring),
            RingRole::Inner => self.inners.push(ring),
            // Coordinates of non-polygon geometries (Point, LineString).
            RingRole::None => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.in_coordinates {
            self.coordinate_text.push_str(text);
            self.coordinate_text.push(' ');
        } else if let Some(tag) = &self.property_tag {
            self.properties
                .entry(tag.clone())
                .or_default()
                .push_str(text);
        }
    }

    fn finish(self) -> Feature {
        let mut polygons = self.polygons;
        let geometry = match polygons.len() {
            0 => None,
            1 => Some(Geometry::new(GeometryData::Polygon {
                coordinates: polygons.remove(0),
            })),
            _ => Some(Geometry::new(GeometryData::MultiPolygon {
                coordinates: polygons,
            })),
        };
        Feature {
            properties: self.properties,
            geometry,
            ..Feature::default()
        }
    }
}

/// Parse a KML document into a feature collection: one feature per
/// Placemark, carrying its simple child elements as properties and its
/// Polygon / MultiGeometry rings as a GeoJSON geometry.
pub fn parse_document(xml: &str) -> Result<FeatureCollection> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut features = Vec::new();
    let mut placemark: Option<PlacemarkState> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "Placemark" => placemark = Some(PlacemarkState::new()),
                    "Polygon" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.begin_polygon();
                        }
                    }
                    "outerBoundaryIs" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.ring_role = RingRole::Outer;
                        }
                    }
                    "innerBoundaryIs" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.ring_role = RingRole::Inner;
                        }
                    }
                    "coordinates" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.in_coordinates = true;
                            pm.coordinate_text.clear();
                        }
                    }
                    other => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.property_tag = PROPERTY_TAGS
                                .contains(&other)
                                .then(|| other.to_string());
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(pm) = placemark.as_mut() {
                    let text = e.unescape().unwrap_or_default();
                    pm.push_text(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(pm) = placemark.as_mut() {
                    let text = String::from_utf8_lossy(e);
                    pm.push_text(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "Placemark" => {
                        if let Some(pm) = placemark.take() {
                            features.push(pm.finish());
                        }
                    }
                    "Polygon" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.end_polygon();
                        }
                    }
                    "outerBoundaryIs" | "innerBoundaryIs" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.ring_role = RingRole::None;
                        }
                    }
                    "coordinates" => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.end_coordinates();
                        }
                    }
                    _ => {
                        if let Some(pm) = placemark.as_mut() {
                            pm.property_tag = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("malformed KML at byte {}: {e}", reader.buffer_position()),
            _ => {}
        }
        buf.clear();
    }

    Ok(FeatureCollection {
        features,
        ..FeatureCollection::default()
    })
}

fn local_name(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.to_string(),
    }
}

/// `lon,lat[,alt]` tuples separated by whitespace.
fn parse_coordinates(text: &str) -> Ring {
    text.split_whitespace()
        .filter_map(|tuple| {
            let position: Vec<f64> = tuple
                .split(',')
                .filter_map(|n| n.trim().parse().ok())
                .collect();
            (position.len() >= 2).then_some(position)
        })
        .collect()
}
