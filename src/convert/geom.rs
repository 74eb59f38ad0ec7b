// src/convert/geom.rs

use geo::{Area, Coord, LineString, MultiPolygon, Polygon};

use super::{GeometryData, PolygonRings, Ring};

fn line_string(ring: &Ring) -> LineString<f64> {
    LineString::from(
        ring.iter()
            .filter(|position| position.len() >= 2)
            .map(|position| Coord {
                x: position[0],
                y: position[1],
            })
            .collect::<Vec<_>>(),
    )
}

fn polygon(rings: &PolygonRings) -> Option<Polygon<f64>> {
    let mut rings = rings.iter();
    let exterior = rings.next()?;
    if exterior.is_empty() {
        return None;
    }
    Some(Polygon::new(
        line_string(exterior),
        rings.map(line_string).collect(),
    ))
}

/// Geometry as `geo` types, for the intersection predicate.
pub fn to_multi_polygon(data: &GeometryData) -> MultiPolygon<f64> {
    let polygons = match data {
        GeometryData::Polygon { coordinates } => polygon(coordinates).into_iter().collect(),
        GeometryData::MultiPolygon { coordinates } => {
            coordinates.iter().filter_map(polygon).collect()
        }
    };
    MultiPolygon::new(polygons)
}

/// Polygon anchoring the center-point computation: the geometry itself,
/// or the largest-area member of a multipolygon.
pub fn representative_polygon(data: &GeometryData) -> Option<Polygon<f64>> {
    match data {
        GeometryData::Polygon { coordinates } => polygon(coordinates),
        GeometryData::MultiPolygon { coordinates } => coordinates
            .iter()
            .filter_map(polygon)
            .max_by(|a, b| {
                a.unsigned_area()
                    .partial_cmp(&b.unsigned_area())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> PolygonRings {
        vec![vec![
            vec![x, y],
            vec![x + size, y],
            vec![x + size, y + size],
            vec![x, y + size],
            vec![x, y],
        ]]
    }

    #[test]
    fn polygon_conversion_keeps_rings() {
        let data = GeometryData::Polygon {
            coordinates: square(0.0, 0.0, 1.0),
        };
        let mp = to_multi_polygon(&data);
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn empty_geometry_converts_to_empty_multi_polygon() {
        let data = GeometryData::Polygon {
            coordinates: vec![],
        };
        assert!(to_multi_polygon(&data).0.is_empty());
    }

    #[test]
    fn representative_polygon_is_largest_member() {
        let data = GeometryData::MultiPolygon {
            coordinates: vec![square(0.0, 0.0, 1.0), square(10.0, 10.0, 3.0)],
        };
        let poly = representative_polygon(&data).unwrap();
        // The 3x3 square wins.
        assert!((poly.unsigned_area() - 9.0).abs() < 1e-9);
    }
}
