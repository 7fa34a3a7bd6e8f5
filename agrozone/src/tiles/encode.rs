//! Encodage Mapbox Vector Tile
//!
//! Les géométries WGS84 sont découpées à l'emprise de la tuile (plus un
//! tampon), projetées en Web Mercator puis quantifiées sur l'étendue de la
//! tuile. Les anneaux sont réorientés selon la convention MVT (extérieur
//! positif en coordonnées tuile, y vers le bas).

use anyhow::{Context, Result};
use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point,
    Polygon, Rect,
};
use mvt::{GeomData, GeomEncoder, GeomType, Tile};

use super::query::{Layer, PropertyValue, TileCoord, TileFeature};

/// Latitude maximale représentable en Web Mercator
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Encodeur de tuiles vectorielles
#[derive(Debug, Clone, Copy)]
pub struct TileEncoder {
    extent: u32,
    buffer: u32,
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new(4096, 64)
    }
}

impl TileEncoder {
    pub fn new(extent: u32, buffer: u32) -> Self {
        Self {
            extent: extent.max(1),
            buffer,
        }
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Encode les features d'une couche pour une tuile
    ///
    /// Retourne un buffer vide si aucune feature ne survit au découpage.
    pub fn encode<'a, I>(&self, layer: Layer, coord: TileCoord, features: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = &'a TileFeature>,
    {
        let frame = TileFrame::new(coord, self.extent, self.buffer);

        let mut tile = Tile::new(self.extent);
        let mut mvt_layer = tile.create_layer(layer.as_str());
        let mut encoded = 0usize;

        for feature in features {
            let Some(clipped) = clip_geometry(&feature.geometry, &frame.clip) else {
                continue;
            };
            let Some(geom_data) = frame
                .encode_geometry(&clipped)
                .with_context(|| format!("Failed to encode feature {} of {}", feature.id, layer))?
            else {
                continue;
            };

            let mut mvt_feature = mvt_layer.into_feature(geom_data);
            mvt_feature.set_id(feature.id);
            for (key, value) in &feature.properties {
                match value {
                    PropertyValue::Text(s) => mvt_feature.add_tag_string(key, s),
                    PropertyValue::Number(n) => mvt_feature.add_tag_double(key, *n),
                    PropertyValue::Integer(i) => mvt_feature.add_tag_int(key, *i),
                }
            }
            mvt_layer = mvt_feature.into_layer();
            encoded += 1;
        }

        if encoded == 0 {
            return Ok(Vec::new());
        }

        tile.add_layer(mvt_layer)
            .with_context(|| format!("Failed to add layer {}", layer))?;
        tile.to_bytes().context("Failed to serialize tile")
    }
}

/// Emprise d'une tuile et transformation WGS84 -> coordonnées tuile
struct TileFrame {
    west: f64,
    east: f64,
    merc_north: f64,
    merc_south: f64,
    extent: f64,
    clip: Rect,
}

impl TileFrame {
    fn new(coord: TileCoord, extent: u32, buffer: u32) -> Self {
        let bounds = coord.bounds();
        let buffer_x = bounds.width() * buffer as f64 / extent as f64;
        let buffer_y = bounds.height() * buffer as f64 / extent as f64;
        let clip = Rect::new(
            Coord {
                x: bounds.min().x - buffer_x,
                y: (bounds.min().y - buffer_y).max(-MAX_MERCATOR_LAT),
            },
            Coord {
                x: bounds.max().x + buffer_x,
                y: (bounds.max().y + buffer_y).min(MAX_MERCATOR_LAT),
            },
        );
        Self {
            west: bounds.min().x,
            east: bounds.max().x,
            merc_north: mercator_y(bounds.max().y),
            merc_south: mercator_y(bounds.min().y),
            extent: extent as f64,
            clip,
        }
    }

    fn project(&self, c: Coord) -> (f64, f64) {
        let x = (c.x - self.west) / (self.east - self.west) * self.extent;
        let y = (self.merc_north - mercator_y(c.y)) / (self.merc_north - self.merc_south) * self.extent;
        (x.round(), y.round())
    }

    /// Anneau projeté, sans point de fermeture ni doublons consécutifs
    fn ring(&self, ring: &LineString) -> Vec<(f64, f64)> {
        let mut out: Vec<(f64, f64)> = Vec::with_capacity(ring.0.len());
        for c in ring.coords() {
            let p = self.project(*c);
            if out.last() != Some(&p) {
                out.push(p);
            }
        }
        while out.len() > 1 && out.first() == out.last() {
            out.pop();
        }
        out
    }

    fn line(&self, line: &LineString) -> Vec<(f64, f64)> {
        let mut out: Vec<(f64, f64)> = Vec::with_capacity(line.0.len());
        for c in line.coords() {
            let p = self.project(*c);
            if out.last() != Some(&p) {
                out.push(p);
            }
        }
        out
    }

    fn encode_geometry(&self, geometry: &Geometry) -> Result<Option<GeomData>> {
        match geometry {
            Geometry::Point(p) => self.encode_points(std::slice::from_ref(p)),
            Geometry::MultiPoint(mp) => self.encode_points(&mp.0),
            Geometry::LineString(ls) => self.encode_lines(std::slice::from_ref(ls)),
            Geometry::MultiLineString(mls) => self.encode_lines(&mls.0),
            Geometry::Polygon(p) => self.encode_polygons(std::slice::from_ref(p)),
            Geometry::MultiPolygon(mp) => self.encode_polygons(&mp.0),
            _ => Ok(None),
        }
    }

    fn encode_points(&self, points: &[Point]) -> Result<Option<GeomData>> {
        if points.is_empty() {
            return Ok(None);
        }
        let mut encoder = GeomEncoder::new(GeomType::Point);
        for p in points {
            let (x, y) = self.project(p.0);
            encoder = encoder.point(x, y)?;
        }
        Ok(Some(encoder.encode()?))
    }

    fn encode_lines(&self, lines: &[LineString]) -> Result<Option<GeomData>> {
        let mut encoder = GeomEncoder::new(GeomType::Linestring);
        let mut parts = 0;
        for line in lines {
            let coords = self.line(line);
            if coords.len() < 2 {
                continue;
            }
            for (x, y) in coords {
                encoder = encoder.point(x, y)?;
            }
            encoder = encoder.complete()?;
            parts += 1;
        }
        if parts == 0 {
            return Ok(None);
        }
        Ok(Some(encoder.encode()?))
    }

    fn encode_polygons(&self, polygons: &[Polygon]) -> Result<Option<GeomData>> {
        let mut encoder = GeomEncoder::new(GeomType::Polygon);
        let mut parts = 0;
        for polygon in polygons {
            let mut exterior = self.ring(polygon.exterior());
            if exterior.len() < 3 || signed_area(&exterior) == 0.0 {
                continue;
            }
            orient(&mut exterior, true);
            for (x, y) in exterior {
                encoder = encoder.point(x, y)?;
            }
            encoder = encoder.complete()?;

            for interior in polygon.interiors() {
                let mut ring = self.ring(interior);
                if ring.len() < 3 || signed_area(&ring) == 0.0 {
                    continue;
                }
                orient(&mut ring, false);
                for (x, y) in ring {
                    encoder = encoder.point(x, y)?;
                }
                encoder = encoder.complete()?;
            }
            parts += 1;
        }
        if parts == 0 {
            return Ok(None);
        }
        Ok(Some(encoder.encode()?))
    }
}

fn mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln()
}

/// Aire signée (formule du lacet) en coordonnées tuile
fn signed_area(ring: &[(f64, f64)]) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum::<f64>()
        / 2.0
}

/// Extérieur : aire positive ; intérieur : aire négative
fn orient(ring: &mut [(f64, f64)], exterior: bool) {
    let area = signed_area(ring);
    if (exterior && area < 0.0) || (!exterior && area > 0.0) {
        ring.reverse();
    }
}

/// Découpe une géométrie à l'emprise tamponnée ; `None` si rien ne subsiste
pub fn clip_geometry(geometry: &Geometry, clip: &Rect) -> Option<Geometry> {
    let bbox = geometry.bounding_rect()?;
    if !overlaps(&bbox, clip) {
        return None;
    }
    if contains_rect(clip, &bbox) {
        return Some(geometry.clone());
    }

    let clip_poly = clip.to_polygon();
    match geometry {
        Geometry::Point(p) => contains_coord(clip, p.0).then(|| Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let kept: Vec<Point> = mp.0.iter().filter(|p| contains_coord(clip, p.0)).copied().collect();
            (!kept.is_empty()).then(|| Geometry::MultiPoint(kept.into()))
        }
        Geometry::LineString(ls) => {
            lines_result(clip_poly.clip(&MultiLineString::new(vec![ls.clone()]), false))
        }
        Geometry::MultiLineString(mls) => lines_result(clip_poly.clip(mls, false)),
        Geometry::Polygon(p) => polygons_result(p.intersection(&clip_poly)),
        Geometry::MultiPolygon(mp) => {
            polygons_result(mp.intersection(&MultiPolygon::new(vec![clip_poly])))
        }
        _ => None,
    }
}

fn lines_result(mls: MultiLineString) -> Option<Geometry> {
    let mut lines = mls.0;
    match lines.len() {
        0 => None,
        1 => lines.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(lines))),
    }
}

fn polygons_result(mp: MultiPolygon) -> Option<Geometry> {
    let mut polygons = mp.0;
    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polygons))),
    }
}

fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.max().x >= b.min().x && a.min().x <= b.max().x && a.max().y >= b.min().y && a.min().y <= b.max().y
}

fn contains_rect(outer: &Rect, inner: &Rect) -> bool {
    inner.min().x >= outer.min().x
        && inner.max().x <= outer.max().x
        && inner.min().y >= outer.min().y
        && inner.max().y <= outer.max().y
}

fn contains_coord(rect: &Rect, c: Coord) -> bool {
    c.x >= rect.min().x && c.x <= rect.max().x && c.y >= rect.min().y && c.y <= rect.max().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon};

    fn unit_clip() -> Rect {
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 })
    }

    #[test]
    fn test_clip_inside_is_unchanged() {
        let p = Geometry::Polygon(polygon![(x: 0.2, y: 0.2), (x: 0.8, y: 0.2), (x: 0.8, y: 0.8), (x: 0.2, y: 0.2)]);
        assert_eq!(clip_geometry(&p, &unit_clip()), Some(p));
    }

    #[test]
    fn test_clip_outside_is_dropped() {
        let p = Geometry::Polygon(polygon![(x: 2.0, y: 2.0), (x: 3.0, y: 2.0), (x: 3.0, y: 3.0), (x: 2.0, y: 2.0)]);
        assert!(clip_geometry(&p, &unit_clip()).is_none());
        assert!(clip_geometry(&Geometry::Point(Point::new(1.5, 0.5)), &unit_clip()).is_none());
    }

    #[test]
    fn test_clip_polygon_crossing_edge() {
        let p = Geometry::Polygon(polygon![(x: 0.5, y: 0.25), (x: 1.5, y: 0.25), (x: 1.5, y: 0.75), (x: 0.5, y: 0.75), (x: 0.5, y: 0.25)]);
        let Some(Geometry::Polygon(clipped)) = clip_geometry(&p, &unit_clip()) else {
            panic!("Expected Polygon");
        };
        let bbox = clipped.bounding_rect().unwrap();
        assert!((bbox.max().x - 1.0).abs() < 1e-9);
        assert!((bbox.min().x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_clip_line_crossing_edge() {
        let ls = Geometry::LineString(vec![(0.5, 0.5), (2.0, 0.5)].into());
        let Some(Geometry::LineString(clipped)) = clip_geometry(&ls, &unit_clip()) else {
            panic!("Expected LineString");
        };
        let bbox = clipped.bounding_rect().unwrap();
        assert!((bbox.max().x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_orientation() {
        let mut ring = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        orient(&mut ring, true);
        assert!(signed_area(&ring) > 0.0);
        orient(&mut ring, false);
        assert!(signed_area(&ring) < 0.0);
    }

    #[test]
    fn test_empty_tile_is_zero_bytes() {
        let encoder = TileEncoder::default();
        let coord = TileCoord::new(3, 1, 1).unwrap();
        let bytes = encoder.encode(Layer::Zones, coord, Vec::<&TileFeature>::new()).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_projection_corners() {
        let coord = TileCoord::new(1, 0, 0).unwrap();
        let frame = TileFrame::new(coord, 4096, 0);
        let b = coord.bounds();
        assert_eq!(frame.project(coord! { x: b.min().x, y: b.max().y }), (0.0, 0.0));
        assert_eq!(frame.project(coord! { x: b.max().x, y: b.min().y }), (4096.0, 4096.0));
    }
}
