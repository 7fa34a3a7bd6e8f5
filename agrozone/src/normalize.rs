//! Surfaces, anneau dominant et centroïde des géométries WGS84

use anyhow::{bail, Result};
use geo::{Coord, GeodesicArea, Geometry, LineString, Point, Polygon};
use serde::Serialize;

/// Surface exprimée en hectares et en rai
///
/// Le rai est toujours dérivé des hectares (1 rai = 1 600 m²) : les deux
/// valeurs ne peuvent pas diverger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LandArea {
    hectares: f64,
    rai: f64,
}

impl LandArea {
    /// Rai par hectare
    pub const RAI_PER_HECTARE: f64 = 6.25;

    pub fn from_hectares(hectares: f64) -> Self {
        Self {
            hectares,
            rai: hectares * Self::RAI_PER_HECTARE,
        }
    }

    pub fn from_square_meters(square_meters: f64) -> Self {
        Self::from_hectares(square_meters / 10_000.0)
    }

    pub fn hectares(&self) -> f64 {
        self.hectares
    }

    pub fn rai(&self) -> f64 {
        self.rai
    }

    pub fn square_meters(&self) -> f64 {
        self.hectares * 10_000.0
    }
}

impl std::ops::Add for LandArea {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::from_hectares(self.hectares + other.hectares)
    }
}

impl std::iter::Sum for LandArea {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, a| acc + a)
    }
}

/// Géométrie normalisée et ses mesures
#[derive(Debug, Clone)]
pub struct NormalizedShape {
    pub geometry: Geometry,
    pub area: LandArea,
    pub centroid: Point,
}

/// Normalise une parcelle : un MultiPolygon est réduit à son anneau extérieur
/// de plus grande surface
pub fn normalize_parcel(geometry: &Geometry) -> Result<NormalizedShape> {
    check_wgs84_range(geometry)?;

    let polygon = match geometry {
        Geometry::Polygon(p) => p.clone(),
        Geometry::MultiPolygon(mp) => match dominant_ring(mp.0.iter().map(|p| p.exterior())) {
            Some(ring) => Polygon::new(ring.clone(), vec![]),
            None => bail!("MultiPolygon has no ring"),
        },
        other => bail!("Unsupported parcel geometry: {}", geometry_kind(other)),
    };

    measured(Geometry::Polygon(polygon))
}

/// Normalise une zone : la géométrie est conservée telle quelle
pub fn normalize_zone(geometry: &Geometry) -> Result<NormalizedShape> {
    check_wgs84_range(geometry)?;
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => measured(geometry.clone()),
        other => bail!("Unsupported zone geometry: {}", geometry_kind(other)),
    }
}

fn measured(geometry: Geometry) -> Result<NormalizedShape> {
    let first_ring = match &geometry {
        Geometry::Polygon(p) => Some(p.exterior()),
        Geometry::MultiPolygon(mp) => mp.0.first().map(|p| p.exterior()),
        _ => None,
    };
    let Some(centroid) = first_ring.and_then(vertex_centroid) else {
        bail!("Empty polygon ring");
    };

    let square_meters = geodesic_area(&geometry);
    if !square_meters.is_finite() {
        bail!("Area computation failed");
    }

    Ok(NormalizedShape {
        area: LandArea::from_square_meters(square_meters),
        centroid,
        geometry,
    })
}

/// Surface géodésique (m²) d'une géométrie WGS84
pub fn geodesic_area(geometry: &Geometry) -> f64 {
    geometry.geodesic_area_unsigned()
}

/// Surface plane absolue d'un anneau (formule du lacet), en unités des coordonnées
pub fn shoelace_area(ring: &LineString) -> f64 {
    let coords = &ring.0;
    if coords.len() < 3 {
        return 0.0;
    }
    let twice: f64 = coords
        .iter()
        .zip(coords.iter().cycle().skip(1))
        .take(coords.len())
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

/// Anneau de plus grande surface ; le premier l'emporte en cas d'égalité
pub fn dominant_ring<'a, I>(rings: I) -> Option<&'a LineString>
where
    I: IntoIterator<Item = &'a LineString>,
{
    let mut best: Option<(&LineString, f64)> = None;
    for ring in rings {
        let area = shoelace_area(ring);
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((ring, area)),
        }
    }
    best.map(|(ring, _)| ring)
}

/// Moyenne arithmétique des sommets, point de fermeture exclu
pub fn vertex_centroid(ring: &LineString) -> Option<Point> {
    let coords = ring_vertices(ring);
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (sx, sy) = coords
        .iter()
        .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    Some(Point::new(sx / n, sy / n))
}

fn ring_vertices(ring: &LineString) -> &[Coord] {
    let coords = ring.0.as_slice();
    if coords.len() > 1 && coords.first() == coords.last() {
        &coords[..coords.len() - 1]
    } else {
        coords
    }
}

/// Rejette les coordonnées hors de la plage WGS84 (ou non finies)
pub fn check_wgs84_range(geometry: &Geometry) -> Result<()> {
    use geo::CoordsIter;

    for c in geometry.coords_iter() {
        if !(c.x.is_finite() && c.y.is_finite())
            || !(-180.0..=180.0).contains(&c.x)
            || !(-90.0..=90.0).contains(&c.y)
        {
            bail!("Coordinate ({}, {}) outside WGS84 range", c.x, c.y);
        }
    }
    Ok(())
}

pub(crate) fn geometry_kind(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
