//! Planification des requêtes de tuiles
//!
//! Une requête (couche, z, x, y) est traduite en un plan : emprise WGS84,
//! seuil de surface et tolérance de simplification dépendant du zoom, et
//! portée de requête élargie à la métatuile ancêtre.

use std::fmt;
use std::str::FromStr;

use geo::{coord, Geometry, Rect};
use thiserror::Error;

/// Zoom maximal accepté
pub const MAX_ZOOM: u8 = 24;

/// Erreurs terminales à la frontière des tuiles
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    #[error("Invalid tile coordinate {z}/{x}/{y}")]
    InvalidCoordinate { z: u8, x: u32, y: u32 },
}

/// Couches servies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Zones,
    Parcels,
    Canals,
    Gates,
    Pumps,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Zones,
        Layer::Parcels,
        Layer::Canals,
        Layer::Gates,
        Layer::Pumps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zones => "zones",
            Self::Parcels => "parcels",
            Self::Canals => "canals",
            Self::Gates => "gates",
            Self::Pumps => "pumps",
        }
    }

    /// Couche surfacique (soumise au seuil de surface)
    pub fn is_polygonal(&self) -> bool {
        matches!(self, Self::Zones | Self::Parcels)
    }

    /// Couche ponctuelle (requête par inclusion de point)
    pub fn is_point(&self) -> bool {
        matches!(self, Self::Gates | Self::Pumps)
    }

    /// Attributs projetés dans la tuile, dans l'ordre d'encodage
    pub fn attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Zones => &["code", "name", "area", "type", "status"],
            Self::Parcels => &["id", "code", "area", "crop", "farmer"],
            Self::Canals => &["id", "code", "name", "type", "capacity"],
            Self::Gates | Self::Pumps => &["id", "code", "name", "type", "status"],
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| TileError::UnknownLayer(s.to_string()))
    }
}

/// Coordonnées de tuile (schéma XYZ, origine en haut à gauche)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, TileError> {
        if z > MAX_ZOOM {
            return Err(TileError::InvalidCoordinate { z, x, y });
        }
        let n = 1u64 << z;
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(TileError::InvalidCoordinate { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    /// Tuile contenant le point (lon, lat) au zoom `z`
    pub fn containing(lon: f64, lat: f64, z: u8) -> Result<Self, TileError> {
        let n = (1u64 << z.min(MAX_ZOOM)) as f64;
        let x = ((lon + 180.0) / 360.0 * n).floor();
        let lat_rad = lat.to_radians();
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0 * n).floor();
        if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 {
            return Err(TileError::InvalidCoordinate { z, x: 0, y: 0 });
        }
        Self::new(z, x as u32, y as u32)
    }

    /// Emprise WGS84 de la tuile
    pub fn bounds(&self) -> Rect {
        let n = (1u64 << self.z) as f64;
        let west = self.x as f64 / n * 360.0 - 180.0;
        let east = (self.x as f64 + 1.0) / n * 360.0 - 180.0;
        let north = tile_lat(self.y as f64, n);
        let south = tile_lat(self.y as f64 + 1.0, n);
        Rect::new(coord! { x: west, y: south }, coord! { x: east, y: north })
    }

    /// Tuile ancêtre `levels` niveaux au-dessus (bornée au zoom 0)
    pub fn ancestor(&self, levels: u8) -> Self {
        let levels = levels.min(self.z);
        Self {
            z: self.z - levels,
            x: self.x >> levels,
            y: self.y >> levels,
        }
    }

    /// Vrai si `other` est cette tuile ou l'une de ses descendantes
    pub fn covers(&self, other: &TileCoord) -> bool {
        if other.z < self.z {
            return false;
        }
        other.ancestor(other.z - self.z) == *self
    }

    /// Clé de cache `tile:<layer>:<z>:<x>:<y>`
    pub fn cache_key(&self, layer: Layer) -> String {
        format!("tile:{}:{}:{}:{}", layer, self.z, self.x, self.y)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

fn tile_lat(y: f64, n: f64) -> f64 {
    let merc = std::f64::consts::PI * (1.0 - 2.0 * y / n);
    merc.sinh().atan().to_degrees()
}

/// Surface minimale (m²) d'une feature surfacique au zoom donné
pub fn min_area_for_zoom(z: u8) -> Option<f64> {
    match z {
        0..=7 => Some(1_000_000.0),
        8..=9 => Some(100_000.0),
        10..=11 => Some(10_000.0),
        _ => None,
    }
}

/// Tolérance de simplification (degrés) au zoom donné ; 0 = géométrie brute
pub fn tolerance_for_zoom(z: u8) -> f64 {
    match z {
        0..=7 => 0.01,
        8..=9 => 0.001,
        10..=11 => 0.0001,
        12..=13 => 0.00001,
        _ => 0.0,
    }
}

/// Plan de requête d'une tuile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlan {
    pub layer: Layer,
    /// Tuile demandée
    pub coord: TileCoord,
    /// Tuile interrogée dans le store (métatuile ancêtre)
    pub scope: TileCoord,
    /// Seuil de surface (m²), couches surfaciques uniquement
    pub min_area: Option<f64>,
    pub tolerance: f64,
}

impl TilePlan {
    pub fn new(layer: Layer, coord: TileCoord, metatile_shift: u8) -> Self {
        Self {
            layer,
            coord,
            scope: coord.ancestor(metatile_shift),
            min_area: if layer.is_polygonal() {
                min_area_for_zoom(coord.z)
            } else {
                None
            },
            tolerance: tolerance_for_zoom(coord.z),
        }
    }

    /// Emprise interrogée dans le store
    pub fn scope_bounds(&self) -> Rect {
        self.scope.bounds()
    }

    /// Deux plans de même bande de zoom produisent le même jeu de features
    pub fn same_band(&self, other: &TilePlan) -> bool {
        self.layer == other.layer
            && self.min_area == other.min_area
            && self.tolerance == other.tolerance
    }
}

/// Valeur d'attribut d'une feature de tuile
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Integer(i64),
}

/// Feature retournée par un [`crate::store::FeatureSource`]
#[derive(Debug, Clone)]
pub struct TileFeature {
    pub id: u64,
    /// Géométrie WGS84, déjà simplifiée selon le plan
    pub geometry: Geometry,
    /// Attributs projetés ; les valeurs nulles sont absentes
    pub properties: Vec<(String, PropertyValue)>,
}

impl TileFeature {
    pub fn new(id: u64, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            properties: Vec::new(),
        }
    }

    pub fn with_text(mut self, key: &str, value: Option<&str>) -> Self {
        if let Some(v) = value {
            self.properties
                .push((key.to_string(), PropertyValue::Text(v.to_string())));
        }
        self
    }

    pub fn with_number(mut self, key: &str, value: Option<f64>) -> Self {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.properties.push((key.to_string(), PropertyValue::Number(v)));
        }
        self
    }

    pub fn with_integer(mut self, key: &str, value: i64) -> Self {
        self.properties
            .push((key.to_string(), PropertyValue::Integer(value)));
        self
    }
}
