//! Enregistrements canoniques produits par l'ingestion

use geo::{Geometry, Point};
use serde::Serialize;
use survey::Attributes;

use crate::normalize::LandArea;

/// Mesures agronomiques nommées, extraites à part des attributs libres
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgronomyMeasurements {
    /// Volume d'irrigation par rai (m³)
    pub irrigation_volume_per_rai: Option<f64>,
    pub season_length_days: Option<f64>,
    pub crop_age_days: Option<f64>,
    /// Rendement estimé (kg)
    pub yield_estimate: Option<f64>,
    pub planting_date: Option<String>,
    pub harvest_date: Option<String>,
    pub water_source: Option<String>,
    pub soil_type: Option<String>,
}

impl AgronomyMeasurements {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parcelle agricole normalisée
#[derive(Debug, Clone, Serialize)]
pub struct ParcelRecord {
    /// Code de la parcelle (attribut source ou identifiant généré)
    pub code: String,
    /// Clé de jointure vers la zone d'appartenance
    pub zone_code: String,
    pub owner_name: Option<String>,
    pub owner_id: Option<String>,
    pub crop_type: Option<String>,
    pub area: LandArea,
    #[serde(skip)]
    pub centroid: Point,
    /// Anneau unique en WGS84
    #[serde(skip)]
    pub geometry: Geometry,
    /// Attributs sources non consommés par le mapping
    pub attributes: Attributes,
    pub agronomy: AgronomyMeasurements,
    pub source_table: String,
}

/// Statistiques agrégées des parcelles d'une zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZoneStatistics {
    pub parcel_count: u64,
    pub parcel_area: LandArea,
}

/// Zone d'irrigation normalisée
#[derive(Debug, Clone, Serialize)]
pub struct ZoneRecord {
    pub code: String,
    pub name: Option<String>,
    pub classification: Option<String>,
    pub status: Option<String>,
    pub area: LandArea,
    #[serde(skip)]
    pub centroid: Point,
    /// Polygon ou MultiPolygon en WGS84
    #[serde(skip)]
    pub geometry: Geometry,
    pub attributes: Attributes,
    pub statistics: ZoneStatistics,
    pub source_table: String,
}
