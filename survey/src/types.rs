//! Types de données pour le crate survey

use std::collections::BTreeMap;
use std::path::PathBuf;

use geo::Geometry;
use serde_json::Value;

/// Attributs bruts d'une feature (clé source -> valeur)
pub type Attributes = BTreeMap<String, Value>;

/// Une ligne d'un fichier source
#[derive(Debug, Clone)]
pub struct SourceFeature {
    /// Identifiant dans la table source (fid ou rang de l'enregistrement)
    pub id: String,

    /// Géométrie Polygon ou MultiPolygon, `None` si l'enregistrement n'en a pas
    pub geometry: Option<Geometry>,

    /// Attributs tels que lus dans la source
    pub attributes: Attributes,
}

/// Format de la table source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Shapefile,
    GeoPackage,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shapefile => "shapefile",
            Self::GeoPackage => "geopackage",
        }
    }
}

/// Référence spatiale déclarée par la source
///
/// Pour un shapefile elle vient du `.prj`, pour un GeoPackage de la ligne
/// `gpkg_spatial_ref_sys` de la table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialRef {
    /// Autorité (ex: "EPSG")
    pub authority: Option<String>,

    /// Code numérique dans l'autorité
    pub code: Option<u32>,

    /// Définition brute (WKT, proj4...)
    pub definition: Option<String>,
}

/// Une table de features découverte dans le fichier source
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Nom de la table (nom du .shp sans extension, ou nom de table GeoPackage)
    pub name: String,

    pub format: SourceFormat,

    pub spatial_ref: SpatialRef,

    pub(crate) location: TableLocation,
}

/// Emplacement physique d'une table
#[derive(Debug, Clone)]
pub(crate) enum TableLocation {
    Shapefile {
        shp: PathBuf,
        dbf: Option<PathBuf>,
    },
    GeoPackage {
        path: PathBuf,
        geometry_column: String,
    },
}

/// Compteurs de lecture d'une table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Features transmises au visiteur (erreurs comprises)
    pub delivered: usize,

    /// Features écartées car leur géométrie n'est pas surfacique
    pub filtered: usize,
}
