//! Types d'erreurs pour le crate survey

use thiserror::Error;

/// Erreurs pouvant survenir lors de la lecture d'un relevé
#[derive(Debug, Error)]
pub enum SurveyError {
    /// Erreur d'I/O (extraction, fichier temporaire)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive zip corrompue
    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Erreur du lecteur shapefile (.shp/.shx/.dbf)
    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    /// Erreur du lecteur de table attributaire (.dbf)
    #[error("DBF error: {0}")]
    Dbase(#[from] dbase::Error),

    /// Erreur SQLite lors de la lecture d'un GeoPackage
    #[error("GeoPackage error: {0}")]
    GeoPackage(#[from] rusqlite::Error),

    /// Aucune source géométrique reconnue (ni .shp ni .gpkg)
    #[error("No geometry source found in {0}")]
    NoGeometrySource(String),

    /// Extension de fichier non supportée
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Erreur de parsing d'un fichier annexe
    #[error("Parse error in {file}: {reason}")]
    ParseError { file: String, reason: String },

    /// Géométrie illisible pour une feature
    #[error("Invalid geometry for {feature_id}: {reason}")]
    InvalidGeometry { feature_id: String, reason: String },
}

impl SurveyError {
    /// Crée une erreur de parsing avec contexte
    pub fn parse_error(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de géométrie invalide
    pub fn invalid_geometry(feature_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            feature_id: feature_id.into(),
            reason: reason.into(),
        }
    }
}
