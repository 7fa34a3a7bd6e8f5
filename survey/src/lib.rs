//! # survey
//!
//! Lecture des relevés parcellaires livrés en shapefile zippé ou en GeoPackage.
//!
//! ## Features
//!
//! - Détection du format par extension (`.zip`, `.gpkg`, `.shp`)
//! - Extraction des zip dans un répertoire temporaire unique, supprimé à la fin
//! - Lecture en flux des enregistrements, seules les surfaces sont transmises
//! - Référence spatiale de chaque table (`.prj` ou `gpkg_spatial_ref_sys`)
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//!
//! ## Usage
//!
//! ```rust,ignore
//! use survey::open;
//! use std::path::Path;
//!
//! let survey = open(Path::new("parcels.zip"))?;
//! for table in survey.tables() {
//!     let stats = survey.stream(table, |feature| {
//!         if let Ok(f) = feature {
//!             println!("{}: {:?}", f.id, f.attributes);
//!         }
//!     })?;
//!     println!("{}: {} features", table.name, stats.delivered);
//! }
//! ```

pub mod archive;
pub mod error;
pub mod gpkg;
pub mod prj;
mod shp;
pub mod types;

pub use archive::SourceKind;
pub use error::SurveyError;
pub use types::{Attributes, SourceFeature, SourceFormat, SourceTable, SpatialRef, StreamStats};

use std::path::{Path, PathBuf};

use geo::{Geometry, MultiPolygon};
use tempfile::TempDir;
use tracing::{debug, info};

use types::TableLocation;

/// Un relevé ouvert : ses tables et, si besoin, le répertoire d'extraction
///
/// Le répertoire temporaire vit aussi longtemps que le `Survey` et il est
/// supprimé à sa destruction, que la lecture ait réussi ou non.
#[derive(Debug)]
pub struct Survey {
    tables: Vec<SourceTable>,
    scratch: Option<TempDir>,
}

impl Survey {
    /// Tables de features découvertes
    pub fn tables(&self) -> &[SourceTable] {
        &self.tables
    }

    /// Répertoire d'extraction, s'il y en a un
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|d| d.path())
    }

    /// Lit une table et appelle `visit` pour chaque feature surfacique ou sans géométrie
    ///
    /// Les erreurs propres à une feature sont passées au visiteur ; seule une
    /// erreur d'ouverture de la table est retournée.
    pub fn stream<F>(&self, table: &SourceTable, mut visit: F) -> Result<StreamStats, SurveyError>
    where
        F: FnMut(Result<SourceFeature, SurveyError>),
    {
        match &table.location {
            TableLocation::Shapefile { shp, dbf } => {
                shp::stream(&table.name, shp, dbf.as_deref(), &mut visit)
            }
            TableLocation::GeoPackage {
                path,
                geometry_column,
            } => gpkg::stream(&table.name, path, geometry_column, &mut visit),
        }
    }
}

/// Ouvre un relevé depuis un fichier sur disque
///
/// # Errors
///
/// Retourne `SurveyError::UnsupportedFormat` pour une extension inconnue et
/// `SurveyError::NoGeometrySource` si aucun .shp / .gpkg n'est trouvé.
pub fn open(path: &Path) -> Result<Survey, SurveyError> {
    open_in(path, None)
}

/// Ouvre un relevé en extrayant les zip sous `scratch_root`
pub fn open_in(path: &Path, scratch_root: Option<&Path>) -> Result<Survey, SurveyError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    match SourceKind::from_file_name(name) {
        Some(SourceKind::Zip) => {
            let scratch = archive::scratch_dir(scratch_root)?;
            archive::extract_zip(path, scratch.path())?;
            let tables = tables_in(scratch.path(), name)?;
            Ok(Survey {
                tables,
                scratch: Some(scratch),
            })
        }
        Some(SourceKind::GeoPackage) => Ok(Survey {
            tables: gpkg::list_tables(path)?,
            scratch: None,
        }),
        Some(SourceKind::Shapefile) => Ok(Survey {
            tables: vec![shapefile_table(path.to_path_buf())],
            scratch: None,
        }),
        None => Err(SurveyError::UnsupportedFormat(name.to_string())),
    }
}

/// Ouvre un relevé reçu en mémoire avec son nom de fichier déclaré
///
/// Les octets sont écrits dans un répertoire temporaire propre à l'appel,
/// qui sert aussi de répertoire d'extraction.
pub fn open_bytes(
    bytes: &[u8],
    file_name: &str,
    scratch_root: Option<&Path>,
) -> Result<Survey, SurveyError> {
    let kind = SourceKind::from_file_name(file_name)
        .ok_or_else(|| SurveyError::UnsupportedFormat(file_name.to_string()))?;
    if kind == SourceKind::Shapefile {
        // Un .shp seul n'a ni .dbf ni .prj
        return Err(SurveyError::NoGeometrySource(file_name.to_string()));
    }

    let scratch = archive::scratch_dir(scratch_root)?;
    let upload = scratch.path().join(sanitize_file_name(file_name));
    std::fs::write(&upload, bytes)?;

    let tables = match kind {
        SourceKind::Zip => {
            let extract_dir = scratch.path().join("extracted");
            std::fs::create_dir_all(&extract_dir)?;
            archive::extract_zip(&upload, &extract_dir)?;
            tables_in(&extract_dir, file_name)?
        }
        _ => gpkg::list_tables(&upload)?,
    };

    Ok(Survey {
        tables,
        scratch: Some(scratch),
    })
}

/// Tables d'un répertoire extrait : les shapefiles, sinon les GeoPackage
fn tables_in(dir: &Path, origin: &str) -> Result<Vec<SourceTable>, SurveyError> {
    let sources = archive::locate_sources(dir)?;
    if sources.is_empty() {
        return Err(SurveyError::NoGeometrySource(origin.to_string()));
    }

    if !sources.shapefiles.is_empty() {
        info!(origin, count = sources.shapefiles.len(), "Found shapefiles in archive");
        return Ok(sources.shapefiles.into_iter().map(shapefile_table).collect());
    }

    debug!(origin, count = sources.geopackages.len(), "Delegating to GeoPackage reader");
    let mut tables = Vec::new();
    for path in &sources.geopackages {
        tables.extend(gpkg::list_tables(path)?);
    }
    if tables.is_empty() {
        return Err(SurveyError::NoGeometrySource(origin.to_string()));
    }
    Ok(tables)
}

fn shapefile_table(shp: PathBuf) -> SourceTable {
    let name = shp
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("shapefile")
        .to_string();
    let dbf = archive::sidecar(&shp, "dbf");
    let spatial_ref = archive::sidecar(&shp, "prj")
        .and_then(|prj| std::fs::read(prj).ok())
        .map(|data| prj::parse(&data))
        .unwrap_or_default();

    SourceTable {
        name,
        format: SourceFormat::Shapefile,
        spatial_ref,
        location: TableLocation::Shapefile { shp, dbf },
    }
}

/// Garde uniquement le nom de fichier (pas de séparateurs venant de l'appelant)
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

/// Résultat du filtre surfacique
pub(crate) enum Polygonal {
    Geometry(Geometry),
    Empty,
    Other,
}

/// Ne garde que Polygon / MultiPolygon ; un MultiPolygon à une partie devient Polygon
pub(crate) fn polygonal(geometry: Geometry) -> Polygonal {
    match geometry {
        Geometry::Polygon(p) if p.exterior().0.is_empty() => Polygonal::Empty,
        Geometry::Polygon(p) => Polygonal::Geometry(Geometry::Polygon(p)),
        Geometry::MultiPolygon(mp) => match mp.0.len() {
            0 => Polygonal::Empty,
            1 => match mp.0.into_iter().next() {
                Some(p) => Polygonal::Geometry(Geometry::Polygon(p)),
                None => Polygonal::Empty,
            },
            _ => Polygonal::Geometry(Geometry::MultiPolygon(MultiPolygon::new(mp.0))),
        },
        _ => Polygonal::Other,
    }
}
