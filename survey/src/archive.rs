//! Détection du format et extraction des archives zip

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::SurveyError;

/// Format déduit de l'extension du fichier déclaré
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Archive zip contenant un shapefile (ou un GeoPackage)
    Zip,
    /// GeoPackage (.gpkg)
    GeoPackage,
    /// Shapefile nu (.shp avec ses fichiers annexes à côté)
    Shapefile,
}

impl SourceKind {
    /// Détecte le format depuis le nom de fichier (insensible à la casse)
    pub fn from_file_name(name: &str) -> Option<Self> {
        let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "zip" => Some(Self::Zip),
            "gpkg" => Some(Self::GeoPackage),
            "shp" => Some(Self::Shapefile),
            _ => None,
        }
    }
}

/// Sources géométriques trouvées dans un répertoire d'extraction
#[derive(Debug, Default)]
pub struct LocatedSources {
    /// Fichiers .shp (triés par chemin)
    pub shapefiles: Vec<PathBuf>,
    /// Fichiers .gpkg (triés par chemin)
    pub geopackages: Vec<PathBuf>,
}

impl LocatedSources {
    pub fn is_empty(&self) -> bool {
        self.shapefiles.is_empty() && self.geopackages.is_empty()
    }
}

/// Crée un répertoire de travail unique, supprimé quand le `TempDir` est détruit
pub fn scratch_dir(root: Option<&Path>) -> Result<TempDir, SurveyError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("survey-");
    let dir = match root {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            builder.tempdir_in(root)?
        }
        None => builder.tempdir()?,
    };
    debug!(path = %dir.path().display(), "Created scratch directory");
    Ok(dir)
}

/// Extrait une archive zip dans `dest`
///
/// Les entrées dont le chemin sort de `dest` sont ignorées, ainsi que les
/// métadonnées macOS (`__MACOSX/`).
pub fn extract_zip(path: &Path, dest: &Path) -> Result<usize, SurveyError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let mut extracted = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "Skipping zip entry with unsafe path");
            continue;
        };
        if relative
            .components()
            .any(|c| c.as_os_str().eq_ignore_ascii_case("__MACOSX"))
        {
            continue;
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        out.flush()?;
        extracted += 1;
    }

    debug!(archive = %path.display(), files = extracted, "Extracted zip archive");
    Ok(extracted)
}

/// Collecte récursivement les .shp et .gpkg d'un répertoire
pub fn locate_sources(dir: &Path) -> Result<LocatedSources, SurveyError> {
    let mut sources = LocatedSources::default();
    collect(dir, &mut sources)?;
    sources.shapefiles.sort();
    sources.geopackages.sort();
    Ok(sources)
}

fn collect(dir: &Path, sources: &mut LocatedSources) -> Result<(), SurveyError> {
    for entry in std::fs::read_dir(dir)? {
        let entry_path = entry?.path();

        if entry_path.is_dir() {
            collect(&entry_path, sources)?;
            continue;
        }

        match entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(SourceKind::from_file_name)
        {
            Some(SourceKind::Shapefile) => sources.shapefiles.push(entry_path),
            Some(SourceKind::GeoPackage) => sources.geopackages.push(entry_path),
            _ => {}
        }
    }

    Ok(())
}

/// Trouve un fichier annexe du shapefile (même nom, autre extension, casse libre)
pub fn sidecar(shp: &Path, extension: &str) -> Option<PathBuf> {
    let stem = shp.file_stem()?.to_str()?;
    let dir = shp.parent()?;

    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            let same_stem = p
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s == stem);
            let same_ext = p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
            same_stem && same_ext
        })
}
