//! Reprojection via PROJ, pour toutes les définitions hors UTM WGS84
//!
//! Ce module est disponible uniquement avec le feature `reproject`.

use anyhow::{Context, Result};
use geo::{Coord, Geometry, MapCoords};
use proj::Proj;

/// Transformation PROJ vers WGS84 (ordre lon/lat)
pub struct ProjReprojector {
    proj: Proj,
}

impl ProjReprojector {
    /// Crée la transformation depuis une définition (`EPSG:n`, proj4 ou WKT)
    pub fn new(definition: &str) -> Result<Self> {
        // new_known_crs normalise l'ordre des axes pour la visualisation (lon, lat)
        let proj = Proj::new_known_crs(definition, "EPSG:4326", None).context(format!(
            "Failed to create projection from {} to EPSG:4326",
            definition
        ))?;
        Ok(Self { proj })
    }

    /// Transforme une géométrie en un seul parcours
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        let proj = &self.proj;
        geom.try_map_coords(|c: Coord| {
            proj.convert((c.x, c.y))
                .map(|(x, y)| Coord { x, y })
                .context("Coordinate transformation failed")
        })
    }
}
