//! Reprojection des géométries sources vers WGS84
//!
//! Utilise automatiquement la meilleure option disponible :
//! - identité quand la source est déjà en WGS84
//! - UTM WGS84 en Rust pur (zones 326xx / 327xx)
//! - PROJ pour toute autre définition (feature `reproject`)
//!
//! Un reprojector est construit une fois par table source.

mod ellipsoid;
#[cfg(feature = "reproject")]
mod proj;
pub mod utm;

use anyhow::Result;
use geo::{Coord, Geometry, MapCoords};
use tracing::warn;

use crate::crs::ProjectionDescriptor;

#[cfg(feature = "reproject")]
pub use self::proj::ProjReprojector;

/// Reprojection intelligente
pub enum SmartReprojector {
    /// Pas de reprojection (source déjà en WGS84)
    Identity,
    /// UTM WGS84 (pure Rust)
    Utm { zone: u32, south: bool },
    /// Reprojection via PROJ (si feature activée)
    #[cfg(feature = "reproject")]
    Proj(ProjReprojector),
}

impl SmartReprojector {
    /// Crée le reprojector d'une table
    pub fn new(source: &ProjectionDescriptor) -> Result<Self> {
        if source.is_wgs84() {
            return Ok(Self::Identity);
        }

        if let Some((zone, south)) = source.wgs84_utm_zone() {
            return Ok(Self::Utm { zone, south });
        }

        // Fallback sur proj si disponible
        #[cfg(feature = "reproject")]
        {
            let proj = ProjReprojector::new(&source.definition)?;
            return Ok(Self::Proj(proj));
        }

        #[cfg(not(feature = "reproject"))]
        anyhow::bail!(
            "Reprojection from {} requires the 'reproject' feature. \
             Build with: cargo build --features reproject",
            source
        );
    }

    /// Transforme une géométrie (un seul parcours, imbrication conservée)
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        match self {
            Self::Identity => Ok(geom.clone()),
            Self::Utm { zone, south } => {
                let (zone, south) = (*zone, *south);
                geom.try_map_coords(|c: Coord| {
                    let (x, y) = utm::utm_to_geographic(c.x, c.y, zone, south);
                    if x.is_finite() && y.is_finite() {
                        Ok(Coord { x, y })
                    } else {
                        Err(anyhow::anyhow!("UTM inverse diverged at ({}, {})", c.x, c.y))
                    }
                })
            }
            #[cfg(feature = "reproject")]
            Self::Proj(proj) => proj.transform_geometry(geom),
        }
    }

    /// Reprojette ou, en cas d'échec, renvoie la géométrie d'origine
    ///
    /// L'échec n'est pas fatal : il est journalisé et la validation WGS84 en
    /// aval rejette la feature si ses coordonnées restent hors plage.
    pub fn reproject_or_keep(&self, feature_id: &str, geom: Geometry) -> Geometry {
        match self.transform_geometry(&geom) {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(feature = feature_id, error = %e, "Reprojection failed, keeping source coordinates");
                geom
            }
        }
    }

    /// Retourne une description du reprojector utilisé
    pub fn description(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Utm { .. } => "utm (pure Rust)",
            #[cfg(feature = "reproject")]
            Self::Proj(_) => "proj (PROJ library)",
        }
    }
}
