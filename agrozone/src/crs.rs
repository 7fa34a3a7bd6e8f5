//! Résolution du système de coordonnées d'une table source
//!
//! Ordre de résolution :
//! 1. codes de zones UTM du domaine (32647, 32648, 24047, 24048)
//! 2. autorité EPSG + code numérique
//! 3. définition brute (WKT, proj4)
//! 4. WGS84 géographique par défaut
//!
//! Les zones connues passent avant l'autorité : certains outils sources
//! étiquettent mal l'autorité alors que le code numérique reste fiable.

use std::fmt;

use survey::SpatialRef;

/// Définitions des zones UTM rencontrées dans les relevés
const KNOWN_ZONES: &[(u32, &str)] = &[
    (32647, "+proj=utm +zone=47 +datum=WGS84 +units=m +no_defs"),
    (32648, "+proj=utm +zone=48 +datum=WGS84 +units=m +no_defs"),
    (
        24047,
        "+proj=utm +zone=47 +a=6377276.345 +b=6356075.413 +towgs84=210,814,289,0,0,0,0 +units=m +no_defs",
    ),
    (
        24048,
        "+proj=utm +zone=48 +a=6377276.345 +b=6356075.413 +towgs84=210,814,289,0,0,0,0 +units=m +no_defs",
    ),
];

/// Code EPSG du WGS84 géographique
pub const WGS84_EPSG: u32 = 4326;

/// Règle ayant produit le descripteur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KnownZone,
    Authority,
    Definition,
    Default,
}

/// Projection source résolue, partagée par toutes les features d'une table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionDescriptor {
    /// Code EPSG quand il est connu
    pub epsg: Option<u32>,
    /// Définition utilisable par PROJ (`EPSG:n`, proj4 ou WKT)
    pub definition: String,
    pub resolution: Resolution,
}

impl ProjectionDescriptor {
    pub fn wgs84() -> Self {
        Self {
            epsg: Some(WGS84_EPSG),
            definition: format!("EPSG:{WGS84_EPSG}"),
            resolution: Resolution::Default,
        }
    }

    /// Vrai si aucune reprojection n'est nécessaire
    pub fn is_wgs84(&self) -> bool {
        self.epsg == Some(WGS84_EPSG)
    }

    /// Zone UTM WGS84 (numéro, hémisphère sud) pour les codes 326xx / 327xx
    pub fn wgs84_utm_zone(&self) -> Option<(u32, bool)> {
        match self.epsg? {
            code @ 32601..=32660 => Some((code - 32600, false)),
            code @ 32701..=32760 => Some((code - 32700, true)),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg {
            Some(code) => write!(f, "EPSG:{code}"),
            None => f.write_str(&self.definition),
        }
    }
}

/// Résout la référence spatiale d'une table ; ne renvoie jamais d'erreur
pub fn resolve(spatial_ref: &SpatialRef) -> ProjectionDescriptor {
    if let Some(code) = spatial_ref.code {
        if let Some((_, definition)) = KNOWN_ZONES.iter().find(|(known, _)| *known == code) {
            return ProjectionDescriptor {
                epsg: Some(code),
                definition: (*definition).to_string(),
                resolution: Resolution::KnownZone,
            };
        }

        let is_epsg = spatial_ref
            .authority
            .as_deref()
            .is_some_and(|a| a.trim().eq_ignore_ascii_case("EPSG"));
        if is_epsg {
            return ProjectionDescriptor {
                epsg: Some(code),
                definition: format!("EPSG:{code}"),
                resolution: Resolution::Authority,
            };
        }
    }

    if let Some(definition) = spatial_ref
        .definition
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        return ProjectionDescriptor {
            epsg: None,
            definition: definition.to_string(),
            resolution: Resolution::Definition,
        };
    }

    ProjectionDescriptor::wgs84()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spatial_ref(authority: Option<&str>, code: Option<u32>, definition: Option<&str>) -> SpatialRef {
        SpatialRef {
            authority: authority.map(String::from),
            code,
            definition: definition.map(String::from),
        }
    }

    #[test]
    fn test_known_zone_beats_mislabelled_authority() {
        let d = resolve(&spatial_ref(Some("ESRI"), Some(32647), None));
        assert_eq!(d.resolution, Resolution::KnownZone);
        assert_eq!(d.epsg, Some(32647));
        assert!(d.definition.contains("+zone=47"));
        assert_eq!(d.wgs84_utm_zone(), Some((47, false)));
    }

    #[test]
    fn test_indian_1975_is_not_wgs84_utm() {
        let d = resolve(&spatial_ref(None, Some(24048), None));
        assert_eq!(d.resolution, Resolution::KnownZone);
        assert!(d.definition.contains("+towgs84"));
        assert_eq!(d.wgs84_utm_zone(), None);
    }

    #[test]
    fn test_authority_code() {
        let d = resolve(&spatial_ref(Some("epsg"), Some(32747), Some("PROJCS[...]")));
        assert_eq!(d.resolution, Resolution::Authority);
        assert_eq!(d.definition, "EPSG:32747");
        assert_eq!(d.wgs84_utm_zone(), Some((47, true)));
    }

    #[test]
    fn test_definition_fallback() {
        let d = resolve(&spatial_ref(Some("ESRI"), Some(102_100), Some(" +proj=merc ")));
        assert_eq!(d.resolution, Resolution::Definition);
        assert_eq!(d.definition, "+proj=merc");
        assert_eq!(d.epsg, None);
    }

    #[test]
    fn test_default_wgs84() {
        let d = resolve(&SpatialRef::default());
        assert_eq!(d.resolution, Resolution::Default);
        assert!(d.is_wgs84());
        assert_eq!(d.to_string(), "EPSG:4326");
    }
}
