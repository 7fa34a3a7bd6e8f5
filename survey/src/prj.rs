//! Lecture des fichiers .prj (WKT ESRI / OGC)

use memchr::memmem;

use crate::types::SpatialRef;

/// Noms de projection ESRI/OGC fréquents dans les relevés, sans bloc AUTHORITY
const PROJECTIONS: &[(&str, u32)] = &[
    ("WGS_1984_UTM_Zone_47N", 32647),
    ("WGS_1984_UTM_Zone_48N", 32648),
    ("WGS 84 / UTM zone 47N", 32647),
    ("WGS 84 / UTM zone 48N", 32648),
    ("Indian_1975_UTM_Zone_47N", 24047),
    ("Indian_1975_UTM_Zone_48N", 24048),
    ("Indian 1975 / UTM zone 47N", 24047),
    ("Indian 1975 / UTM zone 48N", 24048),
    ("GCS_WGS_1984", 4326),
    ("WGS 84", 4326),
];

/// Parse le contenu d'un .prj
///
/// Le dernier `AUTHORITY[...]` d'un WKT1 est celui de la racine (les blocs
/// imbriqués GEOGCS/DATUM viennent avant). À défaut, le nom racine est cherché
/// dans la table des projections connues.
pub fn parse(data: &[u8]) -> SpatialRef {
    let text = match simdutf8::basic::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(data).into_owned(),
    };
    let definition = text.trim();

    if definition.is_empty() {
        return SpatialRef::default();
    }

    let (authority, code) = match root_authority(definition.as_bytes()) {
        Some((authority, code)) => (Some(authority), Some(code)),
        None => match root_name(definition).and_then(lookup_name) {
            Some(code) => (Some("EPSG".to_string()), Some(code)),
            None => (None, None),
        },
    };

    SpatialRef {
        authority,
        code,
        definition: Some(definition.to_string()),
    }
}

/// Extrait (autorité, code) du dernier bloc AUTHORITY
fn root_authority(data: &[u8]) -> Option<(String, u32)> {
    let pos = memmem::rfind(data, b"AUTHORITY[")?;
    let start = pos + b"AUTHORITY[".len();
    let end = start + data[start..].iter().position(|&b| b == b']')?;
    let inner = std::str::from_utf8(&data[start..end]).ok()?;

    let mut parts = inner.split(',').map(|p| p.trim().trim_matches('"'));
    let authority = parts.next()?.to_string();
    let code = parts.next()?.parse().ok()?;

    Some((authority, code))
}

/// Premier nom entre guillemets (nom de la projection racine)
fn root_name(definition: &str) -> Option<&str> {
    let start = definition.find('"')? + 1;
    let len = definition[start..].find('"')?;
    Some(&definition[start..start + len])
}

fn lookup_name(name: &str) -> Option<u32> {
    PROJECTIONS
        .iter()
        .find(|(known, _)| name.eq_ignore_ascii_case(known))
        .map(|&(_, code)| code)
        .or_else(|| utm_zone_from_name(name))
}

/// Reconnaît les noms génériques `WGS_1984_UTM_Zone_<n><N|S>`
fn utm_zone_from_name(name: &str) -> Option<u32> {
    let normalized = name.replace(' ', "_").to_ascii_uppercase();
    let rest = normalized
        .strip_prefix("WGS_1984_UTM_ZONE_")
        .or_else(|| normalized.strip_prefix("WGS_84_/_UTM_ZONE_"))?;
    if rest.is_empty() || !rest.is_ascii() {
        return None;
    }

    let (zone, hemisphere) = rest.split_at(rest.len().checked_sub(1)?);
    let zone: u32 = zone.parse().ok()?;
    if !(1..=60).contains(&zone) {
        return None;
    }

    match hemisphere {
        "N" => Some(32600 + zone),
        "S" => Some(32700 + zone),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTM47_OGC: &str = r#"PROJCS["WGS 84 / UTM zone 47N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],PARAMETER["central_meridian",99],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AUTHORITY["EPSG","32647"]]"#;

    const UTM48_ESRI: &str = r#"PROJCS["WGS_1984_UTM_Zone_48N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["Central_Meridian",105.0],UNIT["Meter",1.0]]"#;

    #[test]
    fn test_root_authority_wins_over_nested() {
        let srs = parse(UTM47_OGC.as_bytes());
        assert_eq!(srs.authority.as_deref(), Some("EPSG"));
        assert_eq!(srs.code, Some(32647));
        assert!(srs.definition.unwrap().starts_with("PROJCS"));
    }

    #[test]
    fn test_esri_name_lookup() {
        let srs = parse(UTM48_ESRI.as_bytes());
        assert_eq!(srs.code, Some(32648));
    }

    #[test]
    fn test_generic_utm_name() {
        assert_eq!(utm_zone_from_name("WGS_1984_UTM_Zone_50S"), Some(32750));
        assert_eq!(utm_zone_from_name("WGS_1984_UTM_Zone_61N"), None);
        assert_eq!(utm_zone_from_name("Indian_1960"), None);
    }

    #[test]
    fn test_unknown_projection_keeps_definition() {
        let srs = parse(br#"PROJCS["Local_Grid",PROJECTION["Foo"]]"#);
        assert_eq!(srs.code, None);
        assert_eq!(srs.authority, None);
        assert!(srs.definition.is_some());
    }

    #[test]
    fn test_empty_prj() {
        assert_eq!(parse(b"  \n"), SpatialRef::default());
    }
}
