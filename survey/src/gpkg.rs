//! Lecture des tables de features d'un GeoPackage

use std::path::Path;

use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::ToGeo;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::{Number, Value};
use tracing::debug;

use crate::types::{Attributes, SourceFeature, SourceFormat, SourceTable, SpatialRef, StreamStats, TableLocation};
use crate::{polygonal, Polygonal, SurveyError};

/// Ouvre le GeoPackage en lecture seule
fn open(path: &Path) -> Result<Connection, SurveyError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Énumère les tables de features déclarées dans `gpkg_contents`
pub(crate) fn list_tables(path: &Path) -> Result<Vec<SourceTable>, SurveyError> {
    let conn = open(path)?;

    let mut stmt = conn.prepare(
        "SELECT c.table_name, g.column_name, c.srs_id
         FROM gpkg_contents c
         JOIN gpkg_geometry_columns g ON g.table_name = c.table_name
         WHERE c.data_type = 'features'
         ORDER BY c.table_name",
    )?;
    let declared = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables = Vec::with_capacity(declared.len());
    for (name, geometry_column, srs_id) in declared {
        let spatial_ref = match srs_id {
            Some(id) => spatial_ref(&conn, id)?,
            None => SpatialRef::default(),
        };
        debug!(table = %name, srs_id = ?srs_id, code = ?spatial_ref.code, "Found GeoPackage feature table");

        tables.push(SourceTable {
            name,
            format: SourceFormat::GeoPackage,
            spatial_ref,
            location: TableLocation::GeoPackage {
                path: path.to_path_buf(),
                geometry_column,
            },
        });
    }

    Ok(tables)
}

/// Résout la ligne `gpkg_spatial_ref_sys` d'une table
fn spatial_ref(conn: &Connection, srs_id: i64) -> Result<SpatialRef, SurveyError> {
    let row = conn
        .query_row(
            "SELECT organization, organization_coordsys_id, definition
             FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [srs_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((organization, code, definition)) = row else {
        return Ok(SpatialRef::default());
    };

    Ok(SpatialRef {
        authority: organization.filter(|o| !o.trim().is_empty() && !o.eq_ignore_ascii_case("none")),
        code: code.and_then(|c| u32::try_from(c).ok()).filter(|&c| c > 0),
        definition: definition.filter(|d| {
            let d = d.trim();
            !d.is_empty() && !d.eq_ignore_ascii_case("undefined")
        }),
    })
}

/// Parcourt toutes les lignes d'une table
pub(crate) fn stream<F>(
    table: &str,
    path: &Path,
    geometry_column: &str,
    visit: &mut F,
) -> Result<StreamStats, SurveyError>
where
    F: FnMut(Result<SourceFeature, SurveyError>),
{
    let conn = open(path)?;
    let mut stats = StreamStats::default();

    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let geometry_index = columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(geometry_column))
        .ok_or_else(|| {
            SurveyError::parse_error(table, format!("geometry column {geometry_column} not found"))
        })?;

    let mut rows = stmt.query([])?;
    let mut ordinal = 0usize;

    while let Some(row) = rows.next()? {
        ordinal += 1;
        let mut id = ordinal.to_string();
        let mut attributes = Attributes::new();
        let mut blob: Option<Vec<u8>> = None;

        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i)?;
            if i == geometry_index {
                if let ValueRef::Blob(bytes) = value {
                    blob = Some(bytes.to_vec());
                }
                continue;
            }
            if name.eq_ignore_ascii_case("fid") {
                if let ValueRef::Integer(fid) = value {
                    id = fid.to_string();
                }
            }
            attributes.insert(name.clone(), value_to_json(value));
        }

        let geometry = match blob.as_deref().map(decode_geometry).transpose() {
            Ok(decoded) => match decoded.flatten().map(polygonal) {
                Some(Polygonal::Geometry(g)) => Some(g),
                Some(Polygonal::Empty) | None => None,
                Some(Polygonal::Other) => {
                    stats.filtered += 1;
                    continue;
                }
            },
            Err(reason) => {
                stats.delivered += 1;
                visit(Err(SurveyError::invalid_geometry(id, reason)));
                continue;
            }
        };

        stats.delivered += 1;
        visit(Ok(SourceFeature {
            id,
            geometry,
            attributes,
        }));
    }

    Ok(stats)
}

/// Décode un blob géométrique GeoPackage (en-tête `GP` + WKB standard)
///
/// Retourne `None` pour une géométrie vide (bit 4 du flag).
pub fn decode_geometry(blob: &[u8]) -> Result<Option<Geometry>, String> {
    if blob.len() < 8 || &blob[0..2] != b"GP" {
        return Err("missing GeoPackage header".to_string());
    }

    let flags = blob[3];
    if flags & 0b0001_0000 != 0 {
        return Ok(None);
    }

    let envelope_len = match (flags >> 1) & 0b111 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(format!("invalid envelope indicator {other}")),
    };

    let wkb = blob
        .get(8 + envelope_len..)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| "truncated geometry blob".to_string())?;

    Wkb(wkb.to_vec())
        .to_geo()
        .map(Some)
        .map_err(|e| e.to_string())
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => {
            let text = match simdutf8::basic::from_utf8(bytes) {
                Ok(s) => s.trim().to_string(),
                Err(_) => String::from_utf8_lossy(bytes).trim().to_string(),
            };
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
