//! Lecture en flux des shapefiles (.shp + .dbf)

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use dbase::FieldValue;
use geo::Geometry;
use serde_json::{Number, Value};
use shapefile::{Shape, ShapeReader};
use tracing::warn;

use crate::types::{Attributes, SourceFeature, StreamStats};
use crate::{polygonal, Polygonal, SurveyError};

/// Lit un shapefile enregistrement par enregistrement
///
/// Les formes non surfaciques sont comptées dans `filtered` sans être
/// transmises. Une erreur de lecture arrête la table : le lecteur ne sait pas
/// se resynchroniser sur l'enregistrement suivant.
pub(crate) fn stream<F>(
    table: &str,
    shp: &Path,
    dbf: Option<&Path>,
    visit: &mut F,
) -> Result<StreamStats, SurveyError>
where
    F: FnMut(Result<SourceFeature, SurveyError>),
{
    let mut stats = StreamStats::default();
    let shape_reader = ShapeReader::new(BufReader::new(File::open(shp)?))?;

    match dbf {
        Some(dbf) => {
            let dbase_reader = dbase::Reader::new(BufReader::new(File::open(dbf)?))?;
            let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);

            for (index, item) in reader.iter_shapes_and_records().enumerate() {
                match item {
                    Ok((shape, record)) => {
                        let fields: HashMap<String, FieldValue> = record.into();
                        let attributes = fields
                            .into_iter()
                            .map(|(name, value)| (name, field_to_json(value)))
                            .collect();
                        emit(index, shape, attributes, &mut stats, visit);
                    }
                    Err(e) => {
                        warn!(table, index, error = %e, "Shapefile read error, stopping table");
                        stats.delivered += 1;
                        visit(Err(e.into()));
                        break;
                    }
                }
            }
        }
        None => {
            warn!(table, "No .dbf next to shapefile, reading geometry only");
            let mut reader = shape_reader;

            for (index, item) in reader.iter_shapes().enumerate() {
                match item {
                    Ok(shape) => emit(index, shape, Attributes::new(), &mut stats, visit),
                    Err(e) => {
                        warn!(table, index, error = %e, "Shapefile read error, stopping table");
                        stats.delivered += 1;
                        visit(Err(e.into()));
                        break;
                    }
                }
            }
        }
    }

    Ok(stats)
}

fn emit<F>(index: usize, shape: Shape, attributes: Attributes, stats: &mut StreamStats, visit: &mut F)
where
    F: FnMut(Result<SourceFeature, SurveyError>),
{
    let id = index.to_string();

    let geometry = match shape {
        Shape::NullShape => None,
        Shape::Polygon(_) | Shape::PolygonM(_) | Shape::PolygonZ(_) => {
            match Geometry::<f64>::try_from(shape) {
                Ok(g) => match polygonal(g) {
                    Polygonal::Geometry(g) => Some(g),
                    Polygonal::Empty => None,
                    Polygonal::Other => {
                        stats.filtered += 1;
                        return;
                    }
                },
                Err(e) => {
                    stats.delivered += 1;
                    visit(Err(SurveyError::invalid_geometry(id, format!("{e:?}"))));
                    return;
                }
            }
        }
        _ => {
            stats.filtered += 1;
            return;
        }
    };

    stats.delivered += 1;
    visit(Ok(SourceFeature {
        id,
        geometry,
        attributes,
    }));
}

/// Convertit une valeur dBase en JSON (les champs vides deviennent `null`)
pub(crate) fn field_to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::String(trimmed.to_string())
            }
        }
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            float_to_json(n)
        }
        FieldValue::Float(Some(n)) => float_to_json(f64::from(n)),
        FieldValue::Integer(n) => Value::Number(n.into()),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        FieldValue::Date(Some(d)) => Value::String(format!(
            "{:04}-{:02}-{:02}",
            d.year(),
            d.month(),
            d.day()
        )),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => Value::Null,
        other => Value::String(format!("{other:?}")),
    }
}

/// Les entiers stockés en numérique (ex: `7.0`) restent des entiers JSON
fn float_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number((n as i64).into())
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
