//! Export GeoJSON des enregistrements normalisés (streaming avec geozero)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use geo::Geometry;
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;
use serde::Serialize;

use crate::model::{ParcelRecord, ZoneRecord};

/// Enregistrement exportable : un identifiant, une géométrie WGS84 et des propriétés
pub trait GeoJsonFeature: Serialize {
    fn feature_id(&self) -> String;
    fn geometry(&self) -> &Geometry;
}

impl GeoJsonFeature for ZoneRecord {
    fn feature_id(&self) -> String {
        self.code.clone()
    }

    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

impl GeoJsonFeature for ParcelRecord {
    fn feature_id(&self) -> String {
        format!("{}/{}", self.zone_code, self.code)
    }

    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// Exporte une FeatureCollection en EPSG:4326 ; retourne le nombre de features écrites
pub fn export_to_geojson<T: GeoJsonFeature>(records: &[T], output_path: &Path) -> Result<usize> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    write_collection(&mut writer, records)?;
    writer.flush()?;
    Ok(records.len())
}

/// Écrit la FeatureCollection dans un flux quelconque
pub fn write_collection<W: Write, T: GeoJsonFeature>(writer: &mut W, records: &[T]) -> Result<()> {
    write!(
        writer,
        r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::4326"}}}},"features":["#
    )?;
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, record)?;
    }
    write!(writer, "]}}")?;
    Ok(())
}

fn write_feature<W: Write, T: GeoJsonFeature>(writer: &mut W, record: &T) -> Result<()> {
    write!(
        writer,
        r#"{{"type":"Feature","id":{},"geometry":"#,
        serde_json::to_string(&record.feature_id())?
    )?;

    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    record.geometry().process_geom(&mut geom_writer)?;
    writer.write_all(&geom_buf)?;

    write!(writer, r#","properties":"#)?;
    serde_json::to_writer(&mut *writer, record)?;
    write!(writer, "}}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgronomyMeasurements, ZoneStatistics};
    use crate::normalize::LandArea;
    use geo::{polygon, Point};
    use survey::Attributes;

    fn parcel() -> ParcelRecord {
        let mut attributes = Attributes::new();
        attributes.insert("NOTE".into(), serde_json::json!("ร่องน้ำ \"A\""));
        ParcelRecord {
            code: "7".into(),
            zone_code: "3".into(),
            owner_name: Some("Somchai".into()),
            owner_id: None,
            crop_type: Some("rice".into()),
            area: LandArea::from_hectares(2.0),
            centroid: Point::new(100.5, 13.7),
            geometry: Geometry::Polygon(polygon![
                (x: 100.5, y: 13.7),
                (x: 100.501, y: 13.7),
                (x: 100.501, y: 13.701),
                (x: 100.5, y: 13.7),
            ]),
            attributes,
            agronomy: AgronomyMeasurements::default(),
            source_table: "parcels".into(),
        }
    }

    #[test]
    fn test_write_collection() {
        let mut buffer = Vec::new();
        write_collection(&mut buffer, &[parcel()]).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        let feature = &json["features"][0];
        assert_eq!(feature["id"], "3/7");
        assert_eq!(feature["geometry"]["type"], "Polygon");
        assert_eq!(feature["properties"]["crop_type"], "rice");
        assert_eq!(feature["properties"]["area"]["rai"], 12.5);
        assert_eq!(feature["properties"]["attributes"]["NOTE"], "ร่องน้ำ \"A\"");
    }

    #[test]
    fn test_export_zones() {
        let zone = ZoneRecord {
            code: "Z1".into(),
            name: Some("North".into()),
            classification: None,
            status: None,
            area: LandArea::from_hectares(100.0),
            centroid: Point::new(100.5, 13.7),
            geometry: parcel().geometry,
            attributes: Attributes::new(),
            statistics: ZoneStatistics::default(),
            source_table: "zones".into(),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.geojson");

        assert_eq!(export_to_geojson(&[zone], &path).unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("EPSG::4326"));
        assert!(content.contains(r#""id":"Z1""#));
    }
}
