//! Relevés de test construits à la volée

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use dbase::{FieldValue, Record, TableWriterBuilder};
use geo::{polygon, Geometry};
use geozero::{CoordDimensions, ToWkb};
use shapefile::{Point, Polygon, PolygonRing};
use zip::write::SimpleFileOptions;

pub const UTM47N_PRJ: &str = r#"PROJCS["WGS_1984_UTM_Zone_47N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",99.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

/// Parcelle relevée en UTM 47N
pub struct Plot {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub seq: i32,
    pub sub_member: i32,
    pub owner: &'static str,
    pub crop: &'static str,
}

fn attributes(seq: i32, sub_member: i32, owner: &str, crop: &str) -> Record {
    let mut record = Record::default();
    record.insert("PARCEL_SEQ".to_string(), FieldValue::Numeric(Some(f64::from(seq))));
    record.insert("sub_member".to_string(), FieldValue::Numeric(Some(f64::from(sub_member))));
    record.insert("OWNER".to_string(), FieldValue::Character(Some(owner.to_string())));
    record.insert("CROP".to_string(), FieldValue::Character(Some(crop.to_string())));
    record
}

fn table_builder() -> TableWriterBuilder {
    TableWriterBuilder::new()
        .add_numeric_field("PARCEL_SEQ".try_into().unwrap(), 10, 0)
        .add_numeric_field("sub_member".try_into().unwrap(), 10, 0)
        .add_character_field("OWNER".try_into().unwrap(), 50)
        .add_character_field("CROP".try_into().unwrap(), 20)
}

/// Écrit `<stem>.shp/.shx/.dbf/.prj` avec des rectangles
pub fn write_plots(dir: &Path, stem: &str, plots: &[Plot]) {
    let shp = dir.join(format!("{stem}.shp"));
    let mut writer = shapefile::Writer::from_path(&shp, table_builder()).unwrap();
    for p in plots {
        let polygon = Polygon::new(PolygonRing::Outer(vec![
            Point::new(p.x, p.y),
            Point::new(p.x, p.y + p.height),
            Point::new(p.x + p.width, p.y + p.height),
            Point::new(p.x + p.width, p.y),
            Point::new(p.x, p.y),
        ]));
        writer
            .write_shape_and_record(&polygon, &attributes(p.seq, p.sub_member, p.owner, p.crop))
            .unwrap();
    }
    drop(writer);
    std::fs::write(dir.join(format!("{stem}.prj")), UTM47N_PRJ).unwrap();
}

/// Écrit un shapefile de points (stations relevées au GPS)
pub fn write_points(dir: &Path, stem: &str, points: &[(f64, f64)]) {
    let shp = dir.join(format!("{stem}.shp"));
    let mut writer = shapefile::Writer::from_path(&shp, table_builder()).unwrap();
    for (i, (x, y)) in points.iter().enumerate() {
        writer
            .write_shape_and_record(&Point::new(*x, *y), &attributes(i as i32 + 1, 1, "", ""))
            .unwrap();
    }
    drop(writer);
    std::fs::write(dir.join(format!("{stem}.prj")), UTM47N_PRJ).unwrap();
}

/// Zippe le contenu d'un répertoire et retourne les octets de l'archive
pub fn zip_dir(src: &Path) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let mut entries: Vec<_> = std::fs::read_dir(src)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    for path in entries {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(&std::fs::read(&path).unwrap()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Archive zip d'un shapefile de parcelles
pub fn plots_archive(plots: &[Plot]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    write_plots(dir.path(), "plots", plots);
    zip_dir(dir.path())
}

pub fn plot(seq: i32, x: f64) -> Plot {
    Plot {
        x,
        y: 1_520_000.0,
        width: 100.0,
        height: 160.0,
        seq,
        sub_member: 3,
        owner: "Somchai",
        crop: "rice",
    }
}

fn gpkg_blob(geometry: &Geometry) -> Vec<u8> {
    let mut blob = vec![b'G', b'P', 0, 0b0000_0001];
    blob.extend_from_slice(&4326i32.to_le_bytes());
    blob.extend(geometry.to_wkb(CoordDimensions::xy()).unwrap());
    blob
}

/// GeoPackage WGS84 avec une table `zones` ; retourne ses octets
pub fn zones_geopackage(zones: &[(&str, &str, Geometry)]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zones.gpkg");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE gpkg_spatial_ref_sys (
            srs_name TEXT NOT NULL, srs_id INTEGER PRIMARY KEY, organization TEXT NOT NULL,
            organization_coordsys_id INTEGER NOT NULL, definition TEXT NOT NULL, description TEXT);
         CREATE TABLE gpkg_contents (
            table_name TEXT PRIMARY KEY, data_type TEXT NOT NULL, identifier TEXT,
            srs_id INTEGER);
         CREATE TABLE gpkg_geometry_columns (
            table_name TEXT NOT NULL, column_name TEXT NOT NULL, geometry_type_name TEXT NOT NULL,
            srs_id INTEGER NOT NULL, z TINYINT NOT NULL, m TINYINT NOT NULL);
         INSERT INTO gpkg_spatial_ref_sys VALUES ('WGS 84', 4326, 'EPSG', 4326, 'GEOGCS[\"WGS 84\"]', NULL);
         INSERT INTO gpkg_contents VALUES ('zones', 'features', 'zones', 4326);
         INSERT INTO gpkg_geometry_columns VALUES ('zones', 'geom', 'GEOMETRY', 4326, 0, 0);
         CREATE TABLE zones (fid INTEGER PRIMARY KEY, geom BLOB, zone_code TEXT, name TEXT);",
    )
    .unwrap();
    for (code, name, geometry) in zones {
        conn.execute(
            "INSERT INTO zones (geom, zone_code, name) VALUES (?1, ?2, ?3)",
            rusqlite::params![gpkg_blob(geometry), code, name],
        )
        .unwrap();
    }
    drop(conn);
    std::fs::read(&path).unwrap()
}

/// Rectangle WGS84
pub fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Geometry {
    Geometry::Polygon(geo::polygon![
        (x: min_lon, y: min_lat),
        (x: max_lon, y: min_lat),
        (x: max_lon, y: max_lat),
        (x: min_lon, y: max_lat),
        (x: min_lon, y: min_lat),
    ])
}
