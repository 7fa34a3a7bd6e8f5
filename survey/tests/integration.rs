//! Tests d'intégration avec des relevés construits à la volée

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use dbase::{FieldValue, Record, TableWriterBuilder};
use geo::{polygon, Geometry};
use geozero::{CoordDimensions, ToWkb};
use shapefile::{Point, Polygon, PolygonRing, Shape};
use survey::{SourceFormat, SurveyError};
use zip::write::SimpleFileOptions;

const UTM47N_PRJ: &str = r#"PROJCS["WGS_1984_UTM_Zone_47N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",99.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

fn rectangle(x: f64, y: f64, w: f64, h: f64) -> Shape {
    Shape::Polygon(Polygon::new(PolygonRing::Outer(vec![
        Point::new(x, y),
        Point::new(x, y + h),
        Point::new(x + w, y + h),
        Point::new(x + w, y),
        Point::new(x, y),
    ])))
}

/// Écrit plots.shp/.shx/.dbf/.prj dans `dir`
fn write_shapefile(dir: &Path, stem: &str, shapes: &[(Shape, i32, &str)]) -> PathBuf {
    let shp = dir.join(format!("{stem}.shp"));
    let table = TableWriterBuilder::new()
        .add_numeric_field("PARCEL_SEQ".try_into().unwrap(), 10, 0)
        .add_character_field("OWNER".try_into().unwrap(), 50);

    let mut writer = shapefile::Writer::from_path(&shp, table).unwrap();
    for (shape, seq, owner) in shapes {
        let mut record = Record::default();
        record.insert("PARCEL_SEQ".to_string(), FieldValue::Numeric(Some(f64::from(*seq))));
        record.insert("OWNER".to_string(), FieldValue::Character(Some(owner.to_string())));
        match shape {
            Shape::Polygon(p) => writer.write_shape_and_record(p, &record).unwrap(),
            Shape::Point(p) => writer.write_shape_and_record(p, &record).unwrap(),
            _ => unreachable!(),
        }
    }
    drop(writer);

    std::fs::write(dir.join(format!("{stem}.prj")), UTM47N_PRJ).unwrap();
    shp
}

fn zip_dir(src: &Path, out: &Path) {
    let mut zip = zip::ZipWriter::new(File::create(out).unwrap());
    let mut entries: Vec<_> = std::fs::read_dir(src)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    for path in entries {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        zip.start_file(format!("survey/{name}"), SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&std::fs::read(&path).unwrap()).unwrap();
    }
    zip.start_file("__MACOSX/survey/._plots.shp", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"junk").unwrap();
    zip.finish().unwrap();
}

fn gpkg_blob(geometry: &Geometry) -> Vec<u8> {
    let mut blob = vec![b'G', b'P', 0, 0b0000_0001];
    blob.extend_from_slice(&4326i32.to_le_bytes());
    blob.extend(geometry.to_wkb(CoordDimensions::xy()).unwrap());
    blob
}

fn write_geopackage(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
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
         INSERT INTO gpkg_contents VALUES ('notes', 'attributes', 'notes', NULL);
         INSERT INTO gpkg_geometry_columns VALUES ('zones', 'geom', 'GEOMETRY', 4326, 0, 0);
         CREATE TABLE zones (fid INTEGER PRIMARY KEY, geom BLOB, zone_code TEXT, name TEXT);
         CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);",
    )
    .unwrap();

    let square: Geometry = polygon![
        (x: 100.0, y: 14.0), (x: 100.01, y: 14.0), (x: 100.01, y: 14.01), (x: 100.0, y: 14.01), (x: 100.0, y: 14.0)
    ]
    .into();
    let point: Geometry = geo::Point::new(100.0, 14.0).into();

    conn.execute(
        "INSERT INTO zones (fid, geom, zone_code, name) VALUES (10, ?1, 'Z1', 'North')",
        [gpkg_blob(&square)],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO zones (fid, geom, zone_code, name) VALUES (11, ?1, 'Z2', 'Pump')",
        [gpkg_blob(&point)],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO zones (fid, geom, zone_code, name) VALUES (12, NULL, 'Z3', '  ')",
        [],
    )
    .unwrap();
}

#[test]
fn test_zipped_shapefile() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    write_shapefile(
        &src,
        "plots",
        &[
            (rectangle(660_000.0, 1_520_000.0, 100.0, 160.0), 7, "Somchai"),
            (rectangle(660_200.0, 1_520_000.0, 50.0, 50.0), 8, ""),
        ],
    );
    let archive = work.path().join("plots.zip");
    zip_dir(&src, &archive);

    let survey = survey::open(&archive).unwrap();
    let scratch = survey.scratch_path().unwrap().to_path_buf();
    assert_eq!(survey.tables().len(), 1);

    let table = &survey.tables()[0];
    assert_eq!(table.name, "plots");
    assert_eq!(table.format, SourceFormat::Shapefile);
    assert_eq!(table.spatial_ref.code, Some(32647));

    let mut features = Vec::new();
    let stats = survey
        .stream(table, |f| features.push(f.unwrap()))
        .unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.filtered, 0);

    let first = &features[0];
    assert_eq!(first.attributes["PARCEL_SEQ"], serde_json::json!(7));
    assert_eq!(first.attributes["OWNER"], serde_json::json!("Somchai"));
    assert!(matches!(first.geometry, Some(Geometry::Polygon(_))));
    assert_eq!(features[1].attributes["OWNER"], serde_json::Value::Null);

    drop(survey);
    assert!(!scratch.exists(), "scratch directory must be removed");
}

#[test]
fn test_point_shapefile_is_filtered() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    write_shapefile(
        &src,
        "pumps",
        &[(Shape::Point(Point::new(660_000.0, 1_520_000.0)), 1, "")],
    );
    let archive = work.path().join("pumps.zip");
    zip_dir(&src, &archive);

    let survey = survey::open(&archive).unwrap();
    let table = &survey.tables()[0];
    let mut delivered = 0;
    let stats = survey.stream(table, |_| delivered += 1).unwrap();

    assert_eq!(delivered, 0);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.filtered, 1);
}

#[test]
fn test_zip_without_sources() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("empty.zip");
    let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
    zip.start_file("readme.txt", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"nothing here").unwrap();
    zip.finish().unwrap();

    let err = survey::open(&archive).unwrap_err();
    assert!(matches!(err, SurveyError::NoGeometrySource(_)));
}

#[test]
fn test_geopackage() {
    let work = tempfile::tempdir().unwrap();
    let path = work.path().join("zones.gpkg");
    write_geopackage(&path);

    let survey = survey::open(&path).unwrap();
    assert!(survey.scratch_path().is_none());
    assert_eq!(survey.tables().len(), 1, "attribute tables are not feature tables");

    let table = &survey.tables()[0];
    assert_eq!(table.name, "zones");
    assert_eq!(table.spatial_ref.authority.as_deref(), Some("EPSG"));
    assert_eq!(table.spatial_ref.code, Some(4326));

    let mut features = Vec::new();
    let stats = survey
        .stream(table, |f| features.push(f.unwrap()))
        .unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.filtered, 1);

    assert_eq!(features[0].id, "10");
    assert_eq!(features[0].attributes["zone_code"], serde_json::json!("Z1"));
    assert!(!features[0].attributes.contains_key("geom"));
    assert!(features[0].geometry.is_some());

    assert_eq!(features[1].id, "12");
    assert!(features[1].geometry.is_none());
    assert_eq!(features[1].attributes["name"], serde_json::Value::Null);
}

#[test]
fn test_open_bytes_geopackage() {
    let work = tempfile::tempdir().unwrap();
    let path = work.path().join("zones.gpkg");
    write_geopackage(&path);
    let bytes = std::fs::read(&path).unwrap();

    let scratch_root = work.path().join("scratch");
    let survey = survey::open_bytes(&bytes, "upload/zones.gpkg", Some(&scratch_root)).unwrap();
    let scratch = survey.scratch_path().unwrap().to_path_buf();
    assert!(scratch.starts_with(&scratch_root));
    assert_eq!(survey.tables()[0].format, SourceFormat::GeoPackage);

    drop(survey);
    assert!(!scratch.exists());
}
