//! Benchmarks pour la lecture des relevés

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dbase::{FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};
use zip::write::SimpleFileOptions;

/// Génère une grille de parcelles UTM et la zippe (une couche par `layers`)
fn build_fixture(dir: &Path, layers: usize, per_layer: usize) -> PathBuf {
    let src = dir.join("src");
    std::fs::create_dir_all(&src).unwrap();

    for layer in 0..layers {
        let shp = src.join(format!("plots_{layer}.shp"));
        let table = TableWriterBuilder::new()
            .add_numeric_field("PARCEL_SEQ".try_into().unwrap(), 10, 0)
            .add_character_field("CROP".try_into().unwrap(), 20);
        let mut writer = shapefile::Writer::from_path(&shp, table).unwrap();

        for i in 0..per_layer {
            let x = 660_000.0 + (i % 100) as f64 * 120.0;
            let y = 1_520_000.0 + (i / 100) as f64 * 180.0 + layer as f64 * 50_000.0;
            let polygon = Polygon::new(PolygonRing::Outer(vec![
                Point::new(x, y),
                Point::new(x, y + 160.0),
                Point::new(x + 100.0, y + 160.0),
                Point::new(x + 100.0, y),
                Point::new(x, y),
            ]));
            let mut record = Record::default();
            record.insert("PARCEL_SEQ".to_string(), FieldValue::Numeric(Some(i as f64)));
            record.insert("CROP".to_string(), FieldValue::Character(Some("rice".to_string())));
            writer.write_shape_and_record(&polygon, &record).unwrap();
        }
    }

    let archive = dir.join("plots.zip");
    let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
    for entry in std::fs::read_dir(&src).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(&std::fs::read(&path).unwrap()).unwrap();
    }
    zip.finish().unwrap();
    archive
}

fn count_features(survey: &survey::Survey, table: &survey::SourceTable) -> usize {
    let mut count = 0;
    survey
        .stream(table, |f| {
            if f.is_ok() {
                count += 1;
            }
        })
        .unwrap();
    count
}

fn bench_open_zip(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_fixture(dir.path(), 1, 5_000);
    let file_size = std::fs::metadata(&archive).map(|m| m.len()).unwrap_or(0);

    let mut group = c.benchmark_group("open_zip");
    group.throughput(Throughput::Bytes(file_size));
    group.sample_size(20);

    group.bench_with_input(BenchmarkId::from_parameter("5000_plots"), &archive, |b, path| {
        b.iter(|| {
            let survey = survey::open(black_box(path)).unwrap();
            let total: usize = survey
                .tables()
                .iter()
                .map(|t| count_features(&survey, t))
                .sum();
            black_box(total)
        })
    });

    group.finish();
}

fn bench_stream_parallel(c: &mut Criterion) {
    use rayon::prelude::*;

    let dir = tempfile::tempdir().unwrap();
    let archive = build_fixture(dir.path(), 4, 2_000);
    let survey = survey::open(&archive).unwrap();

    let mut group = c.benchmark_group("stream_tables");
    group.sample_size(10);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let total: usize = survey
                .tables()
                .iter()
                .map(|t| count_features(&survey, t))
                .sum();
            black_box(total)
        })
    });

    group.bench_function("parallel", |b| {
        b.iter(|| {
            let total: usize = survey
                .tables()
                .par_iter()
                .map(|t| count_features(&survey, t))
                .sum();
            black_box(total)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_open_zip, bench_stream_parallel);
criterion_main!(benches);
