//! Traitement d'une table source
//!
//! Par feature : lecture, reprojection, classification, mapping des
//! attributs, normalisation. Chaque feature aboutit à exactement un état :
//! traitée, en échec ou ignorée (sans géométrie).

use anyhow::Result;
use geo::Geometry;
use survey::{Attributes, SourceFeature, SourceFormat, SourceTable, StreamStats, Survey, SurveyError};
use tracing::{debug, info, warn};

use crate::crs;
use crate::mapping::{AttributeMapper, FeatureKind};
use crate::model::{ParcelRecord, ZoneRecord, ZoneStatistics};
use crate::normalize::{normalize_parcel, normalize_zone};
use crate::reproject::SmartReprojector;

/// Résultat de l'ingestion d'une table
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub table: String,
    pub format: SourceFormat,
    /// Projection source résolue
    pub projection: String,
    pub reprojector: &'static str,
    /// Features lues, filtrées comprises
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// Features sans géométrie
    pub skipped: usize,
    /// Features écartées car non surfaciques
    pub filtered: usize,
    pub zones: Vec<ZoneRecord>,
    pub parcels: Vec<ParcelRecord>,
    /// Erreur fatale pour la table (lecture interrompue)
    pub error: Option<String>,
}

impl IngestionResult {
    fn new(table: &SourceTable, projection: String, reprojector: &'static str) -> Self {
        Self {
            table: table.name.clone(),
            format: table.format,
            projection,
            reprojector,
            total: 0,
            processed: 0,
            failed: 0,
            skipped: 0,
            filtered: 0,
            zones: Vec::new(),
            parcels: Vec::new(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Enregistrement produit par une feature
enum Record {
    Zone(ZoneRecord),
    Parcel(ParcelRecord),
}

/// Lit et transforme toutes les features d'une table
pub fn process_table(survey: &Survey, table: &SourceTable, mapper: &AttributeMapper<'_>) -> IngestionResult {
    let projection = crs::resolve(&table.spatial_ref);
    let reprojector = match SmartReprojector::new(&projection) {
        Ok(r) => r,
        Err(e) => {
            warn!(table = %table.name, projection = %projection, error = %e, "No reprojector available, keeping source coordinates");
            SmartReprojector::Identity
        }
    };
    debug!(
        table = %table.name,
        projection = %projection,
        reprojector = reprojector.description(),
        "Projection resolved"
    );

    let mut result = IngestionResult::new(table, projection.to_string(), reprojector.description());

    let stats = survey.stream(table, |item| {
        result.total += 1;
        let feature = match item {
            Ok(f) => f,
            Err(e) => {
                warn!(table = %table.name, error = %e, "Unreadable feature");
                result.failed += 1;
                return;
            }
        };

        let SourceFeature {
            id,
            geometry,
            attributes,
        } = feature;
        let Some(geometry) = geometry else {
            debug!(table = %table.name, feature = %id, "Feature without geometry skipped");
            result.skipped += 1;
            return;
        };

        match build_record(&table.name, &id, attributes, geometry, &reprojector, mapper) {
            Ok(Record::Zone(zone)) => {
                result.zones.push(zone);
                result.processed += 1;
            }
            Ok(Record::Parcel(parcel)) => {
                result.parcels.push(parcel);
                result.processed += 1;
            }
            Err(e) => {
                warn!(table = %table.name, feature = %id, error = %e, "Feature failed");
                result.failed += 1;
            }
        }
    });

    close_stream(&mut result, stats);

    info!(
        table = %result.table,
        total = result.total,
        processed = result.processed,
        failed = result.failed,
        skipped = result.skipped,
        filtered = result.filtered,
        zones = result.zones.len(),
        parcels = result.parcels.len(),
        "Table ingested"
    );
    result
}

/// Clôture la lecture d'une table ; une lecture interrompue n'enregistre rien
fn close_stream(result: &mut IngestionResult, stats: Result<StreamStats, SurveyError>) {
    match stats {
        Ok(stats) => {
            result.filtered = stats.filtered;
            result.total += stats.filtered;
        }
        Err(e) => {
            let discarded = result.zones.len() + result.parcels.len();
            warn!(table = %result.table, error = %e, discarded, "Table read failed, records discarded");
            result.zones.clear();
            result.parcels.clear();
            result.error = Some(if discarded > 0 {
                format!("{e} ({discarded} records read before the failure were not saved)")
            } else {
                e.to_string()
            });
        }
    }
}

fn build_record(
    table_name: &str,
    feature_id: &str,
    attributes: Attributes,
    geometry: Geometry,
    reprojector: &SmartReprojector,
    mapper: &AttributeMapper<'_>,
) -> Result<Record> {
    let geometry = reprojector.reproject_or_keep(feature_id, geometry);

    match mapper.classify(table_name, &attributes) {
        FeatureKind::Zone => {
            let shape = normalize_zone(&geometry)?;
            let mapped = mapper.map_zone(&attributes, &shape.geometry);
            Ok(Record::Zone(ZoneRecord {
                code: mapped.code,
                name: mapped.name,
                classification: mapped.classification,
                status: mapped.status,
                area: shape.area,
                centroid: shape.centroid,
                geometry: shape.geometry,
                attributes: mapped.extended,
                statistics: ZoneStatistics::default(),
                source_table: table_name.to_string(),
            }))
        }
        FeatureKind::Parcel => {
            let shape = normalize_parcel(&geometry)?;
            let mapped = mapper.map_parcel(&attributes, &shape.geometry);
            Ok(Record::Parcel(ParcelRecord {
                code: mapped.code,
                zone_code: mapped.zone_code,
                owner_name: mapped.owner_name,
                owner_id: mapped.owner_id,
                crop_type: mapped.crop_type,
                area: shape.area,
                centroid: shape.centroid,
                geometry: shape.geometry,
                attributes: mapped.extended,
                agronomy: mapped.agronomy,
                source_table: table_name.to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgronomyMeasurements;
    use geo::polygon;

    fn partial_result() -> IngestionResult {
        let shape = normalize_parcel(&Geometry::Polygon(polygon![
            (x: 100.0, y: 14.0), (x: 100.001, y: 14.0), (x: 100.001, y: 14.001), (x: 100.0, y: 14.0)
        ]))
        .unwrap();
        IngestionResult {
            table: "plots".into(),
            format: SourceFormat::GeoPackage,
            projection: "EPSG:4326".into(),
            reprojector: "identity",
            total: 2,
            processed: 1,
            failed: 1,
            skipped: 0,
            filtered: 0,
            zones: Vec::new(),
            parcels: vec![ParcelRecord {
                code: "7".into(),
                zone_code: "3".into(),
                owner_name: None,
                owner_id: None,
                crop_type: None,
                area: shape.area,
                centroid: shape.centroid,
                geometry: shape.geometry,
                attributes: Attributes::new(),
                agronomy: AgronomyMeasurements::default(),
                source_table: "plots".into(),
            }],
            error: None,
        }
    }

    #[test]
    fn test_interrupted_table_saves_nothing() {
        let mut result = partial_result();
        close_stream(&mut result, Err(SurveyError::parse_error("plots", "cursor lost")));

        assert!(result.is_failed());
        assert!(result.parcels.is_empty());
        let error = result.error.unwrap();
        assert!(error.contains("cursor lost"));
        assert!(error.contains("1 records read before the failure were not saved"));
    }

    #[test]
    fn test_completed_table_counts_filtered() {
        let mut result = partial_result();
        close_stream(&mut result, Ok(StreamStats { delivered: 2, filtered: 3 }));

        assert!(!result.is_failed());
        assert_eq!(result.parcels.len(), 1);
        assert_eq!((result.total, result.filtered), (5, 3));
    }
}
