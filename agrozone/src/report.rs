//! Rapport d'ingestion avec graceful degradation
//!
//! Collecte les compteurs par table et les erreurs (lecture, feature,
//! persistance) d'une ou plusieurs ingestions, puis les affiche ou les
//! sauvegarde en JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::ingest::{IngestOutcome, IngestionResult};
use crate::normalize::LandArea;

/// Statut global de l'ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestStatus {
    Success,
    /// Des enregistrements ont été écrits malgré des erreurs
    PartialSuccess,
    Failed,
}

/// Niveau de sévérité des erreurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorLevel {
    /// Fichier illisible
    Fatal,
    /// Table ou lot non persisté
    Error,
    /// Features écartées
    Warning,
}

/// Erreur d'ingestion avec contexte
#[derive(Debug, Clone, Serialize)]
pub struct IngestError {
    pub level: ErrorLevel,
    /// Fichier source
    pub source: Option<String>,
    /// Table concernée
    pub table: Option<String>,
    pub message: String,
}

/// Compteurs d'une table
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableStats {
    pub source: String,
    pub format: String,
    pub projection: String,
    pub reprojector: String,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub filtered: usize,
    pub zones: usize,
    pub parcels: usize,
    pub area: LandArea,
}

impl TableStats {
    fn from_result(source: &str, result: &IngestionResult) -> Self {
        let area = result
            .zones
            .iter()
            .map(|z| z.area)
            .chain(result.parcels.iter().map(|p| p.area))
            .sum();
        Self {
            source: source.to_string(),
            format: result.format.as_str().to_string(),
            projection: result.projection.clone(),
            reprojector: result.reprojector.to_string(),
            total: result.total,
            processed: result.processed,
            failed: result.failed,
            skipped: result.skipped,
            filtered: result.filtered,
            zones: result.zones.len(),
            parcels: result.parcels.len(),
            area,
        }
    }
}

/// Rapport complet d'ingestion
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub duration_secs: f64,
    pub status: IngestStatus,

    pub files_processed: usize,
    pub files_failed: usize,
    pub features_total: usize,
    pub features_processed: usize,
    pub features_failed: usize,
    pub features_skipped: usize,
    pub zones_saved: u64,
    pub parcels_saved: u64,

    /// Statistiques par table (clé `fichier/table`)
    pub by_table: BTreeMap<String, TableStats>,

    pub errors: Vec<IngestError>,
}

impl Default for IngestReport {
    fn default() -> Self {
        Self {
            duration_secs: 0.0,
            status: IngestStatus::Success,
            files_processed: 0,
            files_failed: 0,
            features_total: 0,
            features_processed: 0,
            features_failed: 0,
            features_skipped: 0,
            zones_saved: 0,
            parcels_saved: 0,
            by_table: BTreeMap::new(),
            errors: Vec::new(),
        }
    }
}

impl IngestReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intègre le bilan d'un fichier
    pub fn record_outcome(&mut self, outcome: &IngestOutcome) {
        self.files_processed += 1;
        self.zones_saved += outcome.zones_saved;
        self.parcels_saved += outcome.parcels_saved;

        for table in &outcome.tables {
            self.features_total += table.total;
            self.features_processed += table.processed;
            self.features_failed += table.failed;
            self.features_skipped += table.skipped;

            if let Some(error) = &table.error {
                self.errors.push(IngestError {
                    level: ErrorLevel::Error,
                    source: Some(outcome.source.clone()),
                    table: Some(table.table.clone()),
                    message: error.clone(),
                });
            }
            if table.failed > 0 {
                self.errors.push(IngestError {
                    level: ErrorLevel::Warning,
                    source: Some(outcome.source.clone()),
                    table: Some(table.table.clone()),
                    message: format!("{} features failed", table.failed),
                });
            }

            self.by_table.insert(
                format!("{}/{}", outcome.source, table.table),
                TableStats::from_result(&outcome.source, table),
            );
        }

        for message in &outcome.errors {
            self.errors.push(IngestError {
                level: ErrorLevel::Error,
                source: Some(outcome.source.clone()),
                table: None,
                message: message.clone(),
            });
        }
    }

    /// Enregistre un fichier illisible
    pub fn record_file_failure(&mut self, source: &str, message: &str) {
        self.files_processed += 1;
        self.files_failed += 1;
        self.errors.push(IngestError {
            level: ErrorLevel::Fatal,
            source: Some(source.to_string()),
            table: None,
            message: message.to_string(),
        });
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        let has_errors = self
            .errors
            .iter()
            .any(|e| matches!(e.level, ErrorLevel::Fatal | ErrorLevel::Error));
        let has_success = self.zones_saved > 0 || self.parcels_saved > 0 || self.features_processed > 0;

        self.status = if has_errors && has_success {
            IngestStatus::PartialSuccess
        } else if has_errors || (self.files_processed > 0 && self.files_failed == self.files_processed) {
            IngestStatus::Failed
        } else {
            IngestStatus::Success
        };
    }

    /// Surface cumulée des enregistrements produits
    pub fn total_area(&self) -> LandArea {
        self.by_table.values().map(|t| t.area).sum()
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("INGESTION REPORT");
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!(
            "Files: {} processed, {} failed",
            self.files_processed, self.files_failed
        );
        println!(
            "Features: {} read, {} processed, {} failed, {} skipped",
            self.features_total, self.features_processed, self.features_failed, self.features_skipped
        );
        let area = self.total_area();
        println!(
            "Saved: {} zones, {} parcels ({:.2} ha, {:.2} rai)",
            self.zones_saved,
            self.parcels_saved,
            area.hectares(),
            area.rai()
        );

        if !self.by_table.is_empty() {
            println!("\n--- BY TABLE ---");
            for (name, stats) in &self.by_table {
                println!(
                    "  {} [{}, {} via {}]: {} zones, {} parcels, {} failed, {} skipped, {} filtered",
                    name,
                    stats.format,
                    stats.projection,
                    stats.reprojector,
                    stats.zones,
                    stats.parcels,
                    stats.failed,
                    stats.skipped,
                    stats.filtered
                );
            }
        }

        if !self.errors.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.errors.len());
            for e in self.errors.iter().take(20) {
                let location = match (&e.source, &e.table) {
                    (Some(s), Some(t)) => format!("[{}:{}]", s, t),
                    (Some(s), None) => format!("[{}]", s),
                    (None, Some(t)) => format!("[{}]", t),
                    _ => String::new(),
                };
                println!("  {:?} {} {}", e.level, location, e.message);
            }
            if self.errors.len() > 20 {
                println!("  ... and {} more", self.errors.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{} files: {} zones, {} parcels, {} failed features, {} errors",
            self.files_processed,
            self.zones_saved,
            self.parcels_saved,
            self.features_failed,
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use survey::SourceFormat;

    fn table(name: &str, processed: usize, failed: usize) -> IngestionResult {
        IngestionResult {
            table: name.to_string(),
            format: SourceFormat::Shapefile,
            projection: "EPSG:32647".to_string(),
            reprojector: "utm",
            total: processed + failed,
            processed,
            failed,
            skipped: 0,
            filtered: 0,
            zones: Vec::new(),
            parcels: Vec::new(),
            error: None,
        }
    }

    fn outcome(tables: Vec<IngestionResult>, parcels_saved: u64, errors: Vec<String>) -> IngestOutcome {
        IngestOutcome {
            source: "survey.zip".to_string(),
            tables,
            zones_saved: 0,
            parcels_saved,
            errors,
        }
    }

    #[test]
    fn test_report_default() {
        let report = IngestReport::default();
        assert_eq!(report.status, IngestStatus::Success);
        assert_eq!(report.files_processed, 0);
        assert_eq!(report.total_area(), LandArea::default());
    }

    #[test]
    fn test_record_outcome() {
        let mut report = IngestReport::new();
        report.record_outcome(&outcome(vec![table("parcels", 8, 2), table("zones", 1, 0)], 8, Vec::new()));

        assert_eq!(report.features_total, 11);
        assert_eq!(report.features_processed, 9);
        assert_eq!(report.features_failed, 2);
        assert_eq!(report.by_table.len(), 2);
        assert!(report.by_table.contains_key("survey.zip/parcels"));
        // échecs de features : warning seulement
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].level, ErrorLevel::Warning);

        report.finalize();
        assert_eq!(report.status, IngestStatus::Success);
    }

    #[test]
    fn test_finalize_partial_success() {
        let mut report = IngestReport::new();
        report.record_outcome(&outcome(
            vec![table("parcels", 5, 0)],
            5,
            vec!["zones: failed to save 1 zones: connection reset".to_string()],
        ));
        report.finalize();
        assert_eq!(report.status, IngestStatus::PartialSuccess);
    }

    #[test]
    fn test_finalize_failed() {
        let mut report = IngestReport::new();
        report.record_file_failure("broken.zip", "No shapefile found");
        report.finalize();

        assert_eq!(report.status, IngestStatus::Failed);
        assert_eq!(report.errors[0].level, ErrorLevel::Fatal);
    }

    #[test]
    fn test_summary() {
        let mut report = IngestReport::new();
        report.record_outcome(&outcome(vec![table("parcels", 3, 0)], 3, Vec::new()));

        let summary = report.summary();
        assert!(summary.contains("1 files"));
        assert!(summary.contains("3 parcels"));
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = IngestReport::new();
        report.record_outcome(&outcome(vec![table("parcels", 1, 0)], 1, Vec::new()));
        report.finalize();
        report.save_to_file(&path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "Success");
        assert_eq!(json["parcels_saved"], 1);
    }
}
