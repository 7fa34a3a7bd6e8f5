//! Orchestration de l'ingestion
//!
//! Le fichier est ouvert et lu dans une tâche bloquante ; les tables d'un même
//! conteneur sont traitées en parallèle (rayon). La persistance est un lot
//! unique par table et par type d'enregistrement : un échec d'écriture est
//! consigné sans interrompre les autres tables.

mod table;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::MappingConfig;
use crate::mapping::AttributeMapper;
use crate::store::RecordStore;
use crate::tiles::{Layer, LayerInvalidator};

pub use table::{process_table, IngestionResult};

/// Bilan d'une ingestion
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Nom du fichier source
    pub source: String,
    pub tables: Vec<IngestionResult>,
    pub zones_saved: u64,
    pub parcels_saved: u64,
    /// Erreurs de persistance, lisibles
    pub errors: Vec<String>,
}

impl IngestOutcome {
    pub fn processed(&self) -> usize {
        self.tables.iter().map(|t| t.processed).sum()
    }

    pub fn failed(&self) -> usize {
        self.tables.iter().map(|t| t.failed).sum()
    }
}

/// Pipeline d'ingestion : lecture, normalisation, persistance
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    config: Arc<MappingConfig>,
    invalidator: Option<Arc<dyn LayerInvalidator>>,
    scratch_root: Option<PathBuf>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RecordStore>, config: MappingConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            invalidator: None,
            scratch_root: None,
        }
    }

    /// Couches à invalider après écriture
    pub fn with_invalidator(mut self, invalidator: Arc<dyn LayerInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Racine des répertoires d'extraction
    pub fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    /// Ingère un fichier reçu en mémoire (`.zip` ou `.gpkg`)
    pub async fn ingest_bytes(&self, bytes: Vec<u8>, file_name: &str) -> Result<IngestOutcome> {
        let config = Arc::clone(&self.config);
        let scratch_root = self.scratch_root.clone();
        let name = file_name.to_string();

        let tables = tokio::task::spawn_blocking(move || -> Result<Vec<IngestionResult>> {
            let survey = survey::open_bytes(&bytes, &name, scratch_root.as_deref())
                .with_context(|| format!("Failed to open upload {}", name))?;
            Ok(read_survey(&survey, &config))
        })
        .await
        .context("Ingestion task failed")??;

        self.persist(file_name, tables).await
    }

    /// Ingère un fichier sur disque (`.zip`, `.gpkg` ou `.shp`)
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestOutcome> {
        let config = Arc::clone(&self.config);
        let scratch_root = self.scratch_root.clone();
        let owned = path.to_path_buf();

        let tables = tokio::task::spawn_blocking(move || -> Result<Vec<IngestionResult>> {
            let survey = survey::open_in(&owned, scratch_root.as_deref())
                .with_context(|| format!("Failed to open {}", owned.display()))?;
            Ok(read_survey(&survey, &config))
        })
        .await
        .context("Ingestion task failed")??;

        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        self.persist(&source, tables).await
    }

    async fn persist(&self, source: &str, tables: Vec<IngestionResult>) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome {
            source: source.to_string(),
            ..Default::default()
        };

        // zones d'abord : les statistiques portent sur les parcelles déjà rattachées
        for table in tables.iter().filter(|t| !t.zones.is_empty()) {
            match self.store.save_zones(&table.zones).await {
                Ok(n) => outcome.zones_saved += n,
                Err(e) => outcome.errors.push(format!(
                    "{}: failed to save {} zones: {:#}",
                    table.table,
                    table.zones.len(),
                    e
                )),
            }
        }
        for table in tables.iter().filter(|t| !t.parcels.is_empty()) {
            match self.store.save_parcels(&table.parcels).await {
                Ok(n) => outcome.parcels_saved += n,
                Err(e) => outcome.errors.push(format!(
                    "{}: failed to save {} parcels: {:#}",
                    table.table,
                    table.parcels.len(),
                    e
                )),
            }
        }

        if outcome.zones_saved > 0 || outcome.parcels_saved > 0 {
            if let Err(e) = self.store.refresh_zone_statistics().await {
                outcome
                    .errors
                    .push(format!("failed to refresh zone statistics: {:#}", e));
            }
        }

        if let Some(invalidator) = &self.invalidator {
            if outcome.zones_saved > 0 {
                invalidator.invalidate_layer(Layer::Zones).await;
            }
            if outcome.parcels_saved > 0 {
                invalidator.invalidate_layer(Layer::Parcels).await;
            }
        }

        for error in &outcome.errors {
            warn!(source, error = %error, "Persistence error");
        }
        info!(
            source,
            tables = tables.len(),
            zones = outcome.zones_saved,
            parcels = outcome.parcels_saved,
            errors = outcome.errors.len(),
            "Ingestion finished"
        );

        outcome.tables = tables;
        Ok(outcome)
    }
}

/// Traite toutes les tables d'un relevé en parallèle
fn read_survey(survey: &survey::Survey, config: &MappingConfig) -> Vec<IngestionResult> {
    let mapper = AttributeMapper::new(config);
    survey
        .tables()
        .par_iter()
        .map(|table| process_table(survey, table, &mapper))
        .collect()
}
