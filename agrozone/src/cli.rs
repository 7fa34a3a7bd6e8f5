//! Définition et implémentation des commandes CLI
//!
//! - `ingest` : relevés (zip shapefile, GeoPackage) → PostGIS ou mémoire (`--dry-run`)
//! - `tile` : génère une tuile vectorielle depuis PostGIS
//! - `init-schema` : crée les tables des couches

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use futures::stream;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use agrozone::config::{MappingConfig, Settings};
use agrozone::export::export_to_geojson;
use agrozone::ingest::{IngestOutcome, Ingestor};
use agrozone::report::{IngestReport, IngestStatus};
use agrozone::store::{create_pool, test_connection, DatabaseConfig, MemoryStore, PgStore, RecordStore};
use agrozone::tiles::{MemoryTileCache, TileService};

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest survey files (zipped shapefile, GeoPackage) into PostGIS
    Ingest(IngestArgs),

    /// Render one vector tile from PostGIS
    Tile {
        /// Layer name (zones, parcels, canals, gates, pumps)
        #[arg(short, long)]
        layer: String,

        #[arg(short)]
        z: u8,

        #[arg(short)]
        x: u32,

        #[arg(short)]
        y: u32,

        /// Output file for the encoded tile (.mvt)
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Create schema, layer tables and spatial indexes
    InitSchema {
        /// Drop the schema before creating it
        #[arg(long)]
        drop: bool,

        #[command(flatten)]
        db: DbArgs,
    },
}

#[derive(Args)]
pub struct IngestArgs {
    /// Path to a survey file (.zip, .gpkg, .shp) or a directory
    #[arg(short, long)]
    pub path: PathBuf,

    /// Mapping preset name (default) or path to a JSON config
    #[arg(long, default_value = "default")]
    pub config: String,

    /// Keep records in memory instead of writing to PostGIS
    #[arg(long)]
    pub dry_run: bool,

    /// Save the ingestion report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Export normalized zones and parcels as GeoJSON into this directory
    #[arg(long)]
    pub geojson: Option<PathBuf>,

    /// Maximum number of files processed concurrently
    #[arg(long, alias = "threads")]
    pub jobs: Option<usize>,

    #[command(flatten)]
    pub db: DbArgs,
}

/// Connexion PostgreSQL (surcharge les variables d'environnement)
#[derive(Args)]
pub struct DbArgs {
    /// Target PostgreSQL schema (défaut : env AGROZONE_SCHEMA / agrozone)
    #[arg(long)]
    pub schema: Option<String>,

    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / agrozone)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

impl DbArgs {
    /// Ouvre le pool et retourne le store du schéma choisi
    async fn connect(self, settings: &Settings) -> Result<PgStore> {
        let mut db_config = DatabaseConfig::from_env();
        db_config.apply_overrides(self.host, self.database, self.user, self.password, self.port, self.ssl);
        println!(
            "Database: {}@{}:{}/{} (SSL: {:?})",
            db_config.user, db_config.host, db_config.port, db_config.dbname, db_config.ssl_mode
        );

        let pool = create_pool(&db_config).await?;
        test_connection(&pool).await?;
        println!("Connected to PostgreSQL");

        let schema = self.schema.unwrap_or_else(|| settings.schema.clone());
        Ok(PgStore::new(pool, schema))
    }
}

/// Exécute la commande ingest
pub async fn cmd_ingest(args: IngestArgs, settings: Settings) -> Result<()> {
    let start = Instant::now();
    let files = collect_sources(&args.path)?;
    if files.is_empty() {
        anyhow::bail!("No survey files (.zip, .gpkg, .shp) found in {}", args.path.display());
    }

    let jobs = args.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    let config = MappingConfig::resolve(&args.config)?;

    println!("=== Ingest ===");
    println!("Path: {}", args.path.display());
    println!("Files: {}", files.len());
    println!("Config: {}", args.config);
    println!("Jobs: {}", jobs);
    println!("Dry run: {}", args.dry_run);

    let store: Arc<dyn RecordStore> = if args.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        let store = args.db.connect(&settings).await?;
        store.init_schema(false).await?;
        Arc::new(store)
    };

    if let Some(dir) = &args.geojson {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let ingestor = Arc::new(Ingestor::new(store, config).with_scratch_root(settings.scratch_dir.clone()));
    let report = Arc::new(Mutex::new(IngestReport::new()));
    let processed = Arc::new(AtomicUsize::new(0));
    let total = files.len();
    let geojson_dir = Arc::new(args.geojson.clone());

    stream::iter(files)
        .for_each_concurrent(jobs, |file| {
            let ingestor = Arc::clone(&ingestor);
            let report = Arc::clone(&report);
            let processed = Arc::clone(&processed);
            let geojson_dir = Arc::clone(&geojson_dir);

            async move {
                match ingestor.ingest_path(&file).await {
                    Ok(outcome) => {
                        if let Some(dir) = geojson_dir.as_ref() {
                            if let Err(e) = export_outcome(&outcome, dir) {
                                warn!(file = %file.display(), error = %format!("{:#}", e), "GeoJSON export failed");
                            }
                        }
                        report.lock().await.record_outcome(&outcome);
                    }
                    Err(e) => {
                        warn!(file = %file.display(), error = %format!("{:#}", e), "File ingestion failed");
                        report
                            .lock()
                            .await
                            .record_file_failure(&file.display().to_string(), &format!("{:#}", e));
                    }
                }

                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 10 == 0 || done == total {
                    info!(processed = done, total, "Ingestion progress");
                }
            }
        })
        .await;

    let mut report = report.lock().await.clone();
    report.set_duration(start.elapsed());
    report.finalize();
    report.display();

    if let Some(path) = &args.report {
        report.save_to_file(path)?;
        println!("Report saved to {}", path.display());
    }

    info!(summary = %report.summary(), "Ingestion done");
    if report.status == IngestStatus::Failed {
        anyhow::bail!("Ingestion failed: {}", report.summary());
    }
    Ok(())
}

/// Écrit `<fichier>_zones.geojson` et `<fichier>_parcels.geojson`
fn export_outcome(outcome: &IngestOutcome, dir: &Path) -> Result<()> {
    let stem = Path::new(&outcome.source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("survey");

    let zones: Vec<_> = outcome.tables.iter().flat_map(|t| t.zones.iter().cloned()).collect();
    let parcels: Vec<_> = outcome.tables.iter().flat_map(|t| t.parcels.iter().cloned()).collect();

    if !zones.is_empty() {
        let path = dir.join(format!("{}_zones.geojson", stem));
        let n = export_to_geojson(&zones, &path)?;
        info!(path = %path.display(), features = n, "Zones exported");
    }
    if !parcels.is_empty() {
        let path = dir.join(format!("{}_parcels.geojson", stem));
        let n = export_to_geojson(&parcels, &path)?;
        info!(path = %path.display(), features = n, "Parcels exported");
    }
    Ok(())
}

/// Exécute la commande tile
pub async fn cmd_tile(
    layer: &str,
    z: u8,
    x: u32,
    y: u32,
    output: &Path,
    db: DbArgs,
    settings: Settings,
) -> Result<()> {
    let store = db.connect(&settings).await?;
    let service = TileService::new(Arc::new(store), Arc::new(MemoryTileCache::new()), settings.tiles);

    let bytes = service
        .get_tile(layer, z, x, y)
        .await
        .with_context(|| format!("Failed to render tile {}/{}/{}/{}", layer, z, x, y))?;
    std::fs::write(output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;

    if bytes.is_empty() {
        println!("Tile {}/{}/{}/{} is empty", layer, z, x, y);
    } else {
        println!("Tile {}/{}/{}/{}: {} bytes -> {}", layer, z, x, y, bytes.len(), output.display());
    }
    Ok(())
}

/// Exécute la commande init-schema
pub async fn cmd_init_schema(drop: bool, db: DbArgs, settings: Settings) -> Result<()> {
    let store = db.connect(&settings).await?;
    store.init_schema(drop).await?;
    println!("Schema {} ready", store.schema());
    Ok(())
}

/// Collecte récursivement les fichiers de relevé
fn collect_sources(path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_survey_file(path) {
            files.push(path.to_path_buf());
        }
        return Ok(files);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("Cannot read directory {}", path.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for entry_path in entries {
        if entry_path.is_dir() {
            files.extend(collect_sources(&entry_path)?);
        } else if is_survey_file(&entry_path) {
            files.push(entry_path);
        }
    }

    Ok(files)
}

fn is_survey_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(survey::SourceKind::from_file_name)
        .is_some()
}
