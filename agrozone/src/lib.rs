//! # agrozone
//!
//! Ingestion de relevés de zones d'irrigation et de parcelles agricoles vers
//! PostGIS, et service de tuiles vectorielles (MVT) adaptées au zoom.
//!
//! ## Features
//!
//! - Shapefile zippé et GeoPackage (crate `survey`)
//! - Résolution du CRS et reprojection vers WGS84 (UTM natif, `proj` en option)
//! - Mapping heuristique des attributs piloté par configuration JSON
//! - Surfaces en hectares et en rai, anneau dominant, centroïde
//! - Stores injectés : PostGIS (pool deadpool, COPY) ou mémoire
//! - Tuiles par couche : plan selon le zoom, R-tree, encodage MVT, cache TTL
//!
//! ## Usage CLI
//!
//! ```bash
//! # Ingestion vers PostGIS
//! agrozone ingest --path ./surveys/
//!
//! # Sans base de données, avec rapport et export GeoJSON
//! agrozone ingest --path ./parcels.zip --dry-run --report report.json --geojson ./out/
//!
//! # Une tuile
//! agrozone tile --layer parcels -z 12 -x 3191 -y 1890 --output tile.mvt
//! ```

pub mod config;
pub mod crs;
pub mod export;
pub mod hash;
pub mod ingest;
pub mod mapping;
pub mod model;
pub mod normalize;
pub mod report;
pub mod reproject;
pub mod store;
pub mod tiles;

pub use config::{MappingConfig, Settings, TileSettings};
pub use ingest::{IngestOutcome, IngestionResult, Ingestor};
pub use model::{ParcelRecord, ZoneRecord};
pub use normalize::LandArea;
pub use report::{IngestReport, IngestStatus};
pub use store::{create_pool, DatabaseConfig, MemoryStore, PgStore};
pub use tiles::{Layer, TileService};
