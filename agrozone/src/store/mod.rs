//! Persistance des enregistrements et source des features de tuiles
//!
//! Les stores sont injectés : [`postgres::PgStore`] pour PostGIS et
//! [`memory::MemoryStore`] pour les tests et le mode `--dry-run`.

pub mod memory;
pub mod pool;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{ParcelRecord, ZoneRecord};
use crate::tiles::query::{TileFeature, TilePlan};

pub use memory::MemoryStore;
pub use pool::{create_pool, test_connection, DatabaseConfig, SslMode};
pub use postgres::PgStore;

/// Écriture des enregistrements produits par l'ingestion
///
/// Les doublons (même code) sont ignorés ; le retour est le nombre de lignes
/// effectivement insérées.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_zones(&self, zones: &[ZoneRecord]) -> Result<u64>;

    async fn save_parcels(&self, parcels: &[ParcelRecord]) -> Result<u64>;

    /// Recalcule le nombre et la surface des parcelles de chaque zone
    async fn refresh_zone_statistics(&self) -> Result<u64>;
}

/// Lecture des features d'une couche dans l'emprise d'un plan
///
/// Le seuil de surface et la simplification sont appliqués par le store.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn fetch(&self, plan: &TilePlan) -> Result<Vec<TileFeature>>;
}
