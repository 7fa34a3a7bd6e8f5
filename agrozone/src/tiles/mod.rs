//! Service de tuiles vectorielles
//!
//! `get_tile` : validation de la requête, lecture du cache, réutilisation ou
//! reconstruction de l'index de la couche, encodage MVT, écriture en cache.
//! Une tuile vide est renvoyée sous forme de zéro octet et n'est jamais cachée.

pub mod cache;
pub mod encode;
pub mod index;
pub mod query;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::TileSettings;
use crate::store::FeatureSource;

pub use cache::{MemoryTileCache, TileCache};
pub use encode::TileEncoder;
pub use index::LayerIndex;
pub use query::{Layer, TileCoord, TileError, TileFeature, TilePlan};

/// Signal de mutation des géométries d'une couche
#[async_trait]
pub trait LayerInvalidator: Send + Sync {
    async fn invalidate_layer(&self, layer: Layer);
}

/// Génération et cache des tuiles de toutes les couches
pub struct TileService {
    source: Arc<dyn FeatureSource>,
    cache: Arc<dyn TileCache>,
    encoder: TileEncoder,
    settings: TileSettings,
    versions: HashMap<Layer, AtomicU64>,
    indexes: RwLock<HashMap<Layer, Arc<LayerIndex>>>,
}

impl TileService {
    pub fn new(source: Arc<dyn FeatureSource>, cache: Arc<dyn TileCache>, settings: TileSettings) -> Self {
        Self {
            source,
            cache,
            encoder: TileEncoder::new(settings.extent, settings.buffer),
            versions: Layer::ALL.into_iter().map(|l| (l, AtomicU64::new(0))).collect(),
            indexes: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Tuile encodée pour (couche, z, x, y) ; zéro octet si aucune feature
    pub async fn get_tile(&self, layer: &str, z: u8, x: u32, y: u32) -> Result<Vec<u8>> {
        let layer: Layer = layer.parse()?;
        let coord = TileCoord::new(z, x, y)?;
        self.tile(layer, coord).await
    }

    pub async fn tile(&self, layer: Layer, coord: TileCoord) -> Result<Vec<u8>> {
        let key = coord.cache_key(layer);
        if let Some(bytes) = self.cache.get(&key).await {
            debug!(%key, bytes = bytes.len(), "Tile cache hit");
            return Ok(bytes);
        }

        let plan = TilePlan::new(layer, coord, self.settings.metatile_shift);
        let version = self.version(layer);
        let index = self.index_for(&plan, version).await?;

        let features = index.slice(coord, self.encoder.extent(), self.settings.buffer);
        let bytes = self.encoder.encode(layer, coord, features)?;

        if bytes.is_empty() {
            debug!(%key, "Empty tile");
            return Ok(bytes);
        }

        // pas d'écriture si la couche a été invalidée pendant la génération
        if self.version(layer) == version {
            self.cache
                .set(&key, bytes.clone(), self.settings.cache_ttl)
                .await;
            // invalidation survenue entre la vérification et l'écriture
            if self.version(layer) != version {
                self.cache.remove(&key).await;
                debug!(%key, "Stale tile evicted");
            }
        }
        debug!(%key, bytes = bytes.len(), "Tile generated");
        Ok(bytes)
    }

    /// Index courant de la couche ou index reconstruit depuis le store
    async fn index_for(&self, plan: &TilePlan, version: u64) -> Result<Arc<LayerIndex>> {
        if let Some(index) = self.indexes.read().await.get(&plan.layer) {
            if index.serves(plan, version) {
                return Ok(Arc::clone(index));
            }
        }

        let features = self.source.fetch(plan).await?;
        let index = Arc::new(LayerIndex::build(*plan, version, features));
        debug!(
            layer = %plan.layer,
            scope = %plan.scope,
            version,
            features = index.len(),
            "Layer index rebuilt"
        );

        self.indexes
            .write()
            .await
            .insert(plan.layer, Arc::clone(&index));
        Ok(index)
    }

    fn version(&self, layer: Layer) -> u64 {
        self.versions
            .get(&layer)
            .map(|v| v.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Invalide l'index et les tuiles cachées d'une couche
    pub async fn invalidate(&self, layer: Layer) {
        if let Some(v) = self.versions.get(&layer) {
            v.fetch_add(1, Ordering::AcqRel);
        }
        self.indexes.write().await.remove(&layer);
        let removed = self.cache.invalidate_layer(layer).await;
        info!(%layer, removed, "Layer invalidated");
    }
}

#[async_trait]
impl LayerInvalidator for TileService {
    async fn invalidate_layer(&self, layer: Layer) {
        self.invalidate(layer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::NetworkFeature;
    use crate::store::MemoryStore;
    use geo::{Geometry, Point};
    use std::sync::atomic::AtomicBool;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    /// Cache qui invalide la couche juste avant d'écrire la première tuile
    #[derive(Default)]
    struct InvalidatingCache {
        inner: MemoryTileCache,
        service: OnceLock<Weak<TileService>>,
        fired: AtomicBool,
    }

    #[async_trait]
    impl TileCache for InvalidatingCache {
        async fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
            if !self.fired.swap(true, Ordering::SeqCst) {
                if let Some(service) = self.service.get().and_then(Weak::upgrade) {
                    service.invalidate(Layer::Gates).await;
                }
            }
            self.inner.set(key, value, ttl).await;
        }

        async fn remove(&self, key: &str) {
            self.inner.remove(key).await;
        }

        async fn invalidate_layer(&self, layer: Layer) -> usize {
            self.inner.invalidate_layer(layer).await
        }
    }

    fn gate(code: &str, lon: f64, lat: f64) -> NetworkFeature {
        NetworkFeature {
            code: code.into(),
            name: Some(format!("Gate {code}")),
            kind: Some("sluice".into()),
            status: Some("open".into()),
            capacity: None,
            geometry: Geometry::Point(Point::new(lon, lat)),
        }
    }

    #[tokio::test]
    async fn test_unknown_layer() {
        let store = Arc::new(MemoryStore::new());
        let service = TileService::new(store, Arc::new(MemoryTileCache::new()), TileSettings::default());
        let err = service.get_tile("roads", 1, 0, 0).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TileError>(),
            Some(&TileError::UnknownLayer("roads".into()))
        );
        assert!(service.get_tile("gates", 1, 2, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidation_rebuilds_index() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryTileCache::new());
        let service = TileService::new(store.clone(), cache.clone(), TileSettings::default());
        let coord = TileCoord::containing(100.5, 13.7, 12).unwrap();

        store.add_network_feature(Layer::Gates, gate("G1", 100.5, 13.7)).await.unwrap();
        let first = service.tile(Layer::Gates, coord).await.unwrap();
        assert!(!first.is_empty());
        assert!(cache.contains(&coord.cache_key(Layer::Gates)).await);

        store.add_network_feature(Layer::Gates, gate("G2", 100.5001, 13.7001)).await.unwrap();
        let cached = service.tile(Layer::Gates, coord).await.unwrap();
        assert_eq!(first, cached);

        service.invalidate_layer(Layer::Gates).await;
        assert!(!cache.contains(&coord.cache_key(Layer::Gates)).await);
        let rebuilt = service.tile(Layer::Gates, coord).await.unwrap();
        assert_ne!(first, rebuilt);
    }

    #[tokio::test]
    async fn test_invalidation_during_cache_write() {
        let store = Arc::new(MemoryStore::new());
        store.add_network_feature(Layer::Gates, gate("G1", 100.5, 13.7)).await.unwrap();

        let cache = Arc::new(InvalidatingCache::default());
        let service = Arc::new(TileService::new(store, cache.clone(), TileSettings::default()));
        cache.service.set(Arc::downgrade(&service)).unwrap();

        let coord = TileCoord::containing(100.5, 13.7, 12).unwrap();
        let bytes = service.tile(Layer::Gates, coord).await.unwrap();
        assert!(!bytes.is_empty());
        assert!(cache.fired.load(Ordering::SeqCst));
        assert!(!cache.inner.contains(&coord.cache_key(Layer::Gates)).await);
    }
}
