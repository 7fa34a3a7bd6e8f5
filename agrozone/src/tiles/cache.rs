//! Cache des tuiles encodées

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::query::Layer;

/// Cache clé -> tuile encodée, avec expiration
#[async_trait]
pub trait TileCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    async fn remove(&self, key: &str);

    /// Supprime toutes les entrées d'une couche ; retourne le nombre d'entrées supprimées
    async fn invalidate_layer(&self, layer: Layer) -> usize;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Cache en mémoire
#[derive(Default)]
pub struct MemoryTileCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryTileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

#[async_trait]
impl TileCache for MemoryTileCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn invalidate_layer(&self, layer: Layer) -> usize {
        let prefix = format!("tile:{}:", layer);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(&prefix));
        before - entries.len()
    }
}
