//! Store en mémoire
//!
//! Reproduit la sémantique du store PostGIS (doublons ignorés, seuil de
//! surface, simplification) pour le mode `--dry-run` et les tests.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use geo::{Geometry, Intersects, Simplify};
use tokio::sync::RwLock;

use super::{FeatureSource, RecordStore};
use crate::model::{ParcelRecord, ZoneRecord, ZoneStatistics};
use crate::normalize::{geodesic_area, LandArea};
use crate::tiles::query::{Layer, TileFeature, TilePlan};

/// Élément d'un réseau d'irrigation (canal, vanne, station de pompage)
#[derive(Debug, Clone)]
pub struct NetworkFeature {
    pub code: String,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub capacity: Option<f64>,
    pub geometry: Geometry,
}

#[derive(Default)]
struct Tables {
    zones: Vec<(u64, ZoneRecord)>,
    parcels: Vec<(u64, ParcelRecord)>,
    network: Vec<(u64, Layer, NetworkFeature)>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store en mémoire, partageable entre tâches
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute un canal, une vanne ou une station de pompage
    pub async fn add_network_feature(&self, layer: Layer, feature: NetworkFeature) -> Result<u64> {
        if layer.is_polygonal() {
            anyhow::bail!("Layer {} does not hold network features", layer);
        }
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        tables.network.push((id, layer, feature));
        Ok(id)
    }

    pub async fn zones(&self) -> Vec<ZoneRecord> {
        let tables = self.tables.read().await;
        tables.zones.iter().map(|(_, z)| z.clone()).collect()
    }

    pub async fn parcels(&self) -> Vec<ParcelRecord> {
        let tables = self.tables.read().await;
        tables.parcels.iter().map(|(_, p)| p.clone()).collect()
    }

    /// Remplace la géométrie d'une parcelle (mutation externe)
    pub async fn update_parcel_geometry(&self, zone_code: &str, code: &str, geometry: Geometry) -> bool {
        let mut tables = self.tables.write().await;
        match tables
            .parcels
            .iter_mut()
            .find(|(_, p)| p.zone_code == zone_code && p.code == code)
        {
            Some((_, parcel)) => {
                parcel.geometry = geometry;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_zones(&self, zones: &[ZoneRecord]) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut known: HashSet<String> = tables.zones.iter().map(|(_, z)| z.code.clone()).collect();
        let mut inserted = 0;
        for zone in zones {
            if known.insert(zone.code.clone()) {
                let id = tables.next_id();
                tables.zones.push((id, zone.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn save_parcels(&self, parcels: &[ParcelRecord]) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut known: HashSet<(String, String)> = tables
            .parcels
            .iter()
            .map(|(_, p)| (p.zone_code.clone(), p.code.clone()))
            .collect();
        let mut inserted = 0;
        for parcel in parcels {
            if known.insert((parcel.zone_code.clone(), parcel.code.clone())) {
                let id = tables.next_id();
                tables.parcels.push((id, parcel.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn refresh_zone_statistics(&self) -> Result<u64> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let mut updated = 0;
        for (_, zone) in tables.zones.iter_mut() {
            let members = tables.parcels.iter().filter(|(_, p)| p.zone_code == zone.code);
            let (count, area) = members.fold((0u64, LandArea::default()), |(n, a), (_, p)| (n + 1, a + p.area));
            zone.statistics = ZoneStatistics {
                parcel_count: count,
                parcel_area: area,
            };
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl FeatureSource for MemoryStore {
    async fn fetch(&self, plan: &TilePlan) -> Result<Vec<TileFeature>> {
        let tables = self.tables.read().await;
        let scope = plan.scope_bounds();
        let keep = |geometry: &Geometry| -> bool {
            if !geometry.intersects(&scope) {
                return false;
            }
            match plan.min_area {
                Some(min) => geodesic_area(geometry) >= min,
                None => true,
            }
        };

        let mut features: Vec<TileFeature> = match plan.layer {
            Layer::Zones => tables
                .zones
                .iter()
                .filter(|(_, z)| keep(&z.geometry))
                .map(|(id, z)| {
                    TileFeature::new(*id, simplified(&z.geometry, plan.tolerance))
                        .with_text("code", Some(z.code.as_str()))
                        .with_text("name", z.name.as_deref())
                        .with_number("area", Some(z.area.hectares()))
                        .with_text("type", z.classification.as_deref())
                        .with_text("status", z.status.as_deref())
                })
                .collect(),
            Layer::Parcels => tables
                .parcels
                .iter()
                .filter(|(_, p)| keep(&p.geometry))
                .map(|(id, p)| {
                    TileFeature::new(*id, simplified(&p.geometry, plan.tolerance))
                        .with_integer("id", *id as i64)
                        .with_text("code", Some(p.code.as_str()))
                        .with_number("area", Some(p.area.hectares()))
                        .with_text("crop", p.crop_type.as_deref())
                        .with_text("farmer", p.owner_name.as_deref())
                })
                .collect(),
            layer => tables
                .network
                .iter()
                .filter(|(_, l, f)| *l == layer && keep(&f.geometry))
                .map(|(id, _, f)| network_feature(layer, *id, f, plan.tolerance))
                .collect(),
        };

        features.sort_by_key(|f| f.id);
        Ok(features)
    }
}

fn network_feature(layer: Layer, id: u64, f: &NetworkFeature, tolerance: f64) -> TileFeature {
    let feature = TileFeature::new(id, simplified(&f.geometry, tolerance))
        .with_integer("id", id as i64)
        .with_text("code", Some(f.code.as_str()))
        .with_text("name", f.name.as_deref())
        .with_text("type", f.kind.as_deref());
    if layer == Layer::Canals {
        feature.with_number("capacity", f.capacity)
    } else {
        feature.with_text("status", f.status.as_deref())
    }
}

/// Simplification Douglas-Peucker ; les anneaux dégénérés sont filtrés à l'encodage
fn simplified(geometry: &Geometry, tolerance: f64) -> Geometry {
    if tolerance <= 0.0 {
        return geometry.clone();
    }
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&tolerance)),
        other => other.clone(),
    }
}
