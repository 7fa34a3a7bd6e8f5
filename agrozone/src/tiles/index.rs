//! Index spatial (R-tree) des features d'une couche
//!
//! L'index couvre la métatuile interrogée dans le store. Il est estampillé
//! avec la version de la couche au moment de la requête : une invalidation
//! incrémente la version et l'index devient périmé.

use geo::{BoundingRect, Rect};
use rstar::{RTree, RTreeObject, AABB};

use super::query::{TileCoord, TileFeature, TilePlan};

/// Feature indexée avec son enveloppe (lon, lat)
pub struct IndexedFeature {
    pub feature: TileFeature,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Index d'une couche pour une métatuile et une bande de zoom
pub struct LayerIndex {
    tree: RTree<IndexedFeature>,
    plan: TilePlan,
    version: u64,
}

impl LayerIndex {
    /// Construit l'index ; les features sans emprise sont ignorées
    pub fn build(plan: TilePlan, version: u64, features: Vec<TileFeature>) -> Self {
        let items: Vec<IndexedFeature> = features
            .into_iter()
            .filter_map(|feature| {
                let rect = feature.geometry.bounding_rect()?;
                Some(IndexedFeature {
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    feature,
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(items),
            plan,
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vrai si l'index peut servir le plan à la version courante
    pub fn serves(&self, plan: &TilePlan, version: u64) -> bool {
        self.version == version && self.plan.same_band(plan) && self.plan.scope.covers(&plan.coord)
    }

    /// Features dont l'enveloppe intersecte l'emprise, triées par identifiant
    pub fn query(&self, bounds: &Rect) -> Vec<&TileFeature> {
        let envelope = AABB::from_corners([bounds.min().x, bounds.min().y], [bounds.max().x, bounds.max().y]);
        let mut hits: Vec<&TileFeature> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| &item.feature)
            .collect();
        hits.sort_by_key(|f| f.id);
        hits
    }

    /// Features candidates pour une tuile, tampon de découpage inclus
    pub fn slice(&self, coord: TileCoord, extent: u32, buffer: u32) -> Vec<&TileFeature> {
        let bounds = coord.bounds();
        let dx = bounds.width() * buffer as f64 / extent.max(1) as f64;
        let dy = bounds.height() * buffer as f64 / extent.max(1) as f64;
        let buffered = Rect::new(
            geo::coord! { x: bounds.min().x - dx, y: bounds.min().y - dy },
            geo::coord! { x: bounds.max().x + dx, y: bounds.max().y + dy },
        );
        self.query(&buffered)
    }
}
