//! Identifiants de repli dérivés de la géométrie

use blake3::Hasher;
use geo::{Geometry, LineString, Polygon};

/// Longueur (en caractères hexa) des identifiants générés
const GENERATED_ID_LEN: usize = 12;

/// Identifiant déterministe pour une feature surfacique sans code source
///
/// Même géométrie, même identifiant : un réimport du même fichier ne crée
/// pas de doublon. Le vertex de départ des anneaux n'a pas d'influence.
pub fn generated_id(geometry: &Geometry) -> String {
    let polygons: &[Polygon] = match geometry {
        Geometry::Polygon(p) => std::slice::from_ref(p),
        Geometry::MultiPolygon(mp) => &mp.0,
        _ => &[],
    };

    let mut hasher = Hasher::new();
    for polygon in polygons {
        hasher.update(b"P");
        hash_ring(&mut hasher, polygon.exterior());
        for hole in polygon.interiors() {
            hasher.update(b"H");
            hash_ring(&mut hasher, hole);
        }
    }

    let mut id = hex::encode(hasher.finalize().as_bytes());
    id.truncate(GENERATED_ID_LEN);
    format!("auto-{id}")
}

/// Coordonnées au 1e-7 degré (~1 cm), sans le point de fermeture,
/// en commençant par le plus petit vertex
fn hash_ring(hasher: &mut Hasher, ring: &LineString) {
    let mut vertices: Vec<(i64, i64)> = ring
        .0
        .iter()
        .map(|c| ((c.x * 1e7).round() as i64, (c.y * 1e7).round() as i64))
        .collect();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    if let Some(start) = vertices
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| **v)
        .map(|(i, _)| i)
    {
        vertices.rotate_left(start);
    }

    for (x, y) in vertices {
        hasher.update(&x.to_le_bytes());
        hasher.update(&y.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::MultiPolygon;

    fn square(start: usize, size: f64) -> Polygon {
        let corners = [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)];
        let mut coords: Vec<(f64, f64)> = (0..4).map(|i| corners[(start + i) % 4]).collect();
        coords.push(coords[0]);
        Polygon::new(LineString::from(coords), vec![])
    }

    #[test]
    fn test_generated_id_ignores_ring_start() {
        let id = generated_id(&Geometry::Polygon(square(0, 1.0)));
        assert_eq!(id, generated_id(&Geometry::Polygon(square(1, 1.0))));
        assert_eq!(id, generated_id(&Geometry::Polygon(square(3, 1.0))));
        assert!(id.starts_with("auto-"));
        assert_eq!(id.len(), "auto-".len() + GENERATED_ID_LEN);
    }

    #[test]
    fn test_generated_id_differs_by_shape() {
        let small = generated_id(&Geometry::Polygon(square(0, 1.0)));
        let large = generated_id(&Geometry::Polygon(square(0, 2.0)));
        assert_ne!(small, large);

        let multi = Geometry::MultiPolygon(MultiPolygon::new(vec![square(0, 1.0), square(0, 2.0)]));
        assert_ne!(generated_id(&multi), small);
    }
}
