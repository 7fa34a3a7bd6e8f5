//! Projection UTM (Universal Transverse Mercator) sur l'ellipsoïde WGS84
//!
//! Séries de Snyder, directe et inverse. Précision millimétrique dans la
//! bande de la zone.

use super::ellipsoid::WGS84;

/// Facteur d'échelle sur le méridien central
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Longitude du méridien central d'une zone, en radians
fn central_meridian(zone: u32) -> f64 {
    (f64::from(zone) * 6.0 - 183.0).to_radians()
}

/// Arc de méridien depuis l'équateur jusqu'à la latitude `phi`
fn meridian_arc(phi: f64) -> f64 {
    let e2 = WGS84::E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    WGS84::A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// UTM (mètres) vers WGS84 (degrés, `(lon, lat)`)
pub fn utm_to_geographic(x: f64, y: f64, zone: u32, south: bool) -> (f64, f64) {
    let a = WGS84::A;
    let e2 = WGS84::E2;
    let ep2 = WGS84::EP2;

    let x = x - FALSE_EASTING;
    let y = if south { y - FALSE_NORTHING_SOUTH } else { y };

    // Latitude de pied
    let m = y / K0;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let n1 = a / (1.0 - e2 * sin_phi1.powi(2)).sqrt();
    let t1 = tan_phi1.powi(2);
    let c1 = ep2 * cos_phi1.powi(2);
    let r1 = a * (1.0 - e2) / (1.0 - e2 * sin_phi1.powi(2)).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2) - 252.0 * ep2 - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);

    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// WGS84 (degrés) vers UTM (mètres, `(x, y)`)
pub fn geographic_to_utm(lon: f64, lat: f64, zone: u32, south: bool) -> (f64, f64) {
    let a = WGS84::A;
    let e2 = WGS84::E2;
    let ep2 = WGS84::EP2;

    let phi = lat.to_radians();
    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = a / (1.0 - e2 * sin_phi.powi(2)).sqrt();
    let t = tan_phi.powi(2);
    let c = ep2 * cos_phi.powi(2);
    let big_a = cos_phi * (lon.to_radians() - central_meridian(zone));
    let m = meridian_arc(phi);

    let x = K0
        * n
        * (big_a
            + (1.0 - t + c) * big_a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t.powi(2) + 72.0 * c - 58.0 * ep2) * big_a.powi(5) / 120.0)
        + FALSE_EASTING;

    let y = K0
        * (m + n
            * tan_phi
            * (big_a.powi(2) / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c.powi(2)) * big_a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t.powi(2) + 600.0 * c - 330.0 * ep2) * big_a.powi(6) / 720.0));

    let y = if south { y + FALSE_NORTHING_SOUTH } else { y };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bangkok_zone_47() {
        // Bangkok, UTM 47N : environ 662 000 / 1 520 000
        let (lon, lat) = utm_to_geographic(662_000.0, 1_520_000.0, 47, false);
        assert!((lon - 100.5).abs() < 0.1, "lon={}", lon);
        assert!((lat - 13.75).abs() < 0.1, "lat={}", lat);
    }

    #[test]
    fn test_central_meridian_on_false_easting() {
        let (x, _) = geographic_to_utm(99.0, 15.0, 47, false);
        assert!((x - 500_000.0).abs() < 1e-6);
        let (x, _) = geographic_to_utm(105.0, 15.0, 48, false);
        assert!((x - 500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_geographic() {
        for (lon, lat, zone) in [(100.52, 13.75, 47), (98.98, 18.79, 47), (102.8, 16.4, 48), (104.85, 15.23, 48)] {
            let (x, y) = geographic_to_utm(lon, lat, zone, false);
            let (lon2, lat2) = utm_to_geographic(x, y, zone, false);
            assert!((lon - lon2).abs() < 1e-6, "lon {} -> {}", lon, lon2);
            assert!((lat - lat2).abs() < 1e-6, "lat {} -> {}", lat, lat2);
        }
    }

    #[test]
    fn test_round_trip_projected() {
        let (lon, lat) = utm_to_geographic(660_000.0, 1_520_000.0, 47, false);
        let (x, y) = geographic_to_utm(lon, lat, 47, false);
        assert!((x - 660_000.0).abs() < 0.1, "x={}", x);
        assert!((y - 1_520_000.0).abs() < 0.1, "y={}", y);
    }

    #[test]
    fn test_southern_hemisphere() {
        let (x, y) = geographic_to_utm(100.0, -5.0, 47, true);
        let (lon, lat) = utm_to_geographic(x, y, 47, true);
        assert!((lon - 100.0).abs() < 1e-6);
        assert!((lat + 5.0).abs() < 1e-6);
    }
}
