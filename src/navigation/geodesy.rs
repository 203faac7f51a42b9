// navigation/geodesy.rs

// Bridge between WGS-84 geographic coordinates and the local planning frame.
// The origin is projected with the Universal Transverse Mercator projection
// (USGS series expansion) and every later conversion is forced into the
// origin's zone, so the local frame stays continuous across zone borders.
// Local x points east, local y points north, both in meters.

use serde::{Deserialize, Serialize};

use super::NavigationError;
use super::geometry::Point;

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Geographic position in decimal degrees
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint { latitude, longitude }
    }

    fn validate(&self) -> Result<(), NavigationError> {
        let valid = self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-80.0..=84.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude);
        if valid {
            Ok(())
        } else {
            Err(NavigationError::InvalidCoordinate(format!(
                "lat={}, lon={} outside the UTM domain",
                self.latitude, self.longitude
            )))
        }
    }
}

/// Easting/northing pair in a fixed UTM zone
#[derive(Clone, Copy, Debug, PartialEq)]
struct UtmCoordinate {
    easting: f64,
    northing: f64,
}

/// UTM projection anchored at a local origin.
#[derive(Clone, Debug, PartialEq)]
pub struct UtmProjection {
    origin: GeoPoint,
    zone: u8,
    northern: bool,
    origin_utm: UtmCoordinate,
}

impl UtmProjection {
    /// Anchors the local frame at `origin`.
    pub fn new(origin: GeoPoint) -> Result<Self, NavigationError> {
        origin.validate()?;
        let zone = zone_for_longitude(origin.longitude);
        let northern = origin.latitude >= 0.0;
        let origin_utm = forward(&origin, zone, northern);
        Ok(UtmProjection {
            origin,
            zone,
            northern,
            origin_utm,
        })
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn is_northern(&self) -> bool {
        self.northern
    }

    /// Geographic → local meters relative to the origin.
    pub fn to_local(&self, point: GeoPoint) -> Result<Point, NavigationError> {
        point.validate()?;
        let utm = forward(&point, self.zone, self.northern);
        Ok(Point::new(
            utm.easting - self.origin_utm.easting,
            utm.northing - self.origin_utm.northing,
        ))
    }

    /// Local meters relative to the origin → geographic.
    pub fn to_geo(&self, point: &Point) -> Result<GeoPoint, NavigationError> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(NavigationError::InvalidCoordinate(format!(
                "local point ({}, {}) is not finite",
                point.x, point.y
            )));
        }
        let utm = UtmCoordinate {
            easting: self.origin_utm.easting + point.x,
            northing: self.origin_utm.northing + point.y,
        };
        Ok(inverse(&utm, self.zone, self.northern))
    }
}

fn zone_for_longitude(longitude: f64) -> u8 {
    (((longitude + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8
}

fn central_meridian(zone: u8) -> f64 {
    (f64::from(zone) - 1.0) * 6.0 - 180.0 + 3.0
}

fn eccentricity_squared() -> f64 {
    FLATTENING * (2.0 - FLATTENING)
}

// Meridional arc length from the equator to latitude `phi`.
fn meridian_arc(phi: f64) -> f64 {
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    SEMI_MAJOR_AXIS
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn forward(point: &GeoPoint, zone: u8, northern: bool) -> UtmCoordinate {
    let e2 = eccentricity_squared();
    let ep2 = e2 / (1.0 - e2);

    let phi = point.latitude.to_radians();
    let lambda = point.longitude.to_radians();
    let lambda0 = central_meridian(zone).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let n = SEMI_MAJOR_AXIS / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lambda - lambda0);
    let m = meridian_arc(phi);

    let easting = SCALE_FACTOR
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + FALSE_EASTING;

    let mut northing = SCALE_FACTOR
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if !northern {
        northing += FALSE_NORTHING_SOUTH;
    }

    UtmCoordinate { easting, northing }
}

fn inverse(utm: &UtmCoordinate, zone: u8, northern: bool) -> GeoPoint {
    let e2 = eccentricity_squared();
    let ep2 = e2 / (1.0 - e2);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let root = (1.0 - e2).sqrt();
    let e1 = (1.0 - root) / (1.0 + root);

    let northing = if northern { utm.northing } else { utm.northing - FALSE_NORTHING_SOUTH };
    let m = northing / SCALE_FACTOR;
    let mu = m / (SEMI_MAJOR_AXIS * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    // Footprint latitude
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = SEMI_MAJOR_AXIS / denom.sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let r1 = SEMI_MAJOR_AXIS * (1.0 - e2) / denom.powf(1.5);
    let d = (utm.easting - FALSE_EASTING) / (n1 * SCALE_FACTOR);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lambda = central_meridian(zone).to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5) / 120.0)
            / cos_phi1;

    GeoPoint::new(phi.to_degrees(), lambda.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-180.0, 1)]
    #[case(32.8597, 36)]
    #[case(-122.4194, 10)]
    #[case(180.0, 60)]
    fn zone_from_longitude(#[case] longitude: f64, #[case] zone: u8) {
        assert_eq!(zone_for_longitude(longitude), zone);
    }

    #[test]
    fn known_easting_northing() {
        // Central meridian of zone 31 at the equator
        let utm = forward(&GeoPoint::new(0.0, 3.0), 31, true);
        assert!((utm.easting - 500_000.0).abs() < 1e-6);
        assert!(utm.northing.abs() < 1e-6);
    }

    #[rstest]
    #[case(39.9334, 32.8597)]
    #[case(-33.8688, 151.2093)]
    #[case(51.4779, -0.0015)]
    fn local_round_trip(#[case] latitude: f64, #[case] longitude: f64) {
        let projection = UtmProjection::new(GeoPoint::new(latitude, longitude)).unwrap();
        let local = Point::new(120.0, -45.0);
        let geo = projection.to_geo(&local).unwrap();
        let back = projection.to_local(geo).unwrap();
        assert!((back.x - local.x).abs() < 1e-3, "x {} vs {}", back.x, local.x);
        assert!((back.y - local.y).abs() < 1e-3, "y {} vs {}", back.y, local.y);
    }

    #[test]
    fn north_is_positive_y() {
        let projection = UtmProjection::new(GeoPoint::new(39.9334, 32.8597)).unwrap();
        let local = projection.to_local(GeoPoint::new(39.9344, 32.8597)).unwrap();
        assert!(local.y > 110.0 && local.y < 112.0, "y = {}", local.y);
        assert!(local.x.abs() < 1.0);
    }

    #[test]
    fn rejects_polar_latitude() {
        assert!(matches!(
            UtmProjection::new(GeoPoint::new(89.0, 0.0)),
            Err(NavigationError::InvalidCoordinate(_))
        ));
    }
}
