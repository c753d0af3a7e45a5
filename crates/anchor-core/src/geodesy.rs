//! WGS84 ellipsoid conversions and local East-North-Up (ENU) tangent frames.
//!
//! Geodetic coordinates are degrees/meters; ECEF and ENU are meters.

use serde::{Deserialize, Serialize};

use crate::{Mat3, Real, Vec3};

/// WGS84 semi-major axis in meters.
pub const WGS84_A: Real = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: Real = 1.0 / 298.257_223_563;

fn wgs84_e2() -> Real {
    WGS84_F * (2.0 - WGS84_F)
}

/// Latitude/longitude in degrees and ellipsoidal height in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub lat_deg: Real,
    pub lon_deg: Real,
    pub alt_m: Real,
}

impl Geodetic {
    pub fn new(lat_deg: Real, lon_deg: Real, alt_m: Real) -> Self {
        Self {
            lat_deg,
            lon_deg,
            alt_m,
        }
    }

    /// True when all components are finite and lat/lon lie in their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat_deg.is_finite()
            && self.lon_deg.is_finite()
            && self.alt_m.is_finite()
            && self.lat_deg.abs() <= 90.0
            && self.lon_deg.abs() <= 180.0
    }

    pub fn to_ecef(&self) -> Vec3 {
        geodetic_to_ecef(self)
    }
}

/// Convert geodetic coordinates to Earth-Centered Earth-Fixed (ECEF).
pub fn geodetic_to_ecef(g: &Geodetic) -> Vec3 {
    let lat = g.lat_deg.to_radians();
    let lon = g.lon_deg.to_radians();
    let e2 = wgs84_e2();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    Vec3::new(
        (n + g.alt_m) * cos_lat * cos_lon,
        (n + g.alt_m) * cos_lat * sin_lon,
        (n * (1.0 - e2) + g.alt_m) * sin_lat,
    )
}

/// Rotation taking ECEF offsets into the ENU basis at the given latitude/longitude.
pub fn ecef_to_enu_rotation(lat_deg: Real, lon_deg: Real) -> Mat3 {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    Mat3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    )
}

/// A local tangent-plane frame anchored at a geodetic origin.
#[derive(Debug, Clone, Copy)]
pub struct EnuFrame {
    origin: Geodetic,
    origin_ecef: Vec3,
    rotation: Mat3,
}

impl EnuFrame {
    pub fn new(origin: Geodetic) -> Self {
        Self {
            origin,
            origin_ecef: geodetic_to_ecef(&origin),
            rotation: ecef_to_enu_rotation(origin.lat_deg, origin.lon_deg),
        }
    }

    pub fn origin(&self) -> Geodetic {
        self.origin
    }

    pub fn ecef_to_enu(&self, ecef: &Vec3) -> Vec3 {
        self.rotation * (ecef - self.origin_ecef)
    }

    pub fn geodetic_to_enu(&self, g: &Geodetic) -> Vec3 {
        self.ecef_to_enu(&geodetic_to_ecef(g))
    }
}
