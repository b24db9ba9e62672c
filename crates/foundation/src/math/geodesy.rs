//! WGS84 ellipsoid: placing `[lon, lat, alt]` coordinates in Earth-centered,
//! Earth-fixed space.

use super::Vec3;

/// Semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Semi-minor axis (meters).
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
/// First eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Geodetic position in radians and meters.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Geodetic {
    pub lat_rad: f64,
    pub lon_rad: f64,
    pub alt_m: f64,
}

impl Geodetic {
    pub fn new(lat_rad: f64, lon_rad: f64, alt_m: f64) -> Self {
        Self {
            lat_rad,
            lon_rad,
            alt_m,
        }
    }

    /// From `[lon_deg, lat_deg, alt_m]`, the coordinate order of vector features.
    pub fn from_lon_lat_deg(coord: [f64; 3]) -> Self {
        Self::new(coord[1].to_radians(), coord[0].to_radians(), coord[2])
    }

    pub fn to_lon_lat_deg(self) -> [f64; 3] {
        [self.lon_rad.to_degrees(), self.lat_rad.to_degrees(), self.alt_m]
    }

    /// Earth-centered, Earth-fixed position in meters.
    pub fn to_ecef(self) -> Vec3 {
        let (sin_lat, cos_lat) = self.lat_rad.sin_cos();
        let (sin_lon, cos_lon) = self.lon_rad.sin_cos();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        Vec3::new(
            (n + self.alt_m) * cos_lat * cos_lon,
            (n + self.alt_m) * cos_lat * sin_lon,
            (n * (1.0 - WGS84_E2) + self.alt_m) * sin_lat,
        )
    }

    /// Point reached by travelling `distance_m` along `bearing_rad` (clockwise
    /// from north) on a sphere of radius [`WGS84_A`]. Altitude is kept.
    pub fn destination(self, bearing_rad: f64, distance_m: f64) -> Geodetic {
        let delta = distance_m / WGS84_A;
        let (sin_lat, cos_lat) = self.lat_rad.sin_cos();
        let (sin_d, cos_d) = delta.sin_cos();

        let lat = (sin_lat * cos_d + cos_lat * sin_d * bearing_rad.cos()).asin();
        let lon = self.lon_rad
            + (bearing_rad.sin() * sin_d * cos_lat).atan2(cos_d - sin_lat * lat.sin());
        Geodetic::new(lat, lon, self.alt_m)
    }
}

/// Outward normal of the ellipsoid scaled through `p`.
pub fn surface_normal(p: Vec3) -> Vec3 {
    let a2 = WGS84_A * WGS84_A;
    let b2 = WGS84_B * WGS84_B;
    Vec3::new(p.x / a2, p.y / a2, p.z / b2).normalize()
}
