use core::fmt;

/// Tolerance (degrees) used to detect an explicitly closed ring.
pub const CLOSURE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    /// Closure test only; general comparison is exact.
    pub fn almost_same(&self, other: &GeoPoint) -> bool {
        (self.latitude - other.latitude).abs() < CLOSURE_EPSILON
            && (self.longitude - other.longitude).abs() < CLOSURE_EPSILON
    }

    /// `lon,lat` at 7 decimals, the order KML and the mission format expect.
    pub fn lon_lat(&self) -> String {
        format!("{:.7},{:.7}", self.longitude, self.latitude)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "geo(lat: {:.7}, lon: {:.7})", self.latitude, self.longitude)
    }
}

impl From<GeoPoint> for geo::Coord<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Coord {
            x: p.longitude,
            y: p.latitude,
        }
    }
}
