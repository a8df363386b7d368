use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::constants::{EARTH_RADIUS, MAX_LATITUDE, PROJECTION_LIMIT, TILE_SIZE};
use crate::{AerialMapError, Result};

/// A geographical coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Checks that the point can be projected with Web Mercator
    pub fn is_projectable(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= PROJECTION_LIMIT
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A position fix as delivered by the upstream transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Frame the fix was measured in (rigidly attached to the vehicle)
    pub frame_id: String,
    /// Seconds since the epoch of the transport's clock
    pub timestamp: f64,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, frame_id: impl Into<String>, timestamp: f64) -> Self {
        Self {
            latitude,
            longitude,
            frame_id: frame_id.into(),
            timestamp,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Integer tile grid coordinates at some zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    pub x: i64,
    pub y: i64,
}

impl TileIndex {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Checks if the index addresses a tile that exists at `zoom`
    pub fn is_valid(&self, zoom: u8) -> bool {
        let n = tiles_per_axis(zoom);
        (0..n).contains(&self.x) && (0..n).contains(&self.y)
    }
}

/// Tile grid coordinates before flooring, carrying the sub-tile position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FractionalTileIndex {
    pub x: f64,
    pub y: f64,
}

impl FractionalTileIndex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// The tile containing this position
    pub fn floor(&self) -> TileIndex {
        TileIndex::new(self.x.floor() as i64, self.y.floor() as i64)
    }

    /// Position inside the containing tile, both axes in `[0, 1)`
    pub fn fract(&self) -> (f64, f64) {
        (self.x - self.x.floor(), self.y - self.y.floor())
    }
}

/// Number of tiles along one axis at `zoom`, saturating at `i64::MAX` for
/// zoom levels no tile server uses
pub fn tiles_per_axis(zoom: u8) -> i64 {
    if zoom >= 63 {
        i64::MAX
    } else {
        1_i64 << zoom
    }
}

/// Forward spherical Web Mercator projection into tile units at `zoom`.
///
/// Both axes of the result lie in `[0, 2^zoom)`; `y` grows southwards like
/// the tile servers' row order.
pub fn tile_index_from_geo(point: GeoPoint, zoom: u8) -> Result<FractionalTileIndex> {
    if !point.is_projectable() {
        return Err(AerialMapError::OutOfProjectionRange {
            latitude: point.latitude,
            longitude: point.longitude,
        });
    }

    let n = tiles_per_axis(zoom) as f64;
    // Clamping again keeps tan() away from its poles once the degrees are
    // converted, even for inputs sitting exactly on the boundary.
    let lat_rad = point.latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();

    let mut x = (point.longitude + 180.0) / 360.0 * n;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;

    // longitude +180 is the same meridian as -180
    if x >= n {
        x -= n;
    }
    let upper = n - n * f64::EPSILON;
    Ok(FractionalTileIndex::new(x.clamp(0.0, upper), y.clamp(0.0, upper)))
}

/// Inverse projection of a (fractional) tile position back to degrees
pub fn geo_from_tile_index(index: FractionalTileIndex, zoom: u8) -> GeoPoint {
    let n = tiles_per_axis(zoom) as f64;
    let longitude = index.x / n * 360.0 - 180.0;
    let latitude = (PI * (1.0 - 2.0 * index.y / n)).sinh().atan().to_degrees();
    GeoPoint::new(latitude, longitude)
}

/// Ground resolution in meters per pixel at `latitude` (degrees) and `zoom`
pub fn ground_resolution(latitude: f64, zoom: u8) -> f64 {
    let circumference = 2.0 * PI * EARTH_RADIUS * latitude.to_radians().cos();
    circumference / (TILE_SIZE as f64 * tiles_per_axis(zoom) as f64)
}

/// Edge length of one tile in meters.
///
/// Mercator stretches with latitude, so this has to be recomputed whenever
/// the reference latitude or the zoom changes.
pub fn tile_edge_meters(latitude: f64, zoom: u8) -> f64 {
    ground_resolution(latitude, zoom) * TILE_SIZE as f64
}
