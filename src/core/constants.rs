//! Core constants shared by the projection math, the cache and the display.
//! Keeping them in a single place makes it easier to tweak overlay-wide magic numbers.

/// Equatorial radius of the WGS84 ellipsoid, used as the sphere radius by
/// spherical Web Mercator.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Latitude where Web Mercator maps to the edge of the square world.
pub const MAX_LATITUDE: f64 = 85.0511287798;

/// Largest accepted latitude magnitude, the usual 5-decimal rounding of
/// [`MAX_LATITUDE`]. Inputs between the two are clamped onto the edge row.
pub const PROJECTION_LIMIT: f64 = 85.05113;

/// Highest zoom level accepted by the configuration boundary.
pub const MAX_ZOOM: u8 = 19;

/// Largest neighbourhood radius (in tiles) accepted by the configuration boundary.
pub const MAX_BLOCKS: u32 = 8;

/// Name of the ENU frame the tiles are rigidly attached to.
pub const MAP_FRAME: &str = "map";

/// Error rate above which tile reception is reported as broken.
pub const ERROR_RATE_ERROR_THRESHOLD: f64 = 0.95;

/// Error rate above which the source is suspected of throttling.
pub const ERROR_RATE_WARN_THRESHOLD: f64 = 0.3;

/// Alpha at or above which tiles are drawn fully opaque.
pub const OPAQUE_ALPHA: f32 = 0.9998;
