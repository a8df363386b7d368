//! # aerialmap
//!
//! Overlay of georeferenced raster tiles onto a 3D scene that is anchored to a
//! moving vehicle.
//!
//! The crate is split the same way the overlay pipeline is:
//!
//! - [`core`]: Web Mercator projection math, constants and configuration.
//! - [`tiles`]: tile identities, the asynchronous [`TileCache`] and its
//!   bounded fetch worker pool.
//! - [`transform`]: the split frame transform that keeps pose jitter out of
//!   the rendered tile mesh.
//! - [`display`]: the host-facing adapter that wires fixes, configuration,
//!   the cache and the transform together and emits [`SceneFrame`]s.

pub mod core;
pub mod display;
pub mod prelude;
pub mod runtime;
pub mod scene;
pub mod status;
pub mod tiles;
pub mod transform;
pub use crate::core::constants;

// Re-export public API
pub use core::{
    config::{ConfigChange, OverlayConfig, TileLoaderConfig, UpdatePlan},
    geo::{FractionalTileIndex, GeoPoint, PositionFix, TileIndex},
};

pub use tiles::{
    cache::{CacheGuard, CacheStats, TileCache, TileHandle, TileImage, TileState},
    id::{Area, TileId},
    loader::{HttpFetcher, TileFetcher},
};

pub use transform::{
    frames::{FrameLookup, RigidTransform, StaticFrames},
    splitter::{FrameTransformSplitter, SplitterState},
};

pub use display::AerialMapDisplay;
pub use scene::{MaterialHints, SceneFrame, TileSlot};
pub use status::{Status, StatusBoard, StatusCategory, StatusLevel};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, AerialMapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum AerialMapError {
    #[error("Coordinate ({latitude}, {longitude}) is outside the Web Mercator range")]
    OutOfProjectionRange { latitude: f64, longitude: f64 },

    #[error("Invalid tile source: {0}")]
    InvalidSource(String),

    #[error("Tile fetch failed: {0}")]
    FetchFailed(String),

    #[error("Tile decode failed: {0}")]
    DecodeFailed(String),

    #[error("Transform unavailable: {0}")]
    TransformUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Error type alias for convenience
pub type Error = AerialMapError;

/// Install `env_logger` as the `log` backend, honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
