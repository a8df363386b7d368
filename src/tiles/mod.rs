//! Tile identities, the asynchronous tile cache and its fetch worker pool

pub mod cache;
pub mod id;
pub mod loader;
pub mod source;
pub mod stats;

// Re-exports for convenience
pub use cache::{CacheGuard, CacheStats, FailureInfo, TileCache, TileHandle, TileImage, TileState};
pub use id::{Area, TileId};
pub use loader::{HttpFetcher, TileFetcher, TileLoader};
pub use source::{tile_url, validate_source};
pub use stats::SourceStats;
