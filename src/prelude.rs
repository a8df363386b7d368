//! Prelude module for common aerialmap types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use aerialmap::prelude::*;`

pub use crate::core::{
    config::{ConfigChange, OverlayConfig, TileLoaderConfig, UpdatePlan},
    constants::{MAP_FRAME, MAX_BLOCKS, MAX_ZOOM, TILE_SIZE},
    geo::{
        ground_resolution, tile_edge_meters, tile_index_from_geo, FractionalTileIndex, GeoPoint,
        PositionFix, TileIndex,
    },
};

pub use crate::tiles::{
    cache::{CacheGuard, CacheStats, TileCache, TileHandle, TileImage, TileState},
    id::{Area, TileId},
    loader::{HttpFetcher, TileFetcher},
};

pub use crate::transform::{
    frames::{FrameLookup, RigidTransform, StaticFrames},
    splitter::{FrameTransformSplitter, SplitterState},
};

pub use crate::display::AerialMapDisplay;
pub use crate::scene::{MaterialHints, SceneFrame, TileSlot};
pub use crate::status::{StatusBoard, StatusCategory, StatusLevel};

pub use crate::runtime::{runtime, spawn, AsyncHandle, AsyncSpawner};

pub use crate::{Error as AerialMapError, Result};

pub use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

pub use futures::Future;
