//! Configuration for the overlay and its tile loader
//!
//! All bounds checking happens here, at the boundary. The cache and the
//! transform splitter assume they are handed validated values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::constants::{MAX_BLOCKS, MAX_ZOOM};
use crate::tiles::source::validate_source;
use crate::{AerialMapError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Topic the position fixes arrive on
    pub topic: String,
    /// Tile URL template with `{x}`, `{y}` and `{z}` placeholders
    pub tile_source: String,
    pub zoom: u8,
    /// Neighbourhood radius in tiles around the center tile
    pub blocks: u32,
    /// Opacity of the tiles, 0 (invisible) to 1 (opaque)
    pub alpha: f32,
    /// Always draw the tiles behind everything else
    pub draw_behind: bool,
    pub loader: TileLoaderConfig,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            tile_source: String::new(),
            zoom: 16,
            blocks: 3,
            alpha: 0.7,
            draw_behind: false,
            loader: TileLoaderConfig::default(),
        }
    }
}

impl OverlayConfig {
    /// Reject values the core must never see.
    ///
    /// An empty tile source is accepted: the display reports it as a status
    /// instead, so the user can fill it in later.
    pub fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM {
            return Err(AerialMapError::InvalidConfig(format!(
                "zoom {} is outside 0..={}",
                self.zoom, MAX_ZOOM
            )));
        }
        if self.blocks > MAX_BLOCKS {
            return Err(AerialMapError::InvalidConfig(format!(
                "blocks {} is outside 0..={}",
                self.blocks, MAX_BLOCKS
            )));
        }
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(AerialMapError::InvalidConfig(format!(
                "alpha {} is outside 0..=1",
                self.alpha
            )));
        }
        if !self.tile_source.is_empty() {
            validate_source(&self.tile_source)?;
        }
        self.loader.validate()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Properties that differ between `self` and `new`, in a stable order
    pub fn diff(&self, new: &OverlayConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        if self.topic != new.topic {
            changes.push(ConfigChange::Topic);
        }
        if self.tile_source != new.tile_source {
            changes.push(ConfigChange::TileSource);
        }
        if self.zoom != new.zoom {
            changes.push(ConfigChange::Zoom);
        }
        if self.blocks != new.blocks {
            changes.push(ConfigChange::Blocks);
        }
        if self.alpha != new.alpha {
            changes.push(ConfigChange::Alpha);
        }
        if self.draw_behind != new.draw_behind {
            changes.push(ConfigChange::DrawBehind);
        }
        if self.loader != new.loader {
            changes.push(ConfigChange::Loader);
        }
        changes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLoaderConfig {
    /// Maximum concurrent tile downloads
    pub max_concurrent: usize,
    /// Per-request timeout; a timed out fetch completes as failed
    pub request_timeout_ms: u64,
    /// Wait before a failed tile may be requested again, doubled per failure
    pub retry_backoff_ms: u64,
    /// Upper bound for the doubled retry wait
    pub max_retry_backoff_ms: u64,
    /// Number of recent fetch outcomes kept per tile source
    pub error_window: usize,
    /// User agent sent to tile servers
    pub user_agent: String,
}

impl Default for TileLoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            request_timeout_ms: 10_000,
            retry_backoff_ms: 500,
            max_retry_backoff_ms: 30_000,
            error_window: 100,
            user_agent: concat!("aerialmap/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Unified configuration presets for TileLoaderConfig
impl TileLoaderConfig {
    pub fn low_resource() -> Self {
        Self {
            max_concurrent: 2,
            request_timeout_ms: 20_000,
            retry_backoff_ms: 2_000,
            ..Self::default()
        }
    }

    pub fn high_performance() -> Self {
        Self {
            max_concurrent: 16,
            request_timeout_ms: 5_000,
            retry_backoff_ms: 250,
            ..Self::default()
        }
    }

    pub fn for_testing() -> Self {
        Self {
            max_concurrent: 4,
            request_timeout_ms: 1_000,
            retry_backoff_ms: 0,
            max_retry_backoff_ms: 0,
            error_window: 20,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(AerialMapError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.error_window == 0 {
            return Err(AerialMapError::InvalidConfig(
                "error_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Wait required before the `retries`-th re-request of a failed tile
    pub fn retry_delay(&self, retries: u32) -> Duration {
        let multiplier = 2_u64.saturating_pow(retries.saturating_sub(1));
        let delay = self.retry_backoff_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_retry_backoff_ms))
    }
}

/// A single property change coming from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigChange {
    Alpha,
    DrawBehind,
    TileSource,
    Zoom,
    Blocks,
    Topic,
    Loader,
}

/// The work a configuration change requires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub rebuild_geometry: bool,
    pub recompute_center: bool,
    pub request_tiles: bool,
    pub repaint: bool,
    pub refresh_transform: bool,
    /// Drop every fix, tile and anchor and start over
    pub reset: bool,
}

impl UpdatePlan {
    pub fn for_change(change: ConfigChange) -> Self {
        match change {
            ConfigChange::Alpha | ConfigChange::DrawBehind => Self {
                repaint: true,
                ..Self::default()
            },
            ConfigChange::TileSource => Self {
                request_tiles: true,
                repaint: true,
                ..Self::default()
            },
            ConfigChange::Zoom => Self {
                rebuild_geometry: true,
                recompute_center: true,
                request_tiles: true,
                repaint: true,
                refresh_transform: true,
                reset: false,
            },
            ConfigChange::Blocks => Self {
                rebuild_geometry: true,
                request_tiles: true,
                repaint: true,
                ..Self::default()
            },
            // the worker pool is rebuilt, which forgets everything in flight
            ConfigChange::Topic | ConfigChange::Loader => Self {
                rebuild_geometry: true,
                recompute_center: true,
                request_tiles: true,
                repaint: true,
                refresh_transform: true,
                reset: true,
            },
        }
    }

    pub fn for_changes(changes: &[ConfigChange]) -> Self {
        changes
            .iter()
            .fold(Self::default(), |plan, change| plan.merge(Self::for_change(*change)))
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            rebuild_geometry: self.rebuild_geometry || other.rebuild_geometry,
            recompute_center: self.recompute_center || other.recompute_center,
            request_tiles: self.request_tiles || other.request_tiles,
            repaint: self.repaint || other.repaint,
            refresh_transform: self.refresh_transform || other.refresh_transform,
            reset: self.reset || other.reset,
        }
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}
