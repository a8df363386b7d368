//! Host-facing adapter
//!
//! [`AerialMapDisplay`] is what a visualization host drives: it forwards
//! lifecycle hooks, property changes, position fixes and render ticks, and
//! gets [`SceneFrame`]s and a [`StatusBoard`] back. All errors are returned
//! as values and mirrored on the status board.

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{ConfigChange, OverlayConfig, UpdatePlan};
use crate::core::geo::{tile_edge_meters, PositionFix};
use crate::scene::{assemble_slots, MaterialHints, SceneFrame, SlotNamer, TileSlot};
use crate::status::{status_for_error_rate, StatusBoard, StatusCategory, StatusLevel};
use crate::tiles::cache::TileCache;
use crate::tiles::id::{Area, TileId};
use crate::tiles::loader::{HttpFetcher, TileFetcher};
use crate::transform::frames::FrameLookup;
use crate::transform::splitter::FrameTransformSplitter;
use crate::{AerialMapError, Result};

pub struct AerialMapDisplay {
    config: OverlayConfig,
    enabled: bool,
    cache: TileCache,
    fetcher: Arc<dyn TileFetcher>,
    /// The fetcher was built from `config.loader` and follows its changes
    owns_fetcher: bool,
    splitter: FrameTransformSplitter,
    status: StatusBoard,
    namer: SlotNamer,
    slot_names: Vec<String>,
    slots: Vec<TileSlot>,
    /// Fix the current center tile was derived from
    ref_fix: Option<PositionFix>,
    center: Option<TileId>,
    /// Slots need to be refilled from the cache
    dirty: bool,
}

impl AerialMapDisplay {
    /// Display fetching tiles over HTTP. Must be created inside a tokio runtime.
    pub fn new(config: OverlayConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&config.loader)?);
        let mut display = Self::with_fetcher(config, fetcher)?;
        display.owns_fetcher = true;
        Ok(display)
    }

    pub fn with_fetcher(config: OverlayConfig, fetcher: Arc<dyn TileFetcher>) -> Result<Self> {
        config.validate()?;
        let cache = TileCache::with_fetcher(config.loader.clone(), Arc::clone(&fetcher))?;
        let mut display = Self {
            config,
            enabled: false,
            cache,
            fetcher,
            owns_fetcher: false,
            splitter: FrameTransformSplitter::new(),
            status: StatusBoard::new(),
            namer: SlotNamer::new(),
            slot_names: Vec::new(),
            slots: Vec::new(),
            ref_fix: None,
            center: None,
            dirty: false,
        };
        display.clear_all();
        Ok(display)
    }

    pub fn on_enable(&mut self) {
        log::info!("Enabling aerial map on topic '{}'", self.config.topic);
        self.enabled = true;
        self.create_tile_objects();
        self.subscribe();
    }

    pub fn on_disable(&mut self) {
        log::info!("Disabling aerial map");
        self.enabled = false;
        self.clear_all();
    }

    /// Drop every fix, tile and anchor and start over
    pub fn reset(&mut self) {
        if !self.enabled {
            return;
        }
        log::info!("Resetting aerial map");
        self.clear_all();
        self.create_tile_objects();
        self.subscribe();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Validate and apply a new configuration.
    ///
    /// Only the work the changed properties require is done. Work that needs
    /// a frame lookup (a new center tile, a new anchor) happens on the next
    /// [`update`](Self::update). An invalid configuration leaves the current
    /// one in place.
    pub fn apply_config(&mut self, new: OverlayConfig) -> Result<UpdatePlan> {
        new.validate()?;
        let changes = self.config.diff(&new);
        let plan = UpdatePlan::for_changes(&changes);
        if plan.is_noop() {
            return Ok(plan);
        }
        log::debug!("Configuration changed: {:?}", changes);

        if changes.contains(&ConfigChange::Loader) {
            if self.owns_fetcher {
                self.fetcher = Arc::new(HttpFetcher::new(&new.loader)?);
            }
            self.cache = TileCache::with_fetcher(new.loader.clone(), Arc::clone(&self.fetcher))?;
        }
        if changes.contains(&ConfigChange::TileSource) {
            self.center = self
                .center
                .take()
                .map(|center| TileId::new(new.tile_source.as_str(), center.index, center.zoom));
        }
        self.config = new;

        if !self.enabled {
            return Ok(plan);
        }

        if plan.reset {
            self.reset();
            return Ok(plan);
        }
        if plan.rebuild_geometry {
            self.create_tile_objects();
        }
        if plan.recompute_center {
            // picked up again from `ref_fix` on the next update
            self.center = None;
        } else if plan.request_tiles {
            self.request_tile_textures();
        }
        if plan.repaint {
            self.dirty = true;
        }
        Ok(plan)
    }

    /// Handle a new position fix.
    ///
    /// The tiles and the anchor are only recomputed when the fix falls into a
    /// different center tile.
    pub fn on_fix(&mut self, fix: &PositionFix, lookup: &dyn FrameLookup) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let result = self.update_center_tile(fix, lookup);
        match &result {
            Err(e @ AerialMapError::OutOfProjectionRange { .. }) => {
                self.status
                    .set(StatusCategory::Message, StatusLevel::Error, e.to_string());
            }
            _ => {
                self.status
                    .set(StatusCategory::Message, StatusLevel::Ok, "NavSatFix okay");
            }
        }
        result
    }

    /// Per-frame hook. Refills the slots if needed and places them.
    ///
    /// Returns `None` until a fix has been received.
    pub fn update(&mut self, lookup: &dyn FrameLookup) -> Option<SceneFrame> {
        if !self.enabled {
            return None;
        }
        if self.center.is_none() {
            if let Some(fix) = self.ref_fix.clone() {
                if let Err(e) = self.update_center_tile(&fix, lookup) {
                    log::warn!("Could not recompute the center tile: {}", e);
                }
            }
        }
        if self.ref_fix.is_none() || self.center.is_none() {
            return None;
        }

        self.assemble_scene();
        self.transform_map_tile_to_fixed_frame(lookup);

        Some(SceneFrame {
            slots: self.slots.clone(),
            placement: self.splitter.last_placement(),
            material: MaterialHints::new(self.config.alpha, self.config.draw_behind),
        })
    }

    /// Wait until no tile is in flight; false on timeout
    pub async fn wait_for_tiles(&mut self, timeout: Duration) -> bool {
        let settled = self.cache.wait_idle(timeout).await;
        self.dirty = true;
        settled
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn splitter(&self) -> &FrameTransformSplitter {
        &self.splitter
    }

    pub fn center_tile(&self) -> Option<&TileId> {
        self.center.as_ref()
    }

    pub fn slot_names(&self) -> &[String] {
        &self.slot_names
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn subscribe(&mut self) {
        self.splitter.activate();
        if !self.config.topic.is_empty() {
            log::info!("Subscribing to {}", self.config.topic);
            self.status.set(StatusCategory::Topic, StatusLevel::Ok, "OK");
        }
    }

    fn clear_all(&mut self) {
        self.ref_fix = None;
        self.center = None;
        self.dirty = false;
        self.slots.clear();
        self.slot_names.clear();
        self.splitter.reset();
        self.cache.clear();
        self.status.set(
            StatusCategory::Message,
            StatusLevel::Warning,
            "No map received yet",
        );
    }

    fn create_tile_objects(&mut self) {
        self.slot_names = self.namer.names_for(self.config.blocks);
        self.slots.clear();
    }

    fn update_center_tile(&mut self, fix: &PositionFix, lookup: &dyn FrameLookup) -> Result<()> {
        let new_center = TileId::from_geo(self.config.tile_source.as_str(), fix.point(), self.config.zoom)?;
        if self.center.as_ref() == Some(&new_center) && self.splitter.anchor().is_some() {
            return Ok(());
        }
        log::debug!("Updating center tile to {}", new_center);

        self.center = Some(new_center);
        self.ref_fix = Some(fix.clone());
        self.request_tile_textures();
        self.transform_tile_to_map_frame(fix, lookup)
    }

    fn request_tile_textures(&mut self) {
        if !self.enabled {
            return;
        }
        if self.config.tile_source.is_empty() {
            self.status
                .set(StatusCategory::TileRequest, StatusLevel::Error, "Tile URL is not set");
            return;
        }
        let Some(center) = self.center.clone() else {
            self.status.set(
                StatusCategory::Message,
                StatusLevel::Error,
                "No NavSatFix received yet",
            );
            return;
        };

        match self.cache.request(&Area::new(center, self.config.blocks)) {
            Ok(_) => self.dirty = true,
            Err(e) => {
                self.status
                    .set(StatusCategory::TileRequest, StatusLevel::Error, e.to_string());
            }
        }
    }

    fn transform_tile_to_map_frame(&mut self, fix: &PositionFix, lookup: &dyn FrameLookup) -> Result<()> {
        if let Err(e) = self.splitter.on_new_fix(fix, self.config.zoom, lookup) {
            self.status
                .set(StatusCategory::Transform, StatusLevel::Error, e.to_string());
            return Err(e);
        }
        Ok(())
    }

    fn assemble_scene(&mut self) {
        if !self.dirty {
            return;
        }
        let (Some(center), Some(fix)) = (self.center.clone(), self.ref_fix.as_ref()) else {
            return;
        };
        self.dirty = false;

        let area = Area::new(center, self.config.blocks);
        let edge = tile_edge_meters(fix.latitude, self.config.zoom);
        let guard = self.cache.guard();
        let slots = assemble_slots(&area, &self.slot_names, edge, &guard);
        drop(guard);

        // not everything arrived yet, look again next time
        if slots.iter().any(|slot| slot.id.is_valid() && !slot.is_visible()) {
            self.dirty = true;
        }
        self.slots = slots;

        self.cache.purge(&area);
        self.check_request_error_rate();
    }

    fn check_request_error_rate(&mut self) {
        // keeps "Tile URL is not set" visible
        if self.config.tile_source.is_empty() {
            return;
        }
        let error_rate = self.cache.error_rate(&self.config.tile_source);
        self.status
            .put(StatusCategory::TileRequest, status_for_error_rate(error_rate));
    }

    fn transform_map_tile_to_fixed_frame(&mut self, lookup: &dyn FrameLookup) {
        match self.splitter.on_render_tick(lookup) {
            Ok(_) => {
                self.status
                    .set(StatusCategory::Transform, StatusLevel::Ok, "Transform OK");
            }
            Err(e) => {
                self.status
                    .set(StatusCategory::Transform, StatusLevel::Error, e.to_string());
            }
        }
    }
}
