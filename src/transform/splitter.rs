//! Split placement of the tile mesh
//!
//! The vehicle's pose in the map frame is noisy. Looking it up on every
//! render tick would make the tiles shake, so it is looked up only when a new
//! fix arrives (slow path) and reduced to an anchor: the map-frame position
//! of the center tile's south-west corner. Every render tick then only asks
//! where the map frame sits in the fixed frame (fast path) and composes.

use nalgebra::{Translation3, Vector3};

use super::frames::{map_transform, FrameLookup, RigidTransform};
use crate::core::constants::MAP_FRAME;
use crate::core::geo::{tile_edge_meters, tile_index_from_geo, FractionalTileIndex, PositionFix};
use crate::{AerialMapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterState {
    Idle,
    AwaitingFix,
    AnchorComputed,
}

/// Offset of the fix from the south-west corner of its tile, in meters.
///
/// Tile rows grow southwards while the scene's y axis points north, hence
/// the flipped y fraction.
pub fn anchor_offset(index: FractionalTileIndex, edge_meters: f64) -> Vector3<f64> {
    let (fx, fy) = index.fract();
    Vector3::new(fx * edge_meters, (1.0 - fy) * edge_meters, 0.0)
}

/// Place the anchor in the fixed frame. The orientation is the map frame's.
pub fn compose(anchor: &Vector3<f64>, map_to_fixed: &RigidTransform) -> RigidTransform {
    let position = map_to_fixed.translation.vector + map_to_fixed.rotation * anchor;
    RigidTransform::from_parts(Translation3::from(position), map_to_fixed.rotation)
}

#[derive(Debug, Clone)]
pub struct FrameTransformSplitter {
    state: SplitterState,
    anchor: Option<Vector3<f64>>,
    last_placement: Option<RigidTransform>,
}

impl Default for FrameTransformSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTransformSplitter {
    pub fn new() -> Self {
        Self {
            state: SplitterState::Idle,
            anchor: None,
            last_placement: None,
        }
    }

    pub fn state(&self) -> SplitterState {
        self.state
    }

    /// Start waiting for fixes
    pub fn activate(&mut self) {
        if self.state == SplitterState::Idle {
            self.state = SplitterState::AwaitingFix;
        }
    }

    /// Slow path: recompute the anchor from a new fix.
    ///
    /// On failure the previous anchor stays in place.
    pub fn on_new_fix(
        &mut self,
        fix: &PositionFix,
        zoom: u8,
        lookup: &dyn FrameLookup,
    ) -> Result<Vector3<f64>> {
        let index = tile_index_from_geo(fix.point(), zoom)?;
        let vehicle_to_map = map_transform(lookup, &fix.frame_id, Some(fix.timestamp))?;

        let edge = tile_edge_meters(fix.latitude, zoom);
        log::debug!("Tile resolution is {:.1}m", edge);

        let anchor = vehicle_to_map.translation.vector - anchor_offset(index, edge);
        self.anchor = Some(anchor);
        self.state = SplitterState::AnchorComputed;
        Ok(anchor)
    }

    /// Fast path: where the center tile's corner sits in the fixed frame now.
    ///
    /// When the lookup fails the error is returned and the previous
    /// placement stays available through [`Self::last_placement`].
    pub fn on_render_tick(&mut self, lookup: &dyn FrameLookup) -> Result<RigidTransform> {
        let anchor = self.anchor.ok_or_else(|| {
            AerialMapError::TransformUnavailable("no position fix anchored yet".to_string())
        })?;
        let map_to_fixed = lookup.transform_to_fixed(MAP_FRAME, None)?;
        let placement = compose(&anchor, &map_to_fixed);
        self.last_placement = Some(placement);
        Ok(placement)
    }

    pub fn anchor(&self) -> Option<Vector3<f64>> {
        self.anchor
    }

    pub fn last_placement(&self) -> Option<RigidTransform> {
        self.last_placement
    }

    /// Drop the anchor and go back to idle
    pub fn reset(&mut self) {
        self.state = SplitterState::Idle;
        self.anchor = None;
        self.last_placement = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::frames::StaticFrames;
    use nalgebra::UnitQuaternion;

    fn frames() -> StaticFrames {
        StaticFrames::new("odom")
            .with(MAP_FRAME, RigidTransform::identity())
            .with("gps", RigidTransform::translation(3.0, 4.0, 0.5))
    }

    fn munich() -> PositionFix {
        PositionFix::new(48.137154, 11.576124, "gps", 12.5)
    }

    #[test]
    fn test_anchor_offset_flips_y() {
        let offset = anchor_offset(FractionalTileIndex::new(10.25, 20.75), 100.0);
        assert!((offset - Vector3::new(25.0, 25.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_state_machine() {
        let mut splitter = FrameTransformSplitter::new();
        assert_eq!(splitter.state(), SplitterState::Idle);
        splitter.activate();
        assert_eq!(splitter.state(), SplitterState::AwaitingFix);

        splitter.on_new_fix(&munich(), 16, &frames()).unwrap();
        assert_eq!(splitter.state(), SplitterState::AnchorComputed);

        splitter.reset();
        assert_eq!(splitter.state(), SplitterState::Idle);
        assert!(splitter.anchor().is_none());
    }

    #[test]
    fn test_anchor_is_tile_corner() {
        let mut splitter = FrameTransformSplitter::new();
        let fix = munich();
        let anchor = splitter.on_new_fix(&fix, 16, &frames()).unwrap();

        let index = tile_index_from_geo(fix.point(), 16).unwrap();
        let edge = tile_edge_meters(fix.latitude, 16);
        let (fx, fy) = index.fract();
        assert!((anchor.x - (3.0 - fx * edge)).abs() < 1e-9);
        assert!((anchor.y - (4.0 - (1.0 - fy) * edge)).abs() < 1e-9);
        assert!((anchor.z - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_failed_lookup_keeps_anchor() {
        let mut splitter = FrameTransformSplitter::new();
        let anchor = splitter.on_new_fix(&munich(), 16, &frames()).unwrap();

        let lost = PositionFix::new(48.2, 11.6, "lost_frame", 13.0);
        let err = splitter.on_new_fix(&lost, 16, &frames()).unwrap_err();
        assert!(matches!(err, AerialMapError::TransformUnavailable(_)));
        assert_eq!(splitter.anchor(), Some(anchor));

        let polar = PositionFix::new(89.0, 0.0, "gps", 14.0);
        assert!(matches!(
            splitter.on_new_fix(&polar, 16, &frames()),
            Err(AerialMapError::OutOfProjectionRange { .. })
        ));
        assert_eq!(splitter.anchor(), Some(anchor));
    }

    #[test]
    fn test_render_tick_without_anchor_fails() {
        let mut splitter = FrameTransformSplitter::new();
        assert!(splitter.on_render_tick(&frames()).is_err());
        assert!(splitter.last_placement().is_none());
    }

    #[test]
    fn test_render_tick_failure_keeps_last_placement() {
        let mut splitter = FrameTransformSplitter::new();
        let mut frames = frames();
        splitter.on_new_fix(&munich(), 16, &frames).unwrap();
        let placement = splitter.on_render_tick(&frames).unwrap();

        frames.remove(MAP_FRAME);
        assert!(splitter.on_render_tick(&frames).is_err());
        assert_eq!(splitter.last_placement(), Some(placement));
    }

    #[test]
    fn test_rotation_only_change_rotates_position() {
        let anchor = Vector3::new(120.0, -45.0, 2.0);
        let translation = Translation3::new(7.0, -3.0, 1.0);
        let a = RigidTransform::from_parts(translation, UnitQuaternion::identity());
        let rotation = UnitQuaternion::from_euler_angles(0.1, -0.2, 0.7);
        let b = RigidTransform::from_parts(translation, rotation);

        let pa = compose(&anchor, &a);
        let pb = compose(&anchor, &b);

        let expected = rotation * (pa.translation.vector - translation.vector);
        assert!((pb.translation.vector - translation.vector - expected).norm() < 1e-9);
        assert_eq!(pb.rotation, rotation);
    }

    #[test]
    fn test_render_tick_follows_map_frame() {
        let mut splitter = FrameTransformSplitter::new();
        let mut frames = frames();
        let anchor = splitter.on_new_fix(&munich(), 16, &frames).unwrap();

        // the map frame drifts in the fixed frame without a new fix
        frames.set(MAP_FRAME, RigidTransform::translation(1.0, 2.0, 0.0));
        let placement = splitter.on_render_tick(&frames).unwrap();
        assert!((placement.translation.vector - (anchor + Vector3::new(1.0, 2.0, 0.0))).norm() < 1e-9);
        assert_eq!(splitter.anchor(), Some(anchor));
    }
}
