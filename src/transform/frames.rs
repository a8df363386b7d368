use nalgebra::Isometry3;

use crate::core::constants::MAP_FRAME;
use crate::Result;

/// Rotation plus translation between two frames
pub type RigidTransform = Isometry3<f64>;

/// The host's frame manager.
///
/// It only answers lookups towards its current fixed frame, so any other
/// pair of frames has to be chained through it (see [`map_transform`]).
pub trait FrameLookup {
    /// Name of the fixed (render) frame
    fn fixed_frame(&self) -> &str;

    /// Pose of `frame_id` in the fixed frame, at `stamp` seconds or the
    /// latest available when `None`.
    ///
    /// Fails with [`AerialMapError::TransformUnavailable`](crate::AerialMapError::TransformUnavailable)
    /// when the frame is unknown or there is no data for the stamp.
    fn transform_to_fixed(&self, frame_id: &str, stamp: Option<f64>) -> Result<RigidTransform>;
}

/// Pose of `query_frame` in the map frame
pub fn map_transform(
    lookup: &dyn FrameLookup,
    query_frame: &str,
    stamp: Option<f64>,
) -> Result<RigidTransform> {
    let query_to_fixed = lookup.transform_to_fixed(query_frame, stamp)?;
    let map_to_fixed = lookup.transform_to_fixed(MAP_FRAME, stamp)?;
    Ok(map_to_fixed.inverse() * query_to_fixed)
}

/// Frame manager backed by a fixed table of poses, for hosts without one
/// and for tests
#[derive(Debug, Clone)]
pub struct StaticFrames {
    fixed_frame: String,
    frames: fxhash::FxHashMap<String, RigidTransform>,
}

impl StaticFrames {
    /// Only the fixed frame itself is known, at the identity
    pub fn new(fixed_frame: impl Into<String>) -> Self {
        let fixed_frame = fixed_frame.into();
        let mut frames = fxhash::FxHashMap::default();
        frames.insert(fixed_frame.clone(), RigidTransform::identity());
        Self {
            fixed_frame,
            frames,
        }
    }

    /// Register (or move) `frame_id` with its pose in the fixed frame
    pub fn set(&mut self, frame_id: impl Into<String>, to_fixed: RigidTransform) {
        self.frames.insert(frame_id.into(), to_fixed);
    }

    pub fn remove(&mut self, frame_id: &str) -> Option<RigidTransform> {
        self.frames.remove(frame_id)
    }

    pub fn with(mut self, frame_id: impl Into<String>, to_fixed: RigidTransform) -> Self {
        self.set(frame_id, to_fixed);
        self
    }
}

impl FrameLookup for StaticFrames {
    fn fixed_frame(&self) -> &str {
        &self.fixed_frame
    }

    fn transform_to_fixed(&self, frame_id: &str, _stamp: Option<f64>) -> Result<RigidTransform> {
        self.frames.get(frame_id).copied().ok_or_else(|| {
            crate::AerialMapError::TransformUnavailable(format!(
                "Could not transform from [{}] to Fixed Frame [{}]",
                frame_id, self.fixed_frame
            ))
        })
    }
}
