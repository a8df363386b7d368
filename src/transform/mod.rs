pub mod frames;
pub mod splitter;

pub use frames::{map_transform, FrameLookup, RigidTransform, StaticFrames};
pub use splitter::{anchor_offset, compose, FrameTransformSplitter, SplitterState};
