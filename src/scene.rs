//! What the overlay hands to the renderer
//!
//! The overlay never touches a scene graph. It produces a [`SceneFrame`]
//! describing one textured quad per tile slot, laid out in the tile frame:
//! the center tile's south-west corner is the origin, x points east and y
//! points north.

use crate::core::constants::OPAQUE_ALPHA;
use crate::tiles::cache::{CacheGuard, TileHandle};
use crate::tiles::id::{Area, TileId};
use crate::transform::frames::RigidTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Replace,
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderQueue {
    /// Drawn before everything else
    Background,
    Main,
}

/// How the tile material should be configured
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialHints {
    pub alpha: f32,
    pub blend: BlendMode,
    pub depth_write: bool,
    pub render_queue: RenderQueue,
}

impl MaterialHints {
    pub fn new(alpha: f32, draw_behind: bool) -> Self {
        let (blend, depth_write) = if alpha >= OPAQUE_ALPHA {
            (BlendMode::Replace, !draw_behind)
        } else {
            (BlendMode::Alpha, false)
        };
        let render_queue = if draw_behind {
            RenderQueue::Background
        } else {
            RenderQueue::Main
        };
        Self {
            alpha,
            blend,
            depth_write,
            render_queue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: [f64; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
}

/// One cell of the tile grid
#[derive(Debug, Clone)]
pub struct TileSlot {
    /// Stable renderer object name
    pub name: String,
    pub id: TileId,
    /// Offset from the center tile, in tile columns/rows
    pub dx: i64,
    pub dy: i64,
    /// South-west corner in the tile frame, meters
    pub position: (f64, f64),
    pub edge_meters: f64,
    /// `None` keeps the slot invisible
    pub image: Option<TileHandle>,
}

impl TileSlot {
    pub fn is_visible(&self) -> bool {
        self.image.is_some()
    }

    /// Two triangles covering the slot, with v flipped to match the y flip
    /// of the layout.
    pub fn quad(&self) -> [Vertex; 6] {
        let (x, y) = self.position;
        let e = self.edge_meters;
        let vertex = |px: f64, py: f64, u: f32, v: f32| Vertex {
            position: [px, py, 0.0],
            uv: [u, v],
            normal: [0.0, 0.0, 1.0],
        };
        [
            vertex(x, y, 0.0, 0.0),
            vertex(x + e, y + e, 1.0, 1.0),
            vertex(x, y + e, 0.0, 1.0),
            vertex(x, y, 0.0, 0.0),
            vertex(x + e, y, 1.0, 0.0),
            vertex(x + e, y + e, 1.0, 1.0),
        ]
    }
}

/// Everything the renderer needs for one overlay update
#[derive(Debug, Clone)]
pub struct SceneFrame {
    pub slots: Vec<TileSlot>,
    /// Pose of the tile frame in the fixed frame; `None` before the first
    /// successful transform
    pub placement: Option<RigidTransform>,
    pub material: MaterialHints,
}

impl SceneFrame {
    pub fn visible_slots(&self) -> impl Iterator<Item = &TileSlot> {
        self.slots.iter().filter(|slot| slot.is_visible())
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(TileSlot::is_visible)
    }
}

/// Fill the slots of `area` from the cache.
///
/// `names` holds one name per slot in [`Area::offsets`] order. Tiles that
/// are not ready leave their slot empty rather than showing stale content.
pub fn assemble_slots(
    area: &Area,
    names: &[String],
    edge_meters: f64,
    guard: &CacheGuard<'_>,
) -> Vec<TileSlot> {
    area.offsets()
        .zip(names)
        .map(|((dx, dy), name)| {
            let id = area.center.offset(dx, dy);
            let image = guard.ready(&id).cloned();
            TileSlot {
                name: name.clone(),
                dx,
                dy,
                // tile rows grow southwards, scene y grows northwards
                position: (dx as f64 * edge_meters, -(dy as f64) * edge_meters),
                edge_meters,
                image,
                id,
            }
        })
        .collect()
}

/// Hands out unique renderer object names for one display
#[derive(Debug, Default)]
pub struct SlotNamer {
    next: u64,
}

impl SlotNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&mut self) -> String {
        let name = format!("satellite_object_{}", self.next);
        self.next += 1;
        name
    }

    /// Names for a full grid of `radius`
    pub fn names_for(&mut self, radius: u32) -> Vec<String> {
        let side = (2 * radius + 1) as usize;
        (0..side * side).map(|_| self.next_name()).collect()
    }
}
