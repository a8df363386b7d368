use std::fmt;
use std::sync::Arc;

use super::source::tile_url;
use crate::core::geo::{tile_index_from_geo, GeoPoint, TileIndex};
use crate::Result;

/// Identity of a single tile; the cache key.
///
/// Equality covers the source template as well, so switching tile servers
/// never reuses a tile fetched from the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileId {
    pub source: Arc<str>,
    pub index: TileIndex,
    pub zoom: u8,
}

impl TileId {
    pub fn new(source: impl Into<Arc<str>>, index: TileIndex, zoom: u8) -> Self {
        Self {
            source: source.into(),
            index,
            zoom,
        }
    }

    /// The tile containing `point` at `zoom`
    pub fn from_geo(source: impl Into<Arc<str>>, point: GeoPoint, zoom: u8) -> Result<Self> {
        let index = tile_index_from_geo(point, zoom)?.floor();
        Ok(Self::new(source, index, zoom))
    }

    /// Same source and zoom, shifted by whole tiles
    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        Self {
            source: Arc::clone(&self.source),
            index: TileIndex::new(self.index.x + dx, self.index.y + dy),
            zoom: self.zoom,
        }
    }

    pub fn url(&self) -> String {
        tile_url(&self.source, self.index, self.zoom)
    }

    pub fn is_valid(&self) -> bool {
        self.index.is_valid(self.zoom)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.index.x, self.index.y)
    }
}

/// Square neighbourhood of `(2 * radius + 1)^2` tiles around a center tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    pub center: TileId,
    pub radius: u32,
}

impl Area {
    pub fn new(center: TileId, radius: u32) -> Self {
        Self { center, radius }
    }

    /// Number of tiles along one edge of the square
    pub fn side(&self) -> u32 {
        2 * self.radius + 1
    }

    pub fn left_top(&self) -> TileIndex {
        let r = self.radius as i64;
        TileIndex::new(self.center.index.x - r, self.center.index.y - r)
    }

    pub fn right_bottom(&self) -> TileIndex {
        let r = self.radius as i64;
        TileIndex::new(self.center.index.x + r, self.center.index.y + r)
    }

    pub fn contains(&self, id: &TileId) -> bool {
        let r = self.radius as i64;
        id.zoom == self.center.zoom
            && id.source == self.center.source
            && (id.index.x - self.center.index.x).abs() <= r
            && (id.index.y - self.center.index.y).abs() <= r
    }

    /// Every slot of the square as `(dx, dy)` relative to the center, column
    /// by column (x outer, y inner). Slots may fall off the tile grid near the
    /// poles or the antimeridian.
    pub fn offsets(&self) -> impl Iterator<Item = (i64, i64)> {
        let r = self.radius as i64;
        (-r..=r).flat_map(move |dx| (-r..=r).map(move |dy| (dx, dy)))
    }

    /// Identities of the slots that exist on the tile grid
    pub fn tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.offsets()
            .map(|(dx, dy)| self.center.offset(dx, dy))
            .filter(TileId::is_valid)
    }

    /// Like [`Area::tiles`], center first and then ring by ring outwards
    pub fn tiles_by_distance(&self) -> Vec<TileId> {
        let mut tiles: Vec<TileId> = self.tiles().collect();
        tiles.sort_by_key(|id| self.ring(id));
        tiles
    }

    /// Chebyshev distance of `id` from the center tile
    pub fn ring(&self, id: &TileId) -> u32 {
        let dx = (id.index.x - self.center.index.x).unsigned_abs();
        let dy = (id.index.y - self.center.index.y).unsigned_abs();
        dx.max(dy) as u32
    }
}
