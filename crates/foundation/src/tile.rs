//! Tile addressing and conversion between tile indices and projected extents.
//!
//! Tiles follow the XYZ scheme over the EPSG:3857 square: `x` grows east from
//! the antimeridian, `y` grows south from the top edge of the projection.
//!
//! Boundary policy: every tile is half-open, covering `[x_min, x_max)` and
//! `(y_min, y_max]` of its extent. A dataset edge that lies exactly on a tile
//! boundary therefore never pulls in the neighbouring tile it only touches,
//! and `extent_to_tile_range(tile_to_extent(t), t.zoom)` is exactly `t`.
//! Zero-width extents sitting on a boundary resolve to the tile east/south of
//! that boundary.

use std::fmt;

use crate::bounds::Extent;

/// Half the side of the EPSG:3857 square, in metres.
pub const HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Full side of the EPSG:3857 square, in metres.
pub const FULL_EXTENT: f64 = HALF_EXTENT * 2.0;

/// SRID of the projection every extent in this crate is expressed in.
pub const WEB_MERCATOR_SRID: i32 = 3857;

/// Highest zoom whose indices still fit in a `u32`.
pub const MAX_ZOOM: u8 = 30;

/// Distance (metres) under which an edge is considered to sit on a tile boundary.
/// Absorbs the rounding left by `x * width - HALF_EXTENT` at every supported zoom.
const EDGE_TOLERANCE_M: f64 = 1e-4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileAddress {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// True when `x` and `y` are inside the `2^zoom` grid.
    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_ZOOM
            && u64::from(self.x) < tiles_per_axis(self.zoom)
            && u64::from(self.y) < tiles_per_axis(self.zoom)
    }

    pub fn extent(&self) -> Extent {
        tile_to_extent(self.zoom, self.x, self.y)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Inclusive range of tile indices at one zoom level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileRange {
    pub fn columns(&self) -> u64 {
        u64::from(self.x_max - self.x_min) + 1
    }

    pub fn rows(&self) -> u64 {
        u64::from(self.y_max - self.y_min) + 1
    }

    /// Number of tiles covered: `(x_max - x_min + 1) * (y_max - y_min + 1)`.
    pub fn tile_count(&self) -> u64 {
        self.columns() * self.rows()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.x_min..=self.x_max).contains(&x) && (self.y_min..=self.y_max).contains(&y)
    }

    pub fn xs(&self) -> std::ops::RangeInclusive<u32> {
        self.x_min..=self.x_max
    }

    pub fn ys(&self) -> std::ops::RangeInclusive<u32> {
        self.y_min..=self.y_max
    }

    /// Row-major over `x` then `y`, matching job enumeration order.
    pub fn addresses(&self) -> impl Iterator<Item = TileAddress> + '_ {
        let zoom = self.zoom;
        self.xs()
            .flat_map(move |x| self.ys().map(move |y| TileAddress::new(zoom, x, y)))
    }
}

/// `2^zoom`, saturating at `u64::MAX` for zooms past 63.
pub fn tiles_per_axis(zoom: u8) -> u64 {
    1u64.checked_shl(u32::from(zoom)).unwrap_or(u64::MAX)
}

/// Side length of one tile at `zoom`, in metres.
pub fn tile_width(zoom: u8) -> f64 {
    FULL_EXTENT / 2f64.powi(i32::from(zoom))
}

pub fn tile_to_extent(zoom: u8, x: u32, y: u32) -> Extent {
    let width = tile_width(zoom);
    let (x, y) = (f64::from(x), f64::from(y));

    Extent {
        x_min: x * width - HALF_EXTENT,
        y_min: HALF_EXTENT - (y + 1.0) * width,
        x_max: (x + 1.0) * width - HALF_EXTENT,
        y_max: HALF_EXTENT - y * width,
    }
}

/// Tiles covering `extent` at `zoom`, clamped to the `2^zoom` grid.
///
/// Uses the half-open boundary policy described in the module docs.
/// Indices that do not fit a `u32` (zoom 32 and deeper) saturate.
pub fn extent_to_tile_range(extent: &Extent, zoom: u8) -> TileRange {
    let width = tile_width(zoom);
    let tolerance = EDGE_TOLERANCE_M / width;
    let snap = |t: f64| {
        let nearest = t.round();
        if (t - nearest).abs() <= tolerance {
            nearest
        } else {
            t
        }
    };

    let x_lo = snap((extent.x_min + HALF_EXTENT) / width).floor();
    let x_hi = (snap((extent.x_max + HALF_EXTENT) / width).ceil() - 1.0).max(x_lo);
    let y_lo = snap((HALF_EXTENT - extent.y_max) / width).floor();
    let y_hi = (snap((HALF_EXTENT - extent.y_min) / width).ceil() - 1.0).max(y_lo);

    let last = (tiles_per_axis(zoom) - 1) as f64;
    let index = |v: f64| v.clamp(0.0, last) as u32;

    TileRange {
        zoom,
        x_min: index(x_lo),
        x_max: index(x_hi),
        y_min: index(y_lo),
        y_max: index(y_hi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zoom_zero_is_the_full_square() {
        assert_eq!(
            tile_to_extent(0, 0, 0),
            Extent::new(-HALF_EXTENT, -HALF_EXTENT, HALF_EXTENT, HALF_EXTENT)
        );
    }

    #[test]
    fn zooms_past_the_index_range_do_not_panic() {
        for zoom in [32, 63, 64, u8::MAX] {
            let extent = tile_to_extent(zoom, 0, 0);
            assert_eq!(extent.x_min, -HALF_EXTENT);
            assert!(extent.x_max.is_finite() && extent.y_min.is_finite(), "z{zoom}");
            let range = extent_to_tile_range(&tile_to_extent(0, 0, 0), zoom);
            assert_eq!((range.x_min, range.x_max), (0, u32::MAX), "z{zoom}");
        }
        assert_eq!(tiles_per_axis(63), 1u64 << 63);
        assert_eq!(tiles_per_axis(64), u64::MAX);
    }

    #[test]
    fn y_grows_southward() {
        let north = tile_to_extent(1, 0, 0);
        let south = tile_to_extent(1, 0, 1);
        assert_eq!(north.y_min, 0.0);
        assert_eq!(north.y_max, HALF_EXTENT);
        assert_eq!(south.y_max, 0.0);
        assert_eq!(south.y_min, -HALF_EXTENT);
    }

    #[test]
    fn tile_extent_maps_back_to_its_own_tile() {
        for zoom in 0..=20u8 {
            let last = (tiles_per_axis(zoom) - 1) as u32;
            let samples = [0, last / 3, last / 2, last.saturating_sub(1), last];
            for &x in &samples {
                for &y in &samples {
                    let range = extent_to_tile_range(&tile_to_extent(zoom, x, y), zoom);
                    assert!(range.contains(x, y), "z{zoom} {x}/{y} -> {range:?}");
                    assert_eq!(range.tile_count(), 1, "z{zoom} {x}/{y} -> {range:?}");
                }
            }
        }
    }

    #[test]
    fn exact_tile_extent_yields_exactly_that_tile() {
        let extent = TileAddress::new(7, 10, 20).extent();
        let range = extent_to_tile_range(&extent, 7);
        assert_eq!(
            range,
            TileRange {
                zoom: 7,
                x_min: 10,
                x_max: 10,
                y_min: 20,
                y_max: 20
            }
        );
    }

    #[test]
    fn same_extent_covers_four_tiles_one_zoom_deeper() {
        let extent = TileAddress::new(7, 10, 20).extent();
        let range = extent_to_tile_range(&extent, 8);
        assert_eq!((range.x_min, range.x_max), (20, 21));
        assert_eq!((range.y_min, range.y_max), (40, 41));
        assert_eq!(range.tile_count(), 4);
    }

    #[test]
    fn dataset_extent_at_zoom_seven() {
        let extent = Extent::new(
            8155154.57602443,
            1865495.57173284,
            15038985.6866807,
            7087842.63996618,
        );
        let range = extent_to_tile_range(&extent, 7);
        assert_eq!((range.x_min, range.x_max), (90, 112));
        assert_eq!((range.y_min, range.y_max), (41, 58));
        assert_eq!(range.tile_count(), 23 * 18);
        assert!(range.contains(106, 46));
    }

    #[test]
    fn point_on_a_boundary_resolves_to_the_next_tile() {
        let width = tile_width(2);
        let x = width - HALF_EXTENT;
        let range = extent_to_tile_range(&Extent::new(x, 0.0, x, 0.0), 2);
        assert_eq!((range.x_min, range.x_max), (1, 1));
        assert_eq!((range.y_min, range.y_max), (2, 2));
    }

    #[test]
    fn world_extent_and_overflow_clamp_to_grid() {
        let world = Extent::new(-HALF_EXTENT, -HALF_EXTENT, HALF_EXTENT, HALF_EXTENT);
        let range = extent_to_tile_range(&world, 3);
        assert_eq!((range.x_min, range.x_max, range.y_min, range.y_max), (0, 7, 0, 7));

        let beyond = Extent::new(-3.0e7, -3.0e7, 3.0e7, 3.0e7);
        assert_eq!(extent_to_tile_range(&beyond, 3), range);
    }

    #[test]
    fn addresses_are_row_major_over_x_then_y() {
        let range = TileRange {
            zoom: 4,
            x_min: 2,
            x_max: 3,
            y_min: 5,
            y_max: 6,
        };
        let got: Vec<_> = range.addresses().map(|a| (a.x, a.y)).collect();
        assert_eq!(got, vec![(2, 5), (2, 6), (3, 5), (3, 6)]);
    }

    #[test]
    fn address_validity_and_display() {
        assert!(TileAddress::new(2, 3, 3).is_valid());
        assert!(!TileAddress::new(2, 4, 0).is_valid());
        assert_eq!(TileAddress::new(7, 106, 46).to_string(), "7/106/46");
    }
}
