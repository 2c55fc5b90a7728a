use std::fmt;
use std::sync::Arc;

use foundation::{Extent, MAX_ZOOM, TileAddress, TileRange, extent_to_tile_range};

/// Table and geometry column a pyramid is generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSource {
    pub table_name: Arc<str>,
    pub geometry_column: Arc<str>,
}

impl LayerSource {
    pub fn new(table_name: impl Into<Arc<str>>, geometry_column: impl Into<Arc<str>>) -> Self {
        Self {
            table_name: table_name.into(),
            geometry_column: geometry_column.into(),
        }
    }
}

/// A single tile to generate. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileJob {
    pub address: TileAddress,
    pub table_name: Arc<str>,
    pub geometry_column: Arc<str>,
}

/// One zoom level of a plan. Jobs are produced on demand from the range,
/// so a plan costs the same to hold at z3 and at z20.
#[derive(Debug, Clone)]
pub struct ZoomPlan {
    pub range: TileRange,
    layer: LayerSource,
}

impl ZoomPlan {
    pub fn zoom(&self) -> u8 {
        self.range.zoom
    }

    pub fn tile_count(&self) -> u64 {
        self.range.tile_count()
    }

    /// Row-major over `x` then `y`.
    pub fn jobs(&self) -> impl Iterator<Item = TileJob> + '_ {
        self.range.addresses().map(|address| TileJob {
            address,
            table_name: Arc::clone(&self.layer.table_name),
            geometry_column: Arc::clone(&self.layer.geometry_column),
        })
    }
}

/// Ordered job list for a zoom range, grouped per level.
#[derive(Debug, Clone)]
pub struct JobPlan {
    levels: Vec<ZoomPlan>,
    total: u64,
}

impl JobPlan {
    pub fn levels(&self) -> &[ZoomPlan] {
        &self.levels
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// All jobs, level by level, row-major over `x` then `y` within a level.
    pub fn jobs(&self) -> impl Iterator<Item = TileJob> + '_ {
        self.levels.iter().flat_map(|level| level.jobs())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RangeError {
    Inverted { start: u8, end: u8 },
    ZoomTooLarge { zoom: u8, max: u8 },
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::Inverted { start, end } => {
                write!(f, "zoom start {start} is greater than zoom end {end}")
            }
            RangeError::ZoomTooLarge { zoom, max } => {
                write!(f, "zoom {zoom} exceeds the maximum supported zoom {max}")
            }
        }
    }
}

impl std::error::Error for RangeError {}

/// Expands the data extent into every tile job for `zoom_start..=zoom_end`.
///
/// Negative zooms are unrepresentable here; they are rejected when the
/// configuration is parsed.
pub fn enumerate(
    data_extent: &Extent,
    zoom_start: u8,
    zoom_end: u8,
    layer: &LayerSource,
) -> Result<JobPlan, RangeError> {
    if zoom_start > zoom_end {
        return Err(RangeError::Inverted {
            start: zoom_start,
            end: zoom_end,
        });
    }
    if zoom_end > MAX_ZOOM {
        return Err(RangeError::ZoomTooLarge {
            zoom: zoom_end,
            max: MAX_ZOOM,
        });
    }

    let mut levels = Vec::with_capacity(usize::from(zoom_end - zoom_start) + 1);
    let mut total = 0u64;
    for zoom in zoom_start..=zoom_end {
        let range = extent_to_tile_range(data_extent, zoom);
        total += range.tile_count();
        levels.push(ZoomPlan {
            range,
            layer: layer.clone(),
        });
    }

    Ok(JobPlan { levels, total })
}
