//! Tile grid addressing.
//!
//! A grid is a named partition of geographic or projected space into
//! equal-sized tiles. Two families exist: snapped lat/lng grids whose edges
//! may be offset from the equator/meridian by half a tile, and Web-Mercator
//! zoom grids. The set of families is closed, so `Grid` is a tagged variant
//! dispatched via `match`.
use serde::Serialize;

use crate::error::{Error, Result};

pub mod mercator;
pub mod snapped;

pub use mercator::WebMercatorGrid;
pub use snapped::SnappedGrid;

/// Axis-aligned bounding box in grid CRS units (left, bottom, right, top).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BBox {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl BBox {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        BBox {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right && y > self.bottom && y <= self.top
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.bottom < other.top
            && self.top > other.bottom
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BBox::new(
            self.left.max(other.left),
            self.bottom.max(other.bottom),
            self.right.min(other.right),
            self.top.min(other.top),
        ))
    }
}

/// A named tile grid.
#[derive(Clone, Debug)]
pub enum Grid {
    Snapped(SnappedGrid),
    WebMercator(WebMercatorGrid),
}

impl Grid {
    /// Parse a grid name: `"{degrees}/{cols}"` for a snapped lat/lng grid
    /// (e.g. `10/40000`), `"zoom_{z}"` for a Web-Mercator zoom grid.
    pub fn from_name(name: &str) -> Result<Grid> {
        if let Some(zoom) = name.strip_prefix("zoom_") {
            let zoom: u8 = zoom
                .parse()
                .map_err(|_| Error::config(format!("invalid zoom grid name: {}", name)))?;
            return Ok(Grid::WebMercator(WebMercatorGrid::new(zoom)?));
        }
        if let Some((deg, cols)) = name.split_once('/') {
            let degrees: f64 = deg
                .parse()
                .map_err(|_| Error::config(format!("invalid grid tile size: {}", name)))?;
            let cols: usize = cols
                .parse()
                .map_err(|_| Error::config(format!("invalid grid column count: {}", name)))?;
            return Ok(Grid::Snapped(SnappedGrid::new(degrees, cols)?));
        }
        Err(Error::config(format!("unknown grid name: {}", name)))
    }

    pub fn name(&self) -> String {
        match self {
            Grid::Snapped(g) => g.name(),
            Grid::WebMercator(g) => g.name(),
        }
    }

    /// EPSG code of the grid CRS.
    pub fn epsg(&self) -> u32 {
        match self {
            Grid::Snapped(_) => 4326,
            Grid::WebMercator(_) => 3857,
        }
    }

    pub fn crs(&self) -> String {
        format!("EPSG:{}", self.epsg())
    }

    /// Pixel columns of one tile.
    pub fn cols(&self) -> usize {
        match self {
            Grid::Snapped(g) => g.cols,
            Grid::WebMercator(g) => g.cols(),
        }
    }

    /// Pixel rows of one tile.
    pub fn rows(&self) -> usize {
        match self {
            Grid::Snapped(g) => g.rows,
            Grid::WebMercator(g) => g.cols(),
        }
    }

    /// Horizontal pixel resolution in grid CRS units.
    pub fn xres(&self) -> f64 {
        match self {
            Grid::Snapped(g) => g.xres(),
            Grid::WebMercator(g) => g.res(),
        }
    }

    pub fn yres(&self) -> f64 {
        match self {
            Grid::Snapped(g) => g.yres(),
            Grid::WebMercator(g) => g.res(),
        }
    }

    pub fn block_size(&self) -> usize {
        match self {
            Grid::Snapped(g) => g.block_size,
            Grid::WebMercator(_) => mercator::BLOCK_SIZE,
        }
    }

    /// Tile ID of the grid cell containing a point in grid CRS coordinates.
    pub fn tile_id_of(&self, x: f64, y: f64) -> Result<String> {
        match self {
            Grid::Snapped(g) => g.tile_id_of(x, y),
            Grid::WebMercator(g) => g.tile_id_of(x, y),
        }
    }

    /// Bounding box of a tile, in grid CRS coordinates.
    pub fn bounds_of(&self, tile_id: &str) -> Result<BBox> {
        match self {
            Grid::Snapped(g) => g.bounds_of(tile_id),
            Grid::WebMercator(g) => g.bounds_of(tile_id),
        }
    }

    /// Every tile ID of the grid. Finite and deterministic up to ordering;
    /// a pure function of grid parameters.
    pub fn tile_ids(&self) -> Vec<String> {
        match self {
            Grid::Snapped(g) => g.tile_ids(),
            Grid::WebMercator(g) => g.tile_ids(),
        }
    }

    /// Geographic area of use (lat/lng degrees), independent of grid CRS.
    pub fn area_of_use(&self) -> BBox {
        match self {
            Grid::Snapped(g) => g.area_of_use(),
            Grid::WebMercator(g) => g.area_of_use(),
        }
    }
}

/// Largest divisor of `cols` in the pixel range [128, 512] that is also a
/// multiple of 16. GeoTIFF block dimensions outside this range are either
/// inefficient to fetch over HTTP or waste compression context.
pub fn block_size_for(cols: usize) -> Result<usize> {
    (128..=512)
        .rev()
        .filter(|b| b % 16 == 0)
        .find(|b| cols % b == 0)
        .ok_or_else(|| {
            Error::config(format!(
                "no block size in [128, 512] (multiple of 16) divides {} columns",
                cols
            ))
        })
}
