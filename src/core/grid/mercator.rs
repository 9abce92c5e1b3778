//! Web-Mercator zoom grids.
//!
//! The world square spans ±20037508.342789244 m in EPSG:3857. A zoom level
//! has `256 * 2^zoom` pixels across the full extent; tiles hold at most
//! 65536 pixels on a side, so the number of tiles per side is
//! `max(1, 2^zoom / 256)`. Blocks are fixed at 256 px. Tile row 0 / col 0 is
//! the top-left tile; bounds are linear interpolations from that false
//! origin.
use crate::core::grid::BBox;
use crate::error::{Error, Result};

/// Half-extent of the Web-Mercator world square in meters.
pub const EXTENT: f64 = 20_037_508.342_789_244;

/// Fixed GeoTIFF block edge for Web-Mercator tiles.
pub const BLOCK_SIZE: usize = 256;

/// Latitude limit of the projection. Hard-coded because the CRS-reported
/// area of use is too imprecise for tiling.
pub const LAT_LIMIT: f64 = 85.051_128_78;

pub const MAX_ZOOM: u8 = 22;

#[derive(Clone, Copy, Debug)]
pub struct WebMercatorGrid {
    pub zoom: u8,
}

impl WebMercatorGrid {
    pub fn new(zoom: u8) -> Result<WebMercatorGrid> {
        if zoom > MAX_ZOOM {
            return Err(Error::config(format!(
                "unsupported zoom level {} (max {})",
                zoom, MAX_ZOOM
            )));
        }
        Ok(WebMercatorGrid { zoom })
    }

    pub fn name(&self) -> String {
        format!("zoom_{}", self.zoom)
    }

    /// Tiles along one side of the world square.
    pub fn tiles_per_side(&self) -> usize {
        ((1usize << self.zoom) / 256).max(1)
    }

    /// Total tile count at this zoom.
    pub fn tile_count(&self) -> usize {
        let side = self.tiles_per_side();
        side * side
    }

    /// Pixel columns (= rows) per tile.
    pub fn cols(&self) -> usize {
        (256usize << self.zoom) / self.tiles_per_side()
    }

    /// Pixel resolution in meters, identical in x and y.
    pub fn res(&self) -> f64 {
        2.0 * EXTENT / (256u64 << self.zoom) as f64
    }

    /// Tile span in meters.
    pub fn tile_span(&self) -> f64 {
        2.0 * EXTENT / self.tiles_per_side() as f64
    }

    /// Geographic area of use, clamped to the Web-Mercator latitude limit.
    pub fn area_of_use(&self) -> BBox {
        BBox::new(-180.0, -LAT_LIMIT, 180.0, LAT_LIMIT)
    }

    /// Row/col of the tile containing a point in projected meters.
    pub fn tile_index_of(&self, x: f64, y: f64) -> Result<(usize, usize)> {
        let side = self.tiles_per_side();
        let span = self.tile_span();
        if x < -EXTENT - 1e-6 || x > EXTENT + 1e-6 || y < -EXTENT - 1e-6 || y > EXTENT + 1e-6 {
            return Err(Error::config(format!(
                "point ({}, {}) outside Web-Mercator extent",
                x, y
            )));
        }
        // False-origin translation: row 0 / col 0 at the top-left corner.
        let col = (((x + EXTENT) / span).floor() as usize).min(side - 1);
        let row = (((EXTENT - y) / span).floor() as usize).min(side - 1);
        Ok((row, col))
    }

    pub fn tile_id_of(&self, x: f64, y: f64) -> Result<String> {
        let (row, col) = self.tile_index_of(x, y)?;
        Ok(Self::encode(row, col))
    }

    /// Encode a row/col pair as `"{row:03}R_{col:03}C"`.
    pub fn encode(row: usize, col: usize) -> String {
        format!("{:03}R_{:03}C", row, col)
    }

    pub fn decode(&self, tile_id: &str) -> Result<(usize, usize)> {
        let malformed = || Error::config(format!("malformed tile id: {}", tile_id));
        let (row_part, col_part) = tile_id.split_once('_').ok_or_else(malformed)?;
        let row: usize = row_part
            .strip_suffix('R')
            .ok_or_else(malformed)?
            .parse()
            .map_err(|_| malformed())?;
        let col: usize = col_part
            .strip_suffix('C')
            .ok_or_else(malformed)?
            .parse()
            .map_err(|_| malformed())?;
        let side = self.tiles_per_side();
        if row >= side || col >= side {
            return Err(Error::config(format!(
                "tile id {} outside zoom {} grid ({} tiles per side)",
                tile_id, self.zoom, side
            )));
        }
        Ok((row, col))
    }

    /// Tile bounds in projected meters, interpolated from the grid corners.
    pub fn bounds_of(&self, tile_id: &str) -> Result<BBox> {
        let (row, col) = self.decode(tile_id)?;
        let span = self.tile_span();
        let left = -EXTENT + col as f64 * span;
        let top = EXTENT - row as f64 * span;
        Ok(BBox::new(left, top - span, left + span, top))
    }

    pub fn tile_ids(&self) -> Vec<String> {
        let side = self.tiles_per_side();
        let mut ids = Vec::with_capacity(side * side);
        for row in 0..side {
            for col in 0..side {
                ids.push(Self::encode(row, col));
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tile_counts_per_zoom() {
        assert_eq!(WebMercatorGrid::new(1).unwrap().tile_count(), 1);
        assert_eq!(WebMercatorGrid::new(10).unwrap().tile_count(), 16);
        assert_eq!(WebMercatorGrid::new(14).unwrap().tile_count(), 4096);
    }

    #[test]
    fn unsupported_zoom_is_config_error() {
        assert!(WebMercatorGrid::new(23).is_err());
    }

    #[test]
    fn single_tile_zoom_covers_world() {
        let g = WebMercatorGrid::new(4).unwrap();
        assert_eq!(g.tiles_per_side(), 1);
        let b = g.bounds_of("000R_000C").unwrap();
        assert_relative_eq!(b.left, -EXTENT);
        assert_relative_eq!(b.right, EXTENT);
        assert_relative_eq!(b.top, EXTENT);
        assert_relative_eq!(b.bottom, -EXTENT);
        assert_eq!(g.cols(), 256 << 4);
    }

    #[test]
    fn tile_pixels_capped_at_65536() {
        for zoom in [8u8, 10, 14, 22] {
            assert_eq!(WebMercatorGrid::new(zoom).unwrap().cols(), 65536);
        }
    }

    #[test]
    fn addressing_round_trip() {
        let g = WebMercatorGrid::new(10).unwrap();
        let id = g.tile_id_of(0.0, 0.0).unwrap();
        // Center of the world falls just past the top-left quadrant.
        assert_eq!(id, "002R_002C");
        let b = g.bounds_of(&id).unwrap();
        assert!(b.contains(0.0 + 1.0, 0.0 - 1.0));

        let (row, col) = g.decode(&id).unwrap();
        assert_eq!(WebMercatorGrid::encode(row, col), id);
    }

    #[test]
    fn top_left_false_origin() {
        let g = WebMercatorGrid::new(10).unwrap();
        // North-west corner is row 0, col 0.
        let id = g.tile_id_of(-EXTENT + 1.0, EXTENT - 1.0).unwrap();
        assert_eq!(id, "000R_000C");
        // South-east corner is the last tile, clamped at the edge.
        let id = g.tile_id_of(EXTENT, -EXTENT).unwrap();
        assert_eq!(id, "003R_003C");
    }

    #[test]
    fn catalog_enumerates_square() {
        let g = WebMercatorGrid::new(10).unwrap();
        let ids = g.tile_ids();
        assert_eq!(ids.len(), 16);
        assert!(ids.contains(&"000R_000C".to_string()));
        assert!(ids.contains(&"003R_003C".to_string()));
        assert!(g.decode("004R_000C").is_err());
    }

    #[test]
    fn resolution_matches_pixel_extent() {
        let g = WebMercatorGrid::new(14).unwrap();
        // 256 * 2^14 pixels over the full extent.
        assert_relative_eq!(g.res(), 2.0 * EXTENT / (256.0 * 16384.0));
        assert_relative_eq!(g.tile_span(), g.res() * g.cols() as f64);
    }
}
