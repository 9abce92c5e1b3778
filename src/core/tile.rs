//! Per-run tile entities.
//!
//! A `Tile` is created by enumeration, annotated in place by each pipeline
//! stage, and destroyed (its working directory removed) after upload or on
//! skip.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::grid::{BBox, Grid};
use crate::types::{Compression, DataType};

/// Nodata convention of a destination raster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoData {
    Single(f64),
    PerBand(Vec<f64>),
}

impl NoData {
    /// Fill value for a zero-based band index.
    pub fn value_for_band(&self, band: usize) -> Option<f64> {
        match self {
            NoData::Single(v) => Some(*v),
            NoData::PerBand(vs) => vs.get(band).copied(),
        }
    }
}

/// Lifecycle of a tile through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileStatus {
    Pending,
    /// Tile bounds do not intersect the source extent.
    SkippedNoIntersection,
    /// Output already present at the destination and overwrite not requested.
    SkippedExisting,
    /// Source intersects, but every planned window read back empty.
    SkippedNoData,
    Failed,
    Processed,
}

impl std::fmt::Display for TileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TileStatus::Pending => "pending",
            TileStatus::SkippedNoIntersection => "skipped (no intersection)",
            TileStatus::SkippedExisting => "skipped (already exists)",
            TileStatus::SkippedNoData => "skipped (no data)",
            TileStatus::Failed => "failed",
            TileStatus::Processed => "processed",
        };
        write!(f, "{}", s)
    }
}

/// Destination raster profile shared by every window of a tile.
#[derive(Clone, Debug)]
pub struct RasterProfile {
    pub cols: usize,
    pub rows: usize,
    pub block_size: usize,
    pub dtype: DataType,
    pub nodata: Option<NoData>,
    pub compression: Compression,
    pub epsg: u32,
    /// GDAL geotransform: [origin_x, xres, 0, origin_y, 0, -yres].
    pub transform: [f64; 6],
    pub band_count: usize,
}

impl RasterProfile {
    pub fn for_tile(
        grid: &Grid,
        bounds: &BBox,
        dtype: DataType,
        nodata: Option<NoData>,
        compression: Compression,
        band_count: usize,
    ) -> RasterProfile {
        RasterProfile {
            cols: grid.cols(),
            rows: grid.rows(),
            block_size: grid.block_size(),
            dtype,
            nodata,
            compression,
            epsg: grid.epsg(),
            transform: [bounds.left, grid.xres(), 0.0, bounds.top, 0.0, -grid.yres()],
            band_count,
        }
    }
}

/// One rectangular unit of the output grid, independently processable.
#[derive(Clone, Debug)]
pub struct Tile {
    pub id: String,
    pub bounds: BBox,
    pub profile: RasterProfile,
    pub status: TileStatus,
    /// Scratch directory for warp intermediates and the local output file.
    pub workdir: PathBuf,
    /// Local files produced for this tile, in upload order.
    pub artifacts: Vec<PathBuf>,
}

impl Tile {
    pub fn new(id: String, bounds: BBox, profile: RasterProfile, work_root: &Path) -> Tile {
        let workdir = work_root.join(&id);
        Tile {
            id,
            bounds,
            profile,
            status: TileStatus::Pending,
            workdir,
            artifacts: Vec::new(),
        }
    }

    /// Path of the tile's final local GeoTIFF.
    pub fn local_tiff(&self) -> PathBuf {
        self.workdir.join(format!("{}.tif", self.id))
    }

    /// Remove the tile's scratch directory. Best effort; missing is fine.
    pub fn cleanup(&self) {
        if self.workdir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.workdir) {
                tracing::warn!("could not remove workdir {:?}: {}", self.workdir, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodata_per_band_lookup() {
        let nd = NoData::PerBand(vec![0.0, -1.0]);
        assert_eq!(nd.value_for_band(0), Some(0.0));
        assert_eq!(nd.value_for_band(1), Some(-1.0));
        assert_eq!(nd.value_for_band(2), None);

        let nd = NoData::Single(255.0);
        assert_eq!(nd.value_for_band(7), Some(255.0));
    }

    #[test]
    fn nodata_json_forms() {
        let single: NoData = serde_json::from_str("0").unwrap();
        assert_eq!(single, NoData::Single(0.0));
        let per_band: NoData = serde_json::from_str("[0, 255]").unwrap();
        assert_eq!(per_band, NoData::PerBand(vec![0.0, 255.0]));
    }

    #[test]
    fn profile_transform_follows_tile_origin() {
        let grid = Grid::from_name("10/40000").unwrap();
        let bounds = grid.bounds_of("00N_010W").unwrap();
        let p = RasterProfile::for_tile(
            &grid,
            &bounds,
            DataType::Uint8,
            Some(NoData::Single(0.0)),
            Compression::Deflate,
            1,
        );
        assert_eq!(p.transform[0], -10.0);
        assert_eq!(p.transform[3], 0.0);
        assert_eq!(p.transform[1], 0.00025);
        assert_eq!(p.transform[5], -0.00025);
        assert_eq!(p.cols, 40000);
        assert_eq!(p.block_size, 400);
    }
}
