//! The per-tile transform engine: warp, formula, fill, write.
//!
//! One engine serves a whole layer run. `run` drives a single tile through
//! its state machine; the caller decides how many tiles run at once and how
//! many window co-workers each tile gets.
use std::path::PathBuf;
use std::time::Duration;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::core::grid::{BBox, Grid};
use crate::core::layer::Layer;
use crate::core::planner::plan_windows;
use crate::core::raster::{fill_nodata, BandStack};
use crate::core::tile::{RasterProfile, Tile, TileStatus};
use crate::core::window::Window;
use crate::error::{Error, Result};
use crate::io::gdal::{
    create_tiff, is_thin_window_overflow, open_update, read_bands, warp_window, write_window,
    SourceDescriptor,
};

/// Read attempts per window before a transient failure becomes hard.
const MAX_READ_ATTEMPTS: usize = 7;

/// Exponential backoff for transient read failures: 1s base, doubling,
/// capped at 300s. `attempt` counts failures so far, starting at 1.
pub fn backoff_delay(attempt: usize) -> Duration {
    let secs = 1u64 << (attempt.saturating_sub(1)).min(32) as u32;
    Duration::from_secs(secs.min(300))
}

pub struct TileTransformEngine<'a> {
    layer: &'a Layer,
    grid: &'a Grid,
    formula: Option<crate::core::formula::Formula>,
}

impl<'a> TileTransformEngine<'a> {
    pub fn new(layer: &'a Layer, grid: &'a Grid) -> Result<TileTransformEngine<'a>> {
        Ok(TileTransformEngine {
            layer,
            grid,
            formula: layer.formula()?,
        })
    }

    /// Drive one tile to a terminal status. Errors are logged and folded
    /// into `TileStatus::Failed`; they never propagate past the tile.
    pub fn run(
        &self,
        tile: &mut Tile,
        sources: &[SourceDescriptor],
        co_workers: usize,
        memory_budget: usize,
    ) -> TileStatus {
        let status = match self.process(tile, sources, co_workers, memory_budget) {
            Ok(status) => status,
            Err(e) => {
                error!("tile {}: {}", tile.id, e);
                TileStatus::Failed
            }
        };
        tile.status = status;
        info!("tile {}: {}", tile.id, status);
        status
    }

    fn process(
        &self,
        tile: &mut Tile,
        sources: &[SourceDescriptor],
        co_workers: usize,
        memory_budget: usize,
    ) -> Result<TileStatus> {
        let overlap = match self.overlap_window(tile, sources)? {
            Some(w) => w,
            None => return Ok(TileStatus::SkippedNoIntersection),
        };
        let src_item = sources.iter().map(|s| s.item_size).max().unwrap_or(1);
        let windows = plan_windows(
            &tile.profile,
            src_item,
            co_workers,
            self.formula.is_some(),
            memory_budget,
            &overlap,
        )?;
        if windows.is_empty() {
            return Ok(TileStatus::SkippedNoIntersection);
        }
        debug!(
            "tile {}: {} windows, {} co-workers",
            tile.id,
            windows.len(),
            co_workers
        );
        std::fs::create_dir_all(&tile.workdir)?;

        let wrote = if co_workers > 1 {
            self.transform_separate(tile, sources, &windows, co_workers)?
        } else {
            self.transform_shared(tile, sources, &windows)?
        };

        if !wrote {
            let out = tile.local_tiff();
            if out.exists() {
                std::fs::remove_file(&out)?;
            }
            return Ok(TileStatus::SkippedNoData);
        }
        tile.artifacts.push(tile.local_tiff());
        Ok(TileStatus::Processed)
    }

    /// Shared-file mode: this thread owns the output, every window writes
    /// straight into it.
    fn transform_shared(
        &self,
        tile: &Tile,
        sources: &[SourceDescriptor],
        windows: &[Window],
    ) -> Result<bool> {
        let out = tile.local_tiff();
        create_tiff(&out, &tile.profile, tile.profile.cols, tile.profile.rows, true)?;
        let ds = open_update(&out)?;
        let mut wrote = false;
        for window in windows {
            let stack = match self.read_window(tile, sources, window)? {
                Some(stack) if stack.has_data() => stack,
                _ => continue,
            };
            let planes = self.transform_stack(stack, &tile.profile)?;
            write_window(&ds, window, &planes, tile.profile.dtype)?;
            wrote = true;
        }
        drop(ds);
        Ok(wrote)
    }

    /// Separate-file mode: windows run on a private pool and each writes its
    /// own small raster; the owning thread then merges the pieces into the
    /// final file and deletes them.
    fn transform_separate(
        &self,
        tile: &Tile,
        sources: &[SourceDescriptor],
        windows: &[Window],
        co_workers: usize,
    ) -> Result<bool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(co_workers)
            .build()
            .map_err(|e| Error::Processing(format!("window pool: {}", e)))?;

        let pieces: Vec<Option<(Window, PathBuf)>> = pool.install(|| {
            windows
                .par_iter()
                .map(|window| self.write_piece(tile, sources, window))
                .collect::<Result<Vec<_>>>()
        })?;
        let pieces: Vec<(Window, PathBuf)> = pieces.into_iter().flatten().collect();
        if pieces.is_empty() {
            return Ok(false);
        }

        let out = tile.local_tiff();
        create_tiff(&out, &tile.profile, tile.profile.cols, tile.profile.rows, true)?;
        let ds = open_update(&out)?;
        for (window, path) in &pieces {
            let stack = read_bands(path)?;
            let planes: Vec<Array2<f64>> = stack.bands.into_iter().map(|b| b.data).collect();
            write_window(&ds, window, &planes, tile.profile.dtype)?;
            if let Err(e) = std::fs::remove_file(path) {
                warn!("could not remove window piece {:?}: {}", path, e);
            }
        }
        Ok(true)
    }

    /// One window, separate-file mode: read, transform, and write a small
    /// standalone raster. Returns `None` when the window holds no data.
    fn write_piece(
        &self,
        tile: &Tile,
        sources: &[SourceDescriptor],
        window: &Window,
    ) -> Result<Option<(Window, PathBuf)>> {
        let stack = match self.read_window(tile, sources, window)? {
            Some(stack) if stack.has_data() => stack,
            _ => return Ok(None),
        };
        let planes = self.transform_stack(stack, &tile.profile)?;

        let path = tile
            .workdir
            .join(format!("win_{}_{}.tif", window.col_off, window.row_off));
        let mut profile = tile.profile.clone();
        profile.transform[0] += window.col_off as f64 * tile.profile.transform[1];
        profile.transform[3] += window.row_off as f64 * tile.profile.transform[5];
        create_tiff(&path, &profile, window.cols, window.rows, false)?;
        let ds = open_update(&path)?;
        write_window(
            &ds,
            &Window::new(0, 0, window.cols, window.rows),
            &planes,
            tile.profile.dtype,
        )?;
        Ok(Some((*window, path)))
    }

    /// Warp every source into the window's footprint and stack their bands
    /// in source order. `Ok(None)` means the window read back empty.
    fn read_window(
        &self,
        tile: &Tile,
        sources: &[SourceDescriptor],
        window: &Window,
    ) -> Result<Option<BandStack>> {
        let bounds = window_bounds(&tile.profile, window);
        let crs = self.grid.crs();
        let mut bands = Vec::new();
        for (i, source) in sources.iter().enumerate() {
            let scratch = tile
                .workdir
                .join(format!("warp_{}_{}_{}.tif", i, window.col_off, window.row_off));
            let warped = self.warp_with_retry(source, &crs, &bounds, window, &scratch)?;
            if !warped {
                return Ok(None);
            }
            let read = read_bands(&scratch);
            if let Err(e) = std::fs::remove_file(&scratch) {
                warn!("could not remove warp scratch {:?}: {}", scratch, e);
            }
            match read {
                Ok(stack) => bands.extend(stack.bands),
                Err(e) if is_thin_window_overflow(&e, window) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(Some(BandStack::new(bands)))
    }

    /// Returns `Ok(false)` for the thin-window overflow edge case (empty
    /// data); transient failures are retried with exponential backoff.
    fn warp_with_retry(
        &self,
        source: &SourceDescriptor,
        crs: &str,
        bounds: &BBox,
        window: &Window,
        scratch: &std::path::Path,
    ) -> Result<bool> {
        let mut attempt = 1;
        loop {
            match warp_window(
                source,
                crs,
                bounds,
                window.cols,
                window.rows,
                self.layer.resampling,
                scratch,
            ) {
                Ok(()) => return Ok(true),
                Err(e) if is_thin_window_overflow(&e, window) => return Ok(false),
                Err(e) if e.is_transient() && attempt < MAX_READ_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "warp of {} attempt {}/{} failed ({}); retrying in {:?}",
                        window, attempt, MAX_READ_ATTEMPTS, e, delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Formula (if any), band-count check, and nodata fill. Output planes
    /// are still `f64`; the writer casts.
    fn transform_stack(
        &self,
        stack: BandStack,
        profile: &RasterProfile,
    ) -> Result<Vec<Array2<f64>>> {
        let stack = match &self.formula {
            Some(formula) => formula.apply(&stack)?,
            None => stack,
        };
        if stack.band_count() != profile.band_count {
            return Err(Error::config(format!(
                "transform produced {} bands but the layer declares {}",
                stack.band_count(),
                profile.band_count
            )));
        }
        Ok(stack
            .bands
            .iter()
            .enumerate()
            .map(|(i, band)| fill_nodata(band, i, profile.nodata.as_ref()))
            .collect())
    }

    /// Pixel region of the tile covered by at least one source, or `None`
    /// when nothing intersects.
    fn overlap_window(&self, tile: &Tile, sources: &[SourceDescriptor]) -> Result<Option<Window>> {
        let mut merged: Option<BBox> = None;
        for source in sources {
            let in_grid = source.bounds_in(tile.profile.epsg)?;
            if let Some(part) = in_grid.intersection(&tile.bounds) {
                merged = Some(match merged {
                    None => part,
                    Some(m) => BBox::new(
                        m.left.min(part.left),
                        m.bottom.min(part.bottom),
                        m.right.max(part.right),
                        m.top.max(part.top),
                    ),
                });
            }
        }
        let bbox = match merged {
            Some(b) => b,
            None => return Ok(None),
        };
        Ok(pixel_window(&tile.profile, &bbox))
    }
}

/// Geographic bounds of a pixel window under a profile's geotransform.
pub fn window_bounds(profile: &RasterProfile, window: &Window) -> BBox {
    let t = profile.transform;
    let left = t[0] + window.col_off as f64 * t[1];
    let top = t[3] + window.row_off as f64 * t[5];
    let right = left + window.cols as f64 * t[1];
    let bottom = top + window.rows as f64 * t[5];
    BBox::new(left, bottom.min(top), right, bottom.max(top))
}

/// Snap a bounding box to the profile's pixel grid, clamped to the raster.
/// Coordinates that land within a millionth of a pixel of an edge are
/// rounded onto it so float noise cannot widen a window.
pub fn pixel_window(profile: &RasterProfile, bbox: &BBox) -> Option<Window> {
    let t = profile.transform;
    let xres = t[1];
    let yres = -t[5];
    let round_eps = |v: f64| {
        if (v - v.round()).abs() < 1e-6 { v.round() } else { v }
    };
    let col_off = round_eps((bbox.left - t[0]) / xres);
    let row_off = round_eps((t[3] - bbox.top) / yres);
    let snapped = Window::snap(
        col_off,
        row_off,
        round_eps(bbox.width() / xres),
        round_eps(bbox.height() / yres),
    );
    let full = Window::new(0, 0, profile.cols, profile.rows);
    snapped.intersection(&full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tile::NoData;
    use crate::types::{Compression, DataType};

    fn profile() -> RasterProfile {
        RasterProfile {
            cols: 40000,
            rows: 40000,
            block_size: 400,
            dtype: DataType::Uint8,
            nodata: Some(NoData::Single(0.0)),
            compression: Compression::Deflate,
            epsg: 4326,
            transform: [10.0, 0.00025, 0.0, 10.0, 0.0, -0.00025],
            band_count: 1,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let secs: Vec<u64> = (1..=10).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300]);
        assert_eq!(backoff_delay(40).as_secs(), 300);
    }

    #[test]
    fn window_bounds_follow_transform() {
        let p = profile();
        let b = window_bounds(&p, &Window::new(0, 0, 400, 400));
        assert!((b.left - 10.0).abs() < 1e-12);
        assert!((b.top - 10.0).abs() < 1e-12);
        assert!((b.right - 10.1).abs() < 1e-12);
        assert!((b.bottom - 9.9).abs() < 1e-12);
    }

    #[test]
    fn pixel_window_round_trips_bounds() {
        let p = profile();
        let w = Window::new(800, 1200, 400, 200);
        let b = window_bounds(&p, &w);
        assert_eq!(pixel_window(&p, &b), Some(w));
    }

    #[test]
    fn pixel_window_clamps_to_raster() {
        let p = profile();
        // A box hanging off the left and top edges of the tile.
        let b = BBox::new(9.95, 9.95, 10.05, 10.05);
        let w = pixel_window(&p, &b).unwrap();
        assert_eq!(w.col_off, 0);
        assert_eq!(w.row_off, 0);
        assert_eq!(w.cols, 200);
        assert_eq!(w.rows, 200);

        // Entirely outside.
        let outside = BBox::new(30.0, 30.0, 31.0, 31.0);
        assert_eq!(pixel_window(&p, &outside), None);
    }
}
