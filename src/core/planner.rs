//! Window planning: decompose a destination tile into memory-safe windows.
//!
//! Windows group adjacent GeoTIFF blocks into squares so that one read/warp
//! round-trip moves as much data as memory allows, cutting per-call I/O
//! overhead on large tiles.
use crate::core::tile::RasterProfile;
use crate::core::window::Window;
use crate::error::{Error, Result};

/// Safety divisor applied to the per-window memory estimate. Grows with
/// float width, band count, and window co-workers; squared when a formula is
/// configured because expression evaluation holds intermediate array copies.
pub fn safety_divisor(profile: &RasterProfile, co_workers: usize, has_formula: bool) -> usize {
    let float_factor = match profile.dtype {
        crate::types::DataType::Float64 => 4,
        crate::types::DataType::Float32 => 2,
        _ => 1,
    };
    let divisor = float_factor * profile.band_count.max(1) * co_workers.max(1);
    if has_formula { divisor * divisor } else { divisor }
}

/// Number of whole blocks one window may hold, shaped as a square.
pub fn max_blocks(
    profile: &RasterProfile,
    src_item_size: usize,
    co_workers: usize,
    has_formula: bool,
    budget: usize,
) -> Result<usize> {
    let item = profile.dtype.size_of().max(src_item_size);
    let block_bytes = profile.block_size * profile.block_size * item;
    let divisor = safety_divisor(profile, co_workers, has_formula);
    let per_block = block_bytes.saturating_mul(divisor);
    if per_block == 0 {
        return Err(Error::config("window planner: zero-sized block"));
    }
    let side = ((budget / per_block) as f64).sqrt().floor() as usize;
    if side == 0 {
        return Err(Error::config(format!(
            "memory budget of {} bytes cannot hold a single {}x{} block (needs {})",
            budget, profile.block_size, profile.block_size, per_block
        )));
    }
    Ok(side * side)
}

/// Produce the covering set of windows for one tile.
///
/// `overlap` is the pixel region of the destination tile that actually
/// intersects the source extent; windows outside it are dropped, windows
/// crossing it are clipped.
pub fn plan_windows(
    profile: &RasterProfile,
    src_item_size: usize,
    co_workers: usize,
    has_formula: bool,
    budget: usize,
    overlap: &Window,
) -> Result<Vec<Window>> {
    let blocks = max_blocks(profile, src_item_size, co_workers, has_formula, budget)?;
    let side = (blocks as f64).sqrt() as usize;
    let step = side * profile.block_size;

    let mut windows = Vec::new();
    let mut row = 0usize;
    while row < profile.rows {
        let rows = step.min(profile.rows - row);
        let mut col = 0usize;
        while col < profile.cols {
            let cols = step.min(profile.cols - col);
            let w = Window::new(col, row, cols, rows);
            if let Some(clipped) = w.intersection(overlap) {
                if !clipped.is_empty() {
                    windows.push(clipped);
                }
            }
            col += step;
        }
        row += step;
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tile::NoData;
    use crate::types::{Compression, DataType};

    fn profile(dtype: DataType, bands: usize) -> RasterProfile {
        RasterProfile {
            cols: 4000,
            rows: 4000,
            block_size: 400,
            dtype,
            nodata: Some(NoData::Single(0.0)),
            compression: Compression::Deflate,
            epsg: 4326,
            transform: [0.0, 0.0025, 0.0, 10.0, 0.0, -0.0025],
            band_count: bands,
        }
    }

    fn full(p: &RasterProfile) -> Window {
        Window::new(0, 0, p.cols, p.rows)
    }

    #[test]
    fn divisor_scales_with_dtype_bands_workers_formula() {
        let p8 = profile(DataType::Uint8, 1);
        assert_eq!(safety_divisor(&p8, 1, false), 1);
        assert_eq!(safety_divisor(&p8, 4, false), 4);

        let p32 = profile(DataType::Float32, 1);
        assert_eq!(safety_divisor(&p32, 1, false), 2);
        let p64 = profile(DataType::Float64, 1);
        assert_eq!(safety_divisor(&p64, 1, false), 4);

        let p2 = profile(DataType::Uint8, 2);
        assert_eq!(safety_divisor(&p2, 1, false), 2);
        // Formula squares the whole divisor.
        assert_eq!(safety_divisor(&p2, 2, true), 16);
    }

    #[test]
    fn windows_cover_tile_without_overlap() {
        let p = profile(DataType::Uint8, 1);
        // Budget for a 2x2 block group.
        let budget = 4 * 400 * 400;
        let windows = plan_windows(&p, 1, 1, false, budget, &full(&p)).unwrap();
        // 4000/800 = 5 groups per side.
        assert_eq!(windows.len(), 25);

        let total: usize = windows.iter().map(|w| w.num_pixels()).sum();
        assert_eq!(total, p.cols * p.rows);
        // Disjointness: pairwise intersections are empty.
        for (i, a) in windows.iter().enumerate() {
            for b in windows.iter().skip(i + 1) {
                assert!(a.intersection(b).is_none());
            }
        }
    }

    #[test]
    fn no_window_exceeds_budget() {
        let p = profile(DataType::Uint16, 3);
        let budget = 512 * 1024 * 1024;
        let windows = plan_windows(&p, 2, 2, false, budget, &full(&p)).unwrap();
        for w in &windows {
            assert!(
                w.byte_size(2, p.band_count) <= budget,
                "{} exceeds budget",
                w
            );
        }
    }

    #[test]
    fn single_block_over_budget_is_config_error() {
        let p = profile(DataType::Float64, 1);
        // One 400x400 f64 block needs 400*400*8*4 bytes; give less.
        let result = max_blocks(&p, 8, 1, false, 400 * 400);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn windows_clip_to_source_overlap() {
        let p = profile(DataType::Uint8, 1);
        let budget = 4 * 400 * 400;
        // Source only covers the top-left 1000x600 pixel corner.
        let overlap = Window::new(0, 0, 1000, 600);
        let windows = plan_windows(&p, 1, 1, false, budget, &overlap).unwrap();
        assert!(!windows.is_empty());
        let total: usize = windows.iter().map(|w| w.num_pixels()).sum();
        assert_eq!(total, 1000 * 600);
        for w in &windows {
            assert!(w.col_off + w.cols <= 1000);
            assert!(w.row_off + w.rows <= 600);
        }
    }

    #[test]
    fn empty_overlap_plans_no_windows() {
        let p = profile(DataType::Uint8, 1);
        let overlap = Window::new(0, 0, 0, 0);
        let windows = plan_windows(&p, 1, 1, false, 1 << 30, &overlap).unwrap();
        assert!(windows.is_empty());
    }
}
