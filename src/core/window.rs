//! Integer pixel windows over a destination raster.
//!
//! A window is a rectangular pixel region addressed by column/row offset and
//! size. Windows are planned fresh per tile and must be snapped to whole
//! pixels before they are used as read or write targets.

/// A pixel-aligned rectangular sub-region of a raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub cols: usize,
    pub rows: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, cols: usize, rows: usize) -> Self {
        Window {
            col_off,
            row_off,
            cols,
            rows,
        }
    }

    /// Snap a fractional pixel region to whole pixels: offsets floor, the far
    /// edges ceil, so the snapped window always covers the input region.
    pub fn snap(col_off: f64, row_off: f64, cols: f64, rows: f64) -> Self {
        let c0 = col_off.floor().max(0.0);
        let r0 = row_off.floor().max(0.0);
        let c1 = (col_off + cols).ceil();
        let r1 = (row_off + rows).ceil();
        Window {
            col_off: c0 as usize,
            row_off: r0 as usize,
            cols: (c1 - c0).max(0.0) as usize,
            rows: (r1 - r0).max(0.0) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }

    pub fn num_pixels(&self) -> usize {
        self.cols * self.rows
    }

    /// Estimated in-memory footprint of this window's band stack.
    pub fn byte_size(&self, item_size: usize, bands: usize) -> usize {
        self.num_pixels() * item_size * bands
    }

    /// Overlap of two windows; `None` when they do not share any pixels.
    pub fn intersection(&self, other: &Window) -> Option<Window> {
        let c0 = self.col_off.max(other.col_off);
        let r0 = self.row_off.max(other.row_off);
        let c1 = (self.col_off + self.cols).min(other.col_off + other.cols);
        let r1 = (self.row_off + self.rows).min(other.row_off + other.rows);
        if c1 <= c0 || r1 <= r0 {
            return None;
        }
        Some(Window::new(c0, r0, c1 - c0, r1 - r0))
    }

    /// Smallest window covering both inputs.
    pub fn union(&self, other: &Window) -> Window {
        let c0 = self.col_off.min(other.col_off);
        let r0 = self.row_off.min(other.row_off);
        let c1 = (self.col_off + self.cols).max(other.col_off + other.cols);
        let r1 = (self.row_off + self.rows).max(other.row_off + other.rows);
        Window::new(c0, r0, c1 - c0, r1 - r0)
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Window(col={}, row={}, {}x{})",
            self.col_off, self.row_off, self.cols, self.rows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_covers_fractional_region() {
        let w = Window::snap(1.2, 0.7, 3.1, 2.0);
        assert_eq!(w, Window::new(1, 0, 4, 3));
    }

    #[test]
    fn snap_clamps_negative_offsets() {
        let w = Window::snap(-0.5, -1.5, 4.0, 4.0);
        assert_eq!(w.col_off, 0);
        assert_eq!(w.row_off, 0);
    }

    #[test]
    fn intersection_and_union() {
        let a = Window::new(0, 0, 10, 10);
        let b = Window::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Some(Window::new(5, 5, 5, 5)));
        assert_eq!(a.union(&b), Window::new(0, 0, 15, 15));

        let far = Window::new(100, 100, 5, 5);
        assert_eq!(a.intersection(&far), None);
    }

    #[test]
    fn byte_size_scales_with_bands() {
        let w = Window::new(0, 0, 100, 100);
        assert_eq!(w.byte_size(2, 3), 100 * 100 * 2 * 3);
    }
}
