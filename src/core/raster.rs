//! In-memory band stacks and the pure pixel operations applied to them.
//!
//! Pixel data moves through the engine as `f64` planes plus a validity mask
//! per band; casting to the destination type happens only at write time.
use ndarray::Array2;

use crate::core::tile::NoData;

/// One band plane: data plus validity (`true` = measured pixel).
#[derive(Clone, Debug)]
pub struct Band {
    pub data: Array2<f64>,
    pub valid: Array2<bool>,
}

impl Band {
    pub fn new(data: Array2<f64>, valid: Array2<bool>) -> Band {
        debug_assert_eq!(data.dim(), valid.dim());
        Band { data, valid }
    }

    /// Band with every pixel valid.
    pub fn all_valid(data: Array2<f64>) -> Band {
        let valid = Array2::from_elem(data.dim(), true);
        Band { data, valid }
    }
}

/// The bands read for one window, in band order.
#[derive(Clone, Debug)]
pub struct BandStack {
    pub bands: Vec<Band>,
}

impl BandStack {
    pub fn new(bands: Vec<Band>) -> BandStack {
        BandStack { bands }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.bands
            .first()
            .map(|b| b.data.dim())
            .unwrap_or((0, 0))
    }

    /// True iff the region has non-zero extent and at least one valid pixel
    /// in any band.
    pub fn has_data(&self) -> bool {
        let (rows, cols) = self.shape();
        if rows == 0 || cols == 0 {
            return false;
        }
        self.bands.iter().any(|b| b.valid.iter().any(|&v| v))
    }
}

/// Fill masked positions with the configured nodata value and return the
/// plane still as `f64` (the writer casts on output). Already-valid pixels
/// are never touched, even when they equal the nodata value.
pub fn fill_nodata(band: &Band, band_index: usize, nodata: Option<&NoData>) -> Array2<f64> {
    let fill = nodata.and_then(|nd| nd.value_for_band(band_index));
    match fill {
        None => band.data.clone(),
        Some(value) => {
            let mut out = band.data.clone();
            ndarray::Zip::from(&mut out)
                .and(&band.valid)
                .for_each(|px, &ok| {
                    if !ok {
                        *px = value;
                    }
                });
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn has_data_requires_extent_and_valid_pixels() {
        let empty = BandStack::new(vec![]);
        assert!(!empty.has_data());

        let all_masked = BandStack::new(vec![Band::new(
            array![[1.0, 2.0]],
            array![[false, false]],
        )]);
        assert!(!all_masked.has_data());

        let one_valid = BandStack::new(vec![
            Band::new(array![[1.0, 2.0]], array![[false, false]]),
            Band::new(array![[3.0, 4.0]], array![[false, true]]),
        ]);
        assert!(one_valid.has_data());
    }

    #[test]
    fn fill_only_touches_masked_positions() {
        // A valid pixel that equals the nodata value must survive.
        let band = Band::new(array![[0.0, 5.0, 7.0]], array![[true, false, true]]);
        let out = fill_nodata(&band, 0, Some(&NoData::Single(0.0)));
        assert_eq!(out, array![[0.0, 0.0, 7.0]]);
    }

    #[test]
    fn fill_per_band_values() {
        let nd = NoData::PerBand(vec![-1.0, -2.0]);
        let band = Band::new(array![[1.0, 2.0]], array![[false, true]]);
        assert_eq!(fill_nodata(&band, 0, Some(&nd)), array![[-1.0, 2.0]]);
        assert_eq!(fill_nodata(&band, 1, Some(&nd)), array![[-2.0, 2.0]]);
    }

    #[test]
    fn no_nodata_is_identity() {
        let band = Band::new(array![[1.5, 2.5]], array![[false, true]]);
        assert_eq!(fill_nodata(&band, 0, None), array![[1.5, 2.5]]);
    }
}
