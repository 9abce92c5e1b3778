//! GDAL-backed raster I/O: source descriptors, windowed warp reads via
//! `gdalwarp`, and tiled GeoTIFF creation/update.
use std::path::{Path, PathBuf};
use std::process::Command;

use gdal::raster::{Buffer, GdalDataType, RasterCreationOptions};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use ndarray::Array2;
use tracing::debug;

use crate::core::grid::BBox;
use crate::core::raster::{Band, BandStack};
use crate::core::tile::RasterProfile;
use crate::core::window::Window;
use crate::error::{Error, Result};
use crate::types::{DataType, Resampling};

/// Immutable description of one source dataset. Built once per layer via
/// [`SourceDescriptor::open`] (the cheap step); pixel access happens later
/// through warped window reads, so failures surface at the call site.
#[derive(Clone, Debug)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    /// Affine geotransform of the source.
    pub transform: [f64; 6],
    /// Projection as WKT (empty when the source carries none).
    pub projection: String,
    /// Bounds in the source CRS.
    pub bounds: BBox,
    pub band_count: usize,
    /// Bytes per pixel of the widest band.
    pub item_size: usize,
    /// Per-band nodata values.
    pub nodata: Vec<Option<f64>>,
}

impl SourceDescriptor {
    pub fn open(path: &Path) -> Result<SourceDescriptor> {
        let ds = Dataset::open(path)?;
        let (cols, rows) = ds.raster_size();
        let band_count = ds.raster_count() as usize;
        if band_count == 0 {
            return Err(Error::config(format!(
                "source {:?} has no raster bands",
                path
            )));
        }
        let transform = ds.geo_transform()?;
        let projection = ds.projection();

        let left = transform[0];
        let top = transform[3];
        let right = left + cols as f64 * transform[1];
        let bottom = top + rows as f64 * transform[5];
        let bounds = BBox::new(
            left.min(right),
            bottom.min(top),
            left.max(right),
            bottom.max(top),
        );

        let mut item_size = 1;
        let mut nodata = Vec::with_capacity(band_count);
        for i in 1..=band_count {
            let band = ds.rasterband(i)?;
            item_size = item_size.max(dtype_bytes(band.band_type()));
            nodata.push(band.no_data_value());
        }

        Ok(SourceDescriptor {
            path: path.to_path_buf(),
            transform,
            projection,
            bounds,
            band_count,
            item_size,
            nodata,
        })
    }

    /// Source bounds reprojected into another CRS, densifying each edge so
    /// curved projections do not clip the extent.
    pub fn bounds_in(&self, epsg: u32) -> Result<BBox> {
        if self.projection.is_empty() {
            return Err(Error::config(format!(
                "source {:?} has no projection; cannot reproject bounds",
                self.path
            )));
        }
        let mut src = SpatialRef::from_wkt(&self.projection)?;
        let mut dst = SpatialRef::from_epsg(epsg)?;
        src.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        dst.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        let transform = CoordTransform::new(&src, &dst)?;

        const STEPS: usize = 20;
        let b = self.bounds;
        let mut xs = Vec::with_capacity(STEPS * 4);
        let mut ys = Vec::with_capacity(STEPS * 4);
        for i in 0..=STEPS {
            let fx = b.left + b.width() * i as f64 / STEPS as f64;
            let fy = b.bottom + b.height() * i as f64 / STEPS as f64;
            xs.extend([fx, fx, b.left, b.right]);
            ys.extend([b.bottom, b.top, fy, fy]);
        }
        let mut zs = vec![0.0; xs.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

        let finite = |v: &&f64| v.is_finite();
        let left = xs.iter().filter(finite).cloned().fold(f64::INFINITY, f64::min);
        let right = xs
            .iter()
            .filter(finite)
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let bottom = ys.iter().filter(finite).cloned().fold(f64::INFINITY, f64::min);
        let top = ys
            .iter()
            .filter(finite)
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if !left.is_finite() || !right.is_finite() {
            return Err(Error::config(format!(
                "source {:?} bounds do not project into EPSG:{}",
                self.path, epsg
            )));
        }
        Ok(BBox::new(left, bottom, right, top))
    }
}

fn dtype_bytes(t: GdalDataType) -> usize {
    match t {
        GdalDataType::UInt8 => 1,
        GdalDataType::UInt16 | GdalDataType::Int16 => 2,
        GdalDataType::UInt32 | GdalDataType::Int32 | GdalDataType::Float32 => 4,
        // Unknown and 64-bit types plan conservatively.
        _ => 8,
    }
}

/// Warp one destination window's footprint out of the source into a scratch
/// GeoTIFF, reprojecting and resampling on the fly.
///
/// Runs `gdalwarp` as a subprocess, like every other heavy warp in this
/// tool: it isolates GDAL's block cache in a short-lived process and gives
/// us `-r` access to all twelve resampling methods.
pub fn warp_window(
    source: &SourceDescriptor,
    dst_crs: &str,
    window_bounds: &BBox,
    cols: usize,
    rows: usize,
    resampling: Resampling,
    out: &Path,
) -> Result<()> {
    let mut cmd = Command::new("gdalwarp");
    cmd.arg("-q")
        .arg("-overwrite")
        .arg("-t_srs")
        .arg(dst_crs)
        .arg("-te")
        .args([
            window_bounds.left.to_string(),
            window_bounds.bottom.to_string(),
            window_bounds.right.to_string(),
            window_bounds.top.to_string(),
        ])
        .arg("-ts")
        .args([cols.to_string(), rows.to_string()])
        .arg("-r")
        .arg(resampling.gdal_name())
        .arg("-of")
        .arg("GTiff")
        .arg(&source.path)
        .arg(out);
    debug!("warp: {:?}", cmd);

    let output = cmd
        .output()
        .map_err(|e| Error::Processing(format!("could not execute gdalwarp: {}", e)))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    Err(classify_warp_failure(&stderr))
}

/// Sort a gdalwarp failure into the retryable and non-retryable buckets.
///
/// SSL SYSCALL failures look transient but the underlying connection does
/// not recover transparently, so they are hard failures.
pub fn classify_warp_failure(stderr: &str) -> Error {
    let message = stderr.trim().to_string();
    if message.contains("SSL SYSCALL") {
        return Error::Warp {
            message,
            transient: false,
        };
    }
    const TRANSIENT: &[&str] = &[
        "ReadBlock failed",
        "block read failed",
        "Connection reset",
        "Connection timed out",
        "Could not resolve host",
        "Operation timed out",
        "CURL error",
        "429",
        "503",
        "rate limit",
    ];
    let transient = TRANSIENT.iter().any(|p| message.contains(p));
    Error::Warp { message, transient }
}

/// True for the sub-pixel alignment edge case at tile boundaries: a window
/// only one pixel wide or tall whose read fell just outside the dataset.
pub fn is_thin_window_overflow(err: &Error, window: &Window) -> bool {
    let thin = window.cols <= 1 || window.rows <= 1;
    if !thin {
        return false;
    }
    let text = err.to_string();
    text.contains("Access window out of range") || text.contains("out of range")
}

/// Read every band of a dataset as `f64` planes with validity masks derived
/// from the band nodata values.
pub fn read_bands(path: &Path) -> Result<BandStack> {
    let ds = Dataset::open(path)?;
    let (cols, rows) = ds.raster_size();
    let band_count = ds.raster_count() as usize;
    let mut bands = Vec::with_capacity(band_count);
    for i in 1..=band_count {
        let band = ds.rasterband(i)?;
        let nodata = band.no_data_value();
        let buf = band.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;
        let data = Array2::from_shape_vec((rows, cols), buf.data().to_vec())
            .map_err(|e| Error::Processing(format!("band {} shape mismatch: {}", i, e)))?;
        let valid = match nodata {
            Some(nd) => data.mapv(|v| v != nd && !v.is_nan()),
            None => Array2::from_elem((rows, cols), true),
        };
        bands.push(Band::new(data, valid));
    }
    Ok(BandStack::new(bands))
}

/// Create an empty GeoTIFF for a raster profile of arbitrary size. Used both
/// for the tile's final tiled output and for small per-window scratch files.
pub fn create_tiff(path: &Path, profile: &RasterProfile, cols: usize, rows: usize, tiled: bool)
-> Result<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut opts: Vec<String> = vec![format!("COMPRESS={}", profile.compression.gdal_name())];
    if tiled {
        opts.push("TILED=YES".into());
        opts.push(format!("BLOCKXSIZE={}", profile.block_size));
        opts.push(format!("BLOCKYSIZE={}", profile.block_size));
        opts.push("BIGTIFF=IF_SAFER".into());
    }
    if profile.dtype == DataType::Boolean {
        opts.push("NBITS=1".into());
    }
    // Signed bytes are stored the pre-GDAL-3.7 way so older runtimes can
    // read them.
    if profile.dtype == DataType::Int8 {
        opts.push("PIXELTYPE=SIGNEDBYTE".into());
    }
    let options = RasterCreationOptions::from_iter(opts.iter().map(|s| s.as_str()));

    let mut ds = match profile.dtype {
        DataType::Boolean | DataType::Uint8 | DataType::Int8 => driver
            .create_with_band_type_with_options::<u8, _>(
                path,
                cols,
                rows,
                profile.band_count,
                &options,
            )?,
        DataType::Uint16 => driver.create_with_band_type_with_options::<u16, _>(
            path,
            cols,
            rows,
            profile.band_count,
            &options,
        )?,
        DataType::Int16 => driver.create_with_band_type_with_options::<i16, _>(
            path,
            cols,
            rows,
            profile.band_count,
            &options,
        )?,
        DataType::Uint32 => driver.create_with_band_type_with_options::<u32, _>(
            path,
            cols,
            rows,
            profile.band_count,
            &options,
        )?,
        DataType::Int32 => driver.create_with_band_type_with_options::<i32, _>(
            path,
            cols,
            rows,
            profile.band_count,
            &options,
        )?,
        DataType::Float32 => driver.create_with_band_type_with_options::<f32, _>(
            path,
            cols,
            rows,
            profile.band_count,
            &options,
        )?,
        DataType::Float64 => driver.create_with_band_type_with_options::<f64, _>(
            path,
            cols,
            rows,
            profile.band_count,
            &options,
        )?,
    };

    ds.set_geo_transform(&profile.transform)?;
    let srs = SpatialRef::from_epsg(profile.epsg)?;
    ds.set_projection(&srs.to_wkt()?)?;
    if let Some(nodata) = &profile.nodata {
        for i in 0..profile.band_count {
            if let Some(value) = nodata.value_for_band(i) {
                let mut band = ds.rasterband(i + 1)?;
                band.set_no_data_value(Some(value))?;
            }
        }
    }
    Ok(())
}

/// Open a dataset for in-place window writes.
pub fn open_update(path: &Path) -> Result<Dataset> {
    let ds = Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
            ..Default::default()
        },
    )?;
    Ok(ds)
}

macro_rules! write_plane_as {
    ($ty:ty, $ds:expr, $band:expr, $window:expr, $plane:expr) => {{
        let data: Vec<$ty> = $plane.iter().map(|&v| v as $ty).collect();
        let mut buf = Buffer::new(($window.cols, $window.rows), data);
        let mut band = $ds.rasterband($band)?;
        band.write(
            ($window.col_off as isize, $window.row_off as isize),
            ($window.cols, $window.rows),
            &mut buf,
        )?;
    }};
}

/// Write filled `f64` planes into a window of an open dataset, casting to
/// the destination data type. Plane order is band order.
pub fn write_window(
    ds: &Dataset,
    window: &Window,
    planes: &[Array2<f64>],
    dtype: DataType,
) -> Result<()> {
    for (i, plane) in planes.iter().enumerate() {
        let band = i + 1;
        match dtype {
            DataType::Boolean | DataType::Uint8 => write_plane_as!(u8, ds, band, window, plane),
            // Two's-complement reinterpretation into the unsigned byte band.
            DataType::Int8 => {
                let data: Vec<u8> = plane.iter().map(|&v| (v as i8) as u8).collect();
                let mut buf = Buffer::new((window.cols, window.rows), data);
                let mut band = ds.rasterband(band)?;
                band.write(
                    (window.col_off as isize, window.row_off as isize),
                    (window.cols, window.rows),
                    &mut buf,
                )?;
            }
            DataType::Uint16 => write_plane_as!(u16, ds, band, window, plane),
            DataType::Int16 => write_plane_as!(i16, ds, band, window, plane),
            DataType::Uint32 => write_plane_as!(u32, ds, band, window, plane),
            DataType::Int32 => write_plane_as!(i32, ds, band, window, plane),
            DataType::Float32 => write_plane_as!(f32, ds, band, window, plane),
            DataType::Float64 => write_plane_as!(f64, ds, band, window, plane),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let e = classify_warp_failure("ERROR 1: IReadBlock failed at X offset 3: ReadBlock failed");
        assert!(e.is_transient());
        let e = classify_warp_failure("ERROR 1: Connection reset by peer");
        assert!(e.is_transient());
        let e = classify_warp_failure("ERROR 1: SSL SYSCALL error: EOF detected");
        assert!(!e.is_transient());
        let e = classify_warp_failure("ERROR 4: no such file or directory");
        assert!(!e.is_transient());
    }

    #[test]
    fn thin_window_overflow_detection() {
        let err = Error::Warp {
            message: "Access window out of range in RasterIO()".into(),
            transient: false,
        };
        assert!(is_thin_window_overflow(&err, &Window::new(0, 0, 1, 400)));
        assert!(is_thin_window_overflow(&err, &Window::new(0, 0, 400, 1)));
        // A full-size window never qualifies.
        assert!(!is_thin_window_overflow(&err, &Window::new(0, 0, 400, 400)));

        let other = Error::Processing("boom".into());
        assert!(!is_thin_window_overflow(&other, &Window::new(0, 0, 1, 1)));
    }
}
