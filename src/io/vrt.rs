//! VRT mosaic manifests.
//!
//! A layer's processed tiles are stitched into one virtual raster so
//! consumers can open the whole layer as a single dataset without copying
//! pixels.
use std::io::Cursor;

use quick_xml::events::BytesText;
use quick_xml::writer::Writer;

use crate::core::grid::BBox;
use crate::core::tile::{NoData, RasterProfile};
use crate::error::{Error, Result};

/// One contributing raster: its storage key (relative to the VRT) and its
/// geographic bounds.
#[derive(Clone, Debug)]
pub struct MosaicSource {
    pub key: String,
    pub bounds: BBox,
}

/// Render the VRT XML for a set of tiles sharing one raster profile.
pub fn build_vrt(profile: &RasterProfile, sources: &[MosaicSource]) -> Result<String> {
    if sources.is_empty() {
        return Err(Error::Processing("cannot build a VRT of zero tiles".into()));
    }
    let mut extent = sources[0].bounds;
    for s in &sources[1..] {
        extent = BBox::new(
            extent.left.min(s.bounds.left),
            extent.bottom.min(s.bounds.bottom),
            extent.right.max(s.bounds.right),
            extent.top.max(s.bounds.top),
        );
    }
    let xres = profile.transform[1];
    let yres = -profile.transform[5];
    let raster_x = (extent.width() / xres).round() as usize;
    let raster_y = (extent.height() / yres).round() as usize;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let x_attr = raster_x.to_string();
    let y_attr = raster_y.to_string();
    let geo_transform = format!(
        "{}, {}, 0.0, {}, 0.0, {}",
        extent.left, xres, extent.top, -yres
    );
    let srs = format!("EPSG:{}", profile.epsg);
    let dtype = profile.dtype.gdal_name();

    writer
        .create_element("VRTDataset")
        .with_attributes([
            ("rasterXSize", x_attr.as_str()),
            ("rasterYSize", y_attr.as_str()),
        ])
        .write_inner_content(|vrt| {
            vrt.create_element("SRS")
                .write_text_content(BytesText::new(&srs))?;
            vrt.create_element("GeoTransform")
                .write_text_content(BytesText::new(&geo_transform))?;
            for band in 1..=profile.band_count {
                let band_attr = band.to_string();
                let nodata = profile
                    .nodata
                    .as_ref()
                    .and_then(|nd| nd.value_for_band(band - 1));
                vrt.create_element("VRTRasterBand")
                    .with_attributes([("dataType", dtype), ("band", band_attr.as_str())])
                    .write_inner_content(|b| {
                        if let Some(value) = nodata {
                            b.create_element("NoDataValue")
                                .write_text_content(BytesText::new(&value.to_string()))?;
                        }
                        for source in sources {
                            write_simple_source(b, profile, &extent, source, band)?;
                        }
                        Ok(())
                    })?;
            }
            Ok(())
        })
        .map_err(|e| Error::Processing(format!("vrt serialization: {}", e)))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| Error::Processing(format!("vrt is not valid utf-8: {}", e)))
}

fn write_simple_source<W: std::io::Write>(
    band: &mut Writer<W>,
    profile: &RasterProfile,
    extent: &BBox,
    source: &MosaicSource,
    band_no: usize,
) -> quick_xml::Result<()> {
    let xres = profile.transform[1];
    let yres = -profile.transform[5];
    let size = (
        (source.bounds.width() / xres).round() as usize,
        (source.bounds.height() / yres).round() as usize,
    );
    let dst_x = ((source.bounds.left - extent.left) / xres).round() as usize;
    let dst_y = ((extent.top - source.bounds.top) / yres).round() as usize;

    let x_size = size.0.to_string();
    let y_size = size.1.to_string();
    let dst_x = dst_x.to_string();
    let dst_y = dst_y.to_string();
    let band_no = band_no.to_string();

    band.create_element("SimpleSource").write_inner_content(|s| {
        s.create_element("SourceFilename")
            .with_attribute(("relativeToVRT", "1"))
            .write_text_content(BytesText::new(&source.key))?;
        s.create_element("SourceBand")
            .write_text_content(BytesText::new(&band_no))?;
        s.create_element("SrcRect")
            .with_attributes([
                ("xOff", "0"),
                ("yOff", "0"),
                ("xSize", x_size.as_str()),
                ("ySize", y_size.as_str()),
            ])
            .write_empty()?;
        s.create_element("DstRect")
            .with_attributes([
                ("xOff", dst_x.as_str()),
                ("yOff", dst_y.as_str()),
                ("xSize", x_size.as_str()),
                ("ySize", y_size.as_str()),
            ])
            .write_empty()?;
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Compression, DataType};

    fn profile() -> RasterProfile {
        RasterProfile {
            cols: 4000,
            rows: 4000,
            block_size: 400,
            dtype: DataType::Uint8,
            nodata: Some(NoData::Single(0.0)),
            compression: Compression::Deflate,
            epsg: 4326,
            transform: [0.0, 0.0025, 0.0, 10.0, 0.0, -0.0025],
            band_count: 1,
        }
    }

    #[test]
    fn vrt_lists_every_tile_once() {
        let sources = vec![
            MosaicSource {
                key: "geotiff/00N_000E.tif".into(),
                bounds: BBox::new(0.0, 0.0, 10.0, 10.0),
            },
            MosaicSource {
                key: "geotiff/00N_010E.tif".into(),
                bounds: BBox::new(10.0, 0.0, 20.0, 10.0),
            },
        ];
        let xml = build_vrt(&profile(), &sources).unwrap();
        assert_eq!(xml.matches("<SimpleSource>").count(), 2);
        assert!(xml.contains("geotiff/00N_000E.tif"));
        assert!(xml.contains("geotiff/00N_010E.tif"));
        // Mosaic spans both tiles: 20 degrees wide at 0.0025 deg/px.
        assert!(xml.contains("rasterXSize=\"8000\""));
        assert!(xml.contains("rasterYSize=\"4000\""));
        // The second tile lands 4000 pixels to the right.
        assert!(xml.contains("xOff=\"4000\""));
        assert!(xml.contains("<NoDataValue>0</NoDataValue>"));
        assert!(xml.contains("dataType=\"Byte\""));
    }

    #[test]
    fn empty_mosaic_is_an_error() {
        assert!(build_vrt(&profile(), &[]).is_err());
    }
}
