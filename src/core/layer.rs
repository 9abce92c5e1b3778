//! Layer definitions: what to ingest, into which grid, and how.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::formula::Formula;
use crate::core::grid::Grid;
use crate::core::tile::NoData;
use crate::error::{Error, Result};
use crate::types::{Compression, DataType, Resampling};

fn default_band_count() -> usize {
    1
}

fn default_resampling() -> Resampling {
    Resampling::Nearest
}

fn default_compression() -> Compression {
    Compression::Deflate
}

/// A structured layer definition, loadable from JSON or assembled from CLI
/// flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    pub dataset: String,
    pub version: String,
    /// Grid name, e.g. `"10/40000"` or `"zoom_14"`.
    pub grid: String,
    /// Source raster URIs (local paths, `s3://`, or `gs://`).
    pub sources: Vec<String>,
    pub dtype: DataType,
    #[serde(default)]
    pub nodata: Option<NoData>,
    #[serde(default = "default_band_count")]
    pub band_count: usize,
    #[serde(default = "default_resampling")]
    pub resampling: Resampling,
    #[serde(default = "default_compression")]
    pub compression: Compression,
    /// Optional pixel formula over band variables `A`, `B`, `C`, ...
    #[serde(default)]
    pub calc: Option<String>,
    /// Explicit tile-ID allow-list; `None` processes the whole grid.
    #[serde(default)]
    pub subset: Option<Vec<String>>,
    #[serde(default)]
    pub overwrite: bool,
    /// Leave pre-existing tiles out of the mosaic/extent metadata.
    #[serde(default)]
    pub skip_existing_artifacts: bool,
}

impl Layer {
    pub fn from_json_file(path: &Path) -> Result<Layer> {
        let text = std::fs::read_to_string(path)?;
        let layer: Layer = serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("invalid layer definition: {}", e)))?;
        layer.validate()?;
        Ok(layer)
    }

    /// Check required fields and parse the formula once, before any tile
    /// work starts. Configuration errors here are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.is_empty() {
            return Err(Error::config("layer dataset must not be empty"));
        }
        if self.version.is_empty() {
            return Err(Error::config("layer version must not be empty"));
        }
        if self.sources.is_empty() {
            return Err(Error::config("layer needs at least one source URI"));
        }
        if self.band_count == 0 {
            return Err(Error::config("layer band count must be at least 1"));
        }
        if let Some(NoData::PerBand(values)) = &self.nodata {
            if values.len() != self.band_count {
                return Err(Error::config(format!(
                    "per-band nodata has {} values for {} bands",
                    values.len(),
                    self.band_count
                )));
            }
        }
        Grid::from_name(&self.grid)?;
        if let Some(expr) = &self.calc {
            Formula::parse(expr)?;
        }
        Ok(())
    }

    pub fn grid(&self) -> Result<Grid> {
        Grid::from_name(&self.grid)
    }

    pub fn formula(&self) -> Result<Option<Formula>> {
        match &self.calc {
            Some(expr) => Ok(Some(Formula::parse(expr)?)),
            None => Ok(None),
        }
    }

    /// Storage key prefix for this layer's artifacts.
    pub fn prefix(&self, epsg: u32) -> String {
        format!(
            "{}/{}/raster/epsg-{}/{}",
            self.dataset, self.version, epsg, self.grid
        )
    }

    /// Storage key of one tile's GeoTIFF.
    pub fn tile_key(&self, epsg: u32, tile_id: &str) -> String {
        format!("{}/geotiff/{}.tif", self.prefix(epsg), tile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "dataset": "umd_tree_cover_density",
            "version": "v1.8",
            "grid": "10/40000",
            "sources": ["/data/source.tif"],
            "dtype": "uint8",
            "nodata": 0
        }"#
    }

    #[test]
    fn parse_minimal_layer() {
        let layer: Layer = serde_json::from_str(minimal_json()).unwrap();
        layer.validate().unwrap();
        assert_eq!(layer.band_count, 1);
        assert_eq!(layer.resampling, Resampling::Nearest);
        assert_eq!(layer.compression, Compression::Deflate);
        assert_eq!(layer.nodata, Some(NoData::Single(0.0)));
        assert!(!layer.overwrite);
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let mut layer: Layer = serde_json::from_str(minimal_json()).unwrap();
        layer.sources.clear();
        assert!(layer.validate().is_err());

        let mut layer: Layer = serde_json::from_str(minimal_json()).unwrap();
        layer.grid = "nope".into();
        assert!(layer.validate().is_err());

        let mut layer: Layer = serde_json::from_str(minimal_json()).unwrap();
        layer.calc = Some("A +".into());
        assert!(layer.validate().is_err());

        let mut layer: Layer = serde_json::from_str(minimal_json()).unwrap();
        layer.nodata = Some(NoData::PerBand(vec![0.0, 0.0]));
        assert!(layer.validate().is_err(), "nodata arity must match bands");
    }

    #[test]
    fn storage_keys() {
        let layer: Layer = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(
            layer.tile_key(4326, "00N_000E"),
            "umd_tree_cover_density/v1.8/raster/epsg-4326/10/40000/geotiff/00N_000E.tif"
        );
    }
}
