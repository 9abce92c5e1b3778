use clap::Parser;
use std::path::PathBuf;

use tilepipe::types::{Compression, DataType, Resampling};

#[derive(Parser)]
#[command(name = "tilepipe", version, about = "Tile-grid raster ETL")]
pub struct CliArgs {
    /// Layer definition JSON file (alternative to the inline flags below)
    #[arg(short, long)]
    pub layer: Option<PathBuf>,

    /// Dataset name (inline layer mode)
    #[arg(long)]
    pub dataset: Option<String>,

    /// Dataset version, e.g. v1.8 (inline layer mode)
    #[arg(long)]
    pub version: Option<String>,

    /// Grid name: "<degrees>/<pixels>" (e.g. 10/40000) or "zoom_<z>"
    #[arg(long)]
    pub grid: Option<String>,

    /// Source raster URI; repeat for multi-source layers
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Destination pixel data type
    #[arg(long, value_enum)]
    pub dtype: Option<DataType>,

    /// Destination nodata value; repeat for one value per band
    #[arg(long = "nodata")]
    pub nodata: Vec<f64>,

    /// Number of destination bands
    #[arg(long, default_value_t = 1)]
    pub band_count: usize,

    /// Resampling method passed to the warp
    #[arg(long, value_enum, default_value_t = Resampling::Nearest)]
    pub resampling: Resampling,

    /// GeoTIFF compression
    #[arg(long, value_enum, default_value_t = Compression::Deflate)]
    pub compression: Compression,

    /// Pixel formula over band variables A, B, C, ... (e.g. "A > 30")
    #[arg(long)]
    pub calc: Option<String>,

    /// Comma-separated tile-ID allow-list; omit to process the whole grid
    #[arg(long, value_delimiter = ',')]
    pub subset: Option<Vec<String>>,

    /// Re-process tiles whose output already exists at the destination
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Destination root URI (local directory, s3:// or gs://)
    #[arg(short, long)]
    pub target: String,

    /// Worker threads (default: all cores)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Fraction of available memory handed to the window planner
    #[arg(long)]
    pub mem_fraction: Option<f64>,

    /// Scratch directory (default: a fresh temp dir, removed on exit)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Leave pre-existing tiles out of the mosaic/extent metadata
    #[arg(long, default_value_t = false)]
    pub ignore_existing: bool,

    /// Enable logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
