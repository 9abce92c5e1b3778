#![doc = r#"
tilepipe — a tile-grid raster ETL engine.

This crate partitions the world into a named tile grid, determines which
tiles intersect a source raster, reprojects and resamples the source into
each tile's pixel grid, optionally applies a user-defined pixel formula,
writes tiled GeoTIFF outputs, and uploads the results plus derived metadata
(VRT mosaics, extent GeoJSON) to object storage. It powers the tilepipe CLI
and can be embedded in your own Rust applications.

Requirements
------------
- GDAL development headers and runtime available on your system (the
  `gdalwarp` binary must be on `PATH`).
- Rust 2024 edition toolchain.

Add dependency
--------------
```toml
[dependencies]
tilepipe = "0.1"
```

Quick start: process a layer onto a grid
----------------------------------------
```rust,no_run
use std::path::PathBuf;
use tilepipe::core::config::RuntimeConfig;
use tilepipe::core::layer::Layer;
use tilepipe::core::pipeline::{PipelineOptions, PipelineOrchestrator};
use tilepipe::io::storage;

fn main() -> tilepipe::Result<()> {
    let layer = Layer::from_json_file(&PathBuf::from("layer.json"))?;
    let config = RuntimeConfig::detect(None, None, PathBuf::from("/tmp/tilepipe"));
    let store = storage::from_uri("s3://my-data-lake")?;

    let summary = PipelineOrchestrator::new(
        &layer,
        &config,
        store,
        PipelineOptions {
            target: "s3://my-data-lake".to_string(),
        },
    )
    .run()?;

    println!("{} tiles processed", summary.processed.len());
    Ok(())
}
```

Grid addressing without the pipeline
------------------------------------
```rust
use tilepipe::core::grid::Grid;

fn main() -> tilepipe::Result<()> {
    let grid = Grid::from_name("10/40000")?;
    assert_eq!(grid.tile_id_of(9.4, -3.1)?, "00N_000E");
    Ok(())
}
```
"#]

pub mod core;
pub mod error;
pub mod io;
pub mod types;

pub use error::{Error, Result};

pub use crate::core::config::RuntimeConfig;
pub use crate::core::grid::{BBox, Grid};
pub use crate::core::layer::Layer;
pub use crate::core::pipeline::{PipelineOptions, PipelineOrchestrator, Summary};
pub use crate::core::tile::{NoData, TileStatus};
pub use types::{Compression, DataType, Resampling};
