//! I/O collaborators: GDAL datasets, storage backends, secrets, and the
//! derived metadata writers (VRT mosaics, extent GeoJSON).
pub mod extent;
pub mod gdal;
pub mod secrets;
pub mod storage;
pub mod vrt;
