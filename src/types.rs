//! Shared types and enums used across TILEPIPE.
//! Includes pixel `DataType`, warp `Resampling` methods, and GeoTIFF
//! `Compression` schemes.
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Destination pixel data type.
///
/// `Boolean` is stored as an unsigned byte with `NBITS=1` bit packing in the
/// GeoTIFF creation options.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Bytes per pixel as stored on disk.
    pub fn size_of(self) -> usize {
        match self {
            DataType::Boolean | DataType::Uint8 | DataType::Int8 => 1,
            DataType::Uint16 | DataType::Int16 => 2,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// GDAL type name as used by `gdalwarp -ot` and friends.
    pub fn gdal_name(self) -> &'static str {
        match self {
            DataType::Boolean | DataType::Uint8 => "Byte",
            DataType::Int8 => "Int8",
            DataType::Uint16 => "UInt16",
            DataType::Int16 => "Int16",
            DataType::Uint32 => "UInt32",
            DataType::Int32 => "Int32",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Boolean => "boolean",
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        write!(f, "{}", s)
    }
}

/// Resampling method passed to `gdalwarp -r`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resampling {
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Max,
    Min,
    Med,
    Q1,
    Q3,
}

impl Resampling {
    /// Name understood by `gdalwarp -r`.
    pub fn gdal_name(self) -> &'static str {
        match self {
            Resampling::Nearest => "near",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::CubicSpline => "cubicspline",
            Resampling::Lanczos => "lanczos",
            Resampling::Average => "average",
            Resampling::Mode => "mode",
            Resampling::Max => "max",
            Resampling::Min => "min",
            Resampling::Med => "med",
            Resampling::Q1 => "q1",
            Resampling::Q3 => "q3",
        }
    }
}

impl std::fmt::Display for Resampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.gdal_name())
    }
}

/// GeoTIFF compression scheme (`COMPRESS` creation option).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Deflate,
    Lzw,
}

impl Compression {
    pub fn gdal_name(self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Deflate => "DEFLATE",
            Compression::Lzw => "LZW",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.gdal_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_resampling_methods() {
        use clap::ValueEnum;
        assert_eq!(Resampling::value_variants().len(), 12);
    }

    #[test]
    fn dtype_sizes() {
        assert_eq!(DataType::Boolean.size_of(), 1);
        assert_eq!(DataType::Uint16.size_of(), 2);
        assert_eq!(DataType::Float32.size_of(), 4);
        assert_eq!(DataType::Float64.size_of(), 8);
    }
}
