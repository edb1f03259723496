use thiserror::Error;

/// Domain failures of the DTM pipeline.
/// These travel inside `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Error, Debug)]
pub enum DtmError {
    #[error("no clipped rasters to merge")]
    EmptyMosaic,

    #[error("tile {index} has no string 'url' property")]
    MissingUrl { index: usize },

    #[error("boundary does not overlap raster {0}")]
    NoOverlap(String),

    #[error("unsupported GDAL data type: {0}")]
    UnsupportedDataType(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("raster {path} has {found} bands, expected {expected}")]
    BandMismatch {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("rotated geotransform is not supported: {0:?}")]
    RotatedRaster([f64; 6]),
}
