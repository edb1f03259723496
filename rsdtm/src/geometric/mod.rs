pub mod clip;
pub mod dtm;
pub mod merge;
pub mod raster;
