/// Tile index of the DTM sheets (one polygon + download url per sheet)
pub const TILE_INDEX_PATH: &str = "data/0_json/DTM/kaartbladindex.json";
/// Sampling area boundary
pub const BOUNDARY_PATH: &str = "data/1_shpfiles/AWD_sampling_area.shp";
pub const DOWNLOAD_DIR: &str = "data/2_downloaded_geotiff/DTM";
pub const CLIPPED_DIR: &str = "data/3_clipped/DTM";
pub const MERGED_DIR: &str = "data/4_merged/DTM";

pub const CLIPPED_PREFIX: &str = "clipped_";
pub const MERGED_FILE_NAME: &str = "merged_clipped.tif";
pub const RASTER_EXTENSION: &str = "tif";

/// Amersfoort / RD New, the native CRS of the tile index
pub const TILE_INDEX_EPSG: u32 = 28992;

/// Size of the chunks written while streaming a download
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024;
