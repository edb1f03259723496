use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::collect::download::{DownloadReport, Fetcher};
use crate::collect::global_variables::{
    BOUNDARY_PATH, CLIPPED_DIR, DOWNLOAD_DIR, MERGED_DIR, MERGED_FILE_NAME, TILE_INDEX_PATH,
};
use crate::collect::tile_index::{SamplingBoundary, TileIndex};
use crate::commons::basic_functions::ensure_dir;
use crate::geo_core::GeoCore;
use crate::geometric::clip::Clipper;
use crate::geometric::merge::Mosaicker;

/// Locations used by the DTM pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtmConfig {
    pub tile_index_path: PathBuf,
    pub boundary_path: PathBuf,
    pub download_dir: PathBuf,
    pub clipped_dir: PathBuf,
    pub merged_dir: PathBuf,
}

impl Default for DtmConfig {
    fn default() -> Self {
        DtmConfig {
            tile_index_path: PathBuf::from(TILE_INDEX_PATH),
            boundary_path: PathBuf::from(BOUNDARY_PATH),
            download_dir: PathBuf::from(DOWNLOAD_DIR),
            clipped_dir: PathBuf::from(CLIPPED_DIR),
            merged_dir: PathBuf::from(MERGED_DIR),
        }
    }
}

impl DtmConfig {
    /// Default layout below another root directory
    pub fn with_root(root: &Path) -> Self {
        DtmConfig {
            tile_index_path: root.join(TILE_INDEX_PATH),
            boundary_path: root.join(BOUNDARY_PATH),
            download_dir: root.join(DOWNLOAD_DIR),
            clipped_dir: root.join(CLIPPED_DIR),
            merged_dir: root.join(MERGED_DIR),
        }
    }

    pub fn merged_path(&self) -> PathBuf {
        self.merged_dir.join(MERGED_FILE_NAME)
    }
}

/// DTM structure
/// Selects the DTM tiles of the sampling area from the tile index, downloads them,
/// clips them to the sampling area and merges them into one GeoTIFF
pub struct Dtm {
    config: DtmConfig,
    /// GeoCore for CRS handling (CRS of the tile index)
    pub geo_core: GeoCore,
    download_report: Option<DownloadReport>,
    clipped_rasters: Vec<PathBuf>,
    merged_path: Option<PathBuf>,
}

impl Dtm {
    /// Create a new Dtm instance and its output directories
    pub fn new(config: DtmConfig) -> Result<Self> {
        ensure_dir(&config.download_dir)?;
        ensure_dir(&config.clipped_dir)?;
        ensure_dir(&config.merged_dir)?;

        Ok(Dtm {
            config,
            geo_core: GeoCore::default(),
            download_report: None,
            clipped_rasters: Vec::new(),
            merged_path: None,
        })
    }

    /// Run the complete workflow
    /// index + boundary → intersecting urls → downloads → clipped rasters → mosaic
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    /// Internal run method that can be called mutably
    pub fn run_internal(&mut self) -> Result<PathBuf> {
        let boundary = SamplingBoundary::load(&self.config.boundary_path, self.geo_core)?;
        let tile_index = TileIndex::load(&self.config.tile_index_path, self.geo_core)?;

        let urls = tile_index.select_intersecting_urls(&boundary)?;

        let fetcher = Fetcher::new(self.config.download_dir.clone())?;
        self.download_report = Some(fetcher.fetch_all(&urls)?);

        // everything in the download directory, files of earlier runs included
        let rasters = Clipper::discover_rasters(&self.config.download_dir)?;

        let clipper = Clipper::new(boundary.union()?, self.config.clipped_dir.clone());
        self.clipped_rasters = clipper.clip_all(&rasters)?;

        let mosaicker = Mosaicker::new(self.config.merged_path());
        let merged_path = mosaicker.merge(&self.clipped_rasters)?;
        info!("DTM of the sampling area written to {:?}", merged_path);

        self.merged_path = Some(merged_path.clone());
        Ok(merged_path)
    }

    pub fn get_config(&self) -> &DtmConfig {
        &self.config
    }

    pub fn get_download_report(&self) -> Option<&DownloadReport> {
        self.download_report.as_ref()
    }

    pub fn get_clipped_rasters(&self) -> &[PathBuf] {
        &self.clipped_rasters
    }

    /// Path of the merged GeoTIFF, once `run` succeeded
    pub fn get_merged_path(&self) -> Option<&Path> {
        self.merged_path.as_deref()
    }
}
