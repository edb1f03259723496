use anyhow::{Context, Result};
use gdal::raster::{rasterize, Buffer};
use gdal::{Dataset, DriverManager};
use geo::{BoundingRect, MultiPolygon};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::collect::global_variables::{CLIPPED_PREFIX, RASTER_EXTENSION};
use crate::commons::basic_functions::{ensure_dir, list_files_with_extension};
use crate::errors::DtmError;
use crate::geo_core::{multipolygon_to_gdal, BoundingBox};
use crate::geometric::raster::{ensure_north_up, PixelWindow, RasterGrid};

/// Clips rasters to the sampling area and writes them as `clipped_<name>`
pub struct Clipper {
    /// Union of the sampling area polygons, in the CRS of the rasters
    shape: MultiPolygon<f64>,
    /// Directory receiving the clipped rasters
    output_dir: PathBuf,
}

impl Clipper {
    pub fn new(shape: MultiPolygon<f64>, output_dir: PathBuf) -> Self {
        Clipper { shape, output_dir }
    }

    /// Every raster of the download directory, including files left by an earlier run
    pub fn discover_rasters(download_dir: &Path) -> Result<Vec<PathBuf>> {
        list_files_with_extension(download_dir, RASTER_EXTENSION)
    }

    /// Clip every raster, in order. The first failure aborts.
    pub fn clip_all(&self, rasters: &[PathBuf]) -> Result<Vec<PathBuf>> {
        ensure_dir(&self.output_dir)?;

        let mut clipped = Vec::with_capacity(rasters.len());
        for raster in rasters {
            clipped.push(self.clip_file(raster)?);
        }
        Ok(clipped)
    }

    /// Mask one raster with the sampling area, crop it and write the result
    pub fn clip_file(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .context(format!("Raster path has no file name: {:?}", source))?
            .to_string_lossy();
        let clipped_path = self
            .output_dir
            .join(format!("{}{}", CLIPPED_PREFIX, file_name));

        let dataset =
            Dataset::open(source).context(format!("Failed to open raster: {:?}", source))?;
        let clipped = mask_and_crop(&dataset, &self.shape)
            .context(format!("Failed to clip raster: {:?}", source))?;
        clipped.write_geotiff(&clipped_path)?;

        let (width, height) = dataset.raster_size();
        info!(
            "Clipped {:?} ({}x{}) to {:?} ({}x{})",
            source, width, height, clipped_path, clipped.width, clipped.height
        );
        Ok(clipped_path)
    }
}

/// Restrict a raster to a shape: read only the pixel window covering the shape's bounds,
/// then set every pixel whose center is outside the shape to the fill value
/// (nodata, or 0 when the raster has none).
pub fn mask_and_crop(dataset: &Dataset, shape: &MultiPolygon<f64>) -> Result<RasterGrid> {
    let transform = dataset
        .geo_transform()
        .context("Raster has no geotransform")?;
    ensure_north_up(&transform)?;
    let (width, height) = dataset.raster_size();

    let rect = shape
        .bounding_rect()
        .ok_or_else(|| DtmError::InvalidGeometry("empty clipping shape".to_string()))?;
    let window =
        PixelWindow::from_bounds(&transform, width, height, &BoundingBox::from_rect(&rect))
            .ok_or_else(|| {
                DtmError::NoOverlap(format!("{}x{} raster at {:?}", width, height, transform))
            })?;

    let mut cropped = RasterGrid::read_window(dataset, &window)?;
    let inside = rasterize_mask(&cropped, shape)?;
    let fill = cropped.fill_value();
    for band in cropped.bands.iter_mut() {
        for (value, &keep) in band.iter_mut().zip(inside.iter()) {
            if !keep {
                *value = fill;
            }
        }
    }

    Ok(cropped)
}

/// Row-major mask of the pixels of `grid` whose center lies inside the shape,
/// burnt by GDAL into an in-memory byte raster with the grid's transform
pub fn rasterize_mask(grid: &RasterGrid, shape: &MultiPolygon<f64>) -> Result<Vec<bool>> {
    let driver = DriverManager::get_driver_by_name("MEM").context("Failed to get MEM driver")?;
    let mut mask = driver
        .create_with_band_type::<u8, _>("", grid.width, grid.height, 1)
        .context("Failed to create in-memory mask raster")?;
    mask.set_geo_transform(&grid.transform)
        .context("Failed to set mask geotransform")?;

    let geometry = multipolygon_to_gdal(shape)?;
    rasterize(&mut mask, &[1], &[geometry], &[1.0], None)
        .context("Failed to rasterize the clipping shape")?;

    let band = mask.rasterband(1).context("Failed to get mask band")?;
    let size = (grid.width, grid.height);
    let buffer: Buffer<u8> = band
        .read_as::<u8>((0, 0), size, size, None)
        .context("Failed to read mask band")?;

    Ok(buffer.data().iter().map(|&v| v != 0).collect())
}
