use anyhow::{Context, Result};
use gdal::programs::raster::{build_vrt, BuildVRTOptions};
use gdal::raster::RasterCreationOptions;
use gdal::{Dataset, DriverManager, GeoTransform};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::commons::basic_functions::ensure_dir;
use crate::errors::DtmError;
use crate::geometric::raster::ensure_north_up;

/// gdalbuildvrt arguments of the mosaic.
///
/// The output covers the union of the source extents at the resolution of the first
/// source. With the first source's nodata as source and VRT nodata, pixels holding
/// nodata are transparent and uncovered pixels are nodata (0 when there is none).
fn vrt_arguments(first_transform: &GeoTransform, nodata: Option<f64>) -> Vec<String> {
    let mut args = vec![
        "-tr".to_string(),
        first_transform[1].abs().to_string(),
        first_transform[5].abs().to_string(),
    ];
    if let Some(nodata) = nodata {
        args.extend([
            "-srcnodata".to_string(),
            nodata.to_string(),
            "-vrtnodata".to_string(),
            nodata.to_string(),
        ]);
    }
    args
}

/// Merges the clipped rasters into a single GeoTIFF
pub struct Mosaicker {
    output_path: PathBuf,
}

impl Mosaicker {
    pub fn new(output_path: PathBuf) -> Self {
        Mosaicker { output_path }
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }

    /// Open every raster, mosaic them through a VRT and write the result as GeoTIFF.
    /// Earlier rasters win where they overlap.
    /// Fails on an empty list, on the first raster that cannot be opened
    /// and on rasters whose band count differs from the first one.
    pub fn merge(&self, rasters: &[PathBuf]) -> Result<PathBuf> {
        if rasters.is_empty() {
            return Err(DtmError::EmptyMosaic.into());
        }

        let mut datasets = Vec::with_capacity(rasters.len());
        for path in rasters {
            let dataset =
                Dataset::open(path).context(format!("Failed to open clipped raster: {:?}", path))?;
            datasets.push(dataset);
        }

        let first = &datasets[0];
        let band_count = first.raster_count();
        let first_transform = first
            .geo_transform()
            .context(format!("Raster has no geotransform: {:?}", rasters[0]))?;
        let nodata = first
            .rasterband(1)
            .context(format!("Failed to get band 1 of {:?}", rasters[0]))?
            .no_data_value();

        for (dataset, path) in datasets.iter().zip(rasters) {
            let transform = dataset
                .geo_transform()
                .context(format!("Raster has no geotransform: {:?}", path))?;
            ensure_north_up(&transform)?;
            if dataset.raster_count() != band_count {
                return Err(DtmError::BandMismatch {
                    path: path.display().to_string(),
                    expected: band_count,
                    found: dataset.raster_count(),
                }
                .into());
            }
        }

        let args = vrt_arguments(&first_transform, nodata);
        debug!("Building VRT mosaic with {:?}", args);
        let options = BuildVRTOptions::new(args).context("Invalid VRT options")?;

        // a VRT draws its sources in order, later ones on top
        let sources: Vec<&Dataset> = datasets.iter().rev().collect();
        let vrt = build_vrt(None, &sources, Some(options)).context("Failed to build VRT mosaic")?;

        if let Some(parent) = self.output_path.parent() {
            ensure_dir(parent)?;
        }
        if self.output_path.exists() {
            std::fs::remove_file(&self.output_path)
                .context(format!("Failed to remove existing file: {:?}", self.output_path))?;
        }

        let driver = DriverManager::get_driver_by_name("GTiff")
            .context("Failed to get GTiff driver")?;
        let merged = vrt
            .create_copy(&driver, &self.output_path, &RasterCreationOptions::new())
            .context(format!("Failed to write merged raster: {:?}", self.output_path))?;
        let (width, height) = merged.raster_size();

        // release the mosaic and its sources
        drop(merged);
        drop(vrt);
        drop(sources);
        drop(datasets);

        info!(
            "Merged {} rasters into {:?} ({}x{})",
            rasters.len(),
            self.output_path,
            width,
            height
        );
        Ok(self.output_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::raster::RasterGrid;

    fn tile(origin_x: f64, origin_y: f64, base: f64, nodata: Option<f64>) -> RasterGrid {
        let mut grid = RasterGrid::filled(4, 4, 1, [origin_x, 1.0, 0.0, origin_y, 0.0, -1.0], 0.0);
        for (i, v) in grid.bands[0].iter_mut().enumerate() {
            *v = base + i as f64;
        }
        grid.nodata = nodata;
        grid
    }

    /// Write the tiles as clipped_<i>.tif, merge them and read the mosaic back
    fn merge_tiles(tiles: &[RasterGrid]) -> Result<RasterGrid> {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, tile) in tiles.iter().enumerate() {
            let path = dir.path().join(format!("clipped_{}.tif", i));
            tile.write_geotiff(&path).unwrap();
            paths.push(path);
        }
        let output = dir.path().join("merged").join("merged_clipped.tif");
        let merged = Mosaicker::new(output).merge(&paths)?;
        RasterGrid::read(&merged)
    }

    #[test]
    fn test_merge_disjoint_tiles_covers_union() {
        let a = tile(0.0, 4.0, 100.0, Some(-9999.0));
        let b = tile(6.0, 10.0, 200.0, Some(-9999.0));

        let mosaic = merge_tiles(&[a.clone(), b.clone()]).unwrap();
        assert_eq!((mosaic.width, mosaic.height), (10, 10));
        assert_eq!(mosaic.transform, [0.0, 1.0, 0.0, 10.0, 0.0, -1.0]);

        // a sits in the lower left corner, b in the upper right
        for row in 0..4 {
            for col in 0..4 {
                assert_eq!(mosaic.value(0, col, row + 6), a.value(0, col, row));
                assert_eq!(mosaic.value(0, col + 6, row), b.value(0, col, row));
            }
        }
        // the gap between them is nodata
        assert_eq!(mosaic.value(0, 5, 5), -9999.0);
        assert_eq!(mosaic.nodata, Some(-9999.0));
    }

    #[test]
    fn test_first_source_wins_in_overlap() {
        let a = tile(0.0, 4.0, 100.0, None);
        let b = tile(2.0, 4.0, 200.0, None);

        let mosaic = merge_tiles(&[a.clone(), b.clone()]).unwrap();
        assert_eq!((mosaic.width, mosaic.height), (6, 4));
        assert_eq!(mosaic.value(0, 2, 0), a.value(0, 2, 0));
        assert_eq!(mosaic.value(0, 3, 3), a.value(0, 3, 3));
        assert_eq!(mosaic.value(0, 5, 0), b.value(0, 3, 0));
    }

    #[test]
    fn test_nodata_of_first_does_not_hide_second() {
        let mut a = tile(0.0, 4.0, 100.0, Some(-1.0));
        a.bands[0][0] = -1.0;
        let b = tile(0.0, 4.0, 200.0, Some(-1.0));

        let mosaic = merge_tiles(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(mosaic.value(0, 0, 0), b.value(0, 0, 0));
        assert_eq!(mosaic.value(0, 1, 0), a.value(0, 1, 0));
    }

    #[test]
    fn test_single_source_is_unchanged() {
        let a = tile(12.0, 40.0, 1.0, Some(-9999.0));
        let mosaic = merge_tiles(std::slice::from_ref(&a)).unwrap();
        assert_eq!(mosaic.transform, a.transform);
        assert_eq!(mosaic.bands, a.bands);
        assert_eq!(mosaic.data_type, a.data_type);
    }

    #[test]
    fn test_merge_nothing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("merged").join("merged_clipped.tif");
        let err = Mosaicker::new(output.clone()).merge(&[]).unwrap_err();
        assert!(matches!(err.downcast_ref::<DtmError>(), Some(DtmError::EmptyMosaic)));
        assert!(!output.exists());
    }

    #[test]
    fn test_band_count_mismatch_names_the_raster() {
        let a = tile(0.0, 4.0, 100.0, None);
        let mut b = tile(4.0, 4.0, 200.0, None);
        b.bands.push(b.bands[0].clone());

        let err = merge_tiles(&[a, b]).unwrap_err();
        match err.downcast_ref::<DtmError>() {
            Some(DtmError::BandMismatch { path, expected, found }) => {
                assert!(path.ends_with("clipped_1.tif"));
                assert_eq!((*expected, *found), (1, 2));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_merge_replaces_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("clipped_a.tif");
        let b_path = dir.path().join("clipped_b.tif");
        tile(0.0, 4.0, 100.0, Some(-9999.0)).write_geotiff(&a_path).unwrap();
        tile(6.0, 10.0, 200.0, Some(-9999.0)).write_geotiff(&b_path).unwrap();

        let output = dir.path().join("merged").join("merged_clipped.tif");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"stale").unwrap();

        let merged = Mosaicker::new(output.clone()).merge(&[a_path, b_path]).unwrap();
        assert_eq!(merged, output);

        let grid = RasterGrid::read(&output).unwrap();
        assert_eq!((grid.width, grid.height), (10, 10));
        assert_eq!(grid.value(0, 0, 6), 100.0);
        assert_eq!(grid.value(0, 6, 0), 200.0);
        assert_eq!(grid.nodata, Some(-9999.0));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mosaicker = Mosaicker::new(dir.path().join("merged.tif"));
        assert!(mosaicker.merge(&[dir.path().join("missing.tif")]).is_err());
    }
}
