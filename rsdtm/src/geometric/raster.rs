use anyhow::{Context, Result};
use gdal::raster::{Buffer, GdalDataType};
use gdal::{Dataset, Driver, DriverManager, GeoTransform};
use std::path::Path;

use crate::errors::DtmError;
use crate::geo_core::BoundingBox;

/// In-memory raster: every band as row-major f64 values plus the metadata
/// needed to write it back with the pixel type it was read with
#[derive(Debug, Clone)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    /// GDAL-style transform
    /// [x_origin, pixel_width, 0, y_origin, 0, -pixel_height]
    pub transform: GeoTransform,
    pub bands: Vec<Vec<f64>>,
    pub nodata: Option<f64>,
    pub data_type: GdalDataType,
    /// WKT of the spatial reference, empty if unknown
    pub projection: String,
}

impl RasterGrid {
    /// Grid with every pixel of every band set to `fill`
    pub fn filled(
        width: usize,
        height: usize,
        band_count: usize,
        transform: GeoTransform,
        fill: f64,
    ) -> Self {
        RasterGrid {
            width,
            height,
            transform,
            bands: vec![vec![fill; width * height]; band_count],
            nodata: None,
            data_type: GdalDataType::Float64,
            projection: String::new(),
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn value(&self, band: usize, col: usize, row: usize) -> f64 {
        self.bands[band][row * self.width + col]
    }

    /// Value outside of data: the nodata value, 0 if the raster has none
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or(0.0)
    }

    /// Read all bands of a raster file
    pub fn read(path: &Path) -> Result<Self> {
        let dataset =
            Dataset::open(path).context(format!("Failed to open raster: {:?}", path))?;
        Self::from_dataset(&dataset).context(format!("Failed to read raster: {:?}", path))
    }

    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let (width, height) = dataset.raster_size();
        let window = PixelWindow {
            col_off: 0,
            row_off: 0,
            width,
            height,
        };
        Self::read_window(dataset, &window)
    }

    /// Read the pixels of one window of every band, nothing outside of it is loaded
    pub fn read_window(dataset: &Dataset, window: &PixelWindow) -> Result<Self> {
        let band_count = dataset.raster_count();
        if band_count < 1 {
            anyhow::bail!("raster has no bands");
        }

        let transform = dataset
            .geo_transform()
            .context("Raster has no geotransform")?;

        let first = dataset.rasterband(1).context("Failed to get band 1")?;
        let data_type = first.band_type();
        let nodata = first.no_data_value();

        let offset = (window.col_off as isize, window.row_off as isize);
        let size = (window.width, window.height);
        let mut bands = Vec::with_capacity(band_count);
        for index in 1..=band_count {
            let band = dataset
                .rasterband(index)
                .context(format!("Failed to get band {}", index))?;
            let buffer: Buffer<f64> = band
                .read_as::<f64>(offset, size, size, None)
                .context(format!("Failed to read band {}", index))?;
            bands.push(buffer.data().to_vec());
        }

        Ok(RasterGrid {
            width: window.width,
            height: window.height,
            transform: window_transform(&transform, window.col_off, window.row_off),
            bands,
            nodata,
            data_type,
            projection: dataset.projection(),
        })
    }

    /// Write the grid as a GeoTIFF with the grid's pixel type, replacing an existing file
    pub fn write_geotiff(&self, path: &Path) -> Result<()> {
        let driver = DriverManager::get_driver_by_name("GTiff")
            .context("Failed to get GTiff driver")?;

        if path.exists() {
            std::fs::remove_file(path)
                .context(format!("Failed to remove existing file: {:?}", path))?;
        }

        let mut dataset = create_dataset(
            &driver,
            path,
            self.width,
            self.height,
            self.band_count(),
            self.data_type,
        )
        .context(format!("Failed to create GeoTIFF dataset: {:?}", path))?;

        dataset
            .set_geo_transform(&self.transform)
            .context("Failed to set geotransform")?;
        if !self.projection.is_empty() {
            dataset
                .set_projection(&self.projection)
                .context("Failed to set spatial reference")?;
        }

        for (index, data) in self.bands.iter().enumerate() {
            let mut band = dataset
                .rasterband(index + 1)
                .context(format!("Failed to get band {}", index + 1))?;
            // GDAL converts the f64 buffer into the band type
            let mut buffer = Buffer::new((self.width, self.height), data.clone());
            band.write((0, 0), (self.width, self.height), &mut buffer)
                .context(format!("Failed to write band {}", index + 1))?;
            if self.nodata.is_some() {
                band.set_no_data_value(self.nodata)
                    .context("Failed to set no data value")?;
            }
        }

        Ok(())
    }
}

/// Rectangular block of pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    /// Pixel window covering `bounds` on a `width` x `height` raster: offsets are floored,
    /// far edges ceiled, and the result is intersected with the raster. None if nothing is left.
    pub fn from_bounds(
        transform: &GeoTransform,
        width: usize,
        height: usize,
        bounds: &BoundingBox,
    ) -> Option<Self> {
        let t = transform;
        let cols = [
            (bounds.min_x - t[0]) / t[1],
            (bounds.max_x - t[0]) / t[1],
        ];
        let rows = [
            (bounds.min_y - t[3]) / t[5],
            (bounds.max_y - t[3]) / t[5],
        ];

        let col_start = snap(cols[0].min(cols[1])).floor().max(0.0);
        let col_stop = snap(cols[0].max(cols[1])).ceil().min(width as f64);
        let row_start = snap(rows[0].min(rows[1])).floor().max(0.0);
        let row_stop = snap(rows[0].max(rows[1])).ceil().min(height as f64);

        if col_stop <= col_start || row_stop <= row_start {
            return None;
        }

        Some(PixelWindow {
            col_off: col_start as usize,
            row_off: row_start as usize,
            width: (col_stop - col_start) as usize,
            height: (row_stop - row_start) as usize,
        })
    }
}

/// Transform of the window starting at pixel (col_off, row_off)
pub fn window_transform(transform: &GeoTransform, col_off: usize, row_off: usize) -> GeoTransform {
    let t = transform;
    [
        t[0] + col_off as f64 * t[1] + row_off as f64 * t[2],
        t[1],
        t[2],
        t[3] + col_off as f64 * t[4] + row_off as f64 * t[5],
        t[4],
        t[5],
    ]
}

/// Fail on transforms with rotation terms, masking and merging only handle north-up grids
pub fn ensure_north_up(transform: &GeoTransform) -> Result<()> {
    let t = transform;
    if t[2] != 0.0 || t[4] != 0.0 || t[1] <= 0.0 || t[5] == 0.0 {
        return Err(DtmError::RotatedRaster(*t).into());
    }
    Ok(())
}

/// Round values within float noise of an integer, so exact pixel edges are not
/// pushed to the neighbouring pixel by floor/ceil
fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < 1e-6 {
        rounded
    } else {
        value
    }
}

/// Create a dataset whose bands have the given GDAL data type
pub fn create_dataset(
    driver: &Driver,
    path: &Path,
    width: usize,
    height: usize,
    n_bands: usize,
    data_type: GdalDataType,
) -> Result<Dataset> {
    use GdalDataType::*;
    let dataset = match data_type {
        UInt8 => driver.create_with_band_type::<u8, _>(path, width, height, n_bands)?,
        UInt16 => driver.create_with_band_type::<u16, _>(path, width, height, n_bands)?,
        UInt32 => driver.create_with_band_type::<u32, _>(path, width, height, n_bands)?,
        Int16 => driver.create_with_band_type::<i16, _>(path, width, height, n_bands)?,
        Int32 => driver.create_with_band_type::<i32, _>(path, width, height, n_bands)?,
        Float32 => driver.create_with_band_type::<f32, _>(path, width, height, n_bands)?,
        Float64 => driver.create_with_band_type::<f64, _>(path, width, height, n_bands)?,
        other => return Err(DtmError::UnsupportedDataType(format!("{:?}", other)).into()),
    };
    Ok(dataset)
}
