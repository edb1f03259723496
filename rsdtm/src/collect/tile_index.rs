use anyhow::{Context, Result};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::algorithm::intersects::Intersects;
use geo::{BoundingRect, Geometry, MultiPolygon, Polygon};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::DtmError;
use crate::geo_core::{gdal_to_geo_geometry, polygons_of, union_polygons, GeoCore};

/// One sheet of the tile index
#[derive(Debug, Clone)]
pub struct TileRecord {
    /// Footprint of the sheet, in the tile index CRS
    pub geometry: Geometry<f64>,
    /// Feature properties, `url` points to the raster of the sheet
    pub properties: JsonObject,
}

impl TileRecord {
    pub fn url(&self) -> Option<&str> {
        self.properties.get("url").and_then(|u| u.as_str())
    }
}

/// Tile index loaded from a GeoJSON feature collection.
/// The document carries no CRS, its coordinates are taken to be in `geo_core`.
pub struct TileIndex {
    pub tiles: Vec<TileRecord>,
    pub geo_core: GeoCore,
}

impl TileIndex {
    pub fn load(path: &Path, geo_core: GeoCore) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read tile index: {:?}", path))?;
        let tile_index = Self::from_geojson_str(&content, geo_core)
            .context(format!("Malformed tile index: {:?}", path))?;

        info!(
            "Loaded {} tiles from {:?} (EPSG:{})",
            tile_index.tiles.len(),
            path,
            geo_core.get_epsg()
        );
        Ok(tile_index)
    }

    pub fn from_geojson_str(content: &str, geo_core: GeoCore) -> Result<Self> {
        let geojson: GeoJson = content.parse().context("Failed to parse GeoJSON")?;
        let collection =
            FeatureCollection::try_from(geojson).context("Tile index is not a FeatureCollection")?;

        let mut tiles = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.into_iter().enumerate() {
            let geometry = feature
                .geometry
                .context(format!("Tile {} has no geometry", index))?;
            let geometry = Geometry::<f64>::try_from(geometry)
                .context(format!("Tile {} has an invalid geometry", index))?;

            tiles.push(TileRecord {
                geometry,
                properties: feature.properties.unwrap_or_default(),
            });
        }

        Ok(TileIndex { tiles, geo_core })
    }

    /// Urls of the tiles intersecting the union of the boundary, in index order.
    /// Touching tiles are selected, duplicate urls are kept.
    pub fn select_intersecting_urls(&self, boundary: &SamplingBoundary) -> Result<Vec<String>> {
        let union = boundary.union()?;
        let selected = self.intersecting_tiles(&union);

        let mut urls = Vec::with_capacity(selected.len());
        for index in selected {
            let url = self.tiles[index]
                .url()
                .ok_or(DtmError::MissingUrl { index })?;
            urls.push(url.to_string());
        }

        info!("{} of {} tiles intersect the sampling area", urls.len(), self.tiles.len());
        Ok(urls)
    }

    /// Positions of the tiles intersecting `area`, ascending
    pub fn intersecting_tiles(&self, area: &MultiPolygon<f64>) -> Vec<usize> {
        let Some(area_rect) = area.bounding_rect() else {
            return Vec::new();
        };

        // envelope prefilter, the exact test follows
        let envelopes: Vec<GeomWithData<Rectangle<[f64; 2]>, usize>> = self
            .tiles
            .iter()
            .enumerate()
            .filter_map(|(index, tile)| {
                tile.geometry.bounding_rect().map(|rect| {
                    GeomWithData::new(
                        Rectangle::from_corners(
                            [rect.min().x, rect.min().y],
                            [rect.max().x, rect.max().y],
                        ),
                        index,
                    )
                })
            })
            .collect();
        let tree = RTree::bulk_load(envelopes);

        let query = AABB::from_corners(
            [area_rect.min().x, area_rect.min().y],
            [area_rect.max().x, area_rect.max().y],
        );
        let mut selected: Vec<usize> = tree
            .locate_in_envelope_intersecting(&query)
            .map(|candidate| candidate.data)
            .filter(|&index| self.tiles[index].geometry.intersects(area))
            .collect();
        selected.sort_unstable();

        debug!("Tiles intersecting the sampling area: {:?}", selected);
        selected
    }
}

/// Sampling area boundary, reprojected into the tile index CRS
#[derive(Debug, Clone)]
pub struct SamplingBoundary {
    pub polygons: Vec<Polygon<f64>>,
}

impl SamplingBoundary {
    pub fn new(polygons: Vec<Polygon<f64>>) -> Self {
        SamplingBoundary { polygons }
    }

    /// Read every feature of the first layer of a vector file (shapefile, GeoJSON, GPKG...)
    /// and reproject it into `geo_core`. A layer without spatial reference is taken as is.
    pub fn load(path: &Path, geo_core: GeoCore) -> Result<Self> {
        let dataset =
            Dataset::open(path).context(format!("Failed to open boundary file: {:?}", path))?;
        let mut layer = dataset
            .layer(0)
            .context(format!("Boundary file has no layer: {:?}", path))?;

        let transform = match layer.spatial_ref() {
            Some(source_srs) => geo_core.transform_from(&source_srs)?,
            None => None,
        };

        let mut polygons = Vec::new();
        for (index, feature) in layer.features().enumerate() {
            let geom_ref = feature
                .geometry()
                .context(format!("Boundary feature {} has no geometry", index))?;

            let geo_geom = match transform {
                Some(ref transform) => {
                    let geom = geom_ref
                        .transform(transform)
                        .context(format!("Failed to reproject boundary feature {}", index))?;
                    gdal_to_geo_geometry(&geom)?
                }
                None => gdal_to_geo_geometry(geom_ref)?,
            };
            polygons.extend(polygons_of(geo_geom)?);
        }

        if polygons.is_empty() {
            return Err(DtmError::InvalidGeometry(format!(
                "boundary file {:?} contains no polygons",
                path
            ))
            .into());
        }

        info!(
            "Loaded {} boundary polygons from {:?} (reprojected to EPSG:{})",
            polygons.len(),
            path,
            geo_core.get_epsg()
        );
        Ok(SamplingBoundary::new(polygons))
    }

    /// Union of all boundary polygons
    pub fn union(&self) -> Result<MultiPolygon<f64>> {
        union_polygons(&self.polygons)
    }
}
