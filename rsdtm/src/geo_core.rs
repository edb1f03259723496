use anyhow::{Context, Result};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use geo::{Geometry, MultiPolygon, Polygon, Rect};
use geos::Geom;

use crate::collect::global_variables::TILE_INDEX_EPSG;
use crate::errors::DtmError;

/// Base struct for geospatial operations
/// Holds the CRS every geometry of the pipeline is expressed in
#[derive(Debug, Clone, Copy)]
pub struct GeoCore {
    /// EPSG code
    pub epsg: u32,
}

impl GeoCore {
    /// Create a new GeoCore with EPSG
    pub fn new(epsg: u32) -> Self {
        GeoCore { epsg }
    }

    /// Get EPSG code
    pub fn get_epsg(&self) -> u32 {
        self.epsg
    }

    /// Spatial reference of this CRS, with x/y (easting/northing, lon/lat) axis order
    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        let mut srs = SpatialRef::from_epsg(self.epsg)
            .context(format!("Failed to create spatial reference EPSG:{}", self.epsg))?;
        srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        Ok(srs)
    }

    /// Transformation from `source` into this CRS.
    /// Returns None when `source` already is this CRS.
    pub fn transform_from(&self, source: &SpatialRef) -> Result<Option<CoordTransform>> {
        let target = self.spatial_ref()?;
        if source.auth_code().ok() == Some(self.epsg as i32) {
            return Ok(None);
        }

        let mut source = source.clone();
        source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        let transform = CoordTransform::new(&source, &target)
            .context("Failed to create coordinate transformation")?;
        Ok(Some(transform))
    }
}

impl Default for GeoCore {
    /// Defaults to EPSG:28992 (Amersfoort / RD New), the CRS of the tile index
    fn default() -> Self {
        GeoCore::new(TILE_INDEX_EPSG)
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_rect(rect: &Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// Convert GDAL geometry to geo::Geometry (through its WKT representation and GEOS)
pub fn gdal_to_geo_geometry(geom: &gdal::vector::Geometry) -> Result<Geometry<f64>> {
    let wkt = geom.wkt().context("Failed to get WKT from GDAL geometry")?;

    let geos_geom =
        geos::Geometry::new_from_wkt(&wkt).context("Failed to parse WKT with GEOS")?;

    let geo_geom: Geometry<f64> = geos_geom
        .try_into()
        .context("Failed to convert GEOS geometry to geo")?;

    Ok(geo_geom)
}

/// Convert a multipolygon to a GDAL geometry (through GEOS and its WKT representation)
pub fn multipolygon_to_gdal(shape: &MultiPolygon<f64>) -> Result<gdal::vector::Geometry> {
    let geos_geom: geos::Geometry = shape
        .try_into()
        .context("Failed to convert multipolygon to GEOS geometry")?;

    let wkt = geos_geom
        .to_wkt()
        .context("Failed to convert GEOS geometry to WKT")?;

    gdal::vector::Geometry::from_wkt(&wkt).context("Failed to create GDAL geometry from WKT")
}

/// Polygon parts of an areal geometry. Anything that is not areal is rejected.
pub fn polygons_of(geometry: Geometry<f64>) -> Result<Vec<Polygon<f64>>> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(vec![polygon]),
        Geometry::MultiPolygon(multi) => Ok(multi.0),
        Geometry::Rect(rect) => Ok(vec![rect.to_polygon()]),
        Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for geometry in collection {
                polygons.extend(polygons_of(geometry)?);
            }
            Ok(polygons)
        }
        other => Err(DtmError::InvalidGeometry(format!(
            "expected a polygon, found {}",
            geometry_type_name(&other)
        ))
        .into()),
    }
}

/// Union of polygons computed with GEOS (unary union of their collection)
pub fn union_polygons(polygons: &[Polygon<f64>]) -> Result<MultiPolygon<f64>> {
    if polygons.is_empty() {
        return Err(DtmError::InvalidGeometry("boundary contains no polygons".to_string()).into());
    }

    let mut parts = Vec::with_capacity(polygons.len());
    for polygon in polygons {
        let part: geos::Geometry = polygon
            .try_into()
            .context("Failed to convert polygon to GEOS geometry")?;
        parts.push(part);
    }

    let collection = geos::Geometry::create_geometry_collection(parts)
        .context("Failed to create GEOS geometry collection")?;
    let union = collection
        .unary_union()
        .context("Failed to compute the union of the boundary polygons")?;

    let union: Geometry<f64> = union
        .try_into()
        .context("Failed to convert GEOS union to geo")?;

    Ok(MultiPolygon::new(polygons_of(union)?))
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
