use crate::types::{ParamError, ParamResult};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, LayerAccess};
use gdal::Dataset;
use geo::{Geometry, MultiPolygon};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Polygon feature with a stable integer identifier
#[derive(Debug, Clone)]
pub struct PolygonFeature {
    pub id: i64,
    pub geometry: MultiPolygon<f64>,
    /// Numeric attributes requested at load time
    pub attributes: BTreeMap<String, f64>,
}

impl PolygonFeature {
    pub fn new(id: i64, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id,
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }
}

/// What to pull out of a vector layer
#[derive(Debug, Clone, Default)]
pub struct VectorRequest<'a> {
    /// Layer name; first layer when `None`
    pub layer: Option<&'a str>,
    /// Integer id field; 0-based feature order when `None`
    pub id_field: Option<&'a str>,
    pub attributes: &'a [&'a str],
    /// Reproject geometries into this reference system
    pub target_srs: Option<&'a SpatialRef>,
}

/// Polygon layer reader backed by GDAL/OGR
pub struct VectorReader;

impl VectorReader {
    pub fn read_polygons<P: AsRef<Path>>(
        path: P,
        request: &VectorRequest,
    ) -> ParamResult<Vec<PolygonFeature>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ParamError::MissingInput {
                path: path.to_path_buf(),
            });
        }

        log::info!("Reading polygons from: {}", path.display());
        let dataset = Dataset::open(path)?;
        let mut layer = match request.layer {
            Some(name) => dataset.layer_by_name(name)?,
            None => dataset.layer(0)?,
        };

        if let Some(target) = request.target_srs {
            target.set_axis_mapping_strategy(
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            );
        }

        let mut features = Vec::new();
        for (index, feature) in layer.features().enumerate() {
            let id = match request.id_field {
                Some(field) => numeric_field(&feature.field(field)?, field, path)?
                    .map(|v| v as i64)
                    .ok_or_else(|| ParamError::InvalidFormat {
                        path: path.to_path_buf(),
                        reason: format!("feature {} has a null '{}'", index, field),
                    })?,
                None => index as i64,
            };

            let mut attributes = BTreeMap::new();
            for &name in request.attributes {
                let value = numeric_field(&feature.field(name)?, name, path)?.unwrap_or(f64::NAN);
                attributes.insert(name.to_string(), value);
            }

            let geometry = match feature.geometry() {
                Some(g) => g,
                None => {
                    log::warn!("Feature {} in {} has no geometry, skipped", id, path.display());
                    continue;
                }
            };

            let geo_geometry = match request.target_srs {
                Some(target) => geometry.transform_to(target)?.to_geo()?,
                None => geometry.to_geo()?,
            };

            features.push(PolygonFeature {
                id,
                geometry: into_multipolygon(geo_geometry, path)?,
                attributes,
            });
        }

        log::info!("Loaded {} polygon features", features.len());
        Ok(features)
    }
}

fn numeric_field(value: &Option<FieldValue>, name: &str, path: &Path) -> ParamResult<Option<f64>> {
    let value = match value {
        Some(v) => v,
        None => return Ok(None),
    };
    let number = match value {
        FieldValue::IntegerValue(v) => *v as f64,
        FieldValue::Integer64Value(v) => *v as f64,
        FieldValue::RealValue(v) => *v,
        FieldValue::StringValue(s) => s.trim().parse::<f64>().map_err(|_| ParamError::InvalidFormat {
            path: PathBuf::from(path),
            reason: format!("field '{}' holds non-numeric value '{}'", name, s),
        })?,
        other => {
            return Err(ParamError::InvalidFormat {
                path: PathBuf::from(path),
                reason: format!("field '{}' has unsupported type {:?}", name, other),
            })
        }
    };
    Ok(Some(number))
}

/// Normalise any polygonal geometry into a multipolygon
pub fn into_multipolygon(geometry: Geometry<f64>, path: &Path) -> ParamResult<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for member in collection {
                polygons.extend(into_multipolygon(member, path)?.0);
            }
            Ok(MultiPolygon(polygons))
        }
        other => Err(ParamError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("expected polygon geometry, found {:?}", geometry_kind(&other)),
        }),
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}
