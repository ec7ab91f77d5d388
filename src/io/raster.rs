use crate::core::layer::{LayerType, RasterDtype};
use crate::types::{Crs, GeoTransform, ParamError, ParamResult, Raster};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use num_traits::NumCast;
use std::path::Path;

/// GeoTIFF creation settings
#[derive(Debug, Clone)]
pub struct RasterWriteOptions {
    pub dtype: RasterDtype,
    pub nodata: f64,
    pub compression: String,
    pub block_size: usize,
    pub predictor: bool,
}

impl Default for RasterWriteOptions {
    fn default() -> Self {
        Self {
            dtype: RasterDtype::Float32,
            nodata: crate::types::DEFAULT_NODATA,
            compression: "LZW".to_string(),
            block_size: 512,
            predictor: true,
        }
    }
}

impl RasterWriteOptions {
    /// Creation settings dictated by a layer's policy
    pub fn for_layer(layer: LayerType) -> Self {
        let policy = layer.policy();
        Self {
            dtype: policy.dtype,
            nodata: policy.nodata,
            predictor: policy.predictor && policy.dtype.is_float(),
            ..Self::default()
        }
    }

    /// GTiff `PREDICTOR` value: floating point (3) for float storage,
    /// horizontal differencing (2) for integers
    pub fn predictor_code(&self) -> Option<&'static str> {
        match (self.predictor, self.dtype.is_float()) {
            (false, _) => None,
            (true, true) => Some("3"),
            (true, false) => Some("2"),
        }
    }
}

/// Raster reader/writer backed by GDAL
pub struct RasterIo;

impl RasterIo {
    /// Read the first band of a raster with its nodata cells masked to `NaN`
    pub fn read<P: AsRef<Path>>(path: P) -> ParamResult<Raster> {
        let path = path.as_ref();
        log::debug!("Reading raster: {}", path.display());

        if !path.exists() {
            return Err(ParamError::MissingInput {
                path: path.to_path_buf(),
            });
        }

        let dataset = Dataset::open(path)?;
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        if !transform.is_north_up() {
            return Err(ParamError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "only north-up rasters without rotation are supported".to_string(),
            });
        }

        let (width, height) = dataset.raster_size();
        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;

        let mut data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| ParamError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        if let Some(nd) = nodata {
            data.mapv_inplace(|v| if v == nd { f64::NAN } else { v });
        }

        let crs = dataset.spatial_ref().ok().map(|srs| crs_from_spatial_ref(&srs));

        log::debug!(
            "Raster {}x{}, nodata={:?}, crs={}",
            width,
            height,
            nodata,
            crs.as_ref().map(|c| c.label()).unwrap_or_default()
        );

        Ok(Raster::new(data, transform, crs, nodata))
    }

    /// Persist a raster as a compressed, internally tiled GeoTIFF.
    ///
    /// Missing cells are filled with `options.nodata` before the cast to the
    /// storage dtype.
    pub fn write<P: AsRef<Path>>(
        raster: &Raster,
        output_path: P,
        options: &RasterWriteOptions,
    ) -> ParamResult<()> {
        let output_path = output_path.as_ref();
        log::info!("Writing raster: {}", output_path.display());

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let block = options.block_size.to_string();
        let mut creation = vec![
            RasterCreationOption {
                key: "COMPRESS",
                value: &options.compression,
            },
            RasterCreationOption {
                key: "TILED",
                value: "YES",
            },
            RasterCreationOption {
                key: "BLOCKXSIZE",
                value: &block,
            },
            RasterCreationOption {
                key: "BLOCKYSIZE",
                value: &block,
            },
        ];
        if let Some(predictor) = options.predictor_code() {
            creation.push(RasterCreationOption {
                key: "PREDICTOR",
                value: predictor,
            });
        }

        match options.dtype {
            RasterDtype::Float32 => write_typed::<f32>(raster, output_path, options, &creation),
            RasterDtype::UInt8 => write_typed::<u8>(raster, output_path, options, &creation),
            RasterDtype::Int32 => write_typed::<i32>(raster, output_path, options, &creation),
        }
    }
}

fn write_typed<T>(
    raster: &Raster,
    output_path: &Path,
    options: &RasterWriteOptions,
    creation: &[RasterCreationOption],
) -> ParamResult<()>
where
    T: GdalType + NumCast + Copy,
{
    let fill: T = num_traits::cast(options.nodata).ok_or_else(|| {
        ParamError::Processing(format!(
            "nodata {} does not fit the {:?} output type",
            options.nodata, options.dtype
        ))
    })?;

    // Fill before the cast: a NaN has no integer representation
    let flat_data: Vec<T> = raster
        .data
        .iter()
        .map(|&v| {
            if v.is_nan() {
                fill
            } else {
                num_traits::cast(v).unwrap_or(fill)
            }
        })
        .collect();

    let (height, width) = raster.shape();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        output_path,
        width as isize,
        height as isize,
        1,
        creation,
    )?;

    dataset.set_geo_transform(&raster.transform.to_gdal())?;
    if let Some(crs) = &raster.crs {
        dataset.set_spatial_ref(&spatial_ref(crs)?)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    rasterband.set_no_data_value(Some(options.nodata))?;
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    Ok(())
}

/// Summarise a GDAL spatial reference, keeping the EPSG code when present
pub fn crs_from_spatial_ref(srs: &SpatialRef) -> Crs {
    let epsg = match srs.auth_name() {
        Ok(name) if name.eq_ignore_ascii_case("EPSG") => srs.auth_code().ok().map(|c| c as u32),
        _ => None,
    };
    Crs {
        epsg,
        wkt: srs.to_wkt().unwrap_or_default(),
    }
}

/// Build a GDAL spatial reference from a [`Crs`]
pub fn spatial_ref(crs: &Crs) -> ParamResult<SpatialRef> {
    let srs = match crs.epsg {
        Some(code) => SpatialRef::from_epsg(code)?,
        None => SpatialRef::from_wkt(&crs.wkt)?,
    };
    Ok(srs)
}

/// Spatial reference from a configured CRS string ("5070", "EPSG:5070" or WKT)
pub fn spatial_ref_from_config(definition: &str) -> ParamResult<SpatialRef> {
    let trimmed = definition.trim();
    let srs = match trimmed.parse::<u32>() {
        Ok(code) => SpatialRef::from_epsg(code)?,
        Err(_) => SpatialRef::from_definition(trimmed)?,
    };
    Ok(srs)
}
