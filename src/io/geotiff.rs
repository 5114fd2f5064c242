//! Pure-Rust GeoTIFF access
//!
//! Reads chunky (pixel-interleaved) GeoTIFFs of any common sample type into
//! per-band `f32` arrays, recovering the affine transform from
//! ModelPixelScale + ModelTiepoint or ModelTransformation, the CRS from the
//! GeoKey directory, and nodata from the GDAL_NODATA tag.

use crate::io::write_atomically;
use crate::types::{GeoTransform, GlofError, GlofResult, GridSpec, RasterGrid, RasterImage, SpatialReference};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

// GeoKey ids
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// 1-based band positions of the reflectance bands in the multi-band raster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandIndices {
    pub blue: usize,
    pub green: usize,
    pub red: usize,
    pub nir: usize,
    pub swir1: usize,
    pub swir2: usize,
}

impl Default for BandIndices {
    fn default() -> Self {
        // coastal aerosol occupies band 1
        Self {
            blue: 2,
            green: 3,
            red: 4,
            nir: 5,
            swir1: 6,
            swir2: 7,
        }
    }
}

impl BandIndices {
    pub fn named(&self) -> [(&'static str, usize); 6] {
        [
            ("blue", self.blue),
            ("green", self.green),
            ("red", self.red),
            ("nir", self.nir),
            ("swir1", self.swir1),
            ("swir2", self.swir2),
        ]
    }
}

/// All bands of one raster file on a shared grid
#[derive(Debug, Clone)]
pub struct RasterStack {
    pub path: PathBuf,
    pub grid: GridSpec,
    pub nodata: Option<f64>,
    pub bands: Vec<RasterImage>,
}

impl RasterStack {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Band by 1-based index, carrying the stack's grid metadata
    pub fn band(&self, index: usize) -> GlofResult<RasterGrid> {
        if index == 0 || index > self.bands.len() {
            return Err(GlofError::data_access(
                &self.path,
                format!(
                    "band {} requested but the raster has {} band(s)",
                    index,
                    self.bands.len()
                ),
            ));
        }
        Ok(RasterGrid {
            data: self.bands[index - 1].clone(),
            grid: self.grid.clone(),
            nodata: self.nodata,
        })
    }
}

/// A backend able to load a raster file with its grid metadata
pub trait RasterReader: Send + Sync {
    fn read(&self, path: &Path) -> GlofResult<RasterStack>;
}

/// Default backend built on the `tiff` crate
#[derive(Debug, Clone, Default)]
pub struct GeoTiffReader;

impl RasterReader for GeoTiffReader {
    fn read(&self, path: &Path) -> GlofResult<RasterStack> {
        read_geotiff(path)
    }
}

pub fn read_geotiff(path: &Path) -> GlofResult<RasterStack> {
    log::info!("Reading GeoTIFF: {}", path.display());
    let file = File::open(path).map_err(|e| GlofError::data_access(path, e))?;
    let decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| GlofError::data_access(path, format!("not a readable TIFF: {}", e)))?
        .with_limits(Limits::unlimited());

    decode(path, decoder)
}

fn decode<R: Read + Seek>(path: &Path, mut decoder: Decoder<R>) -> GlofResult<RasterStack> {
    let tiff_err = |e: tiff::TiffError| GlofError::data_access(path, e);

    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let (width, height) = (width as usize, height as usize);
    let samples = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)
        .map_err(tiff_err)?
        .unwrap_or(1) as usize;
    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
        .map_err(tiff_err)?
        .unwrap_or(1);
    if samples > 1 && planar == 2 {
        return Err(GlofError::data_access(
            path,
            "planar-separated multi-band layout is not supported; rewrite as pixel-interleaved",
        ));
    }

    let geo_keys = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)
        .map_err(tiff_err)?
        .map(|v| v.into_u16_vec())
        .transpose()
        .map_err(tiff_err)?
        .unwrap_or_default();
    let keys = parse_geo_keys(&geo_keys);

    let transform = read_transform(&mut decoder, &keys).map_err(tiff_err)?;
    let crs = crs_from_keys(&keys);
    if crs.is_none() {
        log::warn!("{} declares no EPSG reference system", path.display());
    }
    let nodata = decoder
        .find_tag(Tag::GdalNodata)
        .map_err(tiff_err)?
        .map(|v| v.into_string())
        .transpose()
        .map_err(tiff_err)?
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    log::debug!(
        "{}x{} pixels, {} band(s), transform {:?}, crs {:?}, nodata {:?}",
        width,
        height,
        samples,
        transform,
        crs,
        nodata
    );

    let samples_f32 = match decoder.read_image().map_err(tiff_err)? {
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f32).collect::<Vec<f32>>(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F16(v) => v.into_iter().map(|x| x.to_f32()).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
    };

    if samples_f32.len() != width * height * samples {
        return Err(GlofError::data_access(
            path,
            format!(
                "decoded {} samples, expected {} ({}x{}x{})",
                samples_f32.len(),
                width * height * samples,
                width,
                height,
                samples
            ),
        ));
    }

    // De-interleave pixel-interleaved samples into one array per band
    let bands: Vec<RasterImage> = (0..samples)
        .map(|b| {
            Array2::from_shape_fn((height, width), |(i, j)| {
                samples_f32[(i * width + j) * samples + b]
            })
        })
        .collect();

    Ok(RasterStack {
        path: path.to_path_buf(),
        grid: GridSpec {
            height,
            width,
            transform,
            crs,
        },
        nodata,
        bands,
    })
}

/// (key id, value) pairs of inline GeoKeys
fn parse_geo_keys(directory: &[u16]) -> Vec<(u16, u16)> {
    if directory.len() < 4 {
        return Vec::new();
    }
    let count = directory[3] as usize;
    directory[4..]
        .chunks_exact(4)
        .take(count)
        // location 0 means the value is stored inline
        .filter(|entry| entry[1] == 0)
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn geo_key(keys: &[(u16, u16)], id: u16) -> Option<u16> {
    keys.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
}

fn crs_from_keys(keys: &[(u16, u16)]) -> Option<SpatialReference> {
    [PROJECTED_CS_TYPE, GEOGRAPHIC_TYPE]
        .iter()
        .filter_map(|id| geo_key(keys, *id))
        .find(|code| *code != 0 && *code != USER_DEFINED)
        .map(|code| SpatialReference::Epsg(code as u32))
}

fn read_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    keys: &[(u16, u16)],
) -> tiff::TiffResult<GeoTransform> {
    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;

    let mut transform = match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => GeoTransform::north_up(
            t[3] - t[0] * s[0],
            t[4] + t[1] * s[1],
            s[0],
            -s[1],
        ),
        _ => match decoder
            .find_tag(Tag::ModelTransformationTag)?
            .map(|v| v.into_f64_vec())
            .transpose()?
        {
            // Row-major 4x4 matrix
            Some(m) if m.len() >= 16 => GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]),
            _ => GeoTransform::default(),
        },
    };

    if geo_key(keys, GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
        // Tiepoints address pixel centres; move to the corner convention
        let (x, y) = transform.pixel_to_geo(-0.5, -0.5);
        transform.top_left_x = x;
        transform.top_left_y = y;
    }
    Ok(transform)
}

/// Write a single-band `f32` GeoTIFF carrying the grid's transform and CRS
pub fn write_geotiff(path: &Path, raster: &RasterGrid) -> GlofResult<()> {
    let (height, width) = raster.shape();
    let transform = raster.grid.transform;
    let data: Vec<f32> = raster.data.iter().copied().collect();
    let tiff_err = |e: tiff::TiffError| GlofError::data_access(path, e);

    write_atomically(path, |writer| {
        let mut encoder = TiffEncoder::new(writer).map_err(tiff_err)?;
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width as u32, height as u32)
            .map_err(tiff_err)?;

        let directory = image.encoder();
        if transform.rotation_x == 0.0 && transform.rotation_y == 0.0 {
            directory
                .write_tag(
                    Tag::ModelPixelScaleTag,
                    &[transform.pixel_width, -transform.pixel_height, 0.0][..],
                )
                .map_err(tiff_err)?;
            directory
                .write_tag(
                    Tag::ModelTiepointTag,
                    &[0.0, 0.0, 0.0, transform.top_left_x, transform.top_left_y, 0.0][..],
                )
                .map_err(tiff_err)?;
        } else {
            let t = transform;
            let matrix = [
                t.pixel_width, t.rotation_x, 0.0, t.top_left_x,
                t.rotation_y, t.pixel_height, 0.0, t.top_left_y,
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ];
            directory
                .write_tag(Tag::ModelTransformationTag, &matrix[..])
                .map_err(tiff_err)?;
        }

        if let Some(code) = raster.grid.crs.as_ref().and_then(|c| c.epsg()) {
            let geographic = code == 4326 || (4000..5000).contains(&code);
            let (model_type, cs_key) = if geographic {
                (2u16, GEOGRAPHIC_TYPE)
            } else {
                (1u16, PROJECTED_CS_TYPE)
            };
            let code = u16::try_from(code).map_err(|_| {
                GlofError::data_access(path, format!("EPSG code {} cannot be stored as a GeoKey", code))
            })?;
            let keys = [
                1, 1, 0, 3,
                GT_MODEL_TYPE, 0, 1, model_type,
                GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
                cs_key, 0, 1, code,
            ];
            directory
                .write_tag(Tag::GeoKeyDirectoryTag, &keys[..])
                .map_err(tiff_err)?;
        }

        if let Some(nodata) = raster.nodata {
            directory
                .write_tag(Tag::GdalNodata, nodata.to_string().as_str())
                .map_err(tiff_err)?;
        }

        image.write_data(&data).map_err(tiff_err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_single_band_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let data = Array2::from_shape_fn((4, 5), |(i, j)| 5000.0 + (i * 5 + j) as f32);
        let mut raster = RasterGrid::new(
            data.clone(),
            GeoTransform::north_up(600000.0, 3090000.0, 30.0, -30.0),
            Some(SpatialReference::Epsg(32645)),
        );
        raster.nodata = Some(-32768.0);

        write_geotiff(&path, &raster).unwrap();
        let stack = read_geotiff(&path).unwrap();

        assert_eq!(stack.band_count(), 1);
        assert_eq!(stack.grid, raster.grid);
        assert_eq!(stack.nodata, Some(-32768.0));
        assert_eq!(stack.band(1).unwrap().data, data);
    }

    #[test]
    fn test_geographic_reference() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geo.tif");
        let raster = RasterGrid::new(
            Array2::zeros((2, 2)),
            GeoTransform::north_up(88.18, 27.92, 0.00027, -0.00027),
            Some(SpatialReference::Epsg(4326)),
        );
        write_geotiff(&path, &raster).unwrap();
        assert_eq!(read_geotiff(&path).unwrap().grid.crs, Some(SpatialReference::Epsg(4326)));
    }

    #[test]
    fn test_band_index_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.tif");
        let raster = RasterGrid::new(Array2::zeros((2, 2)), GeoTransform::default(), None);
        write_geotiff(&path, &raster).unwrap();

        let stack = read_geotiff(&path).unwrap();
        for index in [0, 2, 7] {
            match stack.band(index) {
                Err(GlofError::DataAccess { path: p, .. }) => assert!(p.ends_with("one.tif")),
                other => panic!("expected data access error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_file() {
        let result = read_geotiff(Path::new("/nonexistent/scene.tif"));
        assert!(matches!(result, Err(GlofError::DataAccess { .. })));
    }

    #[test]
    fn test_parse_geo_keys() {
        let directory = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 32645];
        let keys = parse_geo_keys(&directory);
        assert_eq!(crs_from_keys(&keys), Some(SpatialReference::Epsg(32645)));
        assert_eq!(crs_from_keys(&parse_geo_keys(&[1, 1, 0, 1, 3072, 0, 1, USER_DEFINED])), None);
    }
}
