//! Synthetic rasters shared by the integration tests

#![allow(dead_code)]

use glofrisk::io::geotiff::write_geotiff;
use glofrisk::{GeoTransform, RasterGrid, RasterImage, SpatialReference};
use ndarray::Array2;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tiff::encoder::colortype::ColorType;
use tiff::encoder::TiffEncoder;
use tiff::tags::{PhotometricInterpretation, SampleFormat, Tag};

pub const UTM_45N: u32 = 32645;

/// Seven interleaved f32 samples per pixel, like a Landsat surface reflectance stack
pub struct SevenBandFloat;

impl ColorType for SevenBandFloat {
    type Inner = f32;
    const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::BlackIsZero;
    const BITS_PER_SAMPLE: &'static [u16] = &[32; 7];
    const SAMPLE_FORMAT: &'static [SampleFormat] = &[SampleFormat::IEEEFP; 7];

    fn horizontal_predict(_: &[Self::Inner], _: &mut Vec<Self::Inner>) {
        unreachable!()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn scene_transform() -> GeoTransform {
    GeoTransform::north_up(500_000.0, 3_100_000.0, 30.0, -30.0)
}

/// Write a 7-band north-up GeoTIFF in UTM 45N
pub fn write_band_stack(path: &Path, bands: &[RasterImage], transform: GeoTransform) {
    assert_eq!(bands.len(), 7, "a stack needs seven bands");
    let (height, width) = bands[0].dim();
    let mut interleaved = Vec::with_capacity(height * width * 7);
    for i in 0..height {
        for j in 0..width {
            for band in bands {
                interleaved.push(band[[i, j]]);
            }
        }
    }

    let file = File::create(path).expect("Failed to create band stack");
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).expect("Failed to create encoder");
    let mut image = encoder
        .new_image::<SevenBandFloat>(width as u32, height as u32)
        .expect("Failed to start image");
    let directory = image.encoder();
    directory
        .write_tag(
            Tag::ModelPixelScaleTag,
            &[transform.pixel_width, -transform.pixel_height, 0.0][..],
        )
        .unwrap();
    directory
        .write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, transform.top_left_x, transform.top_left_y, 0.0][..],
        )
        .unwrap();
    let keys: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, UTM_45N as u16];
    directory.write_tag(Tag::GeoKeyDirectoryTag, &keys[..]).unwrap();
    image.write_data(&interleaved).expect("Failed to write band data");
}

/// Write a single-band DEM
pub fn write_dem(path: &Path, elevation: RasterImage, transform: GeoTransform, epsg: u32, nodata: Option<f64>) {
    let mut raster = RasterGrid::new(elevation, transform, Some(SpatialReference::Epsg(epsg)));
    raster.nodata = nodata;
    write_geotiff(path, &raster).expect("Failed to write DEM");
}

/// Cheap deterministic jitter in [0, 1)
pub fn jitter(i: usize, j: usize, k: usize) -> f32 {
    let h = (i.wrapping_mul(73_856_093) ^ j.wrapping_mul(19_349_663) ^ k.wrapping_mul(83_492_791)) % 1000;
    h as f32 / 1000.0
}

/// Terrain classes laid out across a square scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cover {
    Glacier,
    Lake,
    Vegetation,
    Rock,
}

pub fn cover_at(i: usize, j: usize, size: usize) -> Cover {
    if i < size / 4 {
        Cover::Glacier
    } else if i > size / 2 && j < size / 3 {
        Cover::Lake
    } else if j > size / 2 {
        Cover::Vegetation
    } else {
        Cover::Rock
    }
}

/// Reflectance stack (coastal, blue, green, red, nir, swir1, swir2) over `size` x `size` pixels.
///
/// `brightness` scales every band, standing in for a different acquisition.
pub fn synthetic_scene(size: usize, brightness: f32) -> Vec<RasterImage> {
    let signature = |cover: Cover| -> [f32; 7] {
        match cover {
            Cover::Glacier => [0.70, 0.72, 0.75, 0.70, 0.60, 0.08, 0.05],
            Cover::Lake => [0.08, 0.10, 0.12, 0.06, 0.03, 0.02, 0.01],
            Cover::Vegetation => [0.04, 0.05, 0.09, 0.05, 0.45, 0.22, 0.10],
            Cover::Rock => [0.12, 0.14, 0.18, 0.22, 0.28, 0.35, 0.30],
        }
    };
    (0..7)
        .map(|b| {
            Array2::from_shape_fn((size, size), |(i, j)| {
                let base = signature(cover_at(i, j, size))[b];
                brightness * (base + 0.02 * jitter(i, j, b))
            })
        })
        .collect()
}

/// Valley DEM on the scene grid: high at the glacier, low at the lake
pub fn synthetic_dem(size: usize) -> RasterImage {
    Array2::from_shape_fn((size, size), |(i, j)| {
        let valley = (j as f32 - size as f32 / 2.0).abs() * 4.0;
        5200.0 - 18.0 * i as f32 + valley + 2.0 * jitter(i, j, 99)
    })
}
