mod common;

use approx::assert_abs_diff_eq;
use common::*;
use glofrisk::core::features::Feature;
use glofrisk::core::projection::{parse_utm_epsg, utm_to_wgs84};
use glofrisk::{FeatureExtractor, GeoTransform, GlofError};
use ndarray::{arr2, Array2};
use tempfile::tempdir;

/// Linear elevation over lon/lat, reproduced exactly by bilinear sampling
fn elevation_at(lon: f64, lat: f64) -> f64 {
    4000.0 + 1000.0 * (lon - 87.0) + 2000.0 * (lat - 28.0)
}

#[test]
fn test_dem_aligned_across_reference_systems() {
    init_logging();
    let dir = tempdir().unwrap();
    let bands_path = dir.path().join("scene.tif");
    let dem_path = dir.path().join("dem_wgs84.tif");

    let (height, width) = (20, 24);
    let bands: Vec<_> = (0..7)
        .map(|b| Array2::from_shape_fn((height, width), |(i, j)| 0.1 + 0.01 * b as f32 + 0.02 * jitter(i, j, b)))
        .collect();
    let transform = scene_transform();
    write_band_stack(&bands_path, &bands, transform);

    // DEM in geographic coordinates generously covering the scene
    let (zone, north) = parse_utm_epsg(UTM_45N).unwrap();
    let corners = [(0.0, 0.0), (width as f64, 0.0), (0.0, height as f64), (width as f64, height as f64)];
    let lonlat: Vec<(f64, f64)> = corners
        .iter()
        .map(|&(c, r)| {
            let (x, y) = transform.pixel_to_geo(c, r);
            utm_to_wgs84(x, y, zone, north)
        })
        .collect();
    let min_lon = lonlat.iter().map(|p| p.0).fold(f64::INFINITY, f64::min) - 0.002;
    let max_lat = lonlat.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max) + 0.002;
    let step = 0.0002;
    let dem_transform = GeoTransform::north_up(min_lon, max_lat, step, -step);
    let dem = Array2::from_shape_fn((60, 60), |(i, j)| {
        let (lon, lat) = dem_transform.pixel_to_geo(j as f64 + 0.5, i as f64 + 0.5);
        elevation_at(lon, lat) as f32
    });
    write_dem(&dem_path, dem, dem_transform, 4326, Some(-32768.0));

    let extracted = FeatureExtractor::standard()
        .extract(&bands_path, &dem_path)
        .expect("Failed to extract features");

    assert_eq!(extracted.grid.shape(), (height, width));
    assert_eq!(extracted.table.n_rows(), height * width);

    let elevation = extracted.table.reshape_column(Feature::Elevation).unwrap();
    assert_eq!(elevation.dim(), (height, width));
    for ((i, j), value) in elevation.indexed_iter() {
        let (x, y) = transform.pixel_to_geo(j as f64 + 0.5, i as f64 + 0.5);
        let (lon, lat) = utm_to_wgs84(x, y, zone, north);
        assert_abs_diff_eq!(*value, elevation_at(lon, lat), epsilon = 0.05);
    }
}

#[test]
fn test_flat_scene_without_glacier() {
    init_logging();
    let dir = tempdir().unwrap();
    let bands_path = dir.path().join("tiny.tif");
    let dem_path = dir.path().join("flat.tif");

    let green = arr2(&[[10.0f32, 20.0], [0.0, 5.0]]);
    let nir = arr2(&[[10.0f32, 0.0], [0.0, 5.0]]);
    let other = Array2::from_elem((2, 2), 100.0f32);
    // coastal, blue, green, red, nir, swir1, swir2
    let bands = vec![
        other.clone(),
        other.clone(),
        green,
        other.clone(),
        nir,
        other.clone(),
        other,
    ];
    write_band_stack(&bands_path, &bands, scene_transform());
    write_dem(&dem_path, Array2::from_elem((2, 2), 3500.0), scene_transform(), UTM_45N, None);

    let table = FeatureExtractor::standard()
        .extract(&bands_path, &dem_path)
        .expect("Failed to extract features")
        .table;

    assert_eq!(table.column(Feature::Ndwi).to_vec(), vec![0.0, 1.0, 0.0, 0.0]);
    assert!(table.column(Feature::Slope).iter().all(|v| *v == 0.0));
    assert!(table.column(Feature::Aspect).iter().all(|v| *v == 0.0));
    assert!(table.column(Feature::Elevation).iter().all(|v| *v == 3500.0));
    // green is never far enough above swir1 to mark a glacier
    assert!(table.column(Feature::DistToGlacier).iter().all(|v| v.is_nan()));
}

#[test]
fn test_missing_band_is_reported_with_file() {
    let dir = tempdir().unwrap();
    let bands_path = dir.path().join("scene.tif");
    let dem_path = dir.path().join("dem.tif");
    let bands = synthetic_scene(4, 1.0);
    write_band_stack(&bands_path, &bands, scene_transform());
    write_dem(&dem_path, synthetic_dem(4), scene_transform(), UTM_45N, None);

    let mut indices = glofrisk::io::BandIndices::default();
    indices.swir2 = 8;
    let extractor = FeatureExtractor::new(
        Box::new(glofrisk::GeoTiffReader),
        indices,
        Default::default(),
        Default::default(),
    );
    match extractor.extract(&bands_path, &dem_path) {
        Err(GlofError::DataAccess { path, reason }) => {
            assert!(path.ends_with("scene.tif"));
            assert!(reason.contains("band 8"));
        }
        Err(other) => panic!("expected data access error, got {}", other),
        Ok(_) => panic!("band 8 of a 7-band raster was accepted"),
    }
}

#[test]
fn test_disjoint_dem_is_degenerate() {
    let dir = tempdir().unwrap();
    let bands_path = dir.path().join("scene.tif");
    let dem_path = dir.path().join("far_dem.tif");
    write_band_stack(&bands_path, &synthetic_scene(6, 1.0), scene_transform());
    let far = GeoTransform::north_up(700_000.0, 3_300_000.0, 30.0, -30.0);
    write_dem(&dem_path, synthetic_dem(6), far, UTM_45N, None);

    assert!(matches!(
        FeatureExtractor::standard().extract(&bands_path, &dem_path),
        Err(GlofError::DegenerateInput { .. })
    ));
}

#[test]
fn test_dem_nodata_becomes_missing_elevation() {
    let dir = tempdir().unwrap();
    let bands_path = dir.path().join("scene.tif");
    let dem_path = dir.path().join("dem.tif");
    write_band_stack(&bands_path, &synthetic_scene(6, 1.0), scene_transform());
    let mut dem = synthetic_dem(6);
    dem[[3, 3]] = -9999.0;
    write_dem(&dem_path, dem, scene_transform(), UTM_45N, Some(-9999.0));

    let table = FeatureExtractor::standard()
        .extract(&bands_path, &dem_path)
        .unwrap()
        .table;
    let elevation = table.reshape_column(Feature::Elevation).unwrap();
    assert!(elevation[[3, 3]].is_nan());
    assert!(elevation[[0, 0]].is_finite());
}
