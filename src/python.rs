//! Python bindings (feature `python`)

use crate::config::PipelineConfig;
use crate::core::classifier::RiskModel;
use crate::core::pipeline::GlofPipeline;
use crate::core::spectral::normalized_difference;
use crate::core::terrain::{TerrainAnalyzer, TerrainParams};
use crate::io::{load_model, read_feature_table};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use std::path::Path;

fn runtime_err(e: impl std::fmt::Display) -> PyErr {
    PyErr::new::<PyRuntimeError, _>(format!("{}", e))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_normalized_difference, m)?)?;
    m.add_function(wrap_pyfunction!(py_slope_aspect, m)?)?;
    m.add_function(wrap_pyfunction!(py_distance_to_glacier, m)?)?;
    m.add_function(wrap_pyfunction!(py_run_pipeline, m)?)?;
    m.add_class::<PyRiskModel>()?;
    Ok(())
}

/// (a - b) / (a + b) with 0 where a + b == 0
#[pyfunction]
#[pyo3(name = "normalized_difference")]
fn py_normalized_difference<'py>(
    py: Python<'py>,
    a: PyReadonlyArray2<f32>,
    b: PyReadonlyArray2<f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let result = normalized_difference(&a.as_array().to_owned(), &b.as_array().to_owned())
        .map_err(runtime_err)?;
    Ok(result.into_pyarray(py))
}

/// Sobel slope (radians) and aspect of an elevation grid
#[pyfunction]
#[pyo3(name = "slope_aspect", signature = (dem, reject_flat_surface = false))]
fn py_slope_aspect<'py>(
    py: Python<'py>,
    dem: PyReadonlyArray2<f32>,
    reject_flat_surface: bool,
) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<f32>)> {
    let analyzer = TerrainAnalyzer::new(TerrainParams {
        reject_flat_surface,
        ..Default::default()
    });
    let (slope, aspect) = analyzer
        .slope_aspect(&dem.as_array().to_owned())
        .map_err(runtime_err)?;
    Ok((slope.into_pyarray(py), aspect.into_pyarray(py)))
}

/// Pixel distance to the nearest NDSI-glacier pixel; NaN without glaciers
#[pyfunction]
#[pyo3(name = "distance_to_glacier", signature = (ndsi, threshold = 0.4))]
fn py_distance_to_glacier<'py>(
    py: Python<'py>,
    ndsi: PyReadonlyArray2<f32>,
    threshold: f32,
) -> PyResult<&'py PyArray2<f32>> {
    let analyzer = TerrainAnalyzer::new(TerrainParams {
        glacier_ndsi_threshold: threshold,
        ..Default::default()
    });
    Ok(analyzer
        .distance_to_glacier(&ndsi.as_array().to_owned())
        .into_pyarray(py))
}

/// Run every configured stage; returns the held-out accuracy
#[pyfunction]
#[pyo3(name = "run_pipeline")]
fn py_run_pipeline(config_path: String) -> PyResult<f64> {
    let config = PipelineConfig::from_file(Path::new(&config_path)).map_err(runtime_err)?;
    let pipeline = GlofPipeline::new(config).map_err(runtime_err)?;
    let summary = pipeline.run().map_err(runtime_err)?;
    Ok(summary.evaluation.report.accuracy)
}

/// Python wrapper for a trained RiskModel
#[pyclass(name = "RiskModel")]
struct PyRiskModel {
    inner: RiskModel,
}

#[pymethods]
impl PyRiskModel {
    #[staticmethod]
    fn load(path: String) -> PyResult<Self> {
        let inner = load_model(Path::new(&path)).map_err(runtime_err)?;
        Ok(PyRiskModel { inner })
    }

    #[getter]
    fn mapping_version(&self) -> String {
        self.inner.mapping_version().to_string()
    }

    #[getter]
    fn schema(&self) -> Vec<String> {
        self.inner.schema().to_vec()
    }

    /// Risk index per row of a feature CSV (0 Safe, 1 Moderate, 2 High)
    fn predict_csv<'py>(&self, py: Python<'py>, path: String) -> PyResult<&'py PyArray1<u8>> {
        let table = read_feature_table(Path::new(&path), None).map_err(runtime_err)?;
        let predictions = self.inner.predict(&table).map_err(runtime_err)?;
        let levels: Vec<u8> = predictions
            .predicted()
            .iter()
            .map(|r| r.index() as u8)
            .collect();
        Ok(levels.into_pyarray(py))
    }

    fn __repr__(&self) -> String {
        format!(
            "RiskModel(mapping_version='{}', trees={})",
            self.inner.mapping_version(),
            self.inner.n_trees()
        )
    }
}
