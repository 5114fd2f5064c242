//! Raster, table and model I/O

pub mod artifact;
#[cfg(feature = "gdal")]
pub mod gdal_reader;
pub mod geotiff;
pub mod table;

pub use artifact::{load_model, save_model};
#[cfg(feature = "gdal")]
pub use gdal_reader::{GdalCoordinateMapper, GdalRasterReader};
pub use geotiff::{BandIndices, GeoTiffReader, RasterReader, RasterStack};
pub use table::{read_feature_table, write_calibrated_table, write_feature_table, write_prediction_table};

use crate::types::{GlofError, GlofResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `path` through a temporary file in the same directory, renamed
/// into place only once `write` succeeds.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> GlofResult<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> GlofResult<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| GlofError::data_access(path, format!("cannot create temporary file: {}", e)))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|e| GlofError::data_access(path, e))?;
    }

    tmp.persist(path)
        .map_err(|e| GlofError::data_access(path, e.error))?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}
