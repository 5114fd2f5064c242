//! CSV persistence of feature, calibrated and prediction tables
//!
//! Columns are matched by header name; missing values are empty fields.

use crate::core::calibration::CalibratedTable;
use crate::core::classifier::PredictionTable;
use crate::core::features::{FeatureTable, FEATURE_COLUMNS};
use crate::io::write_atomically;
use crate::types::{GlofError, GlofResult};
use csv::{ReaderBuilder, Trim, Writer};
use ndarray::Array2;
use std::path::Path;

pub const CLUSTER_COLUMN: &str = "Cluster";
pub const RISK_COLUMN: &str = "Risk";
pub const PREDICTED_RISK_COLUMN: &str = "Predicted_Risk";

fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn parse_value(field: &str) -> Option<f64> {
    match field {
        "" | "NaN" | "nan" => Some(f64::NAN),
        other => other.parse::<f64>().ok(),
    }
}

/// Write features plus any extra per-row columns
fn write_table(
    path: &Path,
    table: &FeatureTable,
    extra_columns: &[&str],
    extra: impl Fn(usize) -> Vec<String>,
) -> GlofResult<()> {
    log::info!("Writing {} rows to {}", table.n_rows(), path.display());
    write_atomically(path, |out| {
        let mut writer = Writer::from_writer(out);
        let header: Vec<&str> = FEATURE_COLUMNS
            .iter()
            .copied()
            .chain(extra_columns.iter().copied())
            .collect();
        writer.write_record(&header)?;

        for (r, row) in table.values().outer_iter().enumerate() {
            let mut record: Vec<String> = row.iter().map(|v| format_value(*v)).collect();
            record.extend(extra(r));
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|e| GlofError::data_access(path, e))?;
        Ok(())
    })
}

pub fn write_feature_table(path: &Path, table: &FeatureTable) -> GlofResult<()> {
    write_table(path, table, &[], |_| Vec::new())
}

pub fn write_calibrated_table(path: &Path, table: &CalibratedTable) -> GlofResult<()> {
    write_table(
        path,
        table.features(),
        &[CLUSTER_COLUMN, RISK_COLUMN],
        |r| {
            vec![
                table.clusters()[r].to_string(),
                table.risks()[r].index().to_string(),
            ]
        },
    )
}

pub fn write_prediction_table(path: &Path, table: &PredictionTable) -> GlofResult<()> {
    write_table(path, table.features(), &[PREDICTED_RISK_COLUMN], |r| {
        vec![table.predicted()[r].index().to_string()]
    })
}

/// Read a feature table by column name.
///
/// Columns outside the schema are ignored. With a known grid `shape` the
/// row count must match it.
pub fn read_feature_table(path: &Path, shape: Option<(usize, usize)>) -> GlofResult<FeatureTable> {
    log::info!("Reading feature table: {}", path.display());
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| GlofError::data_access(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| GlofError::data_access(path, e))?
        .clone();

    let mut positions = Vec::with_capacity(FEATURE_COLUMNS.len());
    let mut missing = Vec::new();
    for name in FEATURE_COLUMNS {
        let found: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| *h == name)
            .map(|(i, _)| i)
            .collect();
        match found.as_slice() {
            [] => missing.push(name),
            [position] => positions.push(*position),
            _ => {
                return Err(GlofError::schema(
                    path.display().to_string(),
                    format!("column '{}' appears {} times", name, found.len()),
                ))
            }
        }
    }
    if !missing.is_empty() {
        return Err(GlofError::schema(
            path.display().to_string(),
            format!("missing column(s): {}", missing.join(", ")),
        ));
    }

    let mut values: Vec<f64> = Vec::new();
    let mut n_rows = 0;
    for record in reader.records() {
        let record = record.map_err(|e| GlofError::data_access(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        for (name, &position) in FEATURE_COLUMNS.iter().zip(&positions) {
            let field = record.get(position).unwrap_or("");
            let value = parse_value(field).ok_or_else(|| {
                GlofError::data_access(
                    path,
                    format!("line {}, column '{}': cannot parse '{}'", line, name, field),
                )
            })?;
            values.push(value);
        }
        n_rows += 1;
    }

    let values = Array2::from_shape_vec((n_rows, FEATURE_COLUMNS.len()), values)
        .map_err(|e| GlofError::data_access(path, e))?;
    log::debug!("Read {} rows", n_rows);
    FeatureTable::from_rows(values, shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample_table() -> FeatureTable {
        let values = Array2::from_shape_fn((6, 7), |(r, c)| {
            if (r + c) % 5 == 0 {
                f64::NAN
            } else {
                r as f64 * 0.1 + c as f64 * 1e-7 - 0.25
            }
        });
        FeatureTable::from_rows(values, Some((2, 3))).unwrap()
    }

    fn nan_positions(table: &FeatureTable) -> Vec<(usize, usize)> {
        table
            .values()
            .indexed_iter()
            .filter(|(_, v)| v.is_nan())
            .map(|(p, _)| p)
            .collect()
    }

    #[test]
    fn test_round_trip_preserves_values_and_nan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let table = sample_table();

        write_feature_table(&path, &table).unwrap();
        let back = read_feature_table(&path, Some((2, 3))).unwrap();

        assert_eq!(nan_positions(&back), nan_positions(&table));
        for (a, b) in table.values().iter().zip(back.values().iter()) {
            assert!(a.is_nan() && b.is_nan() || a == b);
        }
    }

    #[test]
    fn test_header_and_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_feature_table(&path, &sample_table()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "NDWI,NDVI,NDSI,Elevation,Slope,Aspect,DistToGlacier"
        );
        // (0, 0) is missing
        assert!(lines.next().unwrap().starts_with(','));
    }

    #[test]
    fn test_columns_by_name_any_order_with_extras() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reordered.csv");
        fs::write(
            &path,
            "Risk,DistToGlacier,Aspect,Slope,Elevation,NDSI,NDVI,NDWI\n\
             2,7,6,5,4,3,2,1\n\
             0,,nan,NaN,4.5,0.3,0.2,0.1\n",
        )
        .unwrap();

        let table = read_feature_table(&path, None).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.values().row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(table.values()[[1, 6]].is_nan());
        assert!(table.values()[[1, 5]].is_nan());
        assert!(table.values()[[1, 4]].is_nan());
        assert_eq!(table.values()[[1, 3]], 4.5);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.csv");
        fs::write(&path, "NDWI,NDVI,NDSI,Elevation,Slope,Aspect\n1,2,3,4,5,6\n").unwrap();

        match read_feature_table(&path, None) {
            Err(GlofError::SchemaMismatch { reason, .. }) => assert!(reason.contains("DistToGlacier")),
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_column_is_schema_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        fs::write(
            &path,
            "NDWI,NDVI,NDSI,Elevation,Slope,Aspect,DistToGlacier,NDWI\n1,2,3,4,5,6,7,8\n",
        )
        .unwrap();
        assert!(matches!(
            read_feature_table(&path, None),
            Err(GlofError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_unparseable_value_names_line_and_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(
            &path,
            "NDWI,NDVI,NDSI,Elevation,Slope,Aspect,DistToGlacier\n1,2,3,4,5,6,7\n1,2,x,4,5,6,7\n",
        )
        .unwrap();

        match read_feature_table(&path, None) {
            Err(GlofError::DataAccess { reason, .. }) => {
                assert!(reason.contains("line 3"));
                assert!(reason.contains("NDSI"));
            }
            other => panic!("expected data access error, got {:?}", other),
        }
    }

    #[test]
    fn test_row_count_checked_against_grid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_feature_table(&path, &sample_table()).unwrap();
        assert!(matches!(
            read_feature_table(&path, Some((3, 3))),
            Err(GlofError::SchemaMismatch { .. })
        ));
    }
}
