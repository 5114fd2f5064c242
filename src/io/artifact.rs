//! JSON persistence of the trained risk model

use crate::core::classifier::RiskModel;
use crate::io::write_atomically;
use crate::types::{GlofError, GlofResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Format version of the stored artifact
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format_version: u32,
    model: &'a RiskModel,
}

#[derive(Deserialize)]
struct Artifact {
    format_version: u32,
    model: RiskModel,
}

pub fn save_model(path: &Path, model: &RiskModel) -> GlofResult<()> {
    log::info!("Saving risk model to {}", path.display());
    write_atomically(path, |out| {
        serde_json::to_writer(
            out,
            &ArtifactRef {
                format_version: ARTIFACT_VERSION,
                model,
            },
        )?;
        Ok(())
    })
}

pub fn load_model(path: &Path) -> GlofResult<RiskModel> {
    log::info!("Loading risk model from {}", path.display());
    let file = File::open(path).map_err(|e| GlofError::data_access(path, e))?;
    let artifact: Artifact = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| GlofError::data_access(path, format!("invalid model artifact: {}", e)))?;

    if artifact.format_version != ARTIFACT_VERSION {
        return Err(GlofError::schema(
            path.display().to_string(),
            format!(
                "artifact format {} is not supported (expected {})",
                artifact.format_version, ARTIFACT_VERSION
            ),
        ));
    }
    log::debug!(
        "Model mapping version '{}', {} trees",
        artifact.model.mapping_version(),
        artifact.model.n_trees()
    );
    Ok(artifact.model)
}
