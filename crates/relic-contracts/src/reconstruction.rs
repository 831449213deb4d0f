use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::ArtifactAnalysis;

/// Everything one session has produced so far.
///
/// Filled stage by stage; the image payloads are data URIs and `audio` is the
/// raw base64 PCM returned by the speech model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionData {
    pub analysis: Option<ArtifactAnalysis>,
    pub original_image: Option<String>,
    pub past_image: Option<String>,
    pub modern_image: Option<String>,
    pub audio: Option<String>,
}

impl ReconstructionData {
    pub fn with_original(original_image: impl Into<String>) -> Self {
        Self {
            original_image: Some(original_image.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.analysis.is_some()
            && self.original_image.is_some()
            && self.past_image.is_some()
            && self.modern_image.is_some()
            && self.audio.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionManifest {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub stage: String,
    /// Artifact name (`past`, `modern`, ...) to the file it was written to.
    pub artifacts: Map<String, Value>,
}

pub fn write_manifest(
    path: &Path,
    manifest: &ReconstructionManifest,
    analysis: Option<&ArtifactAnalysis>,
) -> anyhow::Result<()> {
    let mut payload = Map::new();
    payload.insert(
        "session_id".to_string(),
        Value::String(manifest.session_id.clone()),
    );
    payload.insert(
        "started_at".to_string(),
        Value::String(manifest.started_at.clone()),
    );
    payload.insert(
        "finished_at".to_string(),
        Value::String(manifest.finished_at.clone()),
    );
    payload.insert("stage".to_string(), Value::String(manifest.stage.clone()));
    payload.insert(
        "artifacts".to_string(),
        Value::Object(manifest.artifacts.clone()),
    );
    if let Some(analysis) = analysis {
        payload.insert(
            "source_count".to_string(),
            Value::Number(analysis.sources.len().into()),
        );
        payload.insert("analysis".to_string(), serde_json::to_value(analysis)?);
    }
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
