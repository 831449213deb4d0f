use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const FALLBACK_SOURCE_TITLE: &str = "Museum Database Entry";

pub const CONFIDENCE_MAX: u32 = 100;
pub const HOTSPOT_MIN: f64 = 0.0;
pub const HOTSPOT_MAX: f64 = 100.0;

/// Forensic read of one uploaded artifact.
///
/// Everything except `sources` is produced by the model under
/// [`response_schema`]; `sources` is filled from citation metadata after the
/// call returns and is never requested from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactAnalysis {
    pub identification: Identification,
    pub damage_analysis: DamageAnalysis,
    pub past_reconstruction: PastReconstruction,
    pub modern_restoration: ModernRestoration,
    pub timeline: Vec<TimelineEntry>,
    pub confidence_score: u32,
    pub confidence_explanation: String,
    pub assumptions: Vec<String>,
    pub curator_narrative: String,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub era: String,
    pub civilization: String,
    pub region: String,
    pub material: String,
    pub year_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageAnalysis {
    pub description: String,
    pub missing_sections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastReconstruction {
    pub description: String,
    pub image_prompt: String,
    pub hotspots: Vec<Hotspot>,
}

/// Point of interest on the reconstructed image, in percent of width/height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub x: f64,
    pub y: f64,
    pub label: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModernRestoration {
    pub description: String,
    pub image_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub year: String,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

impl GroundingSource {
    pub fn from_citation(title: Option<&str>, uri: &str) -> Self {
        let title = title
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(FALLBACK_SOURCE_TITLE);
        Self {
            title: title.to_string(),
            uri: uri.to_string(),
        }
    }
}

impl ArtifactAnalysis {
    pub fn validate(&self) -> Result<(), String> {
        if self.confidence_score > CONFIDENCE_MAX {
            return Err(format!(
                "confidenceScore {} exceeds {CONFIDENCE_MAX}",
                self.confidence_score
            ));
        }
        for (idx, hotspot) in self.past_reconstruction.hotspots.iter().enumerate() {
            for (axis, value) in [("x", hotspot.x), ("y", hotspot.y)] {
                if !(HOTSPOT_MIN..=HOTSPOT_MAX).contains(&value) {
                    return Err(format!(
                        "hotspot {idx} ('{}') {axis}={value} outside [{HOTSPOT_MIN}, {HOTSPOT_MAX}]",
                        hotspot.label
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn hotspot_count(&self) -> usize {
        self.past_reconstruction.hotspots.len()
    }
}

/// Response schema in the provider's OpenAPI dialect.
///
/// Mirrors [`ArtifactAnalysis`] field for field, minus `sources`.
pub fn response_schema() -> Value {
    let identification = object(
        &[
            ("type", string()),
            ("era", string()),
            ("civilization", string()),
            ("region", string()),
            ("material", string()),
            ("yearRange", string()),
        ],
        &[
            "type",
            "era",
            "civilization",
            "region",
            "material",
            "yearRange",
        ],
    );
    let damage_analysis = object(
        &[
            ("description", string()),
            ("missingSections", array(string())),
        ],
        &["description", "missingSections"],
    );
    let hotspot = object(
        &[
            ("x", number()),
            ("y", number()),
            ("label", string()),
            ("detail", string()),
        ],
        &["x", "y", "label", "detail"],
    );
    let past_reconstruction = object(
        &[
            ("description", string()),
            ("imagePrompt", string()),
            ("hotspots", array(hotspot)),
        ],
        &["description", "imagePrompt", "hotspots"],
    );
    let modern_restoration = object(
        &[("description", string()), ("imagePrompt", string())],
        &["description", "imagePrompt"],
    );
    let timeline_entry = object(
        &[("year", string()), ("event", string())],
        &["year", "event"],
    );

    object(
        &[
            ("identification", identification),
            ("damageAnalysis", damage_analysis),
            ("pastReconstruction", past_reconstruction),
            ("modernRestoration", modern_restoration),
            ("timeline", array(timeline_entry)),
            ("confidenceScore", json!({ "type": "INTEGER" })),
            ("confidenceExplanation", string()),
            ("assumptions", array(string())),
            ("curatorNarrative", string()),
        ],
        &[
            "identification",
            "damageAnalysis",
            "pastReconstruction",
            "modernRestoration",
            "timeline",
            "confidenceScore",
            "confidenceExplanation",
            "assumptions",
            "curatorNarrative",
        ],
    )
}

fn string() -> Value {
    json!({ "type": "STRING" })
}

fn number() -> Value {
    json!({ "type": "NUMBER" })
}

fn array(items: Value) -> Value {
    json!({ "type": "ARRAY", "items": items })
}

fn object(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let mut props = Map::new();
    for (key, schema) in properties {
        props.insert((*key).to_string(), schema.clone());
    }
    json!({
        "type": "OBJECT",
        "properties": props,
        "required": required,
    })
}

#[cfg(test)]
pub(crate) fn sample_analysis_json() -> Value {
    json!({
        "identification": {
            "type": "Amphora",
            "era": "Classical",
            "civilization": "Attic Greek",
            "region": "Athens",
            "material": "Terracotta",
            "yearRange": "480-450 BCE"
        },
        "damageAnalysis": {
            "description": "Neck sheared off, glaze flaking on the body.",
            "missingSections": ["neck", "left handle"]
        },
        "pastReconstruction": {
            "description": "Red-figure amphora with intact neck and handles.",
            "imagePrompt": "An intact Attic red-figure amphora",
            "hotspots": [
                {"x": 50.0, "y": 12.5, "label": "Neck", "detail": "Reconstructed lip profile."}
            ]
        },
        "modernRestoration": {
            "description": "Conservation fill in neutral tone.",
            "imagePrompt": "The amphora after museum conservation"
        },
        "timeline": [
            {"year": "470 BCE", "event": "Fired in an Athenian workshop"},
            {"year": "1890", "event": "Excavated"}
        ],
        "confidenceScore": 82,
        "confidenceExplanation": "Shape and palette are diagnostic.",
        "assumptions": ["Handles were symmetrical"],
        "curatorNarrative": "This vessel once carried oil across the Aegean."
    })
}
