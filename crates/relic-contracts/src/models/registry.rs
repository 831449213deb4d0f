use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Analysis,
    Image,
    Speech,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Self::Analysis, Self::Image, Self::Speech];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Image => "image",
            Self::Speech => "speech",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capability: Capability,
}

impl ModelSpec {
    pub fn gemini(name: &str, capability: Capability) -> Self {
        Self {
            name: name.to_string(),
            provider: "gemini".to_string(),
            capability,
        }
    }
}

/// Known models keyed by name. Insertion order is preference order, so the
/// first model for a capability is its default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::from_specs([
            ModelSpec::gemini("gemini-3-pro-preview", Capability::Analysis),
            ModelSpec::gemini("gemini-2.5-pro", Capability::Analysis),
            ModelSpec::gemini("gemini-2.5-flash", Capability::Analysis),
            ModelSpec::gemini("gemini-3-pro-image-preview", Capability::Image),
            ModelSpec::gemini("gemini-2.5-flash-image", Capability::Image),
            ModelSpec::gemini("gemini-2.5-flash-preview-tts", Capability::Speech),
            ModelSpec::gemini("gemini-2.5-pro-preview-tts", Capability::Speech),
        ])
    }
}

impl ModelRegistry {
    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn for_capability(&self, capability: Capability) -> impl Iterator<Item = &ModelSpec> {
        self.models
            .values()
            .filter(move |model| model.capability == capability)
    }

    pub fn preferred(&self, capability: Capability) -> Option<&ModelSpec> {
        self.for_capability(capability).next()
    }

    pub fn lookup(&self, name: &str, capability: Capability) -> Option<&ModelSpec> {
        self.get(name).filter(|model| model.capability == capability)
    }
}
