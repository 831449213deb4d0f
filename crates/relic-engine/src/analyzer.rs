use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use relic_contracts::analysis::{response_schema, ArtifactAnalysis, GroundingSource};
use serde_json::{json, Value};

use crate::error::ServiceError;
use crate::retry::RetryingGenerator;
use crate::transport::first_candidate_parts;

const DEFAULT_UPLOAD_MIME: &str = "image/jpeg";

const ANALYSIS_PROMPT: &str = "\
You are a senior museum conservator and forensic art historian. Stay in that \
role for the whole answer and reason only from the photographed object.

Step 1 - Artistic analysis: identify the object type, era, civilization, \
region, material and a plausible year range. Use web search to compare it \
with catalogued pieces from collections and excavation records.

Step 2 - Damage mapping: describe the visible damage and list every missing \
or broken section.

Step 3 - Past reconstruction: describe the object as it looked when it was \
made. Write an image prompt for that intact state and place hotspots on \
notable features, with x and y given as percentages (0-100) of the image \
width and height.

Step 4 - Modern restoration: describe a museum-grade conservation of the \
object as it survives today and write an image prompt for it.

Step 5 - Structured output: return only JSON matching the response schema. \
Include a chronological timeline, a confidence score from 0 to 100 with an \
explanation, the assumptions you made, and a short curator narrative \
suitable for reading aloud to visitors.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: String,
}

impl ImageInput {
    /// Accepts `data:<mime>;base64,<payload>` or a bare base64 payload.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (mime_type, data) = match trimmed.strip_prefix("data:") {
            Some(rest) => {
                let Some((header, payload)) = rest.split_once(',') else {
                    bail!("image data URI has no payload");
                };
                let mut fields = header.split(';');
                let mime = fields
                    .next()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_UPLOAD_MIME);
                if !fields.any(|field| field.trim() == "base64") {
                    bail!("image data URI must be base64 encoded");
                }
                (mime.to_string(), payload.trim())
            }
            None => (DEFAULT_UPLOAD_MIME.to_string(), trimmed),
        };
        if data.is_empty() {
            bail!("image payload is empty");
        }
        Ok(Self {
            mime_type,
            data: data.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime_type = image::guess_format(&bytes)
            .or_else(|_| ImageFormat::from_path(path))
            .map(|format| format.to_mime_type())
            .unwrap_or(DEFAULT_UPLOAD_MIME);
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        })
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    fn inline_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": self.data,
            }
        })
    }
}

pub struct ArtifactAnalyzer<'a> {
    generator: RetryingGenerator<'a>,
    model: String,
}

impl<'a> ArtifactAnalyzer<'a> {
    pub fn new(generator: RetryingGenerator<'a>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn analyze(
        &self,
        image: &ImageInput,
        context_hint: Option<&str>,
    ) -> Result<ArtifactAnalysis> {
        let payload = build_request(image, context_hint);
        let response = self
            .generator
            .generate(&self.model, &payload)
            .context("artifact analysis request failed")?;
        parse_response(&response)
    }
}

pub(crate) fn build_request(image: &ImageInput, context_hint: Option<&str>) -> Value {
    let mut prompt = ANALYSIS_PROMPT.to_string();
    if let Some(hint) = context_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        prompt.push_str("\n\nContext supplied by the owner: ");
        prompt.push_str(hint);
    }
    json!({
        "contents": [{
            "role": "user",
            "parts": [image.inline_part(), { "text": prompt }],
        }],
        "tools": [{ "googleSearch": {} }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
        },
    })
}

pub(crate) fn parse_response(response: &Value) -> Result<ArtifactAnalysis> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(ServiceError::SynthesisFailure(format!("analysis blocked ({reason})")).into());
    }

    let text = first_candidate_parts(response)
        .iter()
        .filter(|part| {
            !part
                .get("thought")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    let body = strip_code_fence(&text);
    if body.is_empty() {
        return Err(
            ServiceError::MalformedResponse("model returned no analysis text".to_string()).into(),
        );
    }

    let mut analysis: ArtifactAnalysis = serde_json::from_str(body).map_err(|err| {
        ServiceError::MalformedResponse(format!("analysis JSON does not match schema: {err}"))
    })?;
    analysis
        .validate()
        .map_err(ServiceError::MalformedResponse)?;
    analysis.sources = grounding_sources(response);
    Ok(analysis)
}

pub(crate) fn grounding_sources(response: &Value) -> Vec<GroundingSource> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("groundingMetadata"))
        .and_then(|metadata| metadata.get("groundingChunks"))
        .and_then(Value::as_array)
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| chunk.get("web"))
                .filter_map(|web| {
                    let uri = web.get("uri").and_then(Value::as_str)?;
                    let title = web.get("title").and_then(Value::as_str);
                    Some(GroundingSource::from_citation(title, uri))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
pub(crate) fn analysis_response(analysis: &Value, chunks: Value) -> Value {
    json!({
        "candidates": [{
            "content": {"parts": [{"text": analysis.to_string()}]},
            "groundingMetadata": {"groundingChunks": chunks},
        }]
    })
}

#[cfg(test)]
pub(crate) fn sample_analysis() -> Value {
    json!({
        "identification": {
            "type": "Oil lamp",
            "era": "Late Roman",
            "civilization": "Roman",
            "region": "North Africa",
            "material": "Red slip ware",
            "yearRange": "350-450 CE"
        },
        "damageAnalysis": {
            "description": "Nozzle chipped, discus cracked through.",
            "missingSections": ["nozzle tip"]
        },
        "pastReconstruction": {
            "description": "Complete lamp with chi-rho discus.",
            "imagePrompt": "A complete late Roman red slip oil lamp",
            "hotspots": [
                {"x": 48.0, "y": 40.0, "label": "Discus", "detail": "Chi-rho motif."},
                {"x": 90.0, "y": 55.0, "label": "Nozzle", "detail": "Soot marks from use."}
            ]
        },
        "modernRestoration": {
            "description": "Crack consolidated, nozzle filled.",
            "imagePrompt": "The lamp after conservation"
        },
        "timeline": [{"year": "400 CE", "event": "Moulded in Tunisia"}],
        "confidenceScore": 74,
        "confidenceExplanation": "Form and fabric are typical of Hayes type II.",
        "assumptions": ["Discus motif was centred"],
        "curatorNarrative": "Light for a household at the edge of empire."
    })
}
