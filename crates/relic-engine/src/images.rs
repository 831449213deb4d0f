use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::error::ServiceError;
use crate::retry::RetryingGenerator;
use crate::transport::{first_candidate_parts, inline_data};

pub const IMAGE_ASPECT_RATIO: &str = "1:1";
pub const IMAGE_SIZE_TIER: &str = "1K";

const DEFAULT_IMAGE_MIME: &str = "image/png";

const IMAGE_PREAMBLE: &str = "\
Render exactly the object described below. Stick to the subject and take no \
creative liberties: no added props, people, text or background scenery. Show \
a single, whole object, centred and fully in frame, photographed on a plain \
studio backdrop.

Object: ";

pub struct ImageSynthesizer<'a> {
    generator: RetryingGenerator<'a>,
    model: String,
}

impl<'a> ImageSynthesizer<'a> {
    pub fn new(generator: RetryingGenerator<'a>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the image as a `data:<mime>;base64,...` URI.
    pub fn synthesize(&self, description: &str) -> Result<String> {
        let payload = build_request(description);
        let response = self
            .generator
            .generate(&self.model, &payload)
            .context("image generation request failed")?;
        extract_image(&response)
    }
}

pub(crate) fn build_request(description: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!("{IMAGE_PREAMBLE}{}", description.trim()) }],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": {
                "aspectRatio": IMAGE_ASPECT_RATIO,
                "imageSize": IMAGE_SIZE_TIER,
            },
        },
    })
}

pub(crate) fn extract_image(response: &Value) -> Result<String> {
    first_candidate_parts(response)
        .iter()
        .find_map(|part| {
            inline_data(part).map(|(mime_type, data)| {
                format!(
                    "data:{};base64,{}",
                    mime_type.unwrap_or(DEFAULT_IMAGE_MIME),
                    data
                )
            })
        })
        .ok_or_else(|| {
            let reason = response
                .get("candidates")
                .and_then(Value::as_array)
                .and_then(|candidates| candidates.first())
                .and_then(|candidate| candidate.get("finishReason"))
                .and_then(Value::as_str)
                .unwrap_or("no inline image part");
            ServiceError::SynthesisFailure(format!("image model returned no image ({reason})"))
                .into()
        })
}

#[cfg(test)]
pub(crate) fn image_response(mime_type: &str, data: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "Here is the restored object."},
                {"inlineData": {"mimeType": mime_type, "data": data}}
            ]}
        }]
    })
}
