use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::error::ServiceError;
use crate::retry::RetryingGenerator;
use crate::transport::{first_candidate_parts, inline_data};

pub const NARRATOR_VOICE: &str = "Charon";

const DELIVERY_INSTRUCTION: &str =
    "Read the following in an authoritative, calm museum curator voice: ";

pub struct NarrationSynthesizer<'a> {
    generator: RetryingGenerator<'a>,
    model: String,
}

impl<'a> NarrationSynthesizer<'a> {
    pub fn new(generator: RetryingGenerator<'a>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn synthesize(&self, narrative: &str) -> Result<String> {
        let payload = build_request(narrative);
        let response = self
            .generator
            .generate(&self.model, &payload)
            .context("narration request failed")?;
        extract_audio(&response)
    }
}

pub(crate) fn build_request(narrative: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!("{DELIVERY_INSTRUCTION}{}", narrative.trim()) }],
        }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": NARRATOR_VOICE },
                },
            },
        },
    })
}

pub(crate) fn extract_audio(response: &Value) -> Result<String> {
    first_candidate_parts(response)
        .first()
        .and_then(|part| inline_data(part).map(|(_, data)| data.to_string()))
        .ok_or_else(|| {
            ServiceError::SynthesisFailure("speech model returned no audio".to_string()).into()
        })
}

#[cfg(test)]
pub(crate) fn audio_response(data: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"parts": [
                {"inlineData": {"mimeType": "audio/L16;codec=pcm;rate=24000", "data": data}}
            ]}
        }]
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{audio_response, build_request, extract_audio, NarrationSynthesizer};
    use crate::audio::{decode_pcm_base64, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};
    use crate::error::{classify_failure, FailureKind};
    use crate::retry::{RetryPolicy, RetryingGenerator};
    use crate::transport::testing::ScriptedGenerator;

    const MODEL: &str = "gemini-2.5-flash-preview-tts";

    #[test]
    fn request_uses_audio_modality_and_fixed_voice() {
        let payload = build_request("This vessel once carried oil.");
        let text = payload["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default();
        assert!(text.contains("authoritative, calm museum curator voice"));
        assert!(text.ends_with("This vessel once carried oil."));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            payload["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            json!("Charon")
        );
    }

    #[test]
    fn payload_is_taken_from_first_part() -> anyhow::Result<()> {
        assert_eq!(extract_audio(&audio_response("AEAAwA=="))?, "AEAAwA==");

        let text_first = json!({
            "candidates": [{"content": {"parts": [
                {"text": "preface"},
                {"inlineData": {"mimeType": "audio/L16", "data": "AEAAwA=="}}
            ]}}]
        });
        let err = extract_audio(&text_first).err();
        assert_eq!(
            err.as_ref().map(classify_failure),
            Some(FailureKind::SynthesisFailure)
        );
        Ok(())
    }

    #[test]
    fn synthesized_audio_decodes_to_frames() -> anyhow::Result<()> {
        let generator = ScriptedGenerator::new().reply(MODEL, audio_response("AEAAwA=="));
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let narrator =
            NarrationSynthesizer::new(RetryingGenerator::new(&generator, policy), MODEL);
        let audio = narrator.synthesize("Welcome.")?;
        let buffer = decode_pcm_base64(&audio, NARRATION_SAMPLE_RATE, NARRATION_CHANNELS)?;
        assert_eq!(buffer.frames(), 2);
        Ok(())
    }

    #[test]
    fn empty_response_is_synthesis_failure() {
        let err = extract_audio(&json!({"candidates": []})).err();
        assert_eq!(
            err.as_ref().map(classify_failure),
            Some(FailureKind::SynthesisFailure)
        );
    }
}
