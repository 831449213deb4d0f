use anyhow::{Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::ServiceError;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// One `generateContent` round trip. Non-success statuses come back as a
/// [`ServiceError`] inside `anyhow`.
pub trait ContentGenerator: Send + Sync {
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value>;
}

pub struct GeminiClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(ServiceError::MissingCredential)?;
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: config.api_base.clone(),
            api_key,
            http,
        })
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ContentGenerator for GeminiClient {
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(payload)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error(response)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status().as_u16();
    let success = response.status().is_success();
    let body = response.text().context("Gemini response body read failed")?;
    if !success {
        return Err(ServiceError::from_status(status, error_message(&body)).into());
    }
    serde_json::from_str(&body)
        .map_err(|err| ServiceError::MalformedResponse(format!("invalid JSON envelope: {err}")))
        .map_err(Into::into)
}

fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let error = parsed.as_ref().and_then(|value| value.get("error"));
    let message = error
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str);
    let status = error
        .and_then(|error| error.get("status"))
        .and_then(Value::as_str);
    match (status, message) {
        (Some(status), Some(message)) => format!("{status}: {message}"),
        (None, Some(message)) => message.to_string(),
        _ => truncate_text(body, 512),
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn first_candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn inline_data(part: &Value) -> Option<(Option<&str>, &str)> {
    let inline = part
        .get("inlineData")
        .or_else(|| part.get("inline_data"))?;
    let data = inline
        .get("data")
        .and_then(Value::as_str)
        .filter(|data| !data.is_empty())?;
    let mime_type = inline
        .get("mimeType")
        .or_else(|| inline.get("mime_type"))
        .and_then(Value::as_str);
    Some((mime_type, data))
}
