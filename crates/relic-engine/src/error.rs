use thiserror::Error;

/// Carried inside `anyhow::Error`; recover the variant with [`classify_failure`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set")]
    MissingCredential,

    #[error("credential rejected ({status}): {message}")]
    CredentialRejected { status: u16, message: String },

    #[error("server error ({status}): {message}")]
    TransientServer { status: u16, message: String },

    #[error("request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 || has_token(&message, &["INTERNAL"]) {
            return Self::TransientServer { status, message };
        }
        if matches!(status, 401 | 403 | 404) || looks_like_credential_rejection(&message) {
            return Self::CredentialRejected { status, message };
        }
        Self::Api { status, message }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientServer { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MissingCredential,
    CredentialRejected,
    TransientServer,
    SynthesisFailure,
    MalformedResponse,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::CredentialRejected => "credential_rejected",
            Self::TransientServer => "transient_server",
            Self::SynthesisFailure => "synthesis_failure",
            Self::MalformedResponse => "malformed_response",
            Self::Other => "other",
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::CredentialRejected)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingCredential => {
                "No API key is configured. Set GEMINI_API_KEY and try again."
            }
            Self::CredentialRejected => {
                "The API key was rejected. Select a key with access to the required models."
            }
            Self::TransientServer => {
                "The restoration service is temporarily unavailable. Please try again shortly."
            }
            Self::SynthesisFailure => {
                "The model could not render this artifact. Try a clearer photo or a different angle."
            }
            Self::MalformedResponse => {
                "The analysis came back incomplete. Please run the restoration again."
            }
            Self::Other => "Restoration failed unexpectedly.",
        }
    }
}

/// Typed variants win; otherwise fall back to the status/message patterns
/// the provider is known to use.
pub fn classify_failure(err: &anyhow::Error) -> FailureKind {
    for cause in err.chain() {
        if let Some(service) = cause.downcast_ref::<ServiceError>() {
            return match service {
                ServiceError::MissingCredential => FailureKind::MissingCredential,
                ServiceError::CredentialRejected { .. } => FailureKind::CredentialRejected,
                ServiceError::TransientServer { .. } => FailureKind::TransientServer,
                ServiceError::SynthesisFailure(_) => FailureKind::SynthesisFailure,
                ServiceError::MalformedResponse(_) => FailureKind::MalformedResponse,
                ServiceError::Api { .. } => FailureKind::Other,
            };
        }
        if cause.downcast_ref::<serde_json::Error>().is_some() {
            return FailureKind::MalformedResponse;
        }
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if is_transient_transport(reqwest_err) {
                return FailureKind::TransientServer;
            }
        }
    }

    let text = error_chain_message(err);
    if has_token(&text, &["INTERNAL", "UNAVAILABLE"]) {
        return FailureKind::TransientServer;
    }
    if looks_like_credential_rejection(&text) {
        return FailureKind::CredentialRejected;
    }
    FailureKind::Other
}

pub fn is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(service) = cause.downcast_ref::<ServiceError>() {
            return service.is_transient();
        }
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if is_transient_transport(reqwest_err) {
                return true;
            }
        }
    }
    classify_failure(err) == FailureKind::TransientServer
}

pub fn error_chain_message(err: &anyhow::Error) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    parts.join(": ")
}

fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err.is_connect()
        || err
            .status()
            .map(|status| status.is_server_error())
            .unwrap_or(false)
}

// Whole tokens only; hosts, paths and keys may contain the same letters.
fn has_token(text: &str, tokens: &[&str]) -> bool {
    text.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .any(|word| tokens.contains(&word))
}

fn looks_like_credential_rejection(message: &str) -> bool {
    if has_token(message, &["PERMISSION_DENIED", "UNAUTHENTICATED"]) {
        return true;
    }
    let lowered = message.to_ascii_lowercase();
    lowered.contains("api key not valid") || lowered.contains("requested entity was not found")
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{classify_failure, error_chain_message, is_transient, FailureKind, ServiceError};

    #[test]
    fn status_mapping_matches_provider_patterns() {
        assert!(ServiceError::from_status(503, "Service Unavailable").is_transient());
        assert!(ServiceError::from_status(400, "status: INTERNAL").is_transient());
        assert!(matches!(
            ServiceError::from_status(403, "forbidden"),
            ServiceError::CredentialRejected { status: 403, .. }
        ));
        assert!(matches!(
            ServiceError::from_status(400, "Requested entity was not found."),
            ServiceError::CredentialRejected { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(400, "API key not valid. Please pass a valid API key."),
            ServiceError::CredentialRejected { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(400, "bad request"),
            ServiceError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn classification_sees_through_context_layers() {
        let err = anyhow::Error::new(ServiceError::SynthesisFailure("no image".to_string()))
            .context("past reconstruction failed");
        assert_eq!(classify_failure(&err), FailureKind::SynthesisFailure);
        assert!(!is_transient(&err));

        let err = anyhow::Error::new(ServiceError::from_status(500, "boom")).context("outer");
        assert_eq!(classify_failure(&err), FailureKind::TransientServer);
        assert!(is_transient(&err));
    }

    #[test]
    fn classification_falls_back_to_message_patterns() {
        assert_eq!(
            classify_failure(&anyhow!("PERMISSION_DENIED: caller lacks permission")),
            FailureKind::CredentialRejected
        );
        assert_eq!(
            classify_failure(&anyhow!("upstream said INTERNAL")),
            FailureKind::TransientServer
        );
        assert_eq!(classify_failure(&anyhow!("disk full")), FailureKind::Other);
        assert_eq!(
            classify_failure(&anyhow!("api key not valid")),
            FailureKind::CredentialRejected
        );
        assert!(is_transient(&anyhow!("upstream said INTERNAL")));
        assert!(!is_transient(&anyhow!("disk full")));
    }

    #[test]
    fn digits_and_words_inside_urls_do_not_decide_the_class() {
        let err = anyhow!(
            "error sending request for url (http://host403.test:5003/v1beta/models/permission-500:generateContent?key=AIzaSyD403INTERNALx): connection refused"
        )
        .context("Gemini request failed");
        assert_eq!(classify_failure(&err), FailureKind::Other);
        assert!(!is_transient(&err));
    }

    #[test]
    fn json_errors_classify_as_malformed() {
        let parse = serde_json::from_str::<serde_json::Value>("{oops").map_err(anyhow::Error::new);
        let err = parse.err().map(|err| err.context("analysis parse"));
        assert_eq!(
            err.as_ref().map(classify_failure),
            Some(FailureKind::MalformedResponse)
        );
    }

    #[test]
    fn reauth_only_for_credential_failures() {
        assert!(FailureKind::MissingCredential.requires_reauth());
        assert!(FailureKind::CredentialRejected.requires_reauth());
        assert!(!FailureKind::TransientServer.requires_reauth());
        assert!(!FailureKind::SynthesisFailure.requires_reauth());
    }

    #[test]
    fn chain_message_skips_duplicates() {
        let err = anyhow!("socket closed")
            .context("Gemini request failed")
            .context("Gemini request failed");
        assert_eq!(
            error_chain_message(&err),
            "Gemini request failed: socket closed"
        );
    }
}
