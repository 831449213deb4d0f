//! Artifact analysis, reconstruction imagery and narration on top of the
//! Gemini `generateContent` API.

pub mod analyzer;
pub mod audio;
pub mod config;
pub mod error;
pub mod images;
pub mod narration;
pub mod playback;
pub mod retry;
pub mod session;
pub mod transport;

pub use analyzer::{ArtifactAnalyzer, ImageInput};
pub use audio::{decode_pcm_base64, AudioBuffer, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};
pub use config::{EngineConfig, ResolvedModels};
pub use error::{classify_failure, error_chain_message, FailureKind, ServiceError};
pub use playback::{AudioOutput, NarrationPlayer, PlaybackError, PlaybackHandle, WavFileOutput};
pub use retry::{RetryPolicy, RetryingGenerator};
pub use session::{new_session_id, FailureReport, RestorationSession, SessionStage};
pub use transport::{ContentGenerator, GeminiClient};
