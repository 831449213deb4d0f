use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use relic_contracts::analysis::ArtifactAnalysis;
use relic_contracts::events::{EventPayload, EventWriter};
use relic_contracts::reconstruction::{now_utc_iso, ReconstructionData};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::analyzer::{ArtifactAnalyzer, ImageInput};
use crate::audio::{decode_pcm_base64, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};
use crate::config::{EngineConfig, ResolvedModels};
use crate::error::{classify_failure, error_chain_message, FailureKind};
use crate::images::ImageSynthesizer;
use crate::narration::NarrationSynthesizer;
use crate::playback::NarrationPlayer;
use crate::retry::{RetryPolicy, RetryingGenerator};
use crate::transport::ContentGenerator;

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Idle,
    Analyzing,
    Generating,
    Complete,
    Error,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub stage: SessionStage,
    pub message: String,
    pub detail: String,
}

impl FailureReport {
    pub fn requires_reauth(&self) -> bool {
        self.kind.requires_reauth()
    }
}

struct GeneratedAssets {
    past_image: String,
    modern_image: String,
    audio: String,
}

/// One upload-to-narration run and the record it produces.
///
/// Stages move `Idle -> Analyzing -> Generating -> Complete`, or to `Error`
/// from either working stage. `reset` returns to `Idle` from anywhere.
pub struct RestorationSession<'a> {
    generator: &'a dyn ContentGenerator,
    models: ResolvedModels,
    retry: RetryPolicy,
    events: EventWriter,
    stage: SessionStage,
    data: ReconstructionData,
    failure: Option<FailureReport>,
    started_at: Option<String>,
    started_clock: Option<DateTime<Utc>>,
    player: Option<NarrationPlayer>,
}

impl<'a> RestorationSession<'a> {
    pub fn new(
        generator: &'a dyn ContentGenerator,
        config: &EngineConfig,
        events: EventWriter,
    ) -> Result<Self> {
        let models = config.resolve_models()?;
        for reason in models.fallback_reasons() {
            let mut payload = EventPayload::new();
            payload.insert("reason".to_string(), json!(reason));
            events.emit("model_fallback", payload)?;
        }
        Ok(Self {
            generator,
            models,
            retry: config.retry,
            events,
            stage: SessionStage::Idle,
            data: ReconstructionData::default(),
            failure: None,
            started_at: None,
            started_clock: None,
            player: None,
        })
    }

    pub fn with_player(mut self, player: NarrationPlayer) -> Self {
        self.player = Some(player);
        self
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn data(&self) -> &ReconstructionData {
        &self.data
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> Option<&str> {
        self.started_at.as_deref()
    }

    pub fn models(&self) -> &ResolvedModels {
        &self.models
    }

    /// Runs analysis, then the three generation branches.
    ///
    /// On failure the session lands in `Error`, the report is kept in
    /// [`RestorationSession::failure`], and the error is returned unchanged.
    pub fn restore(
        &mut self,
        image: &ImageInput,
        context_hint: Option<&str>,
    ) -> Result<&ReconstructionData> {
        if matches!(self.stage, SessionStage::Analyzing | SessionStage::Generating) {
            bail!("session is already {}", self.stage.as_str());
        }
        self.stop_playback()?;
        self.data = ReconstructionData::with_original(image.to_data_uri());
        self.failure = None;
        self.started_at = Some(now_utc_iso());
        self.started_clock = Some(Utc::now());

        let mut payload = EventPayload::new();
        payload.insert("mime_type".to_string(), json!(image.mime_type));
        payload.insert(
            "context_hint".to_string(),
            json!(context_hint.map(str::trim).filter(|hint| !hint.is_empty())),
        );
        if let Err(err) = self.events.emit("session_started", payload) {
            return Err(self.fail(err));
        }

        self.advance(SessionStage::Analyzing)?;
        let analysis = match self.analyze(image, context_hint) {
            Ok(analysis) => analysis,
            Err(err) => return Err(self.fail(err)),
        };
        self.data.analysis = Some(analysis.clone());

        self.advance(SessionStage::Generating)?;
        let assets = match self.generate_assets(&analysis) {
            Ok(assets) => assets,
            Err(err) => return Err(self.fail(err)),
        };
        self.data.past_image = Some(assets.past_image);
        self.data.modern_image = Some(assets.modern_image);
        self.data.audio = Some(assets.audio);

        self.advance(SessionStage::Complete)?;
        Ok(&self.data)
    }

    /// Back to `Idle` with an empty record; any narration is stopped.
    pub fn reset(&mut self) -> Result<()> {
        let stopped = match self.player.as_mut() {
            Some(player) => player.release(),
            None => Ok(()),
        };
        self.data.clear();
        self.failure = None;
        self.started_at = None;
        self.started_clock = None;
        self.stage = SessionStage::Idle;
        self.events.emit("session_reset", EventPayload::new())?;
        stopped
    }

    pub fn play_narration(&mut self) -> Result<Duration> {
        let Some(audio) = self.data.audio.as_deref() else {
            bail!("no narration available; run a restoration first");
        };
        let buffer = decode_pcm_base64(audio, NARRATION_SAMPLE_RATE, NARRATION_CHANNELS)?;
        let player = self
            .player
            .as_mut()
            .ok_or_else(|| anyhow!("no audio output attached to this session"))?;
        player.play(&buffer)?;
        Ok(buffer.duration())
    }

    fn retrying(&self) -> RetryingGenerator<'a> {
        RetryingGenerator::new(self.generator, self.retry).with_events(self.events.clone())
    }

    fn analyze(&self, image: &ImageInput, context_hint: Option<&str>) -> Result<ArtifactAnalysis> {
        let analyzer = ArtifactAnalyzer::new(self.retrying(), self.models.analysis.model.name.clone());
        let analysis = analyzer.analyze(image, context_hint)?;

        let mut payload = EventPayload::new();
        payload.insert("model".to_string(), json!(analyzer.model()));
        payload.insert(
            "artifact_type".to_string(),
            json!(analysis.identification.artifact_type),
        );
        payload.insert(
            "confidence_score".to_string(),
            json!(analysis.confidence_score),
        );
        payload.insert("source_count".to_string(), json!(analysis.sources.len()));
        payload.insert("hotspot_count".to_string(), json!(analysis.hotspot_count()));
        self.events.emit("analysis_completed", payload)?;
        Ok(analysis)
    }

    // All branches are joined before the outcome is decided; one failure
    // fails the stage and the siblings' results are dropped.
    fn generate_assets(&self, analysis: &ArtifactAnalysis) -> Result<GeneratedAssets> {
        let images = ImageSynthesizer::new(self.retrying(), self.models.image.model.name.clone());
        let narrator =
            NarrationSynthesizer::new(self.retrying(), self.models.speech.model.name.clone());
        let past_prompt = analysis.past_reconstruction.image_prompt.as_str();
        let modern_prompt = analysis.modern_restoration.image_prompt.as_str();
        let narrative = analysis.curator_narrative.as_str();

        let events = &self.events;

        let (past, modern, audio) = thread::scope(|scope| {
            let past = scope.spawn(|| {
                run_branch(events, "past", images.model(), || {
                    images.synthesize(past_prompt)
                })
            });
            let modern = scope.spawn(|| {
                run_branch(events, "modern", images.model(), || {
                    images.synthesize(modern_prompt)
                })
            });
            let audio = scope.spawn(|| {
                run_branch(events, "narration", narrator.model(), || {
                    narrator.synthesize(narrative)
                })
            });
            (
                join_branch("past", past),
                join_branch("modern", modern),
                join_branch("narration", audio),
            )
        });

        Ok(GeneratedAssets {
            past_image: past?,
            modern_image: modern?,
            audio: audio?,
        })
    }

    fn advance(&mut self, stage: SessionStage) -> Result<()> {
        match self.enter(stage) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn enter(&mut self, stage: SessionStage) -> Result<()> {
        self.stage = stage;
        let mut payload = EventPayload::new();
        payload.insert("stage".to_string(), json!(stage.as_str()));
        let event_type = match stage {
            SessionStage::Analyzing => "analysis_started",
            SessionStage::Generating => "generation_started",
            SessionStage::Complete => "session_completed",
            SessionStage::Idle | SessionStage::Error => "stage_changed",
        };
        if stage == SessionStage::Complete {
            if let Some(started) = self.started_clock {
                let elapsed = Utc::now() - started;
                payload.insert("elapsed_ms".to_string(), json!(elapsed.num_milliseconds()));
            }
        }
        if stage == SessionStage::Generating {
            payload.insert(
                "models".to_string(),
                json!({
                    "image": self.models.image.model.name,
                    "speech": self.models.speech.model.name,
                }),
            );
        }
        self.events.emit(event_type, payload)?;
        Ok(())
    }

    fn fail(&mut self, err: anyhow::Error) -> anyhow::Error {
        let kind = classify_failure(&err);
        let report = FailureReport {
            kind,
            stage: self.stage,
            message: kind.user_message().to_string(),
            detail: error_chain_message(&err),
        };
        self.stage = SessionStage::Error;
        self.data.past_image = None;
        self.data.modern_image = None;
        self.data.audio = None;

        let mut payload = EventPayload::new();
        payload.insert("failed_stage".to_string(), json!(report.stage.as_str()));
        payload.insert("kind".to_string(), json!(kind.as_str()));
        payload.insert("requires_reauth".to_string(), json!(kind.requires_reauth()));
        payload.insert("detail".to_string(), Value::String(report.detail.clone()));
        self.failure = Some(report);
        if let Err(log_err) = self.events.emit("session_failed", payload) {
            return err.context(format!("failed to record session failure: {log_err}"));
        }
        err
    }

    fn stop_playback(&mut self) -> Result<()> {
        match self.player.as_mut() {
            Some(player) => player.stop(),
            None => Ok(()),
        }
    }
}

fn run_branch<F>(events: &EventWriter, branch: &str, model: &str, op: F) -> Result<String>
where
    F: FnOnce() -> Result<String>,
{
    let result = op().with_context(|| format!("{branch} generation failed"));
    let mut payload = EventPayload::new();
    payload.insert("branch".to_string(), json!(branch));
    payload.insert("model".to_string(), json!(model));
    payload.insert("ok".to_string(), json!(result.is_ok()));
    if let Err(err) = result.as_ref() {
        payload.insert("error".to_string(), json!(error_chain_message(err)));
    }
    events.emit("branch_completed", payload)?;
    result
}

fn join_branch(
    branch: &str,
    handle: thread::ScopedJoinHandle<'_, Result<String>>,
) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("{branch} generation worker panicked"))?
}
