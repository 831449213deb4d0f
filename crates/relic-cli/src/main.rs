use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use relic_contracts::events::EventWriter;
use relic_contracts::models::{Capability, ModelRegistry};
use relic_contracts::reconstruction::{now_utc_iso, write_manifest, ReconstructionManifest};
use relic_engine::{
    classify_failure, decode_pcm_base64, error_chain_message, new_session_id, AudioOutput,
    EngineConfig, FailureKind, GeminiClient, ImageInput, NarrationPlayer, RestorationSession,
    SessionStage, WavFileOutput, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE,
};
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(name = "relic", version, about = "Artifact analysis and reconstruction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Restore(RestoreArgs),
    DecodeAudio(DecodeAudioArgs),
    Models,
}

#[derive(Debug, Parser)]
struct RestoreArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    context: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    analysis_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    speech_model: Option<String>,
}

#[derive(Debug, Parser)]
struct DecodeAudioArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = NARRATION_CHANNELS)]
    channels: u16,
    #[arg(long, default_value_t = NARRATION_SAMPLE_RATE)]
    sample_rate: u32,
}

const EXIT_FAILURE: i32 = 1;
const EXIT_REAUTH: i32 = 2;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("relic error: {err:#}");
            std::process::exit(exit_code_for(classify_failure(&err)));
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Restore(args) => run_restore(args),
        Command::DecodeAudio(args) => run_decode_audio(args),
        Command::Models => run_models(),
    }
}

fn run_restore(args: RestoreArgs) -> Result<i32> {
    let mut config = EngineConfig::from_env();
    config.analysis_model = args.analysis_model.or(config.analysis_model);
    config.image_model = args.image_model.or(config.image_model);
    config.speech_model = args.speech_model.or(config.speech_model);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = new_session_id();
    let events = EventWriter::new(&events_path, session_id.clone());

    let image = ImageInput::from_path(&args.image)?;
    let client = GeminiClient::new(&config)?;
    let wav_path = args.out.join("narration.wav");
    let player_path = wav_path.clone();
    let player = NarrationPlayer::new(move || {
        Ok(Box::new(WavFileOutput::new(player_path.clone())) as Box<dyn AudioOutput>)
    });
    let mut session = RestorationSession::new(&client, &config, events)?.with_player(player);
    for reason in session.models().fallback_reasons() {
        println!("note: {reason}");
    }

    println!(
        "Session {session_id}: analyzing {} with {}",
        args.image.display(),
        session.models().analysis.model.name
    );
    let mut artifacts = Map::new();
    let outcome = session.restore(&image, args.context.as_deref()).map(|_| ());
    if let Err(err) = outcome {
        let (kind, message) = match session.failure() {
            Some(report) => (report.kind, report.message.clone()),
            None => {
                let kind = classify_failure(&err);
                (kind, kind.user_message().to_string())
            }
        };
        write_session_manifest(&args.out, &session, artifacts)?;
        eprintln!("relic error: {message}");
        eprintln!("  {}", error_chain_message(&err));
        return Ok(exit_code_for(kind));
    }

    let data = session.data().clone();
    if let Some(analysis) = data.analysis.as_ref() {
        let analysis_path = args.out.join("analysis.json");
        fs::write(&analysis_path, serde_json::to_string_pretty(analysis)?)
            .with_context(|| format!("failed writing {}", analysis_path.display()))?;
        artifacts.insert("analysis".to_string(), path_value(&analysis_path));
        println!(
            "Identified: {} ({}, {}), confidence {}%",
            analysis.identification.artifact_type,
            analysis.identification.civilization,
            analysis.identification.year_range,
            analysis.confidence_score
        );
    }
    for (name, uri) in [
        ("original", data.original_image.as_deref()),
        ("past", data.past_image.as_deref()),
        ("modern", data.modern_image.as_deref()),
    ] {
        let Some(uri) = uri else {
            continue;
        };
        let path = write_data_uri(&args.out, name, uri)?;
        println!("Wrote {}", path.display());
        artifacts.insert(name.to_string(), path_value(&path));
    }

    let duration = session.play_narration()?;
    println!(
        "Wrote {} ({:.1}s narration)",
        wav_path.display(),
        duration.as_secs_f64()
    );
    artifacts.insert("narration".to_string(), path_value(&wav_path));

    let manifest_path = write_session_manifest(&args.out, &session, artifacts)?;
    println!("Manifest: {}", manifest_path.display());
    Ok(0)
}

fn run_decode_audio(args: DecodeAudioArgs) -> Result<i32> {
    let encoded = fs::read_to_string(&args.input)
        .with_context(|| format!("failed reading {}", args.input.display()))?;
    let buffer = decode_pcm_base64(encoded.trim(), args.sample_rate, args.channels)?;
    buffer.write_wav(&args.out)?;
    println!(
        "Decoded {} frames x {} channels ({:.2}s) to {}",
        buffer.frames(),
        buffer.channel_count(),
        buffer.duration().as_secs_f64(),
        args.out.display()
    );
    Ok(0)
}

fn run_models() -> Result<i32> {
    let registry = ModelRegistry::default();
    for capability in Capability::ALL {
        println!("{capability}:");
        for (idx, model) in registry.for_capability(capability).enumerate() {
            let marker = if idx == 0 { " (default)" } else { "" };
            println!("  {} [{}]{marker}", model.name, model.provider);
        }
    }
    Ok(0)
}

fn write_session_manifest(
    out_dir: &Path,
    session: &RestorationSession<'_>,
    artifacts: Map<String, Value>,
) -> Result<PathBuf> {
    let finished_at = now_utc_iso();
    let manifest = ReconstructionManifest {
        session_id: session.session_id().to_string(),
        started_at: session
            .started_at()
            .map(str::to_string)
            .unwrap_or_else(|| finished_at.clone()),
        finished_at,
        stage: session.stage().as_str().to_string(),
        artifacts,
    };
    let path = out_dir.join("reconstruction.json");
    let analysis = match session.stage() {
        SessionStage::Idle => None,
        _ => session.data().analysis.as_ref(),
    };
    write_manifest(&path, &manifest, analysis)?;
    Ok(path)
}

fn write_data_uri(out_dir: &Path, name: &str, uri: &str) -> Result<PathBuf> {
    let (mime_type, bytes) = decode_data_uri(uri)?;
    let path = out_dir.join(format!("{name}.{}", extension_for_mime(&mime_type)));
    fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let Some(rest) = uri.trim().strip_prefix("data:") else {
        bail!("expected a data URI");
    };
    let Some((header, payload)) = rest.split_once(',') else {
        bail!("data URI has no payload");
    };
    let Some(mime_type) = header.strip_suffix(";base64") else {
        bail!("data URI is not base64 encoded");
    };
    let bytes = BASE64
        .decode(payload.trim())
        .context("data URI payload is not valid base64")?;
    Ok((mime_type.to_string(), bytes))
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

fn exit_code_for(kind: FailureKind) -> i32 {
    if kind.requires_reauth() {
        EXIT_REAUTH
    } else {
        EXIT_FAILURE
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().to_string())
}
