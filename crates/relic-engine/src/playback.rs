use std::path::PathBuf;

use anyhow::Result;
use thiserror::Error;

use crate::audio::AudioBuffer;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback already stopped")]
    AlreadyStopped,
    #[error(transparent)]
    Output(#[from] anyhow::Error),
}

pub trait PlaybackHandle: Send {
    fn stop(&mut self) -> Result<(), PlaybackError>;
}

pub trait AudioOutput: Send {
    fn start(&mut self, buffer: &AudioBuffer) -> Result<Box<dyn PlaybackHandle>>;
}

type AcquireOutput = Box<dyn FnMut() -> Result<Box<dyn AudioOutput>> + Send>;

/// Owns the audio output for one session.
///
/// The output is acquired on first use. Any active playback is stopped
/// before a new one starts, and on [`NarrationPlayer::release`] or drop.
pub struct NarrationPlayer {
    acquire: AcquireOutput,
    output: Option<Box<dyn AudioOutput>>,
    active: Option<Box<dyn PlaybackHandle>>,
}

impl NarrationPlayer {
    pub fn new<F>(acquire: F) -> Self
    where
        F: FnMut() -> Result<Box<dyn AudioOutput>> + Send + 'static,
    {
        Self {
            acquire: Box::new(acquire),
            output: None,
            active: None,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.output.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    pub fn play(&mut self, buffer: &AudioBuffer) -> Result<()> {
        self.stop()?;
        if self.output.is_none() {
            self.output = Some((self.acquire)()?);
        }
        if let Some(output) = self.output.as_mut() {
            self.active = Some(output.start(buffer)?);
        }
        Ok(())
    }

    /// Stopping an already-stopped playback is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut handle) = self.active.take() else {
            return Ok(());
        };
        match handle.stop() {
            Ok(()) | Err(PlaybackError::AlreadyStopped) => Ok(()),
            Err(PlaybackError::Output(err)) => Err(err.context("failed to stop narration")),
        }
    }

    pub fn release(&mut self) -> Result<()> {
        let stopped = self.stop();
        self.output = None;
        stopped
    }
}

impl Drop for NarrationPlayer {
    fn drop(&mut self) {
        if let Some(mut handle) = self.active.take() {
            let _ = handle.stop();
        }
    }
}

/// Renders each playback into a WAV file at `path`.
pub struct WavFileOutput {
    path: PathBuf,
}

impl WavFileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AudioOutput for WavFileOutput {
    fn start(&mut self, buffer: &AudioBuffer) -> Result<Box<dyn PlaybackHandle>> {
        buffer.write_wav(&self.path)?;
        Ok(Box::new(RenderedPlayback))
    }
}

struct RenderedPlayback;

impl PlaybackHandle for RenderedPlayback {
    fn stop(&mut self) -> Result<(), PlaybackError> {
        Err(PlaybackError::AlreadyStopped)
    }
}
