//! Transcription module for scribe
//!
//! Defines the [`Engine`] a worker drives and the default whisper-rs
//! implementation.

#[cfg(feature = "whisper")]
mod audio;
mod outputs;
#[cfg(feature = "whisper")]
mod whisper;

pub use outputs::{merge_segments, write_outputs, Segment};
#[cfg(feature = "whisper")]
pub use whisper::WhisperEngine;

use std::io::Read;

use crate::config::Settings;
use crate::events::EventSink;
use crate::job::{Device, Precision};

/// Everything an engine gets for one job
pub struct TranscriptionRequest<'a> {
    pub audio: &'a mut dyn Read,
    /// Name of the output directory, unique per job
    pub file_id: &'a str,
    pub file_name: &'a str,
    pub model: &'a str,
    pub language: &'a str,
    pub speaker_detection: bool,
    pub speaker_count: Option<u32>,
    pub device: Device,
    pub precision: Precision,
    pub timestamp: &'a str,
}

/// The transcription capability a worker invokes
///
/// Implementations may block for a long time and may fail or panic; the
/// worker turns either into an error event.
pub trait Engine {
    /// Whether `Device::Gpu` jobs can run
    fn supports_gpu(&self) -> bool;

    /// Claim the output location for a job. `fallback` is used when
    /// `preferred` already belongs to another job; returns the id claimed.
    fn reserve_output(&self, preferred: &str, _fallback: &str) -> std::io::Result<String> {
        Ok(preferred.to_string())
    }

    fn transcribe(
        &self,
        request: TranscriptionRequest<'_>,
        sink: &mut dyn EventSink,
    ) -> anyhow::Result<()>;
}

/// Build the engine this binary was compiled with
#[cfg(feature = "whisper")]
pub fn build_engine(settings: &Settings) -> anyhow::Result<Box<dyn Engine>> {
    Ok(Box::new(WhisperEngine::new(settings)))
}

#[cfg(not(feature = "whisper"))]
pub fn build_engine(_settings: &Settings) -> anyhow::Result<Box<dyn Engine>> {
    anyhow::bail!("scribe was built without a transcription engine (enable the `whisper` feature)")
}
