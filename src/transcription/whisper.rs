//! Whisper transcription using whisper-rs

use anyhow::{Context, Result};
use std::path::PathBuf;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::archive::{Archive, TranscriptionMetadata};
use crate::config::Settings;
use crate::events::{Event, EventSink};
use crate::job::Device;
use crate::models::{ModelCatalog, AUTO_LANGUAGE};
use crate::transcription::audio::{load_audio, WHISPER_SAMPLE_RATE};
use crate::transcription::outputs::{merge_segments, write_outputs, Segment};
use crate::transcription::{Engine, TranscriptionRequest};

/// Length of the slices fed to whisper, in seconds
const CHUNK_DURATION_SECS: f32 = 30.0;

/// Whisper-based engine, loading the requested model per job
pub struct WhisperEngine {
    models_dir: PathBuf,
    archive: Archive,
    threads: u32,
}

impl WhisperEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            models_dir: settings.engine.models_dir.clone(),
            archive: Archive::new(&settings.engine.outputs_dir),
            threads: settings.engine.threads,
        }
    }

    fn load_context(&self, request: &TranscriptionRequest<'_>) -> Result<WhisperContext> {
        let catalog = ModelCatalog::scan(&self.models_dir)?;
        let model_path = catalog
            .get(request.model)
            .and_then(|model| model.weights_for(request.precision))
            .with_context(|| {
                format!(
                    "Whisper model '{}' not found in {}",
                    request.model,
                    self.models_dir.display()
                )
            })?;

        let path = model_path
            .to_str()
            .context("Model path is not valid UTF-8")?;

        let mut params = WhisperContextParameters::default();
        params.use_gpu(request.device == Device::Gpu);

        WhisperContext::new_with_params(path, params).context("Failed to load Whisper model")
    }

    fn transcribe_chunk(
        &self,
        ctx: &WhisperContext,
        samples: &[f32],
        language: Option<&str>,
    ) -> Result<Vec<Segment>> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(language);
        if self.threads > 0 {
            params.set_n_threads(self.threads as i32);
        }

        let mut state = ctx.create_state().context("Failed to create Whisper state")?;
        state
            .full(params, samples)
            .context("Whisper inference failed")?;

        let num_segments = state.full_n_segments().context("Failed to get segment count")?;
        let mut segments = Vec::new();

        for i in 0..num_segments {
            // whisper reports centiseconds
            let start = state
                .full_get_segment_t0(i)
                .context("Failed to get segment start time")? as f64
                / 100.0;
            let end = state
                .full_get_segment_t1(i)
                .context("Failed to get segment end time")? as f64
                / 100.0;
            let text = state
                .full_get_segment_text(i)
                .context("Failed to get segment text")?;

            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }

            segments.push(Segment {
                start,
                end,
                text,
                speaker: None,
            });
        }

        Ok(segments)
    }
}

impl Engine for WhisperEngine {
    fn supports_gpu(&self) -> bool {
        cfg!(feature = "cuda")
    }

    fn reserve_output(&self, preferred: &str, fallback: &str) -> std::io::Result<String> {
        self.archive.reserve(preferred, fallback)
    }

    fn transcribe(
        &self,
        mut request: TranscriptionRequest<'_>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        sink.emit(Event::info("Loading audio"))?;
        let samples = load_audio(&mut *request.audio)?;
        if samples.is_empty() {
            anyhow::bail!("Audio file {} contains no samples", request.file_name);
        }

        sink.emit(Event::info(format!("Loading model {}", request.model)))?;
        let ctx = self.load_context(&request)?;

        if request.speaker_detection {
            sink.emit(Event::info(
                "Speaker detection is not available with the whisper engine; \
                 the transcript will not be split by speaker",
            ))?;
        }

        let language = (request.language != AUTO_LANGUAGE).then_some(request.language);
        let chunk_samples = (CHUNK_DURATION_SECS * WHISPER_SAMPLE_RATE as f32) as usize;
        let chunks: Vec<_> = samples.chunks(chunk_samples).collect();
        let total = chunks.len() as u64;

        sink.emit(Event::info("Transcribing"))?;
        let mut all_segments = Vec::new();
        let mut offset = 0.0;

        for (i, chunk) in chunks.iter().enumerate() {
            tracing::debug!("Processing chunk {}/{}", i + 1, total);

            let mut segments = self.transcribe_chunk(&ctx, chunk, language)?;
            for segment in &mut segments {
                segment.start += offset;
                segment.end += offset;
            }
            all_segments.extend(segments);
            offset += chunk.len() as f64 / WHISPER_SAMPLE_RATE as f64;

            sink.emit(Event::Progress {
                current: i as u64 + 1,
                total,
            })?;
        }

        let segments = merge_segments(all_segments);
        tracing::info!("Transcription complete: {} segments", segments.len());

        sink.emit(Event::info("Writing outputs"))?;
        let metadata = TranscriptionMetadata {
            file_id: request.file_id.to_string(),
            file_name: request.file_name.to_string(),
            model: request.model.to_string(),
            language: request.language.to_string(),
            device: request.device,
            precision: request.precision,
            speaker_detection: request.speaker_detection,
            speaker_count: request.speaker_count,
            timestamp: request.timestamp.to_string(),
            audio_duration_secs: offset,
            segments: segments.len(),
        };
        write_outputs(&self.archive.job_dir(request.file_id), &metadata, &segments)?;

        Ok(())
    }
}
