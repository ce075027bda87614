//! Code running inside an isolated worker process
//!
//! A worker reads one job from stdin, checks it, runs the engine and
//! reports through events on stdout. Whatever happens, it reports exactly
//! one terminal event (`finished` or `error`) and never lets an engine
//! failure escape as anything else.

pub mod protocol;

use chrono::Local;
use std::backtrace::Backtrace;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use tracing::{error, info};

use crate::config::Settings;
use crate::events::{Event, EventSink, JsonLinesSink};
use crate::job::{Device, JobConfig};
use crate::models::ModelCatalog;
use crate::transcription::{build_engine, Engine, TranscriptionRequest};
use crate::ScribeError;
use protocol::{read_input, WorkerInput};

/// Format of job timestamps, also used in file ids
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

/// Longest file stem kept in a file id
const MAX_STEM_CHARS: usize = 80;

/// Trace of the most recent panic, captured by the hook
static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);

/// Process entry point for `scribe worker`
pub fn run_stdio(settings: &Settings) -> std::io::Result<()> {
    install_panic_hook();

    let stdout = std::io::stdout();
    let mut sink = JsonLinesSink::new(stdout.lock());
    let mut stdin = std::io::stdin().lock();

    let engine = match build_engine(settings) {
        Ok(engine) => engine,
        Err(e) => return sink.emit(error_event(&e)),
    };
    let catalog = match ModelCatalog::scan(&settings.engine.models_dir) {
        Ok(catalog) => catalog,
        Err(e) => {
            let e = anyhow::Error::new(e).context("Failed to read models directory");
            return sink.emit(error_event(&e));
        }
    };

    run(&mut stdin, &mut sink, engine.as_ref(), &catalog)
}

/// Run one job read from `input`, reporting on `sink`.
///
/// Only fails when the sink itself can no longer be written to.
pub fn run<R: Read>(
    input: &mut R,
    sink: &mut dyn EventSink,
    engine: &dyn Engine,
    catalog: &ModelCatalog,
) -> std::io::Result<()> {
    let (job, payload) = match read_input(input) {
        Ok(parts) => parts,
        Err(e) => {
            let e = anyhow::Error::new(e).context("Failed to read job from orchestrator");
            return sink.emit(error_event(&e));
        }
    };

    info!("Worker started for job {} ({})", job.job_id.short(), job.file_name);

    if let Err(e) = check_inputs(&job, &payload, catalog, engine.supports_gpu()) {
        return sink.emit(error_event(&anyhow::Error::new(e)));
    }

    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let base_id = create_file_id(&job.file_name, &timestamp);
    let fallback_id = format!("{} {}", base_id, job.job_id.short());
    let file_id = match engine.reserve_output(&base_id, &fallback_id) {
        Ok(file_id) => file_id,
        Err(e) => {
            let e = anyhow::Error::new(e).context("Failed to create the output directory");
            return sink.emit(error_event(&e));
        }
    };
    let mut audio = Cursor::new(payload);
    let config = &job.config;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.transcribe(
            TranscriptionRequest {
                audio: &mut audio,
                file_id: &file_id,
                file_name: &job.file_name,
                model: &config.model,
                language: &config.language,
                speaker_detection: config.speaker_detection,
                speaker_count: config.speaker_count,
                device: config.device,
                precision: config.precision,
                timestamp: &timestamp,
            },
            &mut *sink,
        )
    }));

    let terminal = match outcome {
        Ok(Ok(())) => {
            info!("Job {} finished as {}", job.job_id.short(), file_id);
            Event::Finished { file_id }
        }
        Ok(Err(e)) => {
            error!("Job {} failed: {:#}", job.job_id.short(), e);
            error_event(&e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Job {} panicked: {}", job.job_id.short(), message);
            Event::Error {
                message,
                trace: take_panic_trace()
                    .unwrap_or_else(|| Backtrace::force_capture().to_string()),
            }
        }
    };

    sink.emit(terminal)
}

/// Structural checks before the engine is invoked
pub fn check_inputs(
    job: &WorkerInput,
    payload: &[u8],
    catalog: &ModelCatalog,
    gpu_available: bool,
) -> Result<(), ScribeError> {
    let JobConfig {
        model,
        language,
        device,
        ..
    } = &job.config;

    if job.file_name.trim().is_empty() {
        return Err(ScribeError::Input("no file was submitted".to_string()));
    }
    if payload.is_empty() {
        return Err(ScribeError::Input(format!(
            "the file '{}' is empty",
            job.file_name
        )));
    }

    let Some(installed) = catalog.get(model) else {
        return Err(ScribeError::Input(format!(
            "model '{}' is not installed (available: {})",
            model,
            catalog.names().join(", ")
        )));
    };
    if !installed.supports_language(language) {
        return Err(ScribeError::Input(format!(
            "model '{}' does not support language '{}'",
            model, language
        )));
    }

    if *device == Device::Gpu && !gpu_available {
        return Err(ScribeError::Input(
            "GPU transcription was requested but this build has no GPU support".to_string(),
        ));
    }

    Ok(())
}

/// `"<timestamp> <file stem>"`, with the stem trimmed for path safety
pub fn create_file_id(file_name: &str, timestamp: &str) -> String {
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .take(MAX_STEM_CHARS)
        .collect();

    format!("{} {}", timestamp, stem.trim())
}

fn error_event(error: &anyhow::Error) -> Event {
    Event::Error {
        message: format!("{:#}", error),
        trace: format!("{:?}", error),
    }
}

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let trace = format!("{}\n\n{}", info, Backtrace::force_capture());
        if let Ok(mut slot) = LAST_PANIC.lock() {
            *slot = Some(trace);
        }
        default_hook(info);
    }));
}

fn take_panic_trace() -> Option<String> {
    LAST_PANIC.lock().ok().and_then(|mut slot| slot.take())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "engine panicked".to_string()
    }
}
