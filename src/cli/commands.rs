//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Local;
use std::time::Duration;

use crate::archive::Archive;
use crate::cli::args::{ConfigCommand, DaemonCommand, SubmitArgs};
use crate::config::Settings;
use crate::daemon::client::DaemonClient;
use crate::daemon::ipc::{DaemonRequest, DaemonResponse};
use crate::events::{Event, JobEvent};
use crate::job::{
    FieldValue, JobId, JobState, JobSummary, RawFields, FIELD_FLOAT16, FIELD_GPU, FIELD_LANGUAGE, FIELD_MODEL,
    FIELD_NUM_SPEAKERS, FIELD_SPEAKER_DETECTION,
};
use crate::models::{DefaultModel, ModelCatalog};

/// Submit a file to the daemon, optionally following its events
pub async fn submit(settings: &Settings, args: SubmitArgs) -> Result<()> {
    let file_path = std::fs::canonicalize(&args.file)
        .with_context(|| format!("Cannot read {}", args.file.display()))?;

    // Subscribe first so no early event is missed
    let mut watcher = if args.watch {
        let mut client = DaemonClient::connect(settings).await?;
        match client.send(DaemonRequest::Subscribe).await? {
            DaemonResponse::Subscribed => Some(client),
            DaemonResponse::Error { message } => anyhow::bail!("Cannot watch job: {}", message),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    } else {
        None
    };

    let mut client = DaemonClient::connect(settings).await?;
    let response = client
        .send(DaemonRequest::Submit {
            fields: submit_fields(&args),
            file_path,
        })
        .await?;

    let id = match response {
        DaemonResponse::Submitted { id } => id,
        DaemonResponse::Error { message } => anyhow::bail!("Submission failed: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    };
    println!("Submitted job {} ({})", id.short(), args.file.display());

    if let Some(watcher) = watcher.as_mut() {
        follow_job(watcher, &mut client, id).await?;
    }

    Ok(())
}

/// Raw form fields for a submission, as the orchestrator expects them
pub fn submit_fields(args: &SubmitArgs) -> RawFields {
    let mut fields = RawFields::new();
    fields.insert(FIELD_MODEL.to_string(), FieldValue::from(args.model.as_str()));
    fields.insert(
        FIELD_LANGUAGE.to_string(),
        FieldValue::from(args.language.as_str()),
    );
    if args.gpu {
        fields.insert(FIELD_GPU.to_string(), FieldValue::from(true));
    }
    if args.float16 {
        fields.insert(FIELD_FLOAT16.to_string(), FieldValue::from(true));
    }
    if args.speaker_detection {
        fields.insert(FIELD_SPEAKER_DETECTION.to_string(), FieldValue::from(true));
        if let Some(count) = &args.num_speakers {
            fields.insert(
                FIELD_NUM_SPEAKERS.to_string(),
                FieldValue::from(count.as_str()),
            );
        }
    }
    fields
}

/// Print the job's events until it settles. `client` is used to look the
/// job up when the watcher falls behind and may have missed its result.
async fn follow_job(
    watcher: &mut DaemonClient,
    client: &mut DaemonClient,
    id: JobId,
) -> Result<()> {
    while let Some(response) = watcher.next().await? {
        match response {
            DaemonResponse::Event(JobEvent { job_id, event }) if job_id == id => {
                println!("{}", format_event(&event));
                match event {
                    Event::Finished { .. } => return Ok(()),
                    Event::Error { message, .. } => anyhow::bail!("Job failed: {}", message),
                    _ => {}
                }
            }
            DaemonResponse::Lagged { skipped } => {
                println!("Missed {} events, checking job state", skipped);
                let jobs = match client.send(DaemonRequest::ListJobs).await? {
                    DaemonResponse::Jobs(jobs) => jobs,
                    DaemonResponse::Error { message } => {
                        anyhow::bail!("Failed to check job {}: {}", id.short(), message)
                    }
                    _ => anyhow::bail!("Unexpected response from daemon"),
                };
                if settled(&jobs, id)? {
                    return Ok(());
                }
            }
            DaemonResponse::EndOfStream => {
                anyhow::bail!("Daemon shut down before the job finished")
            }
            _ => {}
        }
    }

    anyhow::bail!("Lost connection to daemon")
}

/// Whether the job finished successfully, judging by a listing.
/// `Ok(false)` means it is still running.
fn settled(jobs: &[JobSummary], id: JobId) -> Result<bool> {
    let Some(job) = jobs.iter().find(|job| job.id == id) else {
        anyhow::bail!("Job {} is no longer tracked by the daemon", id.short());
    };

    match job.state {
        JobState::Completed => {
            println!("Job {} completed", id.short());
            Ok(true)
        }
        JobState::Errored => anyhow::bail!("Job failed; its error event was missed"),
        JobState::Terminated => anyhow::bail!("Job was terminated"),
        JobState::Created | JobState::Running => Ok(false),
    }
}

/// List jobs the daemon is tracking
pub async fn list_jobs(settings: &Settings) -> Result<()> {
    let mut client = DaemonClient::connect(settings).await?;

    let jobs = match client.send(DaemonRequest::ListJobs).await? {
        DaemonResponse::Jobs(jobs) => jobs,
        DaemonResponse::Error { message } => anyhow::bail!("Failed to list jobs: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    };

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!("{:<10} {:<32} {:<12} {:<20}", "ID", "File", "State", "Started");
    println!("{}", "-".repeat(74));

    for job in jobs {
        let started = job.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        println!(
            "{:<10} {:<32} {:<12} {:<20}",
            job.id.short(),
            truncate(&job.file_name, 30),
            job.state.as_str(),
            started
        );
    }

    Ok(())
}

/// Terminate every job
pub async fn stop_all(settings: &Settings) -> Result<()> {
    let mut client = DaemonClient::connect(settings).await?;

    match client.send(DaemonRequest::StopAll).await? {
        DaemonResponse::Ok => println!("All jobs stopped"),
        DaemonResponse::Error { message } => anyhow::bail!("Failed to stop jobs: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }

    Ok(())
}

/// Print every event until the daemon closes the stream
pub async fn watch(settings: &Settings) -> Result<()> {
    let mut client = DaemonClient::connect(settings).await?;

    match client.send(DaemonRequest::Subscribe).await? {
        DaemonResponse::Subscribed => {}
        DaemonResponse::Error { message } => anyhow::bail!("Cannot watch jobs: {}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }

    while let Some(response) = client.next().await? {
        match response {
            DaemonResponse::Event(JobEvent { job_id, event }) => {
                println!("{} {}", job_id.short(), format_event(&event));
            }
            DaemonResponse::Lagged { skipped } => {
                println!("Missed {} events", skipped);
            }
            DaemonResponse::EndOfStream => {
                println!("Event stream closed");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// List installed models
pub fn list_models(settings: &Settings) -> Result<()> {
    let models_dir = &settings.engine.models_dir;
    let catalog = ModelCatalog::scan(models_dir)
        .with_context(|| format!("Failed to read models from {}", models_dir.display()))?;

    match catalog.default_model() {
        DefaultModel::Preferred(name) => println!("Default model: {}", name),
        DefaultModel::NoModelsAvailable => {
            println!("No models installed in {}", models_dir.display());
            println!("Download ggml models (e.g. ggml-base.bin) into that directory.");
            return Ok(());
        }
    }

    println!();
    println!("{:<20} {:<12} {:<10}", "Model", "Variants", "Languages");
    println!("{}", "-".repeat(44));

    for model in catalog.models() {
        let mut variants = Vec::new();
        if model.full.is_some() {
            variants.push("full");
        }
        if !model.quantized.is_empty() {
            variants.push("int8");
        }
        let languages = if model.is_english_only() {
            "en only".to_string()
        } else {
            format!("{}", model.languages().len())
        };
        println!(
            "{:<20} {:<12} {:<10}",
            model.name,
            variants.join(","),
            languages
        );
    }

    Ok(())
}

/// List finished transcriptions, newest first
pub fn list_archive(settings: &Settings, limit: usize) -> Result<()> {
    let archive = Archive::new(&settings.engine.outputs_dir);
    let entries = archive.list().with_context(|| {
        format!(
            "Failed to read transcriptions from {}",
            archive.root().display()
        )
    })?;

    if entries.is_empty() {
        println!("No transcriptions found");
        return Ok(());
    }

    println!(
        "{:<40} {:<10} {:<6} {:<10}",
        "Transcription", "Model", "Lang", "Duration"
    );
    println!("{}", "-".repeat(68));

    for entry in entries.into_iter().take(limit) {
        let metadata = entry.metadata;
        println!(
            "{:<40} {:<10} {:<6} {:<10}",
            truncate(&metadata.file_id, 38),
            metadata.model,
            metadata.language,
            format_duration(metadata.audio_duration_secs as u64)
        );
    }

    Ok(())
}

/// Handle daemon subcommands
pub async fn daemon_command(settings: &Settings, cmd: DaemonCommand) -> Result<()> {
    match cmd {
        DaemonCommand::Start { foreground } => {
            if foreground {
                crate::daemon::run_foreground(settings).await?;
            } else {
                crate::daemon::start_daemon(settings)?;
                println!("Daemon started");
            }
        }
        DaemonCommand::Stop => {
            let mut client = DaemonClient::connect(settings).await?;
            client.send(DaemonRequest::Shutdown).await?;
            println!("Daemon stopped");
        }
        DaemonCommand::Restart => {
            if let Ok(mut client) = DaemonClient::connect(settings).await {
                let _ = client.send(DaemonRequest::Shutdown).await;
                if !crate::daemon::wait_for_exit(settings, Duration::from_secs(5)).await {
                    anyhow::bail!("Daemon did not stop in time");
                }
            }
            crate::daemon::start_daemon(settings)?;
            println!("Daemon restarted");
        }
        DaemonCommand::Status => match DaemonClient::connect(settings).await {
            Ok(mut client) => {
                let response = client.send(DaemonRequest::Ping).await?;
                if matches!(response, DaemonResponse::Pong) {
                    println!("Daemon is running");
                }
            }
            Err(_) => {
                println!("Daemon is not running");
            }
        },
    }

    Ok(())
}

/// Handle config subcommands
pub fn config_command(settings: &Settings, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(settings)?;
            println!("{}", toml);
        }
        ConfigCommand::Path => {
            let path = Settings::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = Settings::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Settings::write_default(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

// Helper functions

fn format_event(event: &Event) -> String {
    match event {
        Event::Progress { current, total } => format!("progress {}/{}", current, total),
        Event::Info { message } => format!("info     {}", message),
        Event::Finished { file_id } => format!("finished {}", file_id),
        Event::Error { message, trace } => format!("error    {}\n{}", message, trace.trim_end()),
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
