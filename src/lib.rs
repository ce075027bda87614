//! scribe - Run transcription jobs in isolated worker processes
//!
//! The orchestrator accepts an audio file plus loosely-typed form fields,
//! launches one `scribe worker` process per job, and fans the worker's
//! events out to whoever is watching.

pub mod archive;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod events;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod transcription;
pub mod worker;

use thiserror::Error;

/// Main error type for scribe
#[derive(Error, Debug)]
pub enum ScribeError {
    /// Bad or missing job configuration, raised before any worker starts
    #[error("Validation error: {0}")]
    Validation(String),

    /// File/model/device mismatch detected inside a worker
    #[error("Input error: {0}")]
    Input(String),

    #[error("Engine error: {0}")]
    Engine(String),

    /// The isolated worker process could not be created
    #[error("Failed to launch worker: {0}")]
    Launch(String),

    #[error("Event channel is closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScribeError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "scribe";
