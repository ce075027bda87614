//! Job module for scribe
//!
//! Configuration resolution, worker launching and the registry of
//! in-flight jobs.

mod config;
mod handle;
mod launcher;
mod registry;

pub use config::{resolve, Device, FieldValue, JobConfig, Precision, RawFields};
pub use config::{
    FIELD_COMPUTE_TYPE, FIELD_DEVICE, FIELD_FLOAT16, FIELD_GPU, FIELD_LANGUAGE, FIELD_MODEL,
    FIELD_NUM_SPEAKERS, FIELD_SPEAKER_DETECTION,
};
pub use handle::{JobHandle, JobId, JobState, JobSummary};
pub use launcher::{AudioPayload, WorkerCommand, WorkerLauncher};
pub use registry::JobRegistry;
