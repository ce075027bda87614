//! Job configuration resolution
//!
//! Submissions arrive as flat form fields where booleans are usually
//! signalled by the mere presence of a key. [`resolve`] turns that into a
//! [`JobConfig`] whose device and precision are always one of the known
//! values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Result, ScribeError};

/// Raw value of a submitted form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Loosely-typed submission fields, keyed by form name
pub type RawFields = BTreeMap<String, FieldValue>;

/// Compute device the engine runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Self::Cpu),
            "gpu" | "cuda" => Some(Self::Gpu),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision used for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Low precision, quantized weights
    #[default]
    Int8,
    /// High precision
    Float16,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Float16 => "float16",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int8" => Some(Self::Int8),
            "float16" => Some(Self::Float16),
            _ => None,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated configuration for a single transcription job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub model: String,
    pub language: String,
    pub device: Device,
    pub precision: Precision,
    pub speaker_detection: bool,
    /// Expected number of speakers; only ever set with speaker detection on
    pub speaker_count: Option<u32>,
}

pub const FIELD_MODEL: &str = "model";
pub const FIELD_LANGUAGE: &str = "language";
pub const FIELD_SPEAKER_DETECTION: &str = "speaker_detection";
pub const FIELD_NUM_SPEAKERS: &str = "num_speakers";
pub const FIELD_GPU: &str = "GPU";
pub const FIELD_FLOAT16: &str = "float16";
pub const FIELD_DEVICE: &str = "device";
pub const FIELD_COMPUTE_TYPE: &str = "compute_type";

/// Resolve raw submission fields into a [`JobConfig`]
pub fn resolve(fields: &RawFields) -> Result<JobConfig> {
    let model = required_text(fields, FIELD_MODEL)?;
    let language = required_text(fields, FIELD_LANGUAGE)?;

    let device = if is_present(fields, FIELD_GPU) {
        Device::Gpu
    } else {
        text(fields, FIELD_DEVICE)
            .and_then(Device::parse)
            .unwrap_or_default()
    };

    let precision = if is_present(fields, FIELD_FLOAT16) {
        Precision::Float16
    } else {
        text(fields, FIELD_COMPUTE_TYPE)
            .and_then(Precision::parse)
            .unwrap_or_default()
    };

    let speaker_detection = is_present(fields, FIELD_SPEAKER_DETECTION);
    let speaker_count = if speaker_detection {
        parse_speaker_count(text(fields, FIELD_NUM_SPEAKERS))?
    } else {
        None
    };

    Ok(JobConfig {
        model,
        language,
        device,
        precision,
        speaker_detection,
        speaker_count,
    })
}

fn text<'a>(fields: &'a RawFields, key: &str) -> Option<&'a str> {
    match fields.get(key) {
        Some(FieldValue::Text(value)) => Some(value.as_str()),
        _ => None,
    }
}

fn required_text(fields: &RawFields, key: &str) -> Result<String> {
    match text(fields, key).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ScribeError::Validation(format!(
            "missing required field '{}'",
            key
        ))),
    }
}

/// A checkbox counts as set when its key is present, unless it was
/// explicitly submitted as `false`.
fn is_present(fields: &RawFields, key: &str) -> bool {
    !matches!(fields.get(key), None | Some(FieldValue::Flag(false)))
}

fn parse_speaker_count(value: Option<&str>) -> Result<Option<u32>> {
    let value = match value.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(v) if v.eq_ignore_ascii_case("auto") => return Ok(None),
        Some(v) => v,
    };

    match value.parse::<u32>() {
        Ok(0) => Ok(None),
        Ok(count) => Ok(Some(count)),
        Err(_) => Err(ScribeError::Validation(format!(
            "'{}' must be a whole number or 'auto', got '{}'",
            FIELD_NUM_SPEAKERS, value
        ))),
    }
}
