//! Transcript files written for each finished job

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::archive::{TranscriptionMetadata, METADATA_FILE};

/// A span of transcribed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds from the beginning of the file
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Speaker label, when the engine detects speakers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Merge adjacent segments with small gaps
pub fn merge_segments(segments: Vec<Segment>) -> Vec<Segment> {
    let mut iter = segments.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };
    let mut merged = Vec::new();

    for segment in iter {
        // If segments are close together (within 0.5s) and from same speaker, merge
        let gap = segment.start - current.end;

        if gap < 0.5 && current.speaker == segment.speaker {
            current.end = segment.end;
            current.text.push(' ');
            current.text.push_str(&segment.text);
        } else {
            merged.push(current);
            current = segment;
        }
    }

    merged.push(current);
    merged
}

/// Write `transcription.{txt,srt,json}` and the metadata file into `dir`
pub fn write_outputs(
    dir: &Path,
    metadata: &TranscriptionMetadata,
    segments: &[Segment],
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    std::fs::write(dir.join("transcription.txt"), as_txt(segments))?;
    std::fs::write(dir.join("transcription.srt"), as_srt(segments))?;
    std::fs::write(
        dir.join("transcription.json"),
        serde_json::to_string_pretty(segments)?,
    )?;

    // Metadata last: the archive only lists directories that have it
    std::fs::write(
        dir.join(METADATA_FILE),
        serde_json::to_string_pretty(metadata)?,
    )?;

    Ok(())
}

fn as_txt(segments: &[Segment]) -> String {
    let mut output = String::new();
    for segment in segments {
        let _ = write!(output, "[{}] ", format_timestamp(segment.start));
        if let Some(speaker) = &segment.speaker {
            let _ = write!(output, "{}: ", speaker);
        }
        let _ = writeln!(output, "{}", segment.text);
    }
    output
}

fn as_srt(segments: &[Segment]) -> String {
    let mut output = String::new();

    for (i, segment) in segments.iter().enumerate() {
        let _ = writeln!(output, "{}", i + 1);
        let _ = writeln!(
            output,
            "{} --> {}",
            format_srt_timestamp(segment.start),
            format_srt_timestamp(segment.end)
        );
        let _ = writeln!(output, "{}\n", segment.text);
    }

    output
}

fn format_timestamp(secs: f64) -> String {
    let total_secs = secs as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn format_srt_timestamp(secs: f64) -> String {
    let total_ms = (secs * 1000.0) as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, ms)
}
