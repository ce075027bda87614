//! Stdin framing between the launcher and a worker process
//!
//! Layout: `u32` little-endian header length, the JSON [`WorkerInput`]
//! header, then exactly `payload_len` raw audio bytes.

use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::job::{JobConfig, JobId};
use crate::{Result, ScribeError};

/// Largest header a worker will accept
const MAX_HEADER_LEN: usize = 1024 * 1024;

/// Everything a worker needs besides the audio bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInput {
    pub job_id: JobId,
    pub file_name: String,
    pub config: JobConfig,
    pub payload_len: u64,
}

/// Serialize the header frame that precedes the payload
pub fn encode_header(input: &WorkerInput) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(input)?;
    let len = u32::try_from(json.len())
        .map_err(|_| ScribeError::Ipc("worker header too large".to_string()))?;
    let mut bytes = len.to_le_bytes().to_vec();
    bytes.extend(json);
    Ok(bytes)
}

/// Read the header and the payload it announces
pub fn read_input<R: Read>(reader: &mut R) -> Result<(WorkerInput, Vec<u8>)> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_HEADER_LEN {
        return Err(ScribeError::Ipc(format!(
            "worker header too large: {} bytes",
            len
        )));
    }

    let mut header = vec![0u8; len];
    reader.read_exact(&mut header)?;
    let input: WorkerInput = serde_json::from_slice(&header)?;

    let mut payload = Vec::new();
    reader
        .by_ref()
        .take(input.payload_len)
        .read_to_end(&mut payload)?;

    if payload.len() as u64 != input.payload_len {
        return Err(ScribeError::Ipc(format!(
            "payload truncated: expected {} bytes, got {}",
            input.payload_len,
            payload.len()
        )));
    }

    Ok((input, payload))
}
