//! IPC protocol definitions for daemon communication
//!
//! Every message is a little-endian `u32` length followed by that many
//! bytes of JSON.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::events::JobEvent;
use crate::job::{JobId, JobSummary, RawFields};
use crate::{Result, ScribeError};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Request sent from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    /// Submit an audio file; the daemon reads `file_path` itself
    Submit { fields: RawFields, file_path: PathBuf },

    /// List registered jobs
    ListJobs,

    /// Terminate and forget every job
    StopAll,

    /// Turn this connection into an event stream
    Subscribe,

    /// Ping to check if daemon is alive
    Ping,

    /// Tear down and exit
    Shutdown,
}

/// Response sent from the daemon to the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonResponse {
    Submitted { id: JobId },

    Jobs(Vec<JobSummary>),

    /// Subscription is live; events follow
    Subscribed,

    Event(JobEvent),

    /// The subscriber fell behind and `skipped` events were dropped
    Lagged { skipped: u64 },

    /// No more events will follow on this connection
    EndOfStream,

    /// Pong response to ping
    Pong,

    /// Acknowledgment (for shutdown, etc.)
    Ok,

    /// Error response
    Error { message: String },
}

/// Serialize a request to bytes for IPC
pub fn serialize_request(request: &DaemonRequest) -> Result<Vec<u8>> {
    frame(serde_json::to_vec(request)?)
}

/// Serialize a response to bytes for IPC
pub fn serialize_response(response: &DaemonResponse) -> Result<Vec<u8>> {
    frame(serde_json::to_vec(response)?)
}

/// Deserialize a request from bytes
pub fn deserialize_request(data: &[u8]) -> Result<DaemonRequest> {
    Ok(serde_json::from_slice(data)?)
}

/// Deserialize a response from bytes
pub fn deserialize_response(data: &[u8]) -> Result<DaemonResponse> {
    Ok(serde_json::from_slice(data)?)
}

fn frame(json: Vec<u8>) -> Result<Vec<u8>> {
    if json.len() > MAX_FRAME_LEN {
        return Err(ScribeError::Ipc(format!(
            "message too large: {} bytes",
            json.len()
        )));
    }
    let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
    bytes.extend(json);
    Ok(bytes)
}

/// Read one frame body. `Ok(None)` means the peer closed cleanly.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ScribeError::Ipc(format!("message too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::job::FieldValue;

    #[tokio::test]
    async fn frames_survive_a_stream() {
        let mut fields = RawFields::new();
        fields.insert("model".to_string(), FieldValue::from("base"));
        fields.insert("GPU".to_string(), FieldValue::from(true));
        let request = DaemonRequest::Submit {
            fields: fields.clone(),
            file_path: PathBuf::from("/tmp/talk.wav"),
        };

        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &serialize_request(&request).unwrap())
            .await
            .unwrap();
        drop(client);

        let body = read_frame(&mut server).await.unwrap().unwrap();
        match deserialize_request(&body).unwrap() {
            DaemonRequest::Submit {
                fields: decoded,
                file_path,
            } => {
                assert_eq!(decoded, fields);
                assert_eq!(file_path, PathBuf::from("/tmp/talk.wav"));
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        write_frame(&mut client, &len).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(ScribeError::Ipc(_))
        ));
    }

    #[test]
    fn event_responses_keep_their_payload() {
        let response = DaemonResponse::Event(JobEvent {
            job_id: JobId::new(),
            event: Event::info("Loading model base"),
        });
        let bytes = serialize_response(&response).unwrap();
        let decoded = deserialize_response(&bytes[4..]).unwrap();
        match (response, decoded) {
            (DaemonResponse::Event(sent), DaemonResponse::Event(received)) => {
                assert_eq!(sent, received)
            }
            (_, other) => panic!("unexpected response {:?}", other),
        }
    }
}
