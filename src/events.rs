//! Event channel between workers and observers
//!
//! A worker process writes [`Event`]s to its stdout through an
//! [`EventSink`]; the launcher reads them back and republishes them on the
//! orchestrator's [`EventChannel`], which fans them out to subscribers.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::job::JobId;
use crate::{Result, ScribeError};

/// Notification emitted by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Progress through the current task
    Progress { current: u64, total: u64 },

    /// Human-readable status update
    Info { message: String },

    /// The job completed and its outputs were written under `file_id`
    Finished { file_id: String },

    /// The job failed
    Error { message: String, trace: String },
}

impl Event {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    /// Whether this event ends a job
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }
}

/// An event tagged with the job that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub event: Event,
}

/// What travels on the broadcast channel
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Job(JobEvent),
    /// The subscriber fell behind and this many notifications were dropped.
    /// A terminal event may have been among them.
    Lagged(u64),
    /// The channel is closing; nothing follows
    EndOfStream,
}

/// Worker-side half of the channel
pub trait EventSink {
    fn emit(&mut self, event: Event) -> std::io::Result<()>;
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) -> std::io::Result<()> {
        self.push(event);
        Ok(())
    }
}

/// Writes one JSON document per line and flushes after each event
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: Event) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Parse a single line written by a [`JsonLinesSink`]
pub fn parse_event_line(line: &str) -> Option<Event> {
    match serde_json::from_str(line.trim()) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Ignoring non-event worker output ({}): {}", e, line.trim());
            None
        }
    }
}

/// Orchestrator-side broadcast of job events
pub struct EventChannel {
    sender: RwLock<Option<broadcast::Sender<Notification>>>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Deliver an event to current subscribers. A no-op once closed.
    pub fn publish(&self, event: JobEvent) {
        let guard = match self.sender.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = guard.as_ref() {
            // Err only means nobody is listening right now
            let _ = sender.send(Notification::Job(event));
        }
    }

    pub fn subscribe(&self) -> Result<Subscription> {
        let guard = match self.sender.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .map(|sender| Subscription {
                receiver: sender.subscribe(),
                closed: false,
            })
            .ok_or(ScribeError::ChannelClosed)
    }

    /// Close the channel. Subscribers see [`Notification::EndOfStream`]
    /// and then `None`; later subscriptions fail.
    pub fn end_stream(&self) {
        let mut guard = match self.sender.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = guard.take() {
            let _ = sender.send(Notification::EndOfStream);
            debug!("Event channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.sender.read() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

/// A single observer's view of the channel
pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
    closed: bool,
}

impl Subscription {
    /// Next notification. [`Notification::EndOfStream`] is returned once,
    /// after which every call yields `None`.
    pub async fn recv(&mut self) -> Option<Notification> {
        if self.closed {
            return None;
        }
        match self.receiver.recv().await {
            Ok(Notification::EndOfStream) => {
                self.closed = true;
                Some(Notification::EndOfStream)
            }
            Ok(notification) => Some(notification),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event subscriber lagged behind by {} events", skipped);
                Some(Notification::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.closed = true;
                None
            }
        }
    }

    /// Next job event. Lag notices are skipped; the close notification
    /// ends the stream.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        loop {
            match self.recv().await? {
                Notification::Job(event) => return Some(event),
                Notification::Lagged(_) => continue,
                Notification::EndOfStream => return None,
            }
        }
    }
}
