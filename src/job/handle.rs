//! Job identity, lifecycle state and the handle callers hold

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Unique identifier of a launched job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First eight characters, for display
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a job
///
/// `Created → Running → {Completed | Errored | Terminated}`. Terminal
/// states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    /// The worker reported a finished transcription
    Completed,
    /// The worker reported an error, or died without reporting anything
    Errored,
    /// Killed by an explicit cancellation
    Terminated,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Terminated)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write side of a job's state, owned by the supervisor
#[derive(Clone)]
pub(crate) struct StateCell(Arc<watch::Sender<JobState>>);

impl StateCell {
    pub(crate) fn new() -> (Self, watch::Receiver<JobState>) {
        let (tx, rx) = watch::channel(JobState::Created);
        (Self(Arc::new(tx)), rx)
    }

    /// Move to `next` unless the job already reached a terminal state.
    /// Returns whether the transition happened.
    pub(crate) fn advance(&self, next: JobState) -> bool {
        self.0.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    pub(crate) fn get(&self) -> JobState {
        *self.0.borrow()
    }
}

/// Serializable snapshot of a job, for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub file_name: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
}

/// Handle to a launched worker. Cheap to clone.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: JobId,
    file_name: String,
    started_at: DateTime<Utc>,
    pid: Option<u32>,
    state: watch::Receiver<JobState>,
    kill: Arc<Notify>,
}

impl JobHandle {
    pub(crate) fn new(
        id: JobId,
        file_name: String,
        pid: Option<u32>,
        state: watch::Receiver<JobState>,
        kill: Arc<Notify>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                file_name,
                started_at: Utc::now(),
                pid,
                state,
                kill,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn file_name(&self) -> &str {
        &self.inner.file_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// OS process id of the worker, if it was known at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Current state. A job whose supervisor is gone without recording a
    /// terminal state counts as `Terminated`.
    pub fn state(&self) -> JobState {
        let state = *self.inner.state.borrow();
        if self.inner.state.has_changed().is_err() && !state.is_terminal() {
            return JobState::Terminated;
        }
        state
    }

    pub fn is_alive(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Kill the worker and wait until the job reports a terminal state.
    /// A job that already finished is left as it is.
    pub async fn terminate(&self) {
        if !self.is_alive() {
            return;
        }

        self.inner.kill.notify_one();
        self.wait().await;
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(&self) -> JobState {
        let mut state = self.inner.state.clone();
        let reached = state.wait_for(JobState::is_terminal).await.map(|s| *s);
        // Err means the supervisor is gone and nothing will move the job on
        reached.unwrap_or(JobState::Terminated)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id(),
            file_name: self.file_name().to_string(),
            state: self.state(),
            started_at: self.started_at(),
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("file_name", &self.inner.file_name)
            .field("pid", &self.inner.pid)
            .field("state", &self.state())
            .finish()
    }
}
