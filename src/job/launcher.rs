//! Spawning one isolated worker process per job
//!
//! The worker receives its configuration and audio bytes on stdin and
//! answers with one JSON event per line on stdout. A supervisor task per
//! job feeds stdin, republishes events on the [`EventChannel`], keeps the
//! tail of stderr for crash reports, and records the terminal state.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::JobSettings;
use crate::events::{parse_event_line, Event, EventChannel, JobEvent};
use crate::job::handle::{JobHandle, JobId, JobState, StateCell};
use crate::job::JobConfig;
use crate::worker::protocol::{encode_header, WorkerInput};
use crate::{Result, ScribeError};

/// How long to wait for output pipes to drain after the worker exits
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio file submitted with a job
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl AudioPayload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its file name
    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self { file_name, bytes })
    }
}

/// Program and arguments used to start a worker
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// `scribe worker`, from the running executable
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe)
            .arg("worker")
            // Lets anyhow capture backtraces for error traces
            .env("RUST_LIB_BACKTRACE", "1"))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "linux")]
        // SAFETY: prctl is async-signal-safe and touches no shared state
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd
    }
}

/// Starts workers and supervises them until they exit
pub struct WorkerLauncher {
    command: WorkerCommand,
    stderr_capture_bytes: usize,
}

impl WorkerLauncher {
    pub fn new(command: WorkerCommand, settings: &JobSettings) -> Self {
        Self {
            command,
            stderr_capture_bytes: settings.stderr_capture_bytes,
        }
    }

    /// Spawn a worker for `config` and hand it `payload`.
    ///
    /// Returns as soon as the process exists; must be called from within a
    /// tokio runtime.
    pub fn launch(
        &self,
        config: JobConfig,
        payload: AudioPayload,
        channel: Arc<EventChannel>,
    ) -> Result<JobHandle> {
        let job_id = JobId::new();
        let header = encode_header(&WorkerInput {
            job_id,
            file_name: payload.file_name.clone(),
            config,
            payload_len: payload.bytes.len() as u64,
        })?;

        let mut child = self.command.build().spawn().map_err(|e| {
            ScribeError::Launch(format!("{}: {}", self.command.program.display(), e))
        })?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            return Err(ScribeError::Launch(
                "worker stdio was not captured".to_string(),
            ));
        };

        let (state, state_rx) = StateCell::new();
        state.advance(JobState::Running);
        let kill = Arc::new(Notify::new());
        let pid = child.id();

        info!(
            "Launched worker {} for {} (pid {:?})",
            job_id.short(),
            payload.file_name,
            pid
        );

        let handle = JobHandle::new(job_id, payload.file_name.clone(), pid, state_rx, kill.clone());

        tokio::spawn(feed_stdin(stdin, header, payload.bytes, job_id));
        tokio::spawn(supervise(Supervision {
            job_id,
            child,
            stdout,
            stderr,
            state,
            kill,
            channel,
            stderr_capture_bytes: self.stderr_capture_bytes,
        }));

        Ok(handle)
    }
}

async fn feed_stdin(mut stdin: ChildStdin, header: Vec<u8>, payload: Vec<u8>, job_id: JobId) {
    let result = async {
        stdin.write_all(&header).await?;
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    }
    .await;

    // A worker that exits early closes its stdin; that is reported through
    // its exit status instead.
    if let Err(e) = result {
        debug!("Could not deliver input to worker {}: {}", job_id.short(), e);
    }
}

struct Supervision {
    job_id: JobId,
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    state: StateCell,
    kill: Arc<Notify>,
    channel: Arc<EventChannel>,
    stderr_capture_bytes: usize,
}

enum Exit {
    Status(ExitStatus),
    Killed,
    WaitFailed(std::io::Error),
}

async fn supervise(job: Supervision) {
    let Supervision {
        job_id,
        mut child,
        stdout,
        stderr,
        state,
        kill,
        channel,
        stderr_capture_bytes,
    } = job;

    let mut pump = tokio::spawn(pump_events(
        stdout,
        job_id,
        state.clone(),
        channel.clone(),
    ));
    let mut stderr_tail = tokio::spawn(capture_tail(stderr, job_id, stderr_capture_bytes));

    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Exit::Status(status),
            Err(e) => Exit::WaitFailed(e),
        },
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill worker {}: {}", job_id.short(), e);
            }
            let _ = child.wait().await;
            Exit::Killed
        }
    };

    let reason = match exit {
        Exit::Killed => {
            pump.abort();
            stderr_tail.abort();
            if state.advance(JobState::Terminated) {
                info!("Worker {} terminated", job_id.short());
            }
            return;
        }
        Exit::Status(status) => status.to_string(),
        Exit::WaitFailed(e) => e.to_string(),
    };

    // stdout hits EOF once the process is gone, unless something it
    // spawned still holds the pipe
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await.is_err() {
        warn!("Worker {} left its stdout open; dropping the rest", job_id.short());
        pump.abort();
    }
    let stderr_tail = match tokio::time::timeout(DRAIN_TIMEOUT, &mut stderr_tail).await {
        Ok(Ok(tail)) => tail,
        _ => {
            stderr_tail.abort();
            String::new()
        }
    };

    if state.get().is_terminal() {
        debug!("Worker {} exited after reporting {}", job_id.short(), state.get());
        return;
    }

    report_crash(&channel, &state, job_id, reason, stderr_tail);
}

/// The worker went away without a terminal event: synthesize one so every
/// failed job still surfaces exactly one error.
fn report_crash(
    channel: &EventChannel,
    state: &StateCell,
    job_id: JobId,
    reason: String,
    stderr_tail: String,
) {
    warn!("Worker {} exited without a result: {}", job_id.short(), reason);

    if state.advance(JobState::Errored) {
        let trace = if stderr_tail.trim().is_empty() {
            "(worker produced no diagnostic output)".to_string()
        } else {
            stderr_tail
        };
        channel.publish(JobEvent {
            job_id,
            event: Event::Error {
                message: format!("worker exited without reporting a result ({})", reason),
                trace,
            },
        });
    }
}

/// Republish worker events in the order they were written
async fn pump_events(
    stdout: ChildStdout,
    job_id: JobId,
    state: StateCell,
    channel: Arc<EventChannel>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Reading events from worker {} failed: {}", job_id.short(), e);
                break;
            }
        };

        let Some(event) = parse_event_line(&line) else {
            continue;
        };

        // Subscribers stop listening for a job once it settles
        if state.get().is_terminal() {
            debug!(
                "Dropping {:?} from worker {} after its result",
                event,
                job_id.short()
            );
            continue;
        }

        if event.is_terminal() {
            let next = match event {
                Event::Finished { .. } => JobState::Completed,
                _ => JobState::Errored,
            };
            if !state.advance(next) {
                warn!(
                    "Dropping terminal event from worker {} after cancellation",
                    job_id.short()
                );
                continue;
            }
        }

        channel.publish(JobEvent { job_id, event });
    }
}

/// Forward worker stderr to our log and keep its last `cap` bytes
async fn capture_tail<R: AsyncRead + Unpin>(stderr: R, job_id: JobId, cap: usize) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::new();
    let mut size = 0usize;

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(job = %job_id.short(), "worker: {}", line);
        size += line.len() + 1;
        tail.push_back(line);
        while size > cap {
            match tail.pop_front() {
                Some(dropped) => size -= dropped.len() + 1,
                None => break,
            }
        }
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}
