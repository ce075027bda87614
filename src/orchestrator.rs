//! Lifecycle controller tying the job pieces together
//!
//! The [`Orchestrator`] owns the event channel, the registry of running
//! jobs and the launcher. It accepts submissions, stops jobs on request and
//! tears everything down when the hosting process shuts down.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::JobSettings;
use crate::events::{EventChannel, Subscription};
use crate::job::{resolve, AudioPayload, JobHandle, JobRegistry, JobSummary, RawFields, WorkerLauncher};
use crate::Result;

/// Work the hosting process still has in flight at shutdown
#[async_trait]
pub trait PendingOperations: Send + Sync {
    async fn cancel_all(&self) -> anyhow::Result<()>;
}

/// Background tokio tasks aborted on teardown
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Mutex<Vec<AbortHandle>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track<T>(&self, task: &JoinHandle<T>) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|task| !task.is_finished());
        tasks.push(task.abort_handle());
    }

    pub fn len(&self) -> usize {
        match self.tasks.lock() {
            Ok(tasks) => tasks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PendingOperations for BackgroundTasks {
    async fn cancel_all(&self) -> anyhow::Result<()> {
        let tasks = {
            let mut tasks = self
                .tasks
                .lock()
                .map_err(|_| anyhow::anyhow!("background task list is poisoned"))?;
            std::mem::take(&mut *tasks)
        };

        debug!("Aborting {} background tasks", tasks.len());
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Accepts jobs and owns everything they need while running
pub struct Orchestrator {
    channel: Arc<EventChannel>,
    registry: Arc<JobRegistry>,
    launcher: WorkerLauncher,
    canceller: Arc<dyn PendingOperations>,
}

impl Orchestrator {
    pub fn new(
        launcher: WorkerLauncher,
        settings: &JobSettings,
        canceller: Arc<dyn PendingOperations>,
    ) -> Self {
        Self {
            channel: Arc::new(EventChannel::new(settings.event_capacity)),
            registry: Arc::new(JobRegistry::new()),
            launcher,
            canceller,
        }
    }

    /// Resolve `fields`, start a worker for `payload` and track it.
    ///
    /// Invalid fields fail with `ScribeError::Validation` before anything
    /// is spawned.
    pub async fn submit(&self, fields: &RawFields, payload: AudioPayload) -> Result<JobHandle> {
        let config = resolve(fields)?;
        debug!(
            "Resolved job for {}: model={} language={} device={} precision={}",
            payload.file_name, config.model, config.language, config.device, config.precision
        );

        let handle = self.launcher.launch(config, payload, self.channel.clone())?;
        self.registry.register(handle.clone()).await;
        Ok(handle)
    }

    /// Terminate every registered job and forget them
    pub async fn stop_all(&self) {
        info!("Stopping all jobs");
        self.registry.clear().await;
    }

    /// Shut down: close the event stream, stop all jobs, then cancel
    /// pending work. Safe to call more than once.
    pub async fn teardown(&self) {
        info!("Tearing down orchestrator");

        self.channel.end_stream();
        self.registry.clear().await;

        if let Err(e) = self.canceller.cancel_all().await {
            warn!("Failed to cancel pending operations: {:#}", e);
        }
    }

    pub fn subscribe(&self) -> Result<Subscription> {
        self.channel.subscribe()
    }

    pub async fn jobs(&self) -> Vec<JobSummary> {
        self.registry
            .all()
            .await
            .iter()
            .map(JobHandle::summary)
            .collect()
    }

    /// Drop finished jobs from the registry
    pub async fn prune_finished(&self) -> usize {
        self.registry.prune_finished().await
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, JobEvent};
    use crate::job::test_support::sh;
    use crate::job::{FieldValue, JobState, FIELD_LANGUAGE, FIELD_MODEL};
    use crate::ScribeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct FailingCanceller {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PendingOperations for FailingCanceller {
        async fn cancel_all(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("network request could not be cancelled")
        }
    }

    fn orchestrator(script: &str, canceller: Arc<dyn PendingOperations>) -> Orchestrator {
        let settings = JobSettings::default();
        Orchestrator::new(WorkerLauncher::new(sh(script), &settings), &settings, canceller)
    }

    fn fields(model: &str, language: &str) -> RawFields {
        let mut fields = RawFields::new();
        fields.insert(FIELD_MODEL.to_string(), FieldValue::from(model));
        fields.insert(FIELD_LANGUAGE.to_string(), FieldValue::from(language));
        fields
    }

    fn payload() -> AudioPayload {
        AudioPayload::new("meeting.wav", b"RIFF....WAVE".to_vec())
    }

    async fn events_until_terminal(
        sub: &mut Subscription,
        job: &JobHandle,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let next = tokio::time::timeout(TIMEOUT, sub.next_event())
                .await
                .expect("timed out waiting for events")
                .expect("stream ended early");
            if next.job_id != job.id() {
                continue;
            }
            let terminal = next.event.is_terminal();
            events.push(next.event);
            if terminal {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn invalid_fields_spawn_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("spawned");
        let orch = orchestrator(
            &format!("touch '{}'", marker.display()),
            Arc::new(BackgroundTasks::new()),
        );

        let err = orch.submit(&fields("", "en"), payload()).await.unwrap_err();
        assert!(matches!(err, ScribeError::Validation(_)));
        let err = orch
            .submit(&fields("large-v3", " "), payload())
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::Validation(_)));

        assert_eq!(orch.registry().len().await, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn worker_events_arrive_in_order() {
        let orch = orchestrator(
            r#"cat > /dev/null
printf '%s\n' '{"type":"info","message":"E1"}'
printf '%s\n' '{"type":"progress","current":1,"total":1}'
printf '%s\n' '{"type":"finished","file_id":"E3"}'"#,
            Arc::new(BackgroundTasks::new()),
        );
        let mut sub = orch.subscribe().unwrap();

        let job = orch.submit(&fields("base", "en"), payload()).await.unwrap();
        let events = events_until_terminal(&mut sub, &job).await;

        assert_eq!(
            events,
            vec![
                Event::info("E1"),
                Event::Progress {
                    current: 1,
                    total: 1
                },
                Event::Finished {
                    file_id: "E3".to_string()
                },
            ]
        );
        assert_eq!(job.wait().await, JobState::Completed);
    }

    #[tokio::test]
    async fn failed_job_reports_one_error_and_is_cleared() {
        let orch = orchestrator(
            r#"cat > /dev/null
printf '%s\n' '{"type":"info","message":"Transcribing"}'
printf '%s\n' '{"type":"error","message":"decoder failed","trace":"at decode()"}'"#,
            Arc::new(BackgroundTasks::new()),
        );
        let mut sub = orch.subscribe().unwrap();

        let job = orch.submit(&fields("base", "en"), payload()).await.unwrap();
        let events = events_until_terminal(&mut sub, &job).await;

        let errors: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, Event::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        match errors[0] {
            Event::Error { message, trace } => {
                assert!(!message.is_empty());
                assert!(!trace.is_empty());
            }
            _ => unreachable!(),
        }
        assert_eq!(job.wait().await, JobState::Errored);

        // Errored jobs stay listed until cleared
        assert_eq!(orch.jobs().await.len(), 1);
        orch.stop_all().await;
        assert!(orch.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_jobs_are_independent() {
        let orch = orchestrator("exec sleep 30", Arc::new(BackgroundTasks::new()));

        let first = orch.submit(&fields("base", "en"), payload()).await.unwrap();
        let second = orch.submit(&fields("base", "de"), payload()).await.unwrap();
        assert_ne!(first.id(), second.id());

        first.terminate().await;
        assert!(!first.is_alive());
        assert!(second.is_alive());

        let summaries = orch.jobs().await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].state, JobState::Terminated);
        assert_eq!(summaries[1].state, JobState::Running);

        orch.stop_all().await;
        assert!(!second.is_alive());
    }

    #[tokio::test]
    async fn teardown_is_repeatable_and_survives_cancel_failures() {
        let canceller = Arc::new(FailingCanceller::default());
        let orch = orchestrator("exec sleep 30", canceller.clone());
        let mut sub = orch.subscribe().unwrap();

        let job = orch.submit(&fields("base", "en"), payload()).await.unwrap();

        orch.teardown().await;
        orch.teardown().await;

        assert!(orch.channel().is_closed());
        assert!(orch.registry().is_empty().await);
        assert!(!job.is_alive());
        assert_eq!(canceller.calls.load(Ordering::SeqCst), 2);

        // Nothing is published after the close notification
        let mut rest: Vec<JobEvent> = Vec::new();
        while let Some(event) = sub.next_event().await {
            rest.push(event);
        }
        assert!(rest.is_empty());
        assert!(matches!(orch.subscribe(), Err(ScribeError::ChannelClosed)));
    }

    #[tokio::test]
    async fn background_tasks_are_aborted() {
        let tasks = BackgroundTasks::new();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        tasks.track(&task);
        assert_eq!(tasks.len(), 1);

        tasks.cancel_all().await.unwrap();

        assert!(task.await.unwrap_err().is_cancelled());
        assert!(tasks.is_empty());
    }
}
