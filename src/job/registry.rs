//! Registry of launched jobs

use tokio::sync::Mutex;
use tracing::info;

use crate::job::{JobHandle, JobId};

/// Insertion-ordered set of job handles behind a single lock.
///
/// Every mutation takes the lock for its whole duration, so a `clear()`
/// never races a `register()` or another `clear()`.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<Vec<JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: JobHandle) {
        self.jobs.lock().await.push(handle);
    }

    /// Snapshot of every registered job, oldest first
    pub async fn all(&self) -> Vec<JobHandle> {
        self.jobs.lock().await.clone()
    }

    pub async fn get(&self, id: JobId) -> Option<JobHandle> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|handle| handle.id() == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Terminate every job, then forget them all
    pub async fn clear(&self) {
        let mut jobs = self.jobs.lock().await;
        if jobs.is_empty() {
            return;
        }

        let running = jobs.iter().filter(|handle| handle.is_alive()).count();
        for handle in jobs.iter() {
            handle.terminate().await;
        }
        info!(
            "Cleared {} jobs ({} were still running)",
            jobs.len(),
            running
        );
        jobs.clear();
    }

    /// Drop jobs that already reached a terminal state. Returns how many
    /// were removed.
    pub async fn prune_finished(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(JobHandle::is_alive);
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSettings;
    use crate::events::EventChannel;
    use crate::job::test_support::{config, sh};
    use crate::job::{AudioPayload, JobState, WorkerLauncher};
    use std::sync::Arc;

    fn launch(script: &str, channel: &Arc<EventChannel>) -> JobHandle {
        WorkerLauncher::new(sh(script), &JobSettings::default())
            .launch(config(), AudioPayload::new("a.wav", vec![0]), channel.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn clear_terminates_everything() {
        let channel = Arc::new(EventChannel::new(8));
        let registry = JobRegistry::new();
        let a = launch("cat >/dev/null; exec sleep 30", &channel);
        let b = launch("cat >/dev/null; exec sleep 30", &channel);
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;
        assert_eq!(registry.len().await, 2);

        registry.clear().await;

        assert!(registry.is_empty().await);
        assert!(!a.is_alive());
        assert!(!b.is_alive());
        assert_eq!(a.state(), JobState::Terminated);
    }

    #[tokio::test]
    async fn terminating_one_job_leaves_the_other_running() {
        let channel = Arc::new(EventChannel::new(8));
        let registry = JobRegistry::new();
        let a = launch("cat >/dev/null; exec sleep 30", &channel);
        let b = launch("cat >/dev/null; exec sleep 30", &channel);
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        let ids: Vec<_> = registry.all().await.iter().map(JobHandle::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
        assert_ne!(a.id(), b.id());

        a.terminate().await;
        assert!(!a.is_alive());
        assert!(b.is_alive());

        registry.clear().await;
    }

    #[tokio::test]
    async fn errored_job_stays_listed_until_cleared() {
        let channel = Arc::new(EventChannel::new(8));
        let registry = JobRegistry::new();
        let failed = launch(
            r#"cat >/dev/null; echo '{"type":"error","message":"boom","trace":"engine.rs:1"}'"#,
            &channel,
        );
        registry.register(failed.clone()).await;

        assert_eq!(failed.wait().await, JobState::Errored);
        assert_eq!(registry.get(failed.id()).await.map(|h| h.state()), Some(JobState::Errored));

        registry.clear().await;
        assert!(registry.is_empty().await);
        assert_eq!(failed.state(), JobState::Errored);
    }

    #[tokio::test]
    async fn prune_keeps_running_jobs() {
        let channel = Arc::new(EventChannel::new(8));
        let registry = JobRegistry::new();
        let done = launch(
            r#"cat >/dev/null; echo '{"type":"finished","file_id":"x"}'"#,
            &channel,
        );
        let running = launch("cat >/dev/null; exec sleep 30", &channel);
        registry.register(done.clone()).await;
        registry.register(running.clone()).await;
        done.wait().await;

        assert_eq!(registry.prune_finished().await, 1);
        assert_eq!(registry.all().await.len(), 1);
        assert!(registry.get(running.id()).await.is_some());

        registry.clear().await;
    }
}
