//! Main daemon service implementation

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::daemon::ipc::{DaemonRequest, DaemonResponse};
use crate::daemon::server::{CommandReceiver, IpcServer, ResponseSender};
use crate::events::{Notification, Subscription};
use crate::job::{AudioPayload, RawFields, WorkerCommand, WorkerLauncher};
use crate::orchestrator::{BackgroundTasks, Orchestrator};

/// How long clients get to receive their final frames on shutdown
const CLIENT_GRACE: Duration = Duration::from_secs(2);

/// Run the daemon service with `scribe worker` as the worker
pub async fn run(settings: &Settings) -> Result<()> {
    run_with_worker(settings, WorkerCommand::current_exe()?).await
}

/// Run the daemon service, launching `worker` for each job
pub async fn run_with_worker(settings: &Settings, worker: WorkerCommand) -> Result<()> {
    info!("Starting scribe daemon");

    settings.ensure_dirs()?;

    // Registered before the socket appears
    let mut sigterm = signal(SignalKind::terminate())?;

    let pid = std::process::id();
    std::fs::write(settings.pid_path(), pid.to_string())?;

    let tasks = Arc::new(BackgroundTasks::new());
    let orchestrator = Orchestrator::new(
        WorkerLauncher::new(worker, &settings.jobs),
        &settings.jobs,
        tasks.clone(),
    );

    let (cmd_tx, cmd_rx) = mpsc::channel::<(DaemonRequest, ResponseSender)>(32);

    let mut server = IpcServer::new(settings.socket_path());
    server.start().await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(cmd_tx).await {
            error!("IPC server error: {}", e);
        }
    });
    tasks.track(&server_handle);

    let mut subscribers = JoinSet::new();

    let outcome = tokio::select! {
        outcome = command_handler(&orchestrator, cmd_rx, &mut subscribers) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt");
            Ok(None)
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            Ok(None)
        }
    };

    info!("Shutting down daemon");
    orchestrator.teardown().await;

    let drained = tokio::time::timeout(CLIENT_GRACE, async {
        while subscribers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Dropping {} slow subscribers", subscribers.len());
    }

    let _ = std::fs::remove_file(settings.pid_path());

    match outcome {
        Ok(Some(shutdown_tx)) => {
            let _ = shutdown_tx.send(DaemonResponse::Ok).await;
            let _ = tokio::time::timeout(CLIENT_GRACE, shutdown_tx.closed()).await;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Handle incoming commands until shutdown is requested.
///
/// Returns the sender of the shutdown request so it is acknowledged only
/// after teardown.
async fn command_handler(
    orchestrator: &Orchestrator,
    mut cmd_rx: CommandReceiver,
    subscribers: &mut JoinSet<()>,
) -> Result<Option<ResponseSender>> {
    while let Some((request, resp_tx)) = cmd_rx.recv().await {
        let response = match request {
            DaemonRequest::Submit { fields, file_path } => {
                handle_submit(orchestrator, &fields, &file_path).await
            }
            DaemonRequest::ListJobs => DaemonResponse::Jobs(orchestrator.jobs().await),
            DaemonRequest::StopAll => {
                orchestrator.stop_all().await;
                DaemonResponse::Ok
            }
            DaemonRequest::Subscribe => match orchestrator.subscribe() {
                Ok(subscription) => {
                    subscribers.spawn(forward_events(subscription, resp_tx));
                    continue;
                }
                Err(e) => DaemonResponse::Error {
                    message: e.to_string(),
                },
            },
            DaemonRequest::Ping => DaemonResponse::Pong,
            DaemonRequest::Shutdown => return Ok(Some(resp_tx)),
        };

        let _ = resp_tx.send(response).await;
    }

    Ok(None)
}

async fn handle_submit(
    orchestrator: &Orchestrator,
    fields: &RawFields,
    file_path: &Path,
) -> DaemonResponse {
    let pruned = orchestrator.prune_finished().await;
    if pruned > 0 {
        debug!("Pruned {} finished jobs", pruned);
    }

    let bytes = match tokio::fs::read(file_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return DaemonResponse::Error {
                message: format!("Failed to read {}: {}", file_path.display(), e),
            }
        }
    };
    let file_name = file_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    match orchestrator
        .submit(fields, AudioPayload::new(file_name, bytes))
        .await
    {
        Ok(handle) => DaemonResponse::Submitted { id: handle.id() },
        Err(e) => {
            info!("Rejected submission of {}: {}", file_path.display(), e);
            DaemonResponse::Error {
                message: e.to_string(),
            }
        }
    }
}

/// Stream channel notifications to one subscribed connection
async fn forward_events(mut subscription: Subscription, resp_tx: ResponseSender) {
    if resp_tx.send(DaemonResponse::Subscribed).await.is_err() {
        return;
    }

    while let Some(notification) = subscription.recv().await {
        let (response, last) = match notification {
            Notification::Job(event) => (DaemonResponse::Event(event), false),
            Notification::Lagged(skipped) => (DaemonResponse::Lagged { skipped }, false),
            Notification::EndOfStream => (DaemonResponse::EndOfStream, true),
        };
        if resp_tx.send(response).await.is_err() {
            debug!("Subscriber disconnected");
            return;
        }
        if last {
            // Resolves once the connection has written the final frame
            resp_tx.closed().await;
            return;
        }
    }
}
