//! Single-flight refresh queue.
//!
//! The worker runs queued jobs in FIFO order. While the queue is empty it
//! races the queue against one background timer; a queued job always wins
//! a tie. The timer is re-armed every time the worker goes idle, whether
//! the previous run succeeded or failed, so there is never more than one
//! timer outstanding.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use edgestat_core::RefreshKind;
use edgestat_metrics::Refresher;

use crate::error::{SchedulerError, SchedulerResult};

/// Boxed future returned by [`Refresh::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// One refresh cycle against the snapshot at `output`.
pub trait Refresh: Send + Sync {
    fn refresh<'a>(&'a self, kind: RefreshKind, output: &'a Path) -> RefreshFuture<'a>;
}

impl Refresh for Refresher {
    fn refresh<'a>(&'a self, kind: RefreshKind, output: &'a Path) -> RefreshFuture<'a> {
        Box::pin(async move { Ok(Refresher::refresh(self, kind, output).await?) })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Idle delay before a background refresh; `None` disables the timer.
    pub background_interval: Option<Duration>,
    /// Snapshot file background refreshes write to.
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

struct Job {
    kind: RefreshKind,
    output: PathBuf,
    reply: oneshot::Sender<anyhow::Result<String>>,
}

enum Trigger {
    Submitted(Job),
    Background,
}

/// Handle to the refresh worker.
pub struct RefreshScheduler {
    jobs: mpsc::UnboundedSender<Job>,
    state: watch::Receiver<SchedulerState>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Start the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(refresh: Arc<dyn Refresh>, config: SchedulerConfig) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            background_secs = config.background_interval.map(|d| d.as_secs()),
            output = %config.output_path.display(),
            "refresh scheduler started"
        );
        let worker = tokio::spawn(run(refresh, config, jobs_rx, state_tx, shutdown_rx));

        Self {
            jobs: jobs_tx,
            state: state_rx,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a refresh and wait for its own outcome.
    pub async fn submit(&self, kind: RefreshKind, output: impl Into<PathBuf>) -> SchedulerResult<String> {
        let (reply, outcome) = oneshot::channel();
        self.jobs
            .send(Job {
                kind,
                output: output.into(),
                reply,
            })
            .map_err(|_| SchedulerError::Stopped)?;

        outcome
            .await
            .map_err(|_| SchedulerError::Stopped)?
            .map_err(SchedulerError::Refresh)
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Stop accepting work, let the in-flight run finish, and join the worker.
    ///
    /// Jobs still queued are dropped; their submitters get [`SchedulerError::Stopped`].
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.lock().await.take()
            && let Err(e) = worker.await
        {
            error!(error = %e, "refresh worker panicked");
        }
    }
}

async fn run(
    refresh: Arc<dyn Refresh>,
    config: SchedulerConfig,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    state: watch::Sender<SchedulerState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let trigger = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            job = jobs.recv() => job.map(Trigger::Submitted),
            _ = background_timer(config.background_interval) => Some(Trigger::Background),
        };
        let Some(trigger) = trigger else {
            break;
        };

        state.send_replace(SchedulerState::Running);
        match trigger {
            Trigger::Submitted(job) => {
                debug!(kind = job.kind.as_str(), output = %job.output.display(), "running queued refresh");
                let outcome = refresh.refresh(job.kind, &job.output).await;
                if job.reply.send(outcome).is_err() {
                    debug!("refresh submitter went away before the result");
                }
            }
            Trigger::Background => {
                debug!("background timer fired");
                match refresh
                    .refresh(RefreshKind::Background, &config.output_path)
                    .await
                {
                    Ok(text) => debug!(bytes = text.len(), "background refresh complete"),
                    Err(e) => error!(error = %format!("{e:#}"), "background refresh failed"),
                }
            }
        }
        if jobs.is_empty() {
            state.send_replace(SchedulerState::Idle);
        }
    }

    state.send_replace(SchedulerState::Idle);
    info!("refresh scheduler stopped");
}

async fn background_timer(interval: Option<Duration>) {
    match interval {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
