//! Renormalization coordinator.
//!
//! Quantile updates are queued on a bounded channel and handled by one
//! worker thread per job. The worker blocks for the first command, then
//! drains whatever else is already queued and keeps only the newest request
//! per kind, so a slow pass never leaves a backlog of stale states behind it.
//! A full queue blocks the submitter, which throttles ingestion.

mod pass;

pub use pass::PassSummary;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ar_common::{Error, JobId, QuantileKind, Result};
use ar_config::PipelineConfig;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::logging::{event_names, Stage};
use crate::normalizer::ScoreNormalizer;
use crate::store::ResultStore;
use pass::PassRunner;

/// A queued request to rescore persisted results with a new quantile state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRenormalization {
    pub kind: QuantileKind,
    pub state: String,
    /// Time of the quantiles; later buckets are left alone.
    pub end_time: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

enum Command {
    Renormalize(PendingRenormalization),
    Shutdown,
}

/// Newest pending request per kind, drained from the queue in one go.
#[derive(Debug, Default)]
struct Batch {
    latest: BTreeMap<QuantileKind, PendingRenormalization>,
}

impl Batch {
    /// Keep `pending`, returning the request of the same kind it replaces.
    fn absorb(&mut self, pending: PendingRenormalization) -> Option<PendingRenormalization> {
        self.latest.insert(pending.kind, pending)
    }

    fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Requests in processing order: system-change first.
    fn into_passes(self) -> impl Iterator<Item = PendingRenormalization> {
        self.latest.into_values()
    }
}

#[derive(Debug, Default)]
struct Activity {
    /// Submitted but not yet taken off the queue by the worker.
    pending: usize,
    busy: bool,
    /// Worker has exited.
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    activity: Mutex<Activity>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Activity)) {
        f(&mut self.lock());
        self.changed.notify_all();
    }
}

/// Handle to the renormalization worker of one job.
pub struct Renormalizer {
    job_id: JobId,
    tx: Sender<Command>,
    shared: Arc<Shared>,
    stopped: AtomicBool,
    /// Disconnects when the worker thread exits.
    done: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Renormalizer {
    /// Spawn the worker thread.
    ///
    /// The worker logs through the subscriber that is current on the calling
    /// thread.
    pub fn start(
        job_id: JobId,
        store: Arc<dyn ResultStore>,
        normalizer: Arc<dyn ScoreNormalizer>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let (tx, rx) = channel::bounded(config.queue_capacity.max(1));
        let (done_tx, done_rx) = channel::bounded(0);
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            job_id: job_id.clone(),
            runner: PassRunner::new(store.clone(), normalizer, config),
            store,
            rx,
            shared: shared.clone(),
            _done: done_tx,
        };
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let handle = thread::Builder::new()
            .name(format!("ar-renorm-{}", job_id))
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || worker.run()))?;

        Ok(Self {
            job_id,
            tx,
            shared,
            stopped: AtomicBool::new(false),
            done: done_rx,
            handle: Mutex::new(Some(handle)),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Queue a renormalization with a new quantile state.
    ///
    /// Blocks while the queue is full. After shutdown the request is logged
    /// and dropped, and `Error::WorkerStopped` is returned.
    pub fn submit(
        &self,
        kind: QuantileKind,
        state: impl Into<String>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) || self.shared.lock().closed {
            return Err(self.reject(kind));
        }

        self.shared.update(|a| a.pending += 1);
        let pending = PendingRenormalization {
            kind,
            state: state.into(),
            end_time,
            submitted_at: Utc::now(),
        };
        if self.tx.send(Command::Renormalize(pending)).is_err() {
            self.shared
                .update(|a| a.pending = a.pending.saturating_sub(1));
            return Err(self.reject(kind));
        }
        debug!(
            target: event_names::RENORM_SUBMITTED,
            job_id = %self.job_id,
            kind = %kind,
            "renormalization queued"
        );
        Ok(())
    }

    fn reject(&self, kind: QuantileKind) -> Error {
        error!(
            target: event_names::RENORM_REJECTED,
            job_id = %self.job_id,
            kind = %kind,
            "renormalizer is shut down, dropping quantiles"
        );
        Error::WorkerStopped
    }

    /// Block until nothing is queued and no batch is running.
    ///
    /// Returns immediately once the worker has exited. False if the wait
    /// was interrupted by a poisoned lock.
    pub fn wait_until_idle(&self) -> bool {
        let Ok(mut activity) = self.shared.activity.lock() else {
            return false;
        };
        while !activity.closed && (activity.pending > 0 || activity.busy) {
            activity = match self.shared.changed.wait(activity) {
                Ok(guard) => guard,
                Err(_) => return false,
            };
        }
        true
    }

    pub fn is_idle(&self) -> bool {
        let activity = self.shared.lock();
        activity.pending == 0 && !activity.busy
    }

    /// Stop the worker after the batch it is working on, waiting at most
    /// the configured shutdown timeout.
    ///
    /// True once the worker thread has terminated. Submissions are rejected
    /// from the moment this is called.
    pub fn shutdown(&self) -> bool {
        let span = info_span!("shutdown", job_id = %self.job_id, stage = %Stage::Shutdown);
        let _guard = span.enter();

        self.stopped.store(true, Ordering::Release);
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = slot.take() else {
            return self.shared.lock().closed;
        };

        let deadline = Instant::now() + self.shutdown_timeout;
        if let Err(SendTimeoutError::Timeout(_)) =
            self.tx.send_timeout(Command::Shutdown, self.shutdown_timeout)
        {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "renormalization queue stayed full, shutdown not delivered"
            );
            *slot = Some(handle);
            return false;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(remaining) {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "renormalization worker did not stop in time"
            );
            *slot = Some(handle);
            return false;
        }

        match handle.join() {
            Ok(()) => true,
            Err(_) => {
                error!("renormalization worker panicked");
                false
            }
        }
    }
}

struct Worker {
    job_id: JobId,
    store: Arc<dyn ResultStore>,
    runner: PassRunner,
    rx: Receiver<Command>,
    shared: Arc<Shared>,
    _done: Sender<()>,
}

/// Marks the worker closed however it exits, waking idle waiters.
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.update(|a| {
            a.closed = true;
            a.busy = false;
            a.pending = 0;
        });
    }
}

impl Worker {
    fn run(self) {
        let _exit = ExitGuard(self.shared.clone());
        let span = info_span!("renormalize", job_id = %self.job_id, stage = %Stage::Renormalize);
        let _guard = span.enter();

        while let Ok(first) = self.rx.recv() {
            let mut batch = Batch::default();
            let mut received = 0usize;
            let mut shutdown = false;

            let mut next = Some(first);
            while let Some(command) = next {
                match command {
                    Command::Renormalize(pending) => {
                        received += 1;
                        if let Some(old) = batch.absorb(pending) {
                            warn!(
                                target: event_names::RENORM_SUPERSEDED,
                                kind = %old.kind,
                                superseded_state = %old.state,
                                "{} renormalization superseded by a newer state",
                                old.kind
                            );
                        }
                    }
                    Command::Shutdown => shutdown = true,
                }
                next = self.rx.try_recv().ok();
            }

            let has_work = !batch.is_empty();
            self.shared.update(|a| {
                a.pending = a.pending.saturating_sub(received);
                a.busy = has_work;
            });
            if has_work {
                self.process(batch);
            }
            self.shared.update(|a| a.busy = false);

            if shutdown {
                break;
            }
        }

        let unprocessed = self
            .rx
            .try_iter()
            .filter(|c| matches!(c, Command::Renormalize(_)))
            .count();
        info!(
            target: event_names::RENORM_WORKER_STOPPED,
            unprocessed,
            "renormalization worker stopped"
        );
    }

    fn process(&self, batch: Batch) {
        for pending in batch.into_passes() {
            if let Err(e) = self.runner.run(&pending) {
                error!(
                    target: event_names::RENORM_PASS_FAILED,
                    kind = %pending.kind,
                    code = e.code(),
                    error = %e,
                    "renormalization pass failed"
                );
            }
        }
        if let Err(e) = self.store.refresh() {
            error!(
                target: event_names::STORE_FAILED,
                operation = "refresh",
                error = %e,
                "store refresh after renormalization failed"
            );
        }
    }
}
