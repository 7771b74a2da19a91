//! Worker/monitor coordination for one conversion job.
//!
//! [`JobHandle::spawn`] starts two threads:
//!
//! - the **worker** runs [`Converter::convert`] with the job's token and
//!   sends exactly one outcome back;
//! - the **monitor** polls the token every `poll_interval_ms` and reports a
//!   cancel request as soon as it sees one.
//!
//! [`JobHandle::wait`] blocks the caller until the worker reports, or until
//! cancellation is requested. After a cancel it waits at most
//! `join_timeout_ms` for the worker; a worker still stuck in a backend call
//! after that is left to finish on its own and whatever it produces is
//! discarded. The handle deletes the worker's staged input at that point, so
//! a process that exits right after `wait` leaves no input copy behind.

use crate::cancel::CancellationToken;
use crate::convert::Converter;
use crate::error::{MarkitError, Result};
use crate::output::{ConversionOutcome, ConversionRequest};
use crate::pipeline::artifact::discard_artifact;
use std::any::Any;
use std::fmt;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a job: `Idle → Running → {Completed | Cancelled | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }

    fn of(outcome: &ConversionOutcome) -> Self {
        match outcome {
            ConversionOutcome::Completed(_) => JobState::Completed,
            ConversionOutcome::Cancelled => JobState::Cancelled,
            ConversionOutcome::Failed(_) => JobState::Failed,
        }
    }
}

#[derive(Debug, Default)]
struct StagedSlot {
    path: Option<PathBuf>,
    detached: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<JobState>,
    settled: AtomicBool,
    staged: Mutex<StagedSlot>,
}

impl Shared {
    fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move to `next` unless the job already reached a terminal state.
    fn settle(&self, next: JobState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.is_terminal() {
            *state = next;
        }
        if next.is_terminal() {
            self.settled.store(true, Ordering::SeqCst);
        }
    }

    /// Called from the worker as the staged copy appears and disappears.
    fn track_staged(&self, path: Option<&Path>) {
        let mut slot = self.staged.lock().unwrap_or_else(|p| p.into_inner());
        slot.path = path.map(Path::to_path_buf);
        if slot.detached {
            // The handle already gave up on this worker; it may not outlive
            // the process long enough to clean up.
            if let Some(path) = slot.path.take() {
                remove_staged(&path);
            }
        }
    }

    /// Take over cleanup of the staged copy from a detached worker.
    fn detach_staged(&self) {
        let mut slot = self.staged.lock().unwrap_or_else(|p| p.into_inner());
        slot.detached = true;
        if let Some(path) = slot.path.take() {
            remove_staged(&path);
        }
    }

    /// Record the outcome the caller actually received.
    fn force(&self, next: JobState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
        self.settled.store(true, Ordering::SeqCst);
    }
}

/// A running conversion job.
pub struct JobHandle {
    token: CancellationToken,
    shared: Arc<Shared>,
    receiver: Receiver<ConversionOutcome>,
    worker: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    poll_interval: Duration,
    join_timeout: Duration,
}

impl JobHandle {
    /// Start a job on a fresh token.
    ///
    /// # Errors
    /// [`MarkitError::Internal`] if the OS refuses to spawn a thread.
    pub fn spawn(converter: Arc<Converter>, request: ConversionRequest) -> Result<Self> {
        let token = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: Mutex::new(JobState::Idle),
            settled: AtomicBool::new(false),
            staged: Mutex::new(StagedSlot::default()),
        });
        let poll_interval = converter.config().poll_interval();
        let join_timeout = converter.config().join_timeout();
        let (tx, receiver) = mpsc::channel();

        shared.settle(JobState::Running);

        let worker = {
            let token = token.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("markit-worker".into())
                .spawn(move || {
                    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                        converter.convert_tracked(&request, &token, &|path| {
                            shared.track_staged(path)
                        })
                    })) {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let msg = panic_message(payload.as_ref());
                            error!("Conversion worker panicked: {}", msg);
                            ConversionOutcome::Failed(MarkitError::Internal(format!(
                                "worker panicked: {msg}"
                            )))
                        }
                    };
                    shared.settle(JobState::of(&outcome));

                    // Nobody is listening any more: the caller gave up on us.
                    if let Err(mpsc::SendError(outcome)) = tx.send(outcome) {
                        if let ConversionOutcome::Completed(out) = outcome {
                            info!("Discarding late result {}", out.artifact.display());
                            discard_artifact(&out.artifact);
                        }
                    }
                })
                .map_err(|e| MarkitError::Internal(format!("failed to spawn worker: {e}")))?
        };

        let monitor = {
            let token = token.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("markit-monitor".into())
                .spawn(move || monitor_loop(&token, &shared, poll_interval))
                .map_err(|e| MarkitError::Internal(format!("failed to spawn monitor: {e}")))?
        };

        Ok(Self {
            token,
            shared,
            receiver,
            worker: Some(worker),
            monitor: Some(monitor),
            poll_interval,
            join_timeout,
        })
    }

    /// A clone of this job's token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request cancellation. Returns immediately.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Block until the job settles.
    ///
    /// Once cancellation is requested this returns within roughly
    /// `join_timeout + poll_interval`, whatever the backend is doing.
    pub fn wait(mut self) -> ConversionOutcome {
        let outcome = loop {
            if self.token.is_cancelled() {
                break self.finish_cancelled();
            }
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(outcome) => break self.accept(outcome),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    break ConversionOutcome::Failed(MarkitError::Internal(
                        "worker exited without reporting a result".into(),
                    ));
                }
            }
        };

        self.shared.force(JobState::of(&outcome));
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        outcome
    }

    /// Apply the cancel-wins rule to an outcome the worker reported.
    fn accept(&mut self, outcome: ConversionOutcome) -> ConversionOutcome {
        self.join_worker();
        if !self.token.is_cancelled() {
            return outcome;
        }
        match outcome {
            ConversionOutcome::Completed(out) => {
                info!("Cancellation requested as the job finished; discarding result");
                discard_artifact(&out.artifact);
                ConversionOutcome::Cancelled
            }
            ConversionOutcome::Failed(e) => {
                debug!("Ignoring failure after cancellation: {}", e);
                ConversionOutcome::Cancelled
            }
            ConversionOutcome::Cancelled => ConversionOutcome::Cancelled,
        }
    }

    fn finish_cancelled(&mut self) -> ConversionOutcome {
        match self.receiver.recv_timeout(self.join_timeout) {
            Ok(outcome) => self.accept(outcome),
            Err(RecvTimeoutError::Disconnected) => {
                self.join_worker();
                ConversionOutcome::Cancelled
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Worker did not finish within {}ms of cancellation; detaching it",
                    self.join_timeout.as_millis()
                );
                self.shared.detach_staged();
                // Dropping the handle detaches the thread.
                self.worker.take();
                ConversionOutcome::Cancelled
            }
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Worker thread panicked after reporting");
            }
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("state", &self.state())
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        // Not waited on: stop the monitor. The worker discards its own
        // result once it finds the receiver gone.
        self.shared.settled.store(true, Ordering::SeqCst);
    }
}

fn monitor_loop(token: &CancellationToken, shared: &Shared, poll_interval: Duration) {
    let mut reported = false;
    while !shared.settled.load(Ordering::SeqCst) {
        if token.is_cancelled() && !reported {
            info!("Cancellation requested; waiting for worker to stop");
            reported = true;
        }
        thread::sleep(poll_interval);
    }
    debug!("Monitor exiting in state {:?}", shared.state());
}

fn remove_staged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed staged input {} of detached worker", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staged input {}: {}", path.display(), e),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
