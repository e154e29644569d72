use std::sync::mpsc::{self, Sender};
use std::thread;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::DispatchError;
use crate::job::{Job, JobOutcome, JobPayload, JobReply, WireError, WorkerEvent, WorkerRequest};

use super::runtime::{self, WorkerInit};

/// The at-most-one outstanding job on a handle. Keeps a copy of the payload
/// so the dispatcher can re-enqueue the job after a contention failure.
pub(crate) struct Inflight {
    pub id: u64,
    pub attempts: u32,
    pub payload: JobPayload,
    pub respond_to: oneshot::Sender<Result<JobOutcome, DispatchError>>,
}

/// Dispatcher-side proxy for one worker thread.
///
/// Invariants: `busy` iff `inflight` is present; once `closed` no job is
/// ever dispatched again; a handle that crashed is never reused.
pub(crate) struct WorkerHandle {
    worker: usize,
    sender: Sender<WorkerRequest>,
    busy: bool,
    closed: bool,
    leased: bool,
    terminating: bool,
    inflight: Option<Inflight>,
}

impl WorkerHandle {
    /// Spawn the worker thread and return its handle.
    pub(crate) fn spawn(
        worker: usize,
        init: WorkerInit,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Self, DispatchError> {
        let (sender, receiver) = mpsc::channel::<WorkerRequest>();
        thread::Builder::new()
            .name(format!("sqlite-worker-{worker}"))
            .spawn(move || runtime::run_worker(worker, &init, &receiver, &events))
            .map_err(|err| {
                DispatchError::Internal(format!("failed to spawn SQLite worker thread: {err}"))
            })?;

        Ok(Self {
            worker,
            sender,
            busy: false,
            closed: false,
            leased: false,
            terminating: false,
            inflight: None,
        })
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn is_leased(&self) -> bool {
        self.leased
    }

    /// Idle: able to take the next job (leased or not).
    pub(crate) fn is_idle(&self) -> bool {
        !self.busy && !self.closed
    }

    /// Available: idle and not reserved by a transaction lease.
    pub(crate) fn is_available(&self) -> bool {
        self.is_idle() && !self.leased
    }

    pub(crate) fn set_leased(&mut self, leased: bool) {
        self.leased = leased;
    }

    /// Hand a job to the worker. On busy/closed the awaiter is rejected
    /// before returning, so the caller never has to unwind.
    pub(crate) fn dispatch(
        &mut self,
        job: Job,
        attempts: u32,
        respond_to: oneshot::Sender<Result<JobOutcome, DispatchError>>,
    ) {
        if self.busy || self.closed {
            let _ = respond_to.send(Err(DispatchError::WorkerBusy));
            return;
        }

        let Job { id, payload } = job;
        let request = WorkerRequest::Job(Job {
            id,
            payload: payload.clone(),
        });
        if self.sender.send(request).is_err() {
            self.closed = true;
            let _ = respond_to.send(Err(DispatchError::WorkerCrashed(format!(
                "worker {} request channel closed",
                self.worker
            ))));
            return;
        }

        self.busy = true;
        self.inflight = Some(Inflight {
            id,
            attempts,
            payload,
            respond_to,
        });
    }

    /// Match a reply against the in-flight job. Replies whose id does not
    /// match are dropped; they indicate a runtime that replied twice or a
    /// reply that outlived its job.
    pub(crate) fn complete(
        &mut self,
        reply: JobReply,
    ) -> Option<(Inflight, Result<JobOutcome, WireError>)> {
        let Some(inflight) = self.inflight.take() else {
            warn!(
                worker = self.worker,
                reply_id = reply.id,
                "discarding stray reply with no job in flight"
            );
            return None;
        };
        if inflight.id != reply.id {
            warn!(
                worker = self.worker,
                expected = inflight.id,
                received = reply.id,
                "discarding stray reply"
            );
            self.inflight = Some(inflight);
            return None;
        }

        self.busy = false;
        Some((inflight, reply.outcome))
    }

    /// Reject the in-flight job, if any, with `err`.
    pub(crate) fn fail_inflight(&mut self, err: DispatchError) {
        self.busy = false;
        if let Some(inflight) = self.inflight.take() {
            let _ = inflight.respond_to.send(Err(err));
        }
    }

    /// Ask the worker to shut down once it has replied to the current job.
    pub(crate) fn terminate(&mut self) {
        if self.terminating || self.closed {
            return;
        }
        self.terminating = true;
        // A send failure means the thread is already gone; the Exited event
        // closes the handle either way.
        let _ = self.sender.send(WorkerRequest::Shutdown);
    }

    /// Record the worker's exit. Returns true when the exit was a crash
    /// rather than an ordered shutdown.
    pub(crate) fn mark_exited(&mut self) -> bool {
        let crashed = !self.terminating;
        self.closed = true;
        crashed
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerRequest::Shutdown);
    }
}
