use std::collections::VecDeque;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::RetryPolicy;
use crate::error::{CONTENTION_SENTINEL, DispatchError};
use crate::job::{Job, JobOutcome, JobPayload, JobReply, WorkerEvent};
use crate::worker::WorkerHandle;

use super::DispatcherConfig;

pub(super) enum DispatcherMsg {
    Submit {
        payload: JobPayload,
        pin: Option<usize>,
        respond_to: oneshot::Sender<Result<JobOutcome, DispatchError>>,
    },
    Lease {
        respond_to: oneshot::Sender<Result<usize, DispatchError>>,
    },
    Release {
        worker: usize,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// A job waiting for a worker. `pin` restricts it to one leased worker;
/// `ready_at` delays it until a contention backoff has elapsed.
struct JobEntry {
    job: Job,
    attempts: u32,
    pin: Option<usize>,
    ready_at: Option<Instant>,
    respond_to: oneshot::Sender<Result<JobOutcome, DispatchError>>,
}

enum Queued {
    Job(JobEntry),
    Lease(oneshot::Sender<Result<usize, DispatchError>>),
}

enum Step {
    Dispatch,
    Skip,
    Stop,
}

/// Owns every worker handle and the FIFO queue. All dispatcher state is
/// touched from this single task, so none of it needs locking.
pub(super) struct Actor {
    handles: Vec<WorkerHandle>,
    queue: VecDeque<Queued>,
    next_job_id: u64,
    closed: bool,
    finished: bool,
    messages_closed: bool,
    retry: RetryPolicy,
    max_queue: Option<usize>,
    messages: UnboundedReceiver<DispatcherMsg>,
    events: UnboundedReceiver<WorkerEvent>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Actor {
    pub(super) fn new(
        handles: Vec<WorkerHandle>,
        config: DispatcherConfig,
        messages: UnboundedReceiver<DispatcherMsg>,
        events: UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        Self {
            handles,
            queue: VecDeque::new(),
            next_job_id: 0,
            closed: false,
            finished: false,
            messages_closed: false,
            retry: config.retry,
            max_queue: config.max_queue,
            messages,
            events,
            shutdown_waiters: Vec::new(),
        }
    }

    pub(super) async fn run(mut self) {
        while !self.finished {
            let next_ready = self.next_ready_at();
            tokio::select! {
                message = self.messages.recv(), if !self.messages_closed => match message {
                    Some(message) => self.handle_message(message),
                    // Every dispatcher clone is gone; wind the workers down.
                    None => {
                        self.messages_closed = true;
                        self.begin_shutdown(None);
                    }
                },
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                () = wait_until(next_ready) => self.drain(),
            }
        }
    }

    fn handle_message(&mut self, message: DispatcherMsg) {
        match message {
            DispatcherMsg::Submit {
                payload,
                pin,
                respond_to,
            } => {
                if self.closed {
                    let _ = respond_to.send(Err(DispatchError::DispatcherClosed));
                    return;
                }
                if self.all_closed() {
                    let _ = respond_to.send(Err(DispatchError::WorkerCrashed(
                        "all workers have exited".into(),
                    )));
                    return;
                }
                if let Some(max) = self.max_queue
                    && self.queue.len() >= max
                {
                    let _ = respond_to.send(Err(DispatchError::QueueFull));
                    return;
                }
                let id = self.next_job_id;
                self.next_job_id += 1;
                self.route(JobEntry {
                    job: Job { id, payload },
                    attempts: 0,
                    pin,
                    ready_at: None,
                    respond_to,
                });
            }
            DispatcherMsg::Lease { respond_to } => {
                if self.closed {
                    let _ = respond_to.send(Err(DispatchError::DispatcherClosed));
                    return;
                }
                if self.all_closed() {
                    let _ = respond_to.send(Err(DispatchError::WorkerCrashed(
                        "all workers have exited".into(),
                    )));
                    return;
                }
                if let Some(max) = self.max_queue
                    && self.queue.len() >= max
                {
                    let _ = respond_to.send(Err(DispatchError::QueueFull));
                    return;
                }
                self.grant_lease(respond_to);
            }
            DispatcherMsg::Release { worker } => {
                self.handles[worker].set_leased(false);
                if self.closed {
                    if self.handles[worker].is_idle() {
                        self.handles[worker].terminate();
                    }
                } else {
                    self.drain();
                }
            }
            DispatcherMsg::Shutdown { respond_to } => self.begin_shutdown(Some(respond_to)),
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply { worker, reply } => self.handle_reply(worker, reply),
            WorkerEvent::Exited { worker } => {
                let crashed = self.handles[worker].mark_exited();
                if crashed {
                    error!(worker, "sqlite worker exited unexpectedly");
                    self.handles[worker].fail_inflight(DispatchError::WorkerCrashed(format!(
                        "worker {worker} exited unexpectedly"
                    )));
                    self.reject_pinned(worker);
                    if self.all_closed() {
                        self.reject_queue(|| {
                            DispatchError::WorkerCrashed("all workers have exited".into())
                        });
                    }
                }
                if self.closed {
                    self.check_shutdown_done();
                } else {
                    self.drain();
                }
            }
        }
    }

    fn handle_reply(&mut self, worker: usize, reply: JobReply) {
        let job_id = reply.id;
        let Some((inflight, outcome)) = self.handles[worker].complete(reply) else {
            return;
        };

        match outcome {
            Ok(outcome) => {
                let _ = inflight.respond_to.send(Ok(outcome));
            }
            // Contention never surfaces while retries remain; the entry goes
            // back to the queue head so later submissions cannot starve it.
            Err(wire) if wire.message == CONTENTION_SENTINEL && !self.closed => {
                let attempts = inflight.attempts + 1;
                if attempts >= self.retry.max_attempts {
                    debug!(job = job_id, attempts, "contention retries exhausted");
                    let _ = inflight.respond_to.send(Err(wire.into()));
                } else {
                    let delay = self.retry.backoff(attempts);
                    debug!(
                        job = job_id,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "database is locked, retrying"
                    );
                    let pin = self.handles[worker].is_leased().then_some(worker);
                    self.queue.push_front(Queued::Job(JobEntry {
                        job: Job {
                            id: inflight.id,
                            payload: inflight.payload,
                        },
                        attempts,
                        pin,
                        ready_at: Some(Instant::now() + delay),
                        respond_to: inflight.respond_to,
                    }));
                }
            }
            Err(wire) => {
                let _ = inflight.respond_to.send(Err(wire.into()));
            }
        }

        if self.closed {
            if !self.handles[worker].is_busy() && !self.handles[worker].is_leased() {
                self.handles[worker].terminate();
            }
        } else {
            self.drain();
        }
    }

    /// Route a fresh or retried entry: pinned entries go to their leased
    /// worker, anything else to the first available handle or the tail of
    /// the queue.
    fn route(&mut self, entry: JobEntry) {
        match entry.pin {
            Some(worker) => {
                let handle = &mut self.handles[worker];
                if handle.is_closed() {
                    let _ = entry.respond_to.send(Err(DispatchError::WorkerCrashed(format!(
                        "worker {worker} exited unexpectedly"
                    ))));
                } else if handle.is_busy() {
                    // Transaction jobs are issued serially; a busy leased
                    // handle means the caller broke that protocol.
                    let _ = entry.respond_to.send(Err(DispatchError::WorkerBusy));
                } else {
                    handle.dispatch(entry.job, entry.attempts, entry.respond_to);
                }
            }
            None => match self.find_available() {
                Some(worker) => {
                    self.handles[worker].dispatch(entry.job, entry.attempts, entry.respond_to);
                }
                None => self.queue.push_back(Queued::Job(entry)),
            },
        }
    }

    fn grant_lease(&mut self, respond_to: oneshot::Sender<Result<usize, DispatchError>>) {
        match self.find_available() {
            Some(worker) => {
                self.handles[worker].set_leased(true);
                let _ = respond_to.send(Ok(worker));
            }
            None => self.queue.push_back(Queued::Lease(respond_to)),
        }
    }

    /// Move queued entries onto idle handles, in FIFO order. An entry that
    /// cannot start stops the scan, except that pinned entries waiting on
    /// their own leased worker never block the rest of the pool.
    fn drain(&mut self) {
        let now = Instant::now();
        let mut index = 0;
        while index < self.queue.len() {
            match self.step_for(index, now) {
                Step::Stop => break,
                Step::Skip => index += 1,
                Step::Dispatch => {
                    let Some(queued) = self.queue.remove(index) else {
                        break;
                    };
                    match queued {
                        Queued::Job(entry) => self.route(entry),
                        Queued::Lease(respond_to) => self.grant_lease(respond_to),
                    }
                }
            }
        }
    }

    fn step_for(&self, index: usize, now: Instant) -> Step {
        match &self.queue[index] {
            Queued::Job(entry) => {
                let ready = entry.ready_at.is_none_or(|at| at <= now);
                match entry.pin {
                    Some(worker) => {
                        if self.handles[worker].is_closed() {
                            // Dispatchable so route() can reject it.
                            Step::Dispatch
                        } else if ready && self.handles[worker].is_idle() {
                            Step::Dispatch
                        } else {
                            Step::Skip
                        }
                    }
                    None => {
                        if ready && self.find_available().is_some() {
                            Step::Dispatch
                        } else {
                            Step::Stop
                        }
                    }
                }
            }
            Queued::Lease(_) => {
                if self.find_available().is_some() {
                    Step::Dispatch
                } else {
                    Step::Stop
                }
            }
        }
    }

    fn find_available(&self) -> Option<usize> {
        self.handles.iter().position(WorkerHandle::is_available)
    }

    fn all_closed(&self) -> bool {
        self.handles.iter().all(WorkerHandle::is_closed)
    }

    /// Earliest future retry deadline; entries already past theirs are
    /// picked up by the drain that follows every reply.
    fn next_ready_at(&self) -> Option<Instant> {
        let now = Instant::now();
        self.queue
            .iter()
            .filter_map(|queued| match queued {
                Queued::Job(entry) => entry.ready_at,
                Queued::Lease(_) => None,
            })
            .filter(|at| *at > now)
            .min()
    }

    fn reject_pinned(&mut self, worker: usize) {
        let mut index = 0;
        while index < self.queue.len() {
            let pinned = matches!(
                &self.queue[index],
                Queued::Job(entry) if entry.pin == Some(worker)
            );
            if !pinned {
                index += 1;
                continue;
            }
            if let Some(Queued::Job(entry)) = self.queue.remove(index) {
                let _ = entry.respond_to.send(Err(DispatchError::WorkerCrashed(format!(
                    "worker {worker} exited unexpectedly"
                ))));
            }
        }
    }

    fn reject_queue(&mut self, err: impl Fn() -> DispatchError) {
        for queued in std::mem::take(&mut self.queue) {
            match queued {
                Queued::Job(entry) => {
                    let _ = entry.respond_to.send(Err(err()));
                }
                Queued::Lease(respond_to) => {
                    let _ = respond_to.send(Err(err()));
                }
            }
        }
    }

    /// Stop accepting work, reject everything queued, and terminate handles
    /// as they become idle. Busy and leased handles finish first; queued but
    /// not-yet-started jobs are lost, by contract.
    fn begin_shutdown(&mut self, waiter: Option<oneshot::Sender<()>>) {
        if let Some(waiter) = waiter {
            self.shutdown_waiters.push(waiter);
        }
        if !self.closed {
            self.closed = true;
            debug!("dispatcher shutting down");
            self.reject_queue(|| DispatchError::DispatcherShuttingDown);
            for handle in &mut self.handles {
                if !handle.is_closed() && !handle.is_busy() && !handle.is_leased() {
                    handle.terminate();
                }
            }
        }
        self.check_shutdown_done();
    }

    fn check_shutdown_done(&mut self) {
        if !self.closed || !self.all_closed() {
            return;
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        self.finished = true;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
