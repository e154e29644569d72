// Dispatcher module - routes jobs to a fixed set of worker handles
//
// - actor: single task owning the handles, the FIFO queue, and shutdown
// - this file: the cheap clonable facade the rest of the crate talks to

mod actor;

use std::future::Future;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use crate::config::RetryPolicy;
use crate::error::DispatchError;
use crate::job::{JobOutcome, JobPayload, WorkerEvent};
use crate::worker::{WorkerHandle, WorkerInit};

use actor::{Actor, DispatcherMsg};

/// Dispatcher construction parameters.
#[derive(Debug, Clone)]
pub(crate) struct DispatcherConfig {
    pub size: usize,
    pub max_queue: Option<usize>,
    pub retry: RetryPolicy,
}

/// Handle to the dispatcher actor. Cloning is cheap; the actor shuts the
/// workers down once every clone is gone or `shutdown()` resolves.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    sender: UnboundedSender<DispatcherMsg>,
}

impl Dispatcher {
    /// Spawn `size` worker threads and the actor task driving them.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        config: DispatcherConfig,
        init: WorkerInit,
    ) -> Result<Self, DispatchError> {
        let size = config.size.max(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let mut handles = Vec::with_capacity(size);
        for worker in 0..size {
            handles.push(WorkerHandle::spawn(worker, init.clone(), events_tx.clone())?);
        }
        // The actor observes all workers gone through this channel closing.
        drop(events_tx);

        let (sender, messages) = mpsc::unbounded_channel::<DispatcherMsg>();
        tokio::spawn(Actor::new(handles, config, messages, events_rx).run());
        Ok(Self { sender })
    }

    /// Submit a job for any worker. The send happens before the returned
    /// future is awaited, so ids are assigned in call order.
    pub(crate) fn submit(
        &self,
        payload: JobPayload,
    ) -> impl Future<Output = Result<JobOutcome, DispatchError>> + Send + use<> {
        self.submit_inner(payload, None)
    }

    /// Submit a job pinned to a leased worker.
    pub(crate) fn submit_on(
        &self,
        worker: usize,
        payload: JobPayload,
    ) -> impl Future<Output = Result<JobOutcome, DispatchError>> + Send + use<> {
        self.submit_inner(payload, Some(worker))
    }

    fn submit_inner(
        &self,
        payload: JobPayload,
        pin: Option<usize>,
    ) -> impl Future<Output = Result<JobOutcome, DispatchError>> + Send + use<> {
        let (respond_to, reply) = oneshot::channel();
        let sent = self.sender.send(DispatcherMsg::Submit {
            payload,
            pin,
            respond_to,
        });
        async move {
            if sent.is_err() {
                return Err(DispatchError::DispatcherClosed);
            }
            reply.await.map_err(|_| DispatchError::DispatcherClosed)?
        }
    }

    /// Reserve one worker, waiting in the FIFO queue if none is idle.
    /// Returns the worker index to pass to [`Dispatcher::submit_on`].
    pub(crate) async fn lease(&self) -> Result<usize, DispatchError> {
        let (respond_to, reply) = oneshot::channel();
        self.sender
            .send(DispatcherMsg::Lease { respond_to })
            .map_err(|_| DispatchError::DispatcherClosed)?;
        reply.await.map_err(|_| DispatchError::DispatcherClosed)?
    }

    /// Return a leased worker to the pool.
    pub(crate) fn release(&self, worker: usize) {
        let _ = self.sender.send(DispatcherMsg::Release { worker });
    }

    /// Graceful shutdown: running jobs finish, queued jobs are rejected,
    /// workers exit. Resolves once every worker has closed. Idempotent.
    pub(crate) async fn shutdown(&self) {
        let (respond_to, done) = oneshot::channel();
        if self
            .sender
            .send(DispatcherMsg::Shutdown { respond_to })
            .is_err()
        {
            return;
        }
        let _ = done.await;
    }
}
