//! Work queue that runs closures on the thread owning a context.
//!
//! Any thread may [`Poster::post`] a closure; only the thread holding the
//! [`Dispatcher`] runs them, in arrival order, against its `&mut C`. A closure
//! posted while the queue is being drained runs on the next drain, never inline.

use crate::{Result, VrStateError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Cloneable posting side of a dispatcher.
pub struct Poster<C: ?Sized> {
    sender: Sender<Job<C>>,
}

impl<C: ?Sized> Clone for Poster<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C: ?Sized> Poster<C> {
    /// Enqueue `job` and return immediately.
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sender
            .send(Box::new(job))
            .map_err(|_| VrStateError::DispatcherClosed)
    }

    /// Enqueue `job` unless a bounded queue is full, in which case it is dropped.
    pub fn try_post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sender.try_send(Box::new(job)).map_err(|e| match e {
            TrySendError::Full(_) => VrStateError::DispatcherFull,
            TrySendError::Disconnected(_) => VrStateError::DispatcherClosed,
        })
    }
}

/// Owning-thread side of the queue.
pub struct Dispatcher<C: ?Sized> {
    receiver: Receiver<Job<C>>,
}

impl<C: ?Sized> Dispatcher<C> {
    /// Unbounded queue: nothing posted is ever dropped.
    pub fn channel() -> (Poster<C>, Dispatcher<C>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Poster { sender }, Dispatcher { receiver })
    }

    /// Queue holding at most `capacity` closures; [`Poster::try_post`] drops past that.
    pub fn bounded(capacity: usize) -> (Poster<C>, Dispatcher<C>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Poster { sender }, Dispatcher { receiver })
    }

    /// Number of closures waiting to run.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Run every closure queued at the moment of the call. Returns how many ran.
    pub fn run_pending(&self, ctx: &mut C) -> usize {
        let queued = self.receiver.len();
        let mut ran = 0;
        while ran < queued {
            match self.receiver.try_recv() {
                Ok(job) => {
                    job(ctx);
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Wait up to `timeout` for work, then drain what is queued.
    ///
    /// Returns `Ok(0)` on timeout and `DispatcherClosed` once every poster is
    /// gone and the queue is empty.
    pub fn run_timeout(&self, ctx: &mut C, timeout: Duration) -> Result<usize> {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                job(ctx);
                Ok(1 + self.run_pending(ctx))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(VrStateError::DispatcherClosed),
        }
    }

    /// Run closures until every poster has been dropped.
    pub fn run(&self, ctx: &mut C) {
        while let Ok(job) = self.receiver.recv() {
            job(ctx);
        }
        log::debug!("Dispatcher drained, all posters dropped");
    }
}
