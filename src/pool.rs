//! A generic worker pool: a fixed set of threads pulling type-erased jobs
//! off a shared queue, each submission handed back a [`JobHandle`] whose
//! result can be waited on independently of when the job actually runs.
//!
//! This generalizes the `Message`/oneshot-`Receiver` pattern used by the
//! compress and decompress pipelines: those dispatch a per-format payload to
//! a worker and collect a per-format result through a oneshot channel opened
//! before the job itself is queued, which is exactly what happens inside
//! [`WorkerPool::submit`] here, just made generic over the job's return type.
//!
//! Submission order is not enforced by the pool itself — jobs may finish in
//! any order, since workers race for the shared queue. A caller that needs
//! submission-order output (both pipelines do) keeps the returned handles in
//! a FIFO of its own and drains them front-to-back, blocking on each handle
//! in turn.

use std::thread::JoinHandle;

use flume::{Receiver, Sender};

type BoxedJob = Box<dyn FnOnce() + Send>;

/// A fixed-size pool of worker threads.
pub struct WorkerPool {
    tx: Option<Sender<BoxedJob>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `num_threads` workers (minimum 1) sharing one job queue.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (tx, rx): (Sender<BoxedJob>, Receiver<BoxedJob>) = flume::unbounded();
        let mut handles = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let rx = rx.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            }));
        }
        Self {
            tx: Some(tx),
            handles,
        }
    }

    /// Queue a job and return a handle that will yield its result once some
    /// worker has run it. Never blocks.
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (res_tx, res_rx) = flume::bounded(1);
        let boxed: BoxedJob = Box::new(move || {
            let result = job();
            // The only way send can fail is if the submitter dropped the
            // handle without waiting, which is a legitimate thing to do.
            let _ = res_tx.send(result);
        });
        if let Some(tx) = &self.tx {
            // Channel is unbounded and workers never exit while `tx` lives,
            // so this can only fail if the pool is already shutting down.
            let _ = tx.send(boxed);
        }
        JobHandle { rx: res_rx }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping the sender closes the channel; each worker's `recv()`
        // then returns `Err` and the thread exits its loop on its own.
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A handle to a single job's eventual result.
pub struct JobHandle<T> {
    rx: Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Block until the job completes and return its result.
    ///
    /// Fails only if the worker pool was torn down before the job ran.
    pub fn wait(self) -> Result<T, crate::GzpError> {
        self.rx.recv().map_err(|_| crate::GzpError::ChannelReceive)
    }
}
