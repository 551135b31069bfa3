//! The bounded worker pool.
//!
//! A channel carries connections from the reactor to a fixed set of worker
//! threads, and a second channel carries completions back so the reactor
//! can re-arm readiness. `crossbeam_channel::bounded` plus `try_send` gives
//! the same bounded-FIFO-with-rejection contract a hand-rolled
//! mutex-guarded queue and counting semaphore would, without the
//! hand-rolled locking.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use mio::{Registry, Token, Waker};

use crate::config::Config;
use crate::connection::Outcome;
use crate::descriptor_table::Entry;
use crate::error::EngineError;

/// One unit of work: a connection ready for `process` to run on it.
struct Job {
    token: Token,
    entry: Arc<Entry>,
}

/// A completed job, reported back to the reactor so it can re-arm or close
/// the entry.
pub struct Completion {
    pub token: Token,
    pub outcome: Outcome,
}

/// Fixed pool of worker threads draining a bounded FIFO queue.
pub struct WorkerPool {
    jobs: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.workers` detached-in-spirit (joined on drop) threads,
    /// each looping on `jobs.recv()` and reporting through `completions`.
    pub fn new(
        config: &Config,
        registry: &Registry,
        completions: Sender<Completion>,
        waker: Arc<Waker>,
    ) -> Result<Self, EngineError> {
        let (jobs_tx, jobs_rx): (Sender<Job>, Receiver<Job>) = bounded(config.queue_capacity);
        let mut handles = Vec::with_capacity(config.workers);

        for index in 0..config.workers {
            let jobs_rx = jobs_rx.clone();
            let completions = completions.clone();
            let waker = Arc::clone(&waker);
            let registry = registry
                .try_clone()
                .map_err(|source| EngineError::WorkerSpawn { index, source })?;

            let handle = std::thread::Builder::new()
                .name(format!("reactord-worker-{index}"))
                .spawn(move || worker_loop(jobs_rx, completions, waker, registry))
                .map_err(|source| EngineError::WorkerSpawn { index, source })?;

            handles.push(handle);
        }

        Ok(Self {
            jobs: jobs_tx,
            handles,
        })
    }

    /// Enqueues a connection for processing. Returns `false` if the queue
    /// is at capacity; the reactor treats that the same as a failed read
    /// and closes the entry.
    pub fn dispatch(&self, token: Token, entry: Arc<Entry>) -> bool {
        match self.jobs.try_send(Job { token, entry }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    jobs: Receiver<Job>,
    completions: Sender<Completion>,
    waker: Arc<Waker>,
    registry: Registry,
) {
    while let Ok(job) = jobs.recv() {
        let outcome = {
            let mut connection = job.entry.connection.lock().unwrap_or_else(|e| e.into_inner());
            connection.process(&registry)
        };

        if completions
            .send(Completion {
                token: job.token,
                outcome,
            })
            .is_err()
        {
            break;
        }

        if waker.wake().is_err() {
            break;
        }
    }
}
