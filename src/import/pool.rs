//! Bounded worker pool for per-record imports.
//!
//! The calling thread feeds records from the source into a bounded channel
//! (`workers * queue_factor` slots) and `workers` scoped threads drain it.
//! Every record is attempted exactly once. A failing or panicking record is
//! logged with its full content and counted; the pool carries on.

use crate::config::{env_millis, env_parse};
use crate::error::CiviResult;
use crossbeam_channel::bounded;
use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Records buffered per worker.
pub const DEFAULT_QUEUE_FACTOR: usize = 5;

/// Outcome counters of one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PoolStats {
    pub fn merge(&mut self, other: PoolStats) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }

    fn count(&mut self, ok: bool) {
        self.processed += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    queue_factor: usize,
    throttle: Duration,
}

impl WorkerPool {
    /// Pool with `workers` threads; `0` is treated as `1`.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_factor: DEFAULT_QUEUE_FACTOR,
            throttle: Duration::ZERO,
        }
    }

    /// `CIVI_IMPORT_WORKERS` (default: CPU count) and `CIVI_IMPORT_THROTTLE_MS`.
    pub fn from_env() -> Self {
        Self::new(env_parse("CIVI_IMPORT_WORKERS", num_cpus::get()))
            .with_throttle(env_millis("CIVI_IMPORT_THROTTLE_MS", 0))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_factor(mut self, factor: usize) -> Self {
        self.queue_factor = factor.max(1);
        self
    }

    /// Pause before each record a worker picks up. Only eases server load.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.workers * self.queue_factor
    }

    /// Apply `f` to every record of `source`.
    pub fn run<I, R, O, F>(&self, source: I, f: F) -> PoolStats
    where
        I: IntoIterator<Item = R>,
        R: Debug + Send,
        F: Fn(&R) -> CiviResult<O> + Sync,
    {
        if self.workers == 1 {
            return self.run_sequential(source, &f);
        }

        let (sender, receiver) = bounded::<R>(self.capacity());
        let throttle = self.throttle;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            for index in 0..self.workers {
                let receiver = receiver.clone();
                let f = &f;
                let spawned = thread::Builder::new()
                    .name(format!("civi-worker-{index}"))
                    .spawn_scoped(scope, move || {
                        let mut stats = PoolStats::default();
                        for record in receiver.iter() {
                            if !throttle.is_zero() {
                                thread::sleep(throttle);
                            }
                            stats.count(process(f, &record));
                        }
                        stats
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => log::error!("failed to spawn import worker {}: {}", index, err),
                }
            }
            drop(receiver);

            let mut stats = PoolStats::default();
            if handles.is_empty() {
                log::warn!("no import worker could be started, running sequentially");
                drop(sender);
                return self.run_sequential(source, &f);
            }

            for record in source {
                if let Err(returned) = sender.send(record) {
                    // every worker is gone; finish on the feeding thread
                    stats.count(process(&f, &returned.into_inner()));
                }
            }
            drop(sender);

            for handle in handles {
                match handle.join() {
                    Ok(worker_stats) => stats.merge(worker_stats),
                    Err(payload) => log::error!("import worker died: {}", panic_message(&*payload)),
                }
            }
            log::debug!(
                "worker pool finished: {} processed, {} failed",
                stats.processed,
                stats.failed
            );
            stats
        })
    }

    fn run_sequential<I, R, O, F>(&self, source: I, f: &F) -> PoolStats
    where
        I: IntoIterator<Item = R>,
        R: Debug,
        F: Fn(&R) -> CiviResult<O>,
    {
        let mut stats = PoolStats::default();
        for record in source {
            stats.count(process(f, &record));
        }
        stats
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Run `f` on one record, isolating errors and panics.
fn process<R, O, F>(f: &F, record: &R) -> bool
where
    R: Debug,
    F: Fn(&R) -> CiviResult<O>,
{
    let worker = thread::current().name().unwrap_or("main").to_string();
    match panic::catch_unwind(AssertUnwindSafe(|| f(record))) {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            log::error!("record failed on '{}': {}", worker, err);
            log::error!("failed record was: {:?}", record);
            false
        }
        Err(payload) => {
            log::error!("record panicked on '{}': {}", worker, panic_message(&*payload));
            log::error!("failed record was: {:?}", record);
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
