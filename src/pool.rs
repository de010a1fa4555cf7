//! Provides a worker pool which runs a batch of futures with a fixed concurrency.
//!
//! Bulk operations (e.g. warming up the caches of all accounts) would overload the upstream
//! system if every unit of work ran at once. A [BoundedTaskPool] therefore queues all units and
//! lets a fixed number of workers drain the queue.
//!
//! # Examples
//! ```
//! # use std::sync::Arc;
//! # use std::sync::atomic::{AtomicUsize, Ordering};
//! # use ems_plat::pool::BoundedTaskPool;
//! # #[tokio::main]
//! # async fn main() {
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! let pool = BoundedTaskPool::new(4);
//! for _ in 0..16 {
//!     let counter = counter.clone();
//!     pool.add(async move {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//! assert_eq!(pool.pending(), 16);
//!
//! let report = pool.run().await;
//! assert_eq!(report.completed, 16);
//! assert_eq!(counter.load(Ordering::SeqCst), 16);
//! # }
//! ```
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::fmt::format_duration;

type Work = BoxFuture<'static, ()>;

/// Summarizes a pool run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolReport {
    /// The number of completed units of work (including the ones which panicked).
    pub completed: usize,
    /// The number of workers which were used.
    pub workers: usize,
    /// The wall clock duration of the run.
    pub duration: Duration,
}

/// Runs queued futures using a fixed number of workers.
pub struct BoundedTaskPool {
    workers: usize,
    sender: mpsc::UnboundedSender<Work>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Work>>>,
    pending: Arc<AtomicUsize>,
}

/// The state shared by all workers of a run.
struct Progress {
    pending: Arc<AtomicUsize>,
    completed: AtomicUsize,
    total: usize,
    drained: Notify,
}

impl Progress {
    fn mark_done(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;

        let step = (self.total / 10).max(1);
        if completed % step == 0 || completed == self.total {
            log::debug!("{} / {} tasks completed...", completed, self.total);
        }

        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl BoundedTaskPool {
    /// Creates a pool which runs up to **workers** futures at the same time.
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        BoundedTaskPool {
            workers: workers.max(1),
            sender,
            queue: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueues the given unit of work.
    pub fn add<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(work.boxed()).is_err() {
            let _ = self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Returns the number of queued units of work.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Runs all queued units of work and returns once every one of them completed.
    ///
    /// Workers which are still waiting for work afterwards are cancelled.
    pub async fn run(self) -> PoolReport {
        let watch = Instant::now();
        let progress = Arc::new(Progress {
            pending: self.pending.clone(),
            completed: AtomicUsize::new(0),
            total: self.pending(),
            drained: Notify::new(),
        });

        log::info!(
            "Running {} tasks using {} workers...",
            progress.total,
            self.workers
        );

        let workers: Vec<_> = (0..self.workers)
            .map(|_| {
                let queue = self.queue.clone();
                let progress = progress.clone();
                tokio::spawn(async move {
                    loop {
                        let work = queue.lock().await.recv().await;
                        match work {
                            Some(work) => {
                                if AssertUnwindSafe(work).catch_unwind().await.is_err() {
                                    log::error!("A task of a bounded pool panicked.");
                                }
                                progress.mark_done();
                            }
                            None => return,
                        }
                    }
                })
            })
            .collect();

        loop {
            let drained = progress.drained.notified();
            if progress.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            drained.await;
        }

        for worker in workers {
            worker.abort();
            match worker.await {
                Ok(_) => (),
                Err(error) if error.is_cancelled() => (),
                Err(error) => log::error!("A worker of a bounded pool failed: {}", error),
            }
        }

        let report = PoolReport {
            completed: progress.completed.load(Ordering::SeqCst),
            workers: self.workers,
            duration: watch.elapsed(),
        };
        log::info!(
            "Completed {} tasks in {}.",
            report.completed,
            format_duration(report.duration)
        );

        report
    }
}
