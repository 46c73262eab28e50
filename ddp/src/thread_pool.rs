//! Fixed-size worker pool.
//!
//! Wraps a [`rayon::ThreadPool`]. A pool built with zero threads runs every
//! task synchronously on the calling thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};

use crate::error::{DdpError, DdpResult};

pub struct ThreadPool {
    pool: Option<rayon::ThreadPool>,
    num_threads: usize,
}

/// Pending result of [`ThreadPool::run`].
pub struct TaskHandle<T> {
    receiver: mpsc::Receiver<std::thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finished. A panicking task yields `Err` with
    /// the panic payload.
    pub fn join(self) -> std::thread::Result<T> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(Box::new("task was dropped before completion")))
    }
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> DdpResult<Self> {
        let pool = if num_threads == 0 {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|i| format!("ddp-worker-{i}"))
                    .build()?,
            )
        };
        Ok(Self { pool, num_threads })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Number of cooperating tasks a sweep is split into.
    pub fn num_workers(&self) -> usize {
        self.num_threads.max(1)
    }

    /// Runs `task` on the pool. The task receives the index of the thread
    /// executing it (0 on the synchronous path).
    pub fn run<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(usize) -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        match &self.pool {
            Some(pool) => pool.spawn(move || {
                let thread_id = rayon::current_thread_index().unwrap_or(0);
                let _ = sender.send(panic::catch_unwind(AssertUnwindSafe(|| task(thread_id))));
            }),
            None => {
                let _ = sender.send(panic::catch_unwind(AssertUnwindSafe(|| task(0))));
            }
        }
        TaskHandle { receiver }
    }

    /// Runs `num_tasks` copies of `task`, passing each its copy index, and
    /// blocks until all of them finished.
    pub fn run_parallel<F>(&self, task: F, num_tasks: usize)
    where
        F: Fn(usize) + Sync,
    {
        match &self.pool {
            Some(pool) => {
                let task = &task;
                pool.scope(|scope| {
                    for i in 0..num_tasks {
                        scope.spawn(move |_| task(i));
                    }
                });
            }
            None => (0..num_tasks).for_each(task),
        }
    }

    /// Evaluates `eval(task_id, index)` exactly once for every index in
    /// `0..num_samples`.
    ///
    /// Workers claim indices from a shared counter. `task_id` is unique per
    /// worker and lies in `0..self.num_workers()`, so callers can keep one
    /// scratch object per worker. The first error stops the sweep.
    pub fn sweep<T, F>(&self, num_samples: usize, eval: F) -> DdpResult<Vec<T>>
    where
        T: Send + Sync,
        F: Fn(usize, usize) -> DdpResult<T> + Sync,
    {
        let next_index = AtomicUsize::new(0);
        let next_task_id = AtomicUsize::new(0);
        let first_error: Mutex<Option<DdpError>> = Mutex::new(None);
        let slots: Vec<OnceLock<T>> = (0..num_samples).map(|_| OnceLock::new()).collect();

        let worker = |_: usize| {
            let task_id = next_task_id.fetch_add(1, Ordering::Relaxed);
            loop {
                let index = next_index.fetch_add(1, Ordering::Relaxed);
                if index >= num_samples {
                    break;
                }
                match eval(task_id, index) {
                    Ok(value) => {
                        let _ = slots[index].set(value);
                    }
                    Err(err) => {
                        if let Ok(mut slot) = first_error.lock() {
                            slot.get_or_insert(err);
                        }
                        // drain the counter so the other workers stop too
                        next_index.store(num_samples, Ordering::Relaxed);
                        break;
                    }
                }
            }
        };
        self.run_parallel(worker, self.num_workers().min(num_samples.max(1)));

        if let Some(err) = first_error.into_inner().ok().flatten() {
            return Err(err);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.into_inner().ok_or(DdpError::MissingSample { index }))
            .collect()
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool").field("num_threads", &self.num_threads).finish()
    }
}
