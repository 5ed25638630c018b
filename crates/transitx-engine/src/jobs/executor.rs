//! Where submitted jobs run
//!
//! `ThreadPerJob` gives every job its own thread, so chains fan out without
//! bound. `BoundedPool` caps concurrency with a fixed set of workers fed
//! from one queue.

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use transitx_core::errors::{ExError, ExErrorKind};

use crate::errors::Result;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait JobExecutor: Send + Sync {
    /// Schedule `task`; `label` names the thread where that is possible
    fn submit(&self, label: &str, task: Task) -> Result<()>;

    /// Upper bound on concurrently running jobs, if any
    fn capacity(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPerJob;

impl JobExecutor for ThreadPerJob {
    fn submit(&self, label: &str, task: Task) -> Result<()> {
        thread::Builder::new()
            .name(format!("transitx-job-{}", label))
            .spawn(task)
            .map(|_| ())
            .map_err(|e| {
                ExError::new(ExErrorKind::Internal)
                    .with_op("spawn_job_thread")
                    .with_message(e.to_string())
            })
    }
}

/// Fixed set of worker threads draining a shared queue
pub struct BoundedPool {
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl BoundedPool {
    /// # Errors
    ///
    /// - `InvalidInput`: zero workers
    /// - `Internal`: a worker thread could not be spawned
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("bounded_pool")
                .with_message("worker count must be at least 1"));
        }

        let (tx, rx) = mpsc::channel::<Task>();
        let shared_rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = shared_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("transitx-worker-{}", i))
                .spawn(move || loop {
                    let task = {
                        let guard = match rx.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.recv()
                    };

                    match task {
                        Ok(task) => task(),
                        Err(_) => break,
                    }
                })
                .map_err(|e| {
                    ExError::new(ExErrorKind::Internal)
                        .with_op("bounded_pool")
                        .with_message(e.to_string())
                })?;
            workers.push(handle);
        }

        tracing::debug!(workers = size, "Started bounded job pool");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting work, let queued tasks drain, and join the workers
    ///
    /// Called from a worker thread it skips joining that thread.
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        let me: ThreadId = thread::current().id();
        for handle in handles {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }
}

impl JobExecutor for BoundedPool {
    fn submit(&self, _label: &str, task: Task) -> Result<()> {
        let tx = self.tx.lock().map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("bounded_pool")
                .with_message("pool queue lock poisoned")
        })?;
        let sent = match tx.as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            Err(ExError::new(ExErrorKind::Internal)
                .with_op("bounded_pool")
                .with_message("pool is shut down"))
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.size)
    }
}

impl Drop for BoundedPool {
    // Closing the queue is enough; workers exit once it drains
    fn drop(&mut self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

impl std::fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPool").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_thread_per_job_runs_task() {
        let (tx, rx) = mpsc::channel();
        ThreadPerJob
            .submit("t", Box::new(move || tx.send(7).unwrap()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_pool_never_exceeds_its_size() {
        let pool = BoundedPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(
                "t",
                Box::new(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }
        pool.shutdown();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = BoundedPool::new(1).unwrap();
        pool.shutdown();
        let err = pool.submit("t", Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Internal);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(
            BoundedPool::new(0).unwrap_err().kind(),
            ExErrorKind::InvalidInput
        );
    }
}
