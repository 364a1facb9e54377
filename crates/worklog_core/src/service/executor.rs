//! Small named worker pool for probes and activations.
//!
//! # Invariants
//! - Jobs run in submission order per worker; completion callbacks run on the
//!   worker thread that ran the job.
//! - Dropping the executor drains queued jobs and joins every worker except
//!   the current thread.

use crossbeam_channel::{unbounded, Sender};
use log::{debug, error};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
pub enum ExecutorError {
    Spawn(std::io::Error),
    ShutDown,
}

impl Display for ExecutorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to start worker thread: {err}"),
            Self::ShutDown => write!(f, "background executor is shut down"),
        }
    }
}

impl Error for ExecutorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::ShutDown => None,
        }
    }
}

pub struct BackgroundExecutor {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundExecutor {
    /// Starts `threads` workers (at least one) named `{name}-{index}`.
    pub fn new(name: &str, threads: usize) -> Result<Self, ExecutorError> {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("event=background_job module=service status=error error_code=job_panicked");
                        }
                    }
                })
                .map_err(ExecutorError::Spawn)?;
            workers.push(worker);
        }
        debug!("event=executor_start module=service status=ok workers={}", workers.len());
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), ExecutorError> {
        let sender = self.sender.as_ref().ok_or(ExecutorError::ShutDown)?;
        sender.send(Box::new(job)).map_err(|_| ExecutorError::ShutDown)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("event=executor_stop module=service status=error error_code=worker_panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BackgroundExecutor;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn jobs_run_on_named_workers() {
        let executor = BackgroundExecutor::new("worklog-test", 2).unwrap();
        let (tx, rx) = bounded(1);
        executor
            .submit(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            })
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("worklog-test-"));
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let executor = BackgroundExecutor::new("worklog-test", 1).unwrap();
        executor.submit(|| panic!("job failure")).unwrap();
        let (tx, rx) = bounded(1);
        executor.submit(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}
