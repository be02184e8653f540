//! Per-worker sequential scheduler.
//!
//! A dedicated thread owns the worker state `S` (the engine) and runs queued
//! jobs one at a time in submission order. A job that fails or panics
//! resolves its own [`Pending`] with an error and the queue moves on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::error::{JarlensError, Result};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to the outcome of one scheduled job.
#[must_use = "a scheduled job's outcome is only observable through wait()"]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Block until the job has run.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| JarlensError::WorkerGone)?
    }
}

pub struct SequentialScheduler<S> {
    name: String,
    sender: Option<Sender<Job<S>>>,
    pending: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> SequentialScheduler<S> {
    /// Move `state` onto a new thread and start accepting jobs.
    pub fn spawn(name: impl Into<String>, mut state: S) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job<S>>();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in receiver {
                    job(&mut state);
                }
            })
            .map_err(|e| JarlensError::io(e, ""))?;

        Ok(SequentialScheduler { name, sender: Some(sender), pending: Arc::new(AtomicUsize::new(0)), handle: Some(handle) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs submitted and not yet finished (the running one included).
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue `job` behind every job submitted before it.
    pub fn schedule<T, F>(&self, job: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.pending.fetch_add(1, Ordering::SeqCst);
        // Released when the job finishes, or when it is dropped unrun.
        let finally = scopeguard::guard(Arc::clone(&self.pending), |p| {
            p.fetch_sub(1, Ordering::SeqCst);
        });
        let worker = self.name.clone();

        let boxed: Job<S> = Box::new(move |state: &mut S| {
            let outcome = match catch_unwind(AssertUnwindSafe(|| job(state))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(worker = %worker, "scheduled job panicked: {message}");
                    Err(JarlensError::Engine(format!("job panicked: {message}")))
                }
            };
            drop(finally);
            let _ = tx.send(outcome);
        });

        match &self.sender {
            // On failure the job comes back inside the error and is dropped,
            // which closes its result channel.
            Some(sender) => {
                if sender.send(boxed).is_err() {
                    tracing::warn!(worker = %self.name, "worker thread is gone; job dropped");
                }
            }
            None => drop(boxed),
        }
        Pending { rx }
    }

    /// Stop accepting jobs, let queued ones finish, and join the thread.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(payload) = handle.join() {
                tracing::error!(worker = %self.name, "worker thread panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

impl<S> Drop for SequentialScheduler<S> {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let scheduler = SequentialScheduler::spawn("t", Vec::<u32>::new()).unwrap();
        let handles: Vec<_> = (0..20)
            .map(|i| {
                scheduler.schedule(move |log: &mut Vec<u32>| {
                    log.push(i);
                    Ok(log.clone())
                })
            })
            .collect();
        let last = handles.into_iter().map(|h| h.wait().unwrap()).last().unwrap();
        assert_eq!(last, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn failing_and_panicking_jobs_do_not_wedge_the_queue() {
        let scheduler = SequentialScheduler::spawn("t", 0u32).unwrap();
        let failed = scheduler.schedule(|_: &mut u32| -> Result<()> { Err(JarlensError::Engine("boom".into())) });
        let panicked = scheduler.schedule(|_: &mut u32| -> Result<()> { panic!("kaboom") });
        let after = scheduler.schedule(|n: &mut u32| {
            *n += 1;
            Ok(*n)
        });

        assert!(matches!(failed.wait(), Err(JarlensError::Engine(m)) if m == "boom"));
        assert!(matches!(panicked.wait(), Err(JarlensError::Engine(m)) if m.contains("kaboom")));
        assert_eq!(after.wait().unwrap(), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn pending_count_tracks_queue_depth() {
        let scheduler = SequentialScheduler::spawn("t", ()).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let blocker = scheduler.schedule(move |_| {
            let _ = gate_rx.recv();
            Ok(())
        });
        let queued = scheduler.schedule(|_| Ok(()));
        assert_eq!(scheduler.pending_count(), 2);

        gate_tx.send(()).unwrap();
        blocker.wait().unwrap();
        queued.wait().unwrap();
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn shutdown_drains_then_rejects() {
        let mut scheduler = SequentialScheduler::spawn("t", ()).unwrap();
        let slow = scheduler.schedule(|_| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(7)
        });
        scheduler.shutdown();
        assert_eq!(slow.wait().unwrap(), 7);

        let late = scheduler.schedule(|_| Ok(()));
        assert!(matches!(late.wait(), Err(JarlensError::WorkerGone)));
        assert_eq!(scheduler.pending_count(), 0);
    }
}
