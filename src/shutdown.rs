//! Cooperative cancellation shared by every thread of a run.
//!
//! A [`Shutdown`] is cancelled once, with a cause. Waiters observe it through
//! [`Shutdown::done`], a channel that disconnects on cancel and can therefore
//! sit in a `select!` beside channel sends, receives and timers.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::{PttError, Result};

#[derive(Debug)]
struct Inner {
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
    cause: OnceLock<String>,
}

/// Cancellation token with a recorded cause
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (trigger, done) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                trigger: Mutex::new(Some(trigger)),
                done,
                cause: OnceLock::new(),
            }),
        }
    }

    /// Cancel the token. Only the first cause is kept.
    pub fn cancel(&self, cause: impl Into<String>) {
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if trigger.is_none() {
            return;
        }

        let cause = cause.into();
        debug!(cause = %cause, "cancelling");
        let _ = self.inner.cause.set(cause);
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cause.get().is_some()
    }

    pub fn cause(&self) -> Option<String> {
        self.inner.cause.get().cloned()
    }

    /// Disconnects once the token is cancelled. Never yields a value.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }

    /// The error a component returns after observing cancellation.
    pub fn err(&self) -> PttError {
        PttError::Cancelled(self.cause().unwrap_or_else(|| "cancelled".to_string()))
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of threads that fail together.
///
/// The first task to return an error cancels the shared [`Shutdown`], and
/// [`TaskGroup::wait`] reports that error once every task has returned.
pub struct TaskGroup {
    shutdown: Shutdown,
    first_error: Arc<Mutex<Option<PttError>>>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl TaskGroup {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            first_error: Arc::new(Mutex::new(None)),
            handles: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: &str, task: F) -> Result<()>
    where
        F: FnOnce(&Shutdown) -> Result<()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let first_error = Arc::clone(&self.first_error);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(err) = task(&shutdown) {
                    let cause = err.to_string();
                    first_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(err);
                    shutdown.cancel(cause);
                }
            })
            .map_err(|source| PttError::Spawn {
                name: name.to_string(),
                source,
            })?;

        self.handles.push((name.to_string(), handle));
        Ok(())
    }

    /// Stop the group because of `err`, raised outside any task.
    ///
    /// Cancels the tasks already running, joins them and hands `err` back.
    pub fn abort(self, err: PttError) -> PttError {
        self.shutdown.cancel(err.to_string());
        if let Err(other) = self.wait() {
            debug!(error = %other, "task stopped while aborting");
        }
        err
    }

    /// Join every task and return the first error any of them produced.
    pub fn wait(self) -> Result<()> {
        let mut panicked = None;
        for (name, handle) in self.handles {
            if handle.join().is_err() {
                self.shutdown.cancel(format!("{name} thread panicked"));
                panicked.get_or_insert(name);
            }
        }

        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (first, panicked) {
            (Some(err), _) => Err(err),
            (None, Some(name)) => Err(PttError::Panicked(name)),
            (None, None) => Ok(()),
        }
    }
}
