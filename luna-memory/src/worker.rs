//! Stoppable background threads running a task on a fixed interval.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const JOIN_POLL: Duration = Duration::from_millis(5);

/// OS thread invoking a tick closure every `interval` until stopped.
///
/// Dropping the worker signals it to stop without waiting.
pub struct PeriodicWorker {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Propagates the OS error when the thread cannot be spawned.
    pub fn spawn<F>(
        name: impl Into<String>,
        interval: Duration,
        mut tick: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(worker = %thread_name, ?interval, "background worker started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(worker = %thread_name, "background worker exited");
        })?;

        Ok(Self {
            name,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Returns the worker's thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` while the thread has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the thread and waits up to `timeout` for it to exit.
    ///
    /// Returns `false` when the thread is still running at the deadline; it is
    /// then detached and left to finish its current tick.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        if let Some(stop) = self.stop.take() {
            // A send error means the thread is already gone.
            let _ = stop.send(());
        }
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    worker = %self.name,
                    ?timeout,
                    "background worker did not stop in time; detaching"
                );
                return false;
            }
            thread::sleep(JOIN_POLL.min(timeout));
        }

        if handle.join().is_err() {
            warn!(worker = %self.name, "background worker panicked");
        }
        true
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        // The handle is detached; the thread exits on its next wake-up.
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl fmt::Debug for PeriodicWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicWorker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
