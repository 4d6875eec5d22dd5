//! Presentation-thread run loop.
//!
//! Worker threads never call observers directly. They post closures through a
//! [`Poster`], and the thread owning the [`EventLoop`] runs them in order when
//! it pumps the loop.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue of closures executed on the thread that owns it.
pub struct EventLoop {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

/// Cloneable sending side of an [`EventLoop`].
#[derive(Clone)]
pub struct Poster {
    tx: Sender<Task>,
}

impl Poster {
    /// Queue `f` for execution on the loop's thread.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Ignore send errors - they only occur once the loop is dropped,
        // and then nobody is left to observe the event.
        let _ = self.tx.send(Box::new(f));
    }
}

impl std::fmt::Debug for Poster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poster").finish_non_exhaustive()
    }
}

impl EventLoop {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = channel::<Task>();
        Self { tx, rx }
    }

    /// A handle for posting work onto this loop from any thread.
    pub fn poster(&self) -> Poster {
        Poster {
            tx: self.tx.clone(),
        }
    }

    /// Run everything queued so far without blocking.
    /// Returns the number of closures executed.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// Run queued closures until `done` returns true or `timeout` elapses.
    /// Returns the final value of `done`.
    pub fn pump_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            match self.rx.recv_timeout(slice) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {}
                // Unreachable while we hold a sender, kept for completeness
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
