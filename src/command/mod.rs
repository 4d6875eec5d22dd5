//! Commands: units of work dispatched by the executor.
//!
//! A [`Handler`] is either an immediate [`Command`], run inline on the
//! presentation thread, or a [`LongTask`] wrapping a [`LongCommand`], run on
//! the worker pool and observed through its [`TaskHandle`].

pub mod catalog;
pub mod context;
pub mod progress;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

pub use catalog::{CommandCatalog, CommandData, GuiBuilder};
pub use context::Context;
pub use progress::{
    FailureListener, ListenerId, Phase, ProgressEvent, ProgressListener, ProgressSnapshot,
    Reporter, TaskHandle, TaskId, INDETERMINATE,
};

use crate::dispatch::Poster;
use crate::errors::CommandError;

/// A unit of work expected to complete quickly
pub trait Command: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, active: &Context, inactive: &Context) -> Result<(), CommandError>;
}

/// A unit of work expected to run long.
///
/// `run` must end with exactly one of [`Reporter::finished`] or
/// [`Reporter::failed`], and should poll [`Reporter::is_canceled`] between
/// steps.
pub trait LongCommand: Send {
    fn name(&self) -> &str;

    /// Initial description shown before the body sets its own
    fn description(&self) -> String {
        self.name().to_string()
    }

    fn run(&mut self, progress: &Reporter, active: &Context, inactive: &Context);
}

/// A long-running command bound to its progress channel
pub struct LongTask {
    handle: TaskHandle,
    reporter: Reporter,
    body: Box<dyn LongCommand>,
}

impl LongTask {
    pub fn new(body: impl LongCommand + 'static) -> Self {
        Self::from_box(Box::new(body))
    }

    pub fn from_box(body: Box<dyn LongCommand>) -> Self {
        let (handle, reporter) = progress::channel(body.name(), body.description());
        Self {
            handle,
            reporter,
            body,
        }
    }

    /// Handle for observing and canceling this task
    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    /// Run on the calling thread, delivering events inline
    pub fn run_blocking(self, active: &Context, inactive: &Context) {
        self.run(None, active, inactive);
    }

    pub(crate) fn run(mut self, poster: Option<Poster>, active: &Context, inactive: &Context) {
        if !self.reporter.begin(poster) {
            return;
        }
        let id = self.handle.id();
        tracing::debug!(task = id, name = self.handle.name(), "task started");

        let reporter = &self.reporter;
        let body = &mut self.body;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            body.run(reporter, active, inactive);
        }));

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            tracing::error!(task = id, %message, "command body panicked");
            self.reporter.failed(CommandError::Panicked(message));
        } else if !self.reporter.is_terminal() {
            tracing::warn!(
                task = id,
                name = self.handle.name(),
                "command returned without reporting finished or failed"
            );
        }
        tracing::debug!(task = id, phase = ?self.handle.phase(), "task ended");
    }

    /// Fail the task without running its body
    pub(crate) fn abort(self, poster: Option<Poster>, cause: CommandError) {
        if self.reporter.begin(poster) {
            self.reporter.failed(cause);
        }
    }
}

impl std::fmt::Debug for LongTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTask").field("handle", &self.handle).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What the executor dispatches
pub enum Handler {
    Immediate(Box<dyn Command>),
    Long(LongTask),
}

impl Handler {
    pub fn immediate(command: impl Command + 'static) -> Self {
        Handler::Immediate(Box::new(command))
    }

    pub fn long(command: impl LongCommand + 'static) -> Self {
        Handler::Long(LongTask::new(command))
    }

    pub fn name(&self) -> &str {
        match self {
            Handler::Immediate(c) => c.name(),
            Handler::Long(t) => t.handle.name(),
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Handler::Long(_))
    }

    /// Progress handle, for long-running handlers
    pub fn task(&self) -> Option<TaskHandle> {
        match self {
            Handler::Immediate(_) => None,
            Handler::Long(t) => Some(t.handle()),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Immediate(c) => write!(f, "Immediate({})", c.name()),
            Handler::Long(t) => write!(f, "Long({})", t.handle.name()),
        }
    }
}
