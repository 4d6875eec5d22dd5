//! Progress channel of long-running commands.
//!
//! A task has two faces sharing one state:
//! - [`TaskHandle`]: held by the UI side to observe, query and cancel
//! - [`Reporter`]: handed to the command body on the worker thread
//!
//! State machine: `Idle -> Running -> {Finished, Failed}`. Terminal states are
//! final; once one is reached no further event is emitted and all listeners
//! are released.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dispatch::Poster;
use crate::errors::CommandError;

/// Progress value meaning "amount of work unknown"
pub const INDETERMINATE: i32 = -1;

pub type TaskId = u64;
pub type ListenerId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a long-running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Finished,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Failed)
    }
}

/// Progress change delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub old: i32,
    pub new: i32,
    /// Description at the time of the change
    pub description: String,
}

/// Consistent view of a task's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub progress: i32,
    pub description: String,
    pub phase: Phase,
    pub canceled: bool,
}

/// Observer interested in failures only
pub trait FailureListener: Send {
    fn failed(&mut self, source: &TaskHandle, cause: &CommandError);
}

/// Observer of every task event
pub trait ProgressListener: FailureListener {
    fn progress_changed(&mut self, source: &TaskHandle, event: &ProgressEvent);
    fn finished(&mut self, source: &TaskHandle);
}

enum Listener {
    Progress(Box<dyn ProgressListener>),
    Failure(Box<dyn FailureListener>),
}

enum Notification {
    Progress(ProgressEvent),
    Finished,
    Failed(Arc<CommandError>),
}

impl Notification {
    fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Progress(_))
    }
}

struct State {
    progress: i32,
    description: String,
    phase: Phase,
    poster: Option<Poster>,
}

struct Shared {
    id: TaskId,
    name: String,
    canceled: AtomicBool,
    state: Mutex<State>,
    listeners: Mutex<Vec<(ListenerId, Arc<Mutex<Listener>>)>>,
    next_listener: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Emit `notification` for the change just applied under `state`.
    ///
    /// With a poster the closure is queued while the state lock is still held,
    /// so queue order equals mutation order. Without one, listeners run inline
    /// after the lock is released.
    fn notify(self: &Arc<Self>, state: MutexGuard<'_, State>, notification: Notification) {
        if let Some(poster) = state.poster.clone() {
            let shared = Arc::clone(self);
            poster.post(move || shared.deliver(notification));
            drop(state);
            return;
        }
        drop(state);
        self.deliver(notification);
    }

    fn deliver(self: &Arc<Self>, notification: Notification) {
        // Snapshot so listeners may add or remove listeners while being called
        let snapshot: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let source = TaskHandle {
            shared: Arc::clone(self),
        };
        for listener in snapshot {
            let mut listener = lock(&listener);
            match (&mut *listener, &notification) {
                (Listener::Progress(l), Notification::Progress(event)) => {
                    l.progress_changed(&source, event)
                }
                (Listener::Progress(l), Notification::Finished) => l.finished(&source),
                (Listener::Progress(l), Notification::Failed(cause)) => l.failed(&source, cause),
                (Listener::Failure(l), Notification::Failed(cause)) => l.failed(&source, cause),
                (Listener::Failure(_), _) => {}
            }
        }

        if notification.is_terminal() {
            lock(&self.listeners).clear();
        }
    }

    fn add(&self, listener: Listener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(Mutex::new(listener))));
        id
    }
}

/// UI-side view of a long-running task. Cheap to clone.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<Shared>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Request cooperative cancellation. Callable from any thread at any time.
    pub fn cancel(&self) {
        self.shared.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.canceled.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> i32 {
        lock(&self.shared.state).progress
    }

    /// Current description, meant for periodic UI refresh
    pub fn description(&self) -> String {
        lock(&self.shared.state).description.clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.state).phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = lock(&self.shared.state);
        ProgressSnapshot {
            progress: state.progress,
            description: state.description.clone(),
            phase: state.phase,
            canceled: self.is_canceled(),
        }
    }

    /// Register an observer of every event
    pub fn add_listener(&self, listener: Box<dyn ProgressListener>) -> ListenerId {
        self.shared.add(Listener::Progress(listener))
    }

    /// Register an observer of the failure event only
    pub fn add_failure_listener(&self, listener: Box<dyn FailureListener>) -> ListenerId {
        self.shared.add(Listener::Failure(listener))
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for TaskHandle {}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

/// Worker-side face of a task, handed to the command body.
pub struct Reporter {
    shared: Arc<Shared>,
}

impl Reporter {
    /// Update progress. Ignored unless running; values other than
    /// [`INDETERMINATE`] are clamped to 0..=100. An unchanged value is not
    /// reported.
    pub fn set_progress(&self, progress: i32) {
        let progress = if progress == INDETERMINATE {
            progress
        } else {
            progress.clamp(0, 100)
        };

        let mut state = lock(&self.shared.state);
        if state.phase != Phase::Running {
            tracing::trace!(task = self.shared.id, progress, "late progress update ignored");
            return;
        }
        if state.progress == progress {
            return;
        }
        let old = std::mem::replace(&mut state.progress, progress);
        let event = ProgressEvent {
            old,
            new: progress,
            description: state.description.clone(),
        };
        self.shared.notify(state, Notification::Progress(event));
    }

    /// Update the description. No event is emitted.
    pub fn set_description(&self, description: impl Into<String>) {
        lock(&self.shared.state).description = description.into();
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.canceled.load(Ordering::SeqCst)
    }

    /// Signal successful completion. Only the first terminal call counts.
    pub fn finished(&self) {
        let mut state = lock(&self.shared.state);
        if state.phase != Phase::Running {
            return;
        }
        state.phase = Phase::Finished;
        self.shared.notify(state, Notification::Finished);
    }

    /// Signal failure with its cause. Only the first terminal call counts.
    pub fn failed(&self, cause: CommandError) {
        let mut state = lock(&self.shared.state);
        if state.phase != Phase::Running {
            tracing::debug!(task = self.shared.id, error = %cause, "failure after terminal state dropped");
            return;
        }
        state.phase = Phase::Failed;
        self.shared.notify(state, Notification::Failed(Arc::new(cause)));
    }

    pub fn is_terminal(&self) -> bool {
        lock(&self.shared.state).phase.is_terminal()
    }

    /// Idle -> Running, remembering where notifications go
    pub(crate) fn begin(&self, poster: Option<Poster>) -> bool {
        let mut state = lock(&self.shared.state);
        if state.phase != Phase::Idle {
            return false;
        }
        state.phase = Phase::Running;
        state.poster = poster;
        true
    }

    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Create the two faces of a new task
pub(crate) fn channel(name: &str, description: String) -> (TaskHandle, Reporter) {
    let shared = Arc::new(Shared {
        id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
        name: name.to_string(),
        canceled: AtomicBool::new(false),
        state: Mutex::new(State {
            progress: 0,
            description,
            phase: Phase::Idle,
            poster: None,
        }),
        listeners: Mutex::new(Vec::new()),
        next_listener: AtomicU64::new(1),
    });
    (
        TaskHandle {
            shared: Arc::clone(&shared),
        },
        Reporter { shared },
    )
}
