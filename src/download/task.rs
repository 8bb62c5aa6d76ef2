//! Download task state machine.
//!
//! Every state change happens under the task lock and emits its event while
//! the lock is held, so the event stream of a task is totally ordered and
//! nothing can follow the terminal event.

use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogEntry;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique download task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }
}

/// One entry of a task's ordered event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Queued,
    Active,
    /// Fraction of the file received, in `[0, 1]`.
    Progress(f32),
    Completed,
    Cancelled,
    Failed(String),
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completed | TaskEvent::Cancelled | TaskEvent::Failed(_)
        )
    }
}

pub type TaskEvents = mpsc::UnboundedReceiver<TaskEvent>;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub progress: Option<f32>,
    pub error_message: Option<String>,
}

struct Inner {
    state: TaskState,
    progress: Option<f32>,
    error_message: Option<String>,
}

pub(crate) struct TaskShared {
    id: TaskId,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<TaskEvent>,
    state_tx: watch::Sender<TaskState>,
    cancel: CancellationToken,
}

impl TaskShared {
    /// Creates a task in `Queued` and emits the `Queued` event.
    pub(crate) fn new() -> (Arc<Self>, TaskEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(TaskState::Queued);
        let shared = Arc::new(Self {
            id: TaskId::next(),
            inner: Mutex::new(Inner {
                state: TaskState::Queued,
                progress: None,
                error_message: None,
            }),
            events,
            state_tx,
            cancel: CancellationToken::new(),
        });
        let _ = shared.events.send(TaskEvent::Queued);
        (shared, rx)
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: TaskState, event: TaskEvent) {
        debug!("Task {}: {:?} -> {:?}", self.id, inner.state, state);
        inner.state = state;
        let _ = self.events.send(event);
        self.state_tx.send_replace(state);
    }

    /// `Queued -> Active`. Returns `false` once the task is terminal.
    pub(crate) fn activate(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Queued => {
                self.set_state(&mut inner, TaskState::Active, TaskEvent::Active);
                true
            }
            TaskState::Active => true,
            _ => false,
        }
    }

    /// Records progress, activating a still-queued task first.
    pub(crate) fn progress(&self, ratio: f32) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        if inner.state == TaskState::Queued {
            self.set_state(&mut inner, TaskState::Active, TaskEvent::Active);
        }
        let ratio = ratio.clamp(0.0, 1.0);
        inner.progress = Some(ratio);
        let _ = self.events.send(TaskEvent::Progress(ratio));
        true
    }

    /// Runs `commit` and moves to `Completed`, or to `Failed` when `commit`
    /// errors. Nothing runs when the task already reached a terminal state.
    pub(crate) fn complete<F>(&self, commit: F) -> bool
    where
        F: FnOnce() -> Result<(), String>,
    {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        match commit() {
            Ok(()) => {
                inner.progress = Some(1.0);
                self.set_state(&mut inner, TaskState::Completed, TaskEvent::Completed);
            }
            Err(message) => {
                inner.error_message = Some(message.clone());
                self.set_state(&mut inner, TaskState::Failed, TaskEvent::Failed(message));
            }
        }
        true
    }

    pub(crate) fn fail(&self, message: String) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.error_message = Some(message.clone());
        self.set_state(&mut inner, TaskState::Failed, TaskEvent::Failed(message));
        true
    }

    /// Accepts a cancellation unless the task is terminal. The transfer is
    /// signalled through the token and exits at its next suspension point.
    pub(crate) fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        self.set_state(&mut inner, TaskState::Cancelled, TaskEvent::Cancelled);
        true
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let inner = self.lock();
        TaskSnapshot {
            id: self.id,
            state: inner.state,
            progress: inner.progress,
            error_message: inner.error_message.clone(),
        }
    }

    fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }
}

/// Caller-side handle of a running download.
///
/// Cloning is cheap; all clones observe and control the same task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
    entry: Arc<CatalogEntry>,
    destination: PathBuf,
}

impl TaskHandle {
    pub(crate) fn new(
        shared: Arc<TaskShared>,
        entry: Arc<CatalogEntry>,
        destination: PathBuf,
    ) -> Self {
        Self {
            shared,
            entry,
            destination,
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id()
    }

    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.shared.snapshot()
    }

    pub fn is_terminal(&self) -> bool {
        self.snapshot().state.is_terminal()
    }

    /// Requests cancellation. Returns `false` when the task already finished.
    /// Never blocks on the transfer.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Resolves once the task reaches a terminal state.
    pub async fn wait(&self) -> TaskSnapshot {
        let mut rx = self.shared.subscribe();
        // The sender lives as long as `self.shared`, so this cannot fail.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.snapshot()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("entry", &self.entry.name)
            .field("destination", &self.destination)
            .finish()
    }
}
