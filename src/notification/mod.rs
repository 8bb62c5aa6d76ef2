//! Notifications published to the host UI.
//!
//! The core only ever calls [`NotificationSink::post`]. Successive posts
//! carrying the same [`NotificationId`] describe one notification whose
//! state changes over time; the host updates it in place.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

static NEXT_NOTIFICATION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn next() -> Self {
        NotificationId(NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Queued,
    Active,
    Completed,
    Cancelled,
    /// One-shot error message, not tied to a download.
    Error,
}

/// Invoked when the user asks to cancel; returns whether it was accepted.
pub type CancelHandler = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub text: String,
    pub state: NotificationState,
    pub progress: Option<f32>,
    pub completion_text: Option<String>,
    pub cancel_requested: Option<CancelHandler>,
}

impl Notification {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            id: NotificationId::next(),
            text: text.into(),
            state: NotificationState::Error,
            progress: None,
            completion_text: None,
            cancel_requested: None,
        }
    }

    /// A queued progress notification.
    pub fn progress(text: impl Into<String>, completion_text: impl Into<String>) -> Self {
        Self {
            id: NotificationId::next(),
            text: text.into(),
            state: NotificationState::Queued,
            progress: None,
            completion_text: Some(completion_text.into()),
            cancel_requested: None,
        }
    }

    pub fn with_cancel_handler(mut self, handler: CancelHandler) -> Self {
        self.cancel_requested = Some(handler);
        self
    }

    /// Forwards a user cancel request. `false` when nothing can be cancelled.
    pub fn request_cancel(&self) -> bool {
        self.cancel_requested
            .as_ref()
            .is_some_and(|handler| handler())
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .field("completion_text", &self.completion_text)
            .field("cancellable", &self.cancel_requested.is_some())
            .finish()
    }
}

/// Display surface for notifications. Shared by the presenter and every
/// download, so implementations must accept concurrent posts.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn post(&self, notification: Notification);
}

/// Append-only in-memory log of every post.
#[derive(Default)]
pub struct MemorySink {
    posted: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.posted.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every post, in arrival order.
    pub fn all(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    /// Successive versions of one notification, oldest first.
    pub fn history(&self, id: NotificationId) -> Vec<Notification> {
        self.lock().iter().filter(|n| n.id == id).cloned().collect()
    }

    /// Current version of one notification.
    pub fn latest(&self, id: NotificationId) -> Option<Notification> {
        self.lock().iter().rev().find(|n| n.id == id).cloned()
    }

    pub fn errors(&self) -> Vec<Notification> {
        self.lock()
            .iter()
            .filter(|n| n.state == NotificationState::Error)
            .cloned()
            .collect()
    }
}

impl NotificationSink for MemorySink {
    fn post(&self, notification: Notification) {
        self.lock().push(notification);
    }
}

/// Hands notifications over to a single consumer, typically the task that
/// owns the UI.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn post(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            log::debug!("Notification receiver dropped, discarding post");
        }
    }
}
