//! Catalog presenter: turns the remote catalog into selectable entries and
//! drives downloads, reporting everything through a [`NotificationSink`].

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;

use crate::catalog::{CatalogEntry, FetchCatalog, FetchError};
use crate::config::Settings;
use crate::download::{Downloader, TaskEvent, TaskEvents, TaskHandle, TaskId, file_name_for};
use crate::http::{RetryPolicy, with_retry};
use crate::notification::{Notification, NotificationSink, NotificationState};

/// Invalid input handed to the presenter by its caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("cannot display an empty ruleset catalog")]
    EmptyCatalog,
}

/// One downloadable ruleset as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectableEntry {
    pub label: String,
    pub entry: Arc<CatalogEntry>,
}

type TaskTable = Arc<Mutex<HashMap<TaskId, TaskHandle>>>;

fn lock_tasks(tasks: &TaskTable) -> MutexGuard<'_, HashMap<TaskId, TaskHandle>> {
    tasks.lock().unwrap_or_else(|e| e.into_inner())
}

fn cancel_task(tasks: &TaskTable, task_id: TaskId) -> bool {
    // Cancel outside the table lock; the handle is cheap to clone.
    let handle = lock_tasks(tasks).get(&task_id).cloned();
    handle.is_some_and(|handle| handle.cancel())
}

pub struct CatalogPresenter<C, D, S>
where
    C: FetchCatalog,
    D: Downloader,
    S: NotificationSink + 'static,
{
    catalog: C,
    downloader: D,
    sink: Arc<S>,
    catalog_url: String,
    downloads_dir: PathBuf,
    retry: RetryPolicy,
    fetched: tokio::sync::Mutex<bool>,
    entries: RwLock<Arc<[SelectableEntry]>>,
    tasks: TaskTable,
}

impl<C, D, S> CatalogPresenter<C, D, S>
where
    C: FetchCatalog,
    D: Downloader,
    S: NotificationSink + 'static,
{
    pub fn new(catalog: C, downloader: D, sink: Arc<S>, settings: &Settings) -> Self {
        Self {
            catalog,
            downloader,
            sink,
            catalog_url: settings.catalog_url(),
            downloads_dir: settings.downloads_dir(),
            retry: settings.retry,
            fetched: tokio::sync::Mutex::new(false),
            entries: RwLock::new(Arc::from(Vec::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Fetches and displays the catalog, once. Later calls return
    /// immediately after a successful fetch; a failed fetch is reported
    /// through the sink and retried on the next activation.
    #[tracing::instrument(skip(self))]
    pub async fn activate(&self) {
        let mut fetched = self.fetched.lock().await;
        if *fetched {
            debug!("Rulesets already fetched, nothing to do.");
            return;
        }

        let result = with_retry(&self.retry, "fetch rulesets", FetchError::is_retryable, || {
            self.catalog.fetch(&self.catalog_url)
        })
        .await
        .and_then(|entries| {
            if entries.is_empty() {
                Err(FetchError::Empty)
            } else {
                Ok(entries)
            }
        });

        let entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to fetch rulesets: {}", e);
                self.sink.post(Notification::error(self.fetch_failure_text(&e)));
                return;
            }
        };

        info!(
            "Retrieved {} rulesets: {}",
            entries.len(),
            entries
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        match self.display_entries(&entries) {
            Ok(_) => {
                *fetched = true;
                info!("Rulesets loaded successfully.");
            }
            Err(e) => error!("Failed to display rulesets: {}", e),
        }
    }

    pub async fn is_fetched(&self) -> bool {
        *self.fetched.lock().await
    }

    fn fetch_failure_text(&self, error: &FetchError) -> String {
        match error {
            FetchError::Empty => format!("No rulesets retrieved from {}!", self.catalog_url),
            other => format!("Failed to fetch rulesets: {}", other),
        }
    }

    /// Publishes the downloadable subset of `entries`, in catalog order.
    /// Entries that cannot be downloaded are skipped without notice.
    pub fn display_entries(
        &self,
        entries: &[CatalogEntry],
    ) -> Result<Arc<[SelectableEntry]>, ArgumentError> {
        if entries.is_empty() {
            return Err(ArgumentError::EmptyCatalog);
        }

        let selectable: Arc<[SelectableEntry]> = entries
            .iter()
            .filter(|entry| entry.can_download)
            .map(|entry| SelectableEntry {
                label: entry.name.clone(),
                entry: Arc::new(entry.clone()),
            })
            .collect();

        debug!(
            "Displaying {} of {} rulesets",
            selectable.len(),
            entries.len()
        );

        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = selectable.clone();
        Ok(selectable)
    }

    /// Current snapshot of selectable entries.
    pub fn entries(&self) -> Arc<[SelectableEntry]> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn select(&self, element: &SelectableEntry) -> TaskId {
        self.trigger_download(element.entry.clone())
    }

    /// Starts downloading `entry` and returns without waiting for it.
    /// Must be called from within a tokio runtime.
    pub fn trigger_download(&self, entry: Arc<CatalogEntry>) -> TaskId {
        let name = entry.name.clone();
        let file_name = file_name_for(&entry);

        info!(
            "Downloading ruleset {} from {}...",
            name, entry.download_url
        );

        let (handle, events) = self.downloader.start(entry, &self.downloads_dir);
        let task_id = handle.id();
        lock_tasks(&self.tasks).insert(task_id, handle);

        let tasks = self.tasks.clone();
        let notification = Notification::progress(
            format!("Downloading {}...", name),
            format!("{} downloaded successfully!", name),
        )
        .with_cancel_handler(Arc::new(move || cancel_task(&tasks, task_id)));

        tokio::spawn(forward_events(
            events,
            notification,
            self.sink.clone(),
            self.tasks.clone(),
            task_id,
            name,
            file_name,
        ));

        task_id
    }

    /// Cancels a running download. `false` when it already finished.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        cancel_task(&self.tasks, task_id)
    }

    /// Cancels every running download and returns how many accepted.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<TaskHandle> = lock_tasks(&self.tasks).values().cloned().collect();
        handles.iter().filter(|handle| handle.cancel()).count()
    }

    /// Downloads that have not reported a terminal state yet.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = lock_tasks(&self.tasks).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn task(&self, task_id: TaskId) -> Option<TaskHandle> {
        lock_tasks(&self.tasks).get(&task_id).cloned()
    }
}

/// Mirrors one task's events onto its notification, then forgets the task.
async fn forward_events<S: NotificationSink>(
    mut events: TaskEvents,
    mut notification: Notification,
    sink: Arc<S>,
    tasks: TaskTable,
    task_id: TaskId,
    name: String,
    file_name: String,
) {
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();

        match event {
            TaskEvent::Queued => notification.state = NotificationState::Queued,
            TaskEvent::Active => notification.state = NotificationState::Active,
            TaskEvent::Progress(ratio) => notification.progress = Some(ratio),
            TaskEvent::Completed => {
                info!("Ruleset {} downloaded successfully to {}", name, file_name);
                notification.state = NotificationState::Completed;
                notification.progress = Some(1.0);
            }
            TaskEvent::Cancelled => {
                info!("Download of {} cancelled", name);
                notification.state = NotificationState::Cancelled;
                notification.text = format!("Download of {} cancelled.", name);
            }
            TaskEvent::Failed(message) => {
                error!("Failed to download ruleset {}: {}", name, message);
                notification.state = NotificationState::Cancelled;
                notification.text = format!("Failed to download {}: {}", name, message);
            }
        }

        if terminal {
            notification.cancel_requested = None;
        }
        sink.post(notification.clone());

        if terminal {
            lock_tasks(&tasks).remove(&task_id);
            break;
        }
    }
}

#[cfg(test)]
mod tests;
