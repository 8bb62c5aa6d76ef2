use super::*;
use crate::catalog::MockFetchCatalog;
use crate::download::{DownloadOptions, HttpDownloader};
use crate::http::{HttpClient, HttpError};
use crate::notification::{MemorySink, MockNotificationSink};
use crate::runtime::RealRuntime;
use crate::test_utils::{dummy_rulesets, entry_with_url};
use mockall::predicate::eq;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

type TestPresenter = CatalogPresenter<MockFetchCatalog, HttpDownloader<RealRuntime>, MemorySink>;

const API_URL: &str = "http://127.0.0.1:1";
const CATALOG_URL: &str = "http://127.0.0.1:1/api/rulesets";

fn downloader() -> HttpDownloader<RealRuntime> {
    HttpDownloader::new(
        HttpClient::new(Client::new()),
        Arc::new(RealRuntime),
        DownloadOptions::default(),
    )
}

fn presenter_with(catalog: MockFetchCatalog, settings: &Settings) -> (TestPresenter, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let presenter = CatalogPresenter::new(catalog, downloader(), sink.clone(), settings);
    (presenter, sink)
}

fn test_presenter(dir: &TempDir) -> (TestPresenter, Arc<MemorySink>) {
    presenter_with(MockFetchCatalog::new(), &Settings::new(API_URL, dir.path()))
}

fn timeout_error() -> FetchError {
    FetchError::Transport(HttpError::Timeout {
        url: CATALOG_URL.to_string(),
    })
}

/// A server that accepts connections and never answers.
async fn silent_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

async fn wait_until_finished(presenter: &TestPresenter, task_id: TaskId) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while presenter.active_tasks().contains(&task_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("download did not finish in time");
}

async fn first_download_notification(sink: &MemorySink) -> Notification {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(n) = sink.all().into_iter().find(|n| n.completion_text.is_some()) {
                return n;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no download notification posted")
}

fn states(history: &[Notification]) -> Vec<NotificationState> {
    history.iter().map(|n| n.state).collect()
}

fn assert_single_terminal_last(history: &[Notification]) {
    let terminal = |n: &Notification| {
        matches!(
            n.state,
            NotificationState::Completed | NotificationState::Cancelled
        )
    };
    assert_eq!(history.iter().filter(|&n| terminal(n)).count(), 1);
    assert!(history.last().is_some_and(terminal));
    assert!(history.last().unwrap().cancel_requested.is_none());
}

#[test]
fn test_display_entries_skips_non_downloadable() {
    let dir = tempdir().unwrap();
    let (presenter, sink) = test_presenter(&dir);

    let shown = presenter.display_entries(&dummy_rulesets()).unwrap();

    let labels: Vec<&str> = shown.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["ExampleRuleset1", "ExampleRuleset2"]);
    assert_eq!(presenter.entries(), shown);
    assert!(sink.all().is_empty());
}

#[test]
fn test_display_entries_all_filtered_out() {
    let dir = tempdir().unwrap();
    let (presenter, _sink) = test_presenter(&dir);
    let entries: Vec<CatalogEntry> = dummy_rulesets()
        .into_iter()
        .map(|mut e| {
            e.can_download = false;
            e
        })
        .collect();

    let shown = presenter.display_entries(&entries).unwrap();
    assert!(shown.is_empty());
}

#[test]
fn test_display_entries_rejects_empty() {
    let dir = tempdir().unwrap();
    let (presenter, _sink) = test_presenter(&dir);
    presenter.display_entries(&dummy_rulesets()).unwrap();

    assert_eq!(
        presenter.display_entries(&[]),
        Err(ArgumentError::EmptyCatalog)
    );
    // The previous listing stays in place.
    assert_eq!(presenter.entries().len(), 2);
}

#[tokio::test]
async fn test_activate_fetches_once() {
    let dir = tempdir().unwrap();
    let mut catalog = MockFetchCatalog::new();
    catalog
        .expect_fetch()
        .with(eq(CATALOG_URL))
        .times(1)
        .returning(|_| Ok(dummy_rulesets()));
    let (presenter, sink) = presenter_with(catalog, &Settings::new(API_URL, dir.path()));

    assert!(!presenter.is_fetched().await);
    presenter.activate().await;
    presenter.activate().await;

    assert!(presenter.is_fetched().await);
    assert_eq!(presenter.entries().len(), 2);
    assert!(sink.all().is_empty());
}

#[tokio::test]
async fn test_activate_failure_is_reported_and_retried_on_next_activation() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut catalog = MockFetchCatalog::new();
    catalog.expect_fetch().times(2).returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(timeout_error())
        } else {
            Ok(dummy_rulesets())
        }
    });
    let (presenter, sink) = presenter_with(catalog, &Settings::new(API_URL, dir.path()));

    presenter.activate().await;

    assert!(!presenter.is_fetched().await);
    assert!(presenter.entries().is_empty());
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].text,
        format!("Failed to fetch rulesets: request to {} timed out", CATALOG_URL)
    );

    presenter.activate().await;

    assert!(presenter.is_fetched().await);
    assert_eq!(presenter.entries().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.errors().len(), 1);
}

#[tokio::test]
async fn test_activate_empty_catalog_posts_message() {
    let dir = tempdir().unwrap();
    let mut catalog = MockFetchCatalog::new();
    catalog.expect_fetch().times(1).returning(|_| Ok(Vec::new()));

    let mut sink = MockNotificationSink::new();
    sink.expect_post()
        .withf(|n| {
            n.state == NotificationState::Error
                && n.text == "No rulesets retrieved from http://127.0.0.1:1/api/rulesets!"
        })
        .times(1)
        .return_const(());

    let presenter = CatalogPresenter::new(
        catalog,
        downloader(),
        Arc::new(sink),
        &Settings::new(API_URL, dir.path()),
    );
    presenter.activate().await;

    assert!(!presenter.is_fetched().await);
}

#[tokio::test]
async fn test_activate_follows_retry_policy() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut catalog = MockFetchCatalog::new();
    catalog.expect_fetch().times(3).returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(timeout_error())
        } else {
            Ok(dummy_rulesets())
        }
    });

    let mut settings = Settings::new(API_URL, dir.path());
    settings.retry = RetryPolicy::new(3, Duration::ZERO);
    let (presenter, sink) = presenter_with(catalog, &settings);

    presenter.activate().await;

    assert!(presenter.is_fetched().await);
    assert!(sink.errors().is_empty());
}

#[tokio::test]
async fn test_activate_does_not_retry_malformed_catalog() {
    let dir = tempdir().unwrap();
    let mut catalog = MockFetchCatalog::new();
    catalog
        .expect_fetch()
        .times(1)
        .returning(|_| Err(FetchError::Decode("missing field `slug`".to_string())));

    let mut settings = Settings::new(API_URL, dir.path());
    settings.retry = RetryPolicy::new(3, Duration::ZERO);
    let (presenter, sink) = presenter_with(catalog, &settings);

    presenter.activate().await;

    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].text,
        "Failed to fetch rulesets: malformed catalog: missing field `slug`"
    );
}

#[test_log::test(tokio::test)]
async fn test_unreachable_download_is_reported_as_failure() {
    let dir = tempdir().unwrap();
    let mut catalog = MockFetchCatalog::new();
    catalog.expect_fetch().times(1).returning(|_| {
        Ok(dummy_rulesets()
            .into_iter()
            .map(|mut e| {
                e.download_url = format!("http://127.0.0.1:1/{}.dll", e.slug);
                e
            })
            .collect())
    });
    let (presenter, sink) = presenter_with(catalog, &Settings::new(API_URL, dir.path()));

    presenter.activate().await;
    let entries = presenter.entries();
    assert_eq!(entries.len(), 2);

    let task_id = presenter.select(&entries[0]);
    wait_until_finished(&presenter, task_id).await;

    let first = first_download_notification(&sink).await;
    let history = sink.history(first.id);
    assert_eq!(
        states(&history),
        vec![
            NotificationState::Queued,
            NotificationState::Active,
            NotificationState::Cancelled,
        ]
    );
    assert_eq!(history[0].text, "Downloading ExampleRuleset1...");
    assert!(
        history[2]
            .text
            .starts_with("Failed to download ExampleRuleset1: ")
    );
    assert_single_terminal_last(&history);
    assert!(presenter.task(task_id).is_none());
    assert!(!presenter.cancel(task_id));
}

#[tokio::test]
async fn test_successful_download_completes_notification() {
    let mut server = mockito::Server::new_async().await;
    let body = vec![42u8; 16 * 1024];
    let mock = server
        .mock("GET", "/ruleset1.dll")
        .with_status(200)
        .with_body(&body)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let (presenter, sink) = test_presenter(&dir);
    let entry = Arc::new(entry_with_url(&format!("{}/ruleset1.dll", server.url())));

    let task_id = presenter.trigger_download(entry);
    assert!(presenter.active_tasks().contains(&task_id));
    wait_until_finished(&presenter, task_id).await;
    mock.assert_async().await;

    let first = first_download_notification(&sink).await;
    let history = sink.history(first.id);
    assert_eq!(history.first().unwrap().state, NotificationState::Queued);
    assert_single_terminal_last(&history);

    let last = history.last().unwrap();
    assert_eq!(last.state, NotificationState::Completed);
    assert_eq!(last.progress, Some(1.0));
    assert_eq!(
        last.completion_text.as_deref(),
        Some("ExampleRuleset1 downloaded successfully!")
    );

    let saved = presenter.downloads_dir().join("ruleset1.dll");
    assert_eq!(saved, dir.path().join("rulesets/ruleset1.dll"));
    assert_eq!(std::fs::read(saved).unwrap(), body);
}

#[tokio::test]
async fn test_cancel_from_notification() {
    let dir = tempdir().unwrap();
    let (presenter, sink) = test_presenter(&dir);
    let entry = Arc::new(entry_with_url(&format!(
        "{}/ruleset1.dll",
        silent_server().await
    )));

    let task_id = presenter.trigger_download(entry);
    let notification = first_download_notification(&sink).await;
    assert!(notification.request_cancel());

    wait_until_finished(&presenter, task_id).await;

    let history = sink.history(notification.id);
    assert_single_terminal_last(&history);
    let last = history.last().unwrap();
    assert_eq!(last.state, NotificationState::Cancelled);
    assert_eq!(last.text, "Download of ExampleRuleset1 cancelled.");

    // The task is gone, so a second request has nothing to cancel.
    assert!(!notification.request_cancel());
    assert!(!dir.path().join("rulesets/ruleset1.dll").exists());
    assert!(!dir.path().join("rulesets/ruleset1.dll.part").exists());
}

#[tokio::test]
async fn test_cancel_all() {
    let dir = tempdir().unwrap();
    let (presenter, sink) = test_presenter(&dir);
    let base = silent_server().await;

    let first = presenter.trigger_download(Arc::new(entry_with_url(&format!("{}/a.dll", base))));
    let second = presenter.trigger_download(Arc::new(entry_with_url(&format!("{}/b.dll", base))));
    assert_ne!(first, second);

    let mut active = vec![first, second];
    active.sort();
    assert_eq!(presenter.active_tasks(), active);

    assert_eq!(presenter.cancel_all(), 2);
    wait_until_finished(&presenter, first).await;
    wait_until_finished(&presenter, second).await;

    assert!(presenter.active_tasks().is_empty());
    assert_eq!(presenter.cancel_all(), 0);

    let cancelled = sink
        .all()
        .into_iter()
        .filter(|n| n.state == NotificationState::Cancelled)
        .count();
    assert_eq!(cancelled, 2);
}

#[tokio::test]
async fn test_cancel_by_task_id() {
    let dir = tempdir().unwrap();
    let (presenter, _sink) = test_presenter(&dir);
    let entry = Arc::new(entry_with_url(&format!(
        "{}/ruleset1.dll",
        silent_server().await
    )));

    let task_id = presenter.trigger_download(entry);
    let handle = presenter.task(task_id).unwrap();

    assert!(presenter.cancel(task_id));
    assert!(!handle.cancel());

    let snapshot = handle.wait().await;
    assert_eq!(snapshot.state, crate::download::TaskState::Cancelled);
    wait_until_finished(&presenter, task_id).await;
}
