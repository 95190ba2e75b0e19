//! Integration tests for optimistic task sync.
//!
//! Drives one or two [`App`]s against a shared in-process [`MemoryStore`]
//! and checks what the user sees, what the store holds, and what lands in
//! the audit tables.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use collabtodo::app::{App, Level, Notification};
use collabtodo::config::ClientConfig;
use collabtodo::remote::RemoteStore;
use collabtodo::remote::memory::MemoryStore;
use collabtodo_proto::change::ChangeEvent;
use collabtodo_proto::task::{Priority, Task, TaskId, UserId};
use tokio::sync::mpsc;

type TestApp = App<MemoryStore, MemoryStore>;

const EMAIL: &str = "sam@example.com";
const PASSWORD: &str = "hunter22";

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Store with one registered account; returns the account's id.
async fn make_store() -> (Arc<MemoryStore>, UserId) {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_account(EMAIL, PASSWORD).await;
    (store, user)
}

/// A started app, signed in to the shared account.
async fn make_device(store: &Arc<MemoryStore>) -> (TestApp, mpsc::Receiver<Notification>) {
    let (mut app, rx) = App::new(Arc::clone(store), Arc::clone(store), ClientConfig::default());
    app.start().await;
    app.sign_in(EMAIL, PASSWORD).await;
    assert!(app.session().is_some(), "sign in failed");
    (app, rx)
}

/// Processes completions and change events until nothing arrives for 50ms.
async fn settle(app: &mut TestApp) {
    while tokio::time::timeout(Duration::from_millis(50), app.process_next())
        .await
        .is_ok()
    {}
}

fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

fn has(notes: &[Notification], level: Level, message: &str) -> bool {
    notes.iter().any(|n| n.level == level && n.message == message)
}

fn texts(app: &TestApp) -> Vec<&str> {
    app.tasks().iter().map(|t| t.text.as_str()).collect()
}

fn layout(tasks: &[Task]) -> Vec<(String, i64)> {
    tasks.iter().map(|t| (t.text.clone(), t.position)).collect()
}

fn assert_strictly_increasing(rows: &[(String, i64)]) {
    assert!(
        rows.windows(2).all(|pair| pair[0].1 < pair[1].1),
        "positions tie or go backwards: {rows:?}"
    );
}

fn aged_task(owner: &UserId, id: &str, hours: i64) -> Task {
    Task {
        id: TaskId::new(id),
        user_id: owner.clone(),
        text: id.to_string(),
        completed: false,
        priority: Priority::Low,
        position: 0,
        created_at: Utc::now() - TimeDelta::hours(hours),
        updated_at: None,
    }
}

// ===========================================================================
// Create
// ===========================================================================

#[tokio::test]
async fn create_round_trip_appends_and_audits() {
    let (store, user) = make_store().await;
    let (mut app, mut rx) = make_device(&store).await;
    app.add_task("Walk dog", Priority::Low).unwrap();
    app.add_task("Pay rent", Priority::High).unwrap();
    settle(&mut app).await;
    drain(&mut rx);

    app.add_task("Buy milk", Priority::Medium).unwrap();
    let optimistic = app.tasks().last().unwrap().clone();
    assert!(optimistic.id.is_provisional());
    assert_eq!(optimistic.position, 2);

    settle(&mut app).await;

    assert_eq!(app.tasks().len(), 3);
    let created = app.tasks().last().unwrap();
    assert!(!created.id.is_provisional());
    assert_eq!(created.text, "Buy milk");
    assert_eq!(created.priority, Priority::Medium);
    assert!(!created.completed);
    assert_eq!(created.position, 2);
    assert_eq!(created.user_id, user);
    assert_eq!(app.pending_count(), 0);

    let notes = drain(&mut rx);
    assert!(has(&notes, Level::Success, "Task added successfully"));
    assert!(!has(&notes, Level::Info, "New task added"));

    let logs = store.task_logs().await;
    let last = logs.last().unwrap();
    assert_eq!(last.action, "create");
    assert!(last.success);
    assert_eq!(last.task_id.as_ref(), Some(&created.id));
    assert_eq!(last.user_id, user);
}

#[tokio::test]
async fn failed_create_is_removed() {
    let (store, _) = make_store().await;
    let (mut app, mut rx) = make_device(&store).await;
    drain(&mut rx);

    store.fail_next_requests(1);
    app.add_task("Buy milk", Priority::Medium).unwrap();
    assert_eq!(app.tasks().len(), 1);
    settle(&mut app).await;

    assert!(app.tasks().is_empty());
    assert!(has(&drain(&mut rx), Level::Error, "Error adding task"));
    let logs = store.task_logs().await;
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
}

// ===========================================================================
// Multi-device sync
// ===========================================================================

#[tokio::test]
async fn changes_reach_the_other_device() {
    let (store, _) = make_store().await;
    let (mut laptop, mut laptop_rx) = make_device(&store).await;
    let (mut phone, mut phone_rx) = make_device(&store).await;
    drain(&mut laptop_rx);
    drain(&mut phone_rx);

    laptop.add_task("Buy milk", Priority::Medium).unwrap();
    settle(&mut laptop).await;
    settle(&mut phone).await;
    assert_eq!(texts(&phone), ["Buy milk"]);
    assert!(has(&drain(&mut phone_rx), Level::Info, "New task added"));

    let id = phone.tasks()[0].id.clone();
    phone.toggle_task(&id).unwrap();
    settle(&mut phone).await;
    settle(&mut laptop).await;
    assert!(laptop.tasks()[0].completed);
    assert_eq!(laptop.stats().completed, 1);

    laptop.delete_task(&id).unwrap();
    settle(&mut laptop).await;
    settle(&mut phone).await;
    assert!(phone.tasks().is_empty());
    assert!(has(&drain(&mut phone_rx), Level::Info, "Task removed"));
}

#[tokio::test]
async fn reorder_is_persisted_densely() {
    let (store, user) = make_store().await;
    let (mut app, _rx) = make_device(&store).await;
    for text in ["a", "b", "c"] {
        app.add_task(text, Priority::Medium).unwrap();
        settle(&mut app).await;
    }

    app.move_task(2, 0).unwrap();
    assert_eq!(texts(&app), ["c", "a", "b"]);
    settle(&mut app).await;

    let rows = store.load_tasks(&user).await.unwrap();
    let stored: Vec<(&str, i64)> = rows.iter().map(|t| (t.text.as_str(), t.position)).collect();
    assert_eq!(stored, [("c", 0), ("a", 1), ("b", 2)]);

    app.reload().await;
    assert_eq!(texts(&app), ["c", "a", "b"]);
    assert_eq!(
        store.task_logs().await.last().map(|l| l.action.clone()),
        Some("reorder".to_string())
    );
}

#[tokio::test]
async fn create_after_delete_keeps_positions_distinct() {
    let (store, user) = make_store().await;
    let (mut app, _rx) = make_device(&store).await;
    for text in ["a", "b", "c"] {
        app.add_task(text, Priority::Medium).unwrap();
        settle(&mut app).await;
    }

    let b = app.tasks()[1].id.clone();
    app.delete_task(&b).unwrap();
    settle(&mut app).await;
    app.add_task("d", Priority::Medium).unwrap();
    settle(&mut app).await;

    let local = layout(app.tasks());
    let stored = layout(&store.load_tasks(&user).await.unwrap());
    assert_eq!(texts(&app), ["a", "c", "d"]);
    assert_strictly_increasing(&local);
    assert_eq!(local, stored);
}

#[tokio::test]
async fn refused_delete_restored_after_a_move_is_repaired() {
    let (store, user) = make_store().await;
    let mut rows = [
        aged_task(&user, "old", 30),
        aged_task(&user, "x", 2),
        aged_task(&user, "y", 1),
    ];
    for (position, row) in (0..).zip(rows.iter_mut()) {
        row.position = position;
    }
    store.seed(rows).await;
    let (mut app, mut rx) = make_device(&store).await;
    drain(&mut rx);

    // The store refuses the delete; by then "y" has been moved into slot 0.
    app.delete_task(&TaskId::new("old")).unwrap();
    app.move_task(1, 0).unwrap();
    assert_eq!(texts(&app), ["y", "x"]);
    settle(&mut app).await;

    assert!(has(
        &drain(&mut rx),
        Level::Error,
        "Tasks older than 24 hours cannot be deleted"
    ));
    let local = layout(app.tasks());
    let stored = layout(&store.load_tasks(&user).await.unwrap());
    assert_eq!(texts(&app), ["old", "y", "x"]);
    assert_strictly_increasing(&local);
    assert_eq!(local, stored);
    assert_eq!(app.pending_count(), 0);
}

// ===========================================================================
// Policy and ownership
// ===========================================================================

#[tokio::test]
async fn old_task_delete_is_reverted_with_reason() {
    let (store, user) = make_store().await;
    store.seed([aged_task(&user, "ancient", 30)]).await;
    let (mut app, mut rx) = make_device(&store).await;
    assert_eq!(texts(&app), ["ancient"]);
    drain(&mut rx);

    app.delete_task(&TaskId::new("ancient")).unwrap();
    assert!(app.tasks().is_empty());
    settle(&mut app).await;

    assert_eq!(texts(&app), ["ancient"]);
    assert!(has(
        &drain(&mut rx),
        Level::Error,
        "Tasks older than 24 hours cannot be deleted"
    ));
}

#[tokio::test]
async fn foreign_rows_are_hidden_and_refused() {
    let (store, _) = make_store().await;
    let (mut app, mut rx) = make_device(&store).await;
    drain(&mut rx);

    let stranger = UserId::new("someone-else");
    store
        .inject(ChangeEvent::Insert(aged_task(&stranger, "theirs", 1)))
        .await;
    settle(&mut app).await;
    assert!(app.tasks().is_empty());

    assert!(app.toggle_task(&TaskId::new("theirs")).is_none());
    assert!(has(&drain(&mut rx), Level::Error, "Access denied"));
    settle(&mut app).await;

    let logs = store.task_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "toggle");
    assert!(!logs[0].success);
}

// ===========================================================================
// Session teardown
// ===========================================================================

#[tokio::test]
async fn sign_out_tears_down_and_discards_late_results() {
    let (store, user) = make_store().await;
    let (mut app, mut rx) = make_device(&store).await;
    assert_eq!(store.subscriber_count().await, 1);

    app.add_task("in flight", Priority::Medium).unwrap();
    app.sign_out().await;

    assert!(app.tasks().is_empty());
    assert_eq!(app.subscription_channel(), None);
    assert_eq!(store.subscriber_count().await, 0);
    assert!(has(&drain(&mut rx), Level::Success, "Signed out successfully"));

    settle(&mut app).await;
    assert!(app.tasks().is_empty());
    assert!(drain(&mut rx).is_empty());

    let sign_out = store
        .auth_logs()
        .await
        .into_iter()
        .find(|l| l.action == "sign_out")
        .unwrap();
    assert_eq!(sign_out.user_id, Some(user));

    app.sign_in(EMAIL, PASSWORD).await;
    assert_eq!(texts(&app), ["in flight"]);
}
