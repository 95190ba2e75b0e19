//! Property-based tests for the task reconciler.
//!
//! Uses proptest to verify:
//! 1. Any sequence of moves, in any view, leaves positions strictly increasing,
//!    and so does any mix of creates, deletes, moves, remote deletes and
//!    failed requests once every request has settled.
//! 2. Delivering every change event twice gives the same list as delivering it once.
//! 3. Rows owned by another identity never become visible.
//! 4. Switching filters never changes the stored list.

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, TimeDelta, Utc};
use collabtodo::tasks::{
    Confirmation, Dispatch, Filter, LocalOp, Reconciler, RemoteRequest, Rollback,
};
use collabtodo_proto::change::ChangeEvent;
use collabtodo_proto::task::{Priority, Task, TaskId, UserId};
use proptest::prelude::*;

const ME: &str = "me";

fn base_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap_or_default()
}

// --- Strategies ---

fn arb_filter() -> impl Strategy<Value = Filter> {
    prop_oneof![Just(Filter::All), Just(Filter::Active), Just(Filter::Completed)]
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Low), Just(Priority::Medium), Just(Priority::High)]
}

/// A task from a small id pool so events collide often.
fn arb_task(owners: &'static [&'static str]) -> impl Strategy<Value = Task> {
    (
        0..6u8,
        prop::sample::select(owners),
        "[a-z]{1,12}",
        any::<bool>(),
        arb_priority(),
        0..8i64,
        0..3600i64,
        prop::option::of(0..3600i64),
    )
        .prop_map(
            |(id, owner, text, completed, priority, position, created, updated)| Task {
                id: TaskId::new(format!("t-{id}")),
                user_id: UserId::new(owner),
                text,
                completed,
                priority,
                position,
                created_at: base_time() + TimeDelta::seconds(created),
                updated_at: updated.map(|s| base_time() + TimeDelta::seconds(3600 + s)),
            },
        )
}

fn arb_event(owners: &'static [&'static str]) -> impl Strategy<Value = ChangeEvent> {
    prop_oneof![
        arb_task(owners).prop_map(ChangeEvent::Insert),
        arb_task(owners).prop_map(ChangeEvent::Update),
        (0..6u8).prop_map(|id| ChangeEvent::Delete(TaskId::new(format!("t-{id}")))),
    ]
}

/// A list of `len` confirmed tasks with dense positions.
fn arb_list() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(any::<bool>(), 0..12).prop_map(|flags| {
        flags
            .into_iter()
            .enumerate()
            .map(|(i, completed)| Task {
                id: TaskId::new(format!("row-{i}")),
                user_id: UserId::new(ME),
                text: format!("task {i}"),
                completed,
                priority: Priority::Medium,
                position: i64::try_from(i).unwrap_or(i64::MAX),
                created_at: base_time(),
                updated_at: None,
            })
            .collect()
    })
}

/// One step of a session: a user action, a remote delete, or a store
/// response for one of the requests still in flight.
#[derive(Debug, Clone)]
enum Step {
    Create(Priority),
    Delete(usize),
    Reorder(Filter, usize, usize),
    RemoteDelete(usize),
    Resolve { pick: usize, ok: bool },
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        arb_priority().prop_map(Step::Create),
        any::<usize>().prop_map(Step::Delete),
        (arb_filter(), any::<usize>(), any::<usize>())
            .prop_map(|(filter, from, to)| Step::Reorder(filter, from, to)),
        any::<usize>().prop_map(Step::RemoteDelete),
        (any::<usize>(), any::<bool>()).prop_map(|(pick, ok)| Step::Resolve { pick, ok }),
    ]
}

/// A saved row picked by index, if any.
fn saved_id(rec: &Reconciler, pick: usize) -> Option<TaskId> {
    let saved: Vec<&Task> = rec
        .tasks()
        .iter()
        .filter(|t| !t.id.is_provisional())
        .collect();
    if saved.is_empty() {
        return None;
    }
    Some(saved[pick % saved.len()].id.clone())
}

/// What the store would answer for a successful request.
fn response_for(dispatch: &Dispatch, next_id: &mut u32) -> Confirmation {
    match &dispatch.request {
        RemoteRequest::Insert(new) => {
            *next_id += 1;
            Confirmation::Created(Task {
                id: TaskId::new(format!("srv-{next_id}")),
                user_id: new.user_id.clone(),
                text: new.text.clone(),
                completed: new.completed,
                priority: new.priority,
                position: new.position,
                created_at: new.created_at,
                updated_at: None,
            })
        }
        RemoteRequest::Delete { .. } => Confirmation::Deleted,
        RemoteRequest::Update { .. } | RemoteRequest::UpsertPositions(_) => {
            Confirmation::Reordered
        }
    }
}

/// Stands in for a full reload: the saved rows become authoritative.
fn reload(rec: &mut Reconciler) {
    let saved = rec
        .tasks()
        .iter()
        .filter(|t| !t.id.is_provisional())
        .cloned()
        .collect();
    rec.replace_all(saved);
}

fn assert_strict_order(tasks: &[Task]) -> Result<(), TestCaseError> {
    for pair in tasks.windows(2) {
        prop_assert!(
            pair[0].position < pair[1].position,
            "positions not strictly increasing: {} then {}",
            pair[0].position,
            pair[1].position
        );
    }
    Ok(())
}

// --- Properties ---

proptest! {
    /// Moves in any view, confirmed by the store, keep a strict total order.
    #[test]
    fn reorders_keep_total_order(
        rows in arb_list(),
        moves in prop::collection::vec((arb_filter(), any::<usize>(), any::<usize>()), 0..20),
    ) {
        let mut rec = Reconciler::new(UserId::new(ME));
        rec.replace_all(rows.clone());

        for (filter, from, to) in moves {
            rec.set_filter(filter);
            let visible = rec.visible().len();
            if visible == 0 {
                continue;
            }
            let op = LocalOp::Reorder { from: from % visible, to: to % visible };
            if let Some(dispatch) = rec.apply_local(op).unwrap() {
                rec.confirm(dispatch.handle, Confirmation::Reordered);
            }
            assert_strict_order(rec.tasks())?;
            prop_assert_eq!(rec.tasks().len(), rows.len());
        }
        prop_assert_eq!(rec.pending_count(), 0);
    }

    /// Mixed sessions end in a strict order once requests settle and any
    /// tie left behind has been repaired.
    #[test]
    fn mixed_sessions_settle_to_total_order(
        rows in arb_list(),
        steps in prop::collection::vec(arb_step(), 0..40),
    ) {
        let mut rec = Reconciler::new(UserId::new(ME));
        rec.replace_all(rows);
        let mut in_flight: Vec<Dispatch> = Vec::new();
        let mut next_id = 0;

        for step in steps {
            match step {
                Step::Create(priority) => {
                    let op = LocalOp::Create { text: "new".into(), priority };
                    if let Ok(Some(dispatch)) = rec.apply_local(op) {
                        in_flight.push(dispatch);
                    }
                }
                Step::Delete(pick) => {
                    if let Some(id) = saved_id(&rec, pick)
                        && let Ok(Some(dispatch)) = rec.apply_local(LocalOp::Delete { id })
                    {
                        in_flight.push(dispatch);
                    }
                }
                Step::Reorder(filter, from, to) => {
                    rec.set_filter(filter);
                    let visible = rec.visible().len();
                    if visible == 0 {
                        continue;
                    }
                    let op = LocalOp::Reorder { from: from % visible, to: to % visible };
                    // Refused while a create is unconfirmed.
                    if let Ok(Some(dispatch)) = rec.apply_local(op) {
                        in_flight.push(dispatch);
                    }
                }
                Step::RemoteDelete(pick) => {
                    if let Some(id) = saved_id(&rec, pick) {
                        rec.on_remote_event(ChangeEvent::Delete(id));
                    }
                }
                Step::Resolve { pick, ok } => {
                    if in_flight.is_empty() {
                        continue;
                    }
                    let dispatch = in_flight.remove(pick % in_flight.len());
                    if ok {
                        let response = response_for(&dispatch, &mut next_id);
                        rec.confirm(dispatch.handle, response);
                    } else if rec.rollback(dispatch.handle) == Rollback::ReloadRequired {
                        reload(&mut rec);
                    }
                }
            }
        }

        for dispatch in in_flight.drain(..) {
            let response = response_for(&dispatch, &mut next_id);
            rec.confirm(dispatch.handle, response);
        }
        prop_assert_eq!(rec.pending_count(), 0);
        prop_assert!(rec.tasks().iter().all(|t| !t.id.is_provisional()));
        if let Some(repair) = rec.repair_positions() {
            rec.confirm(repair.handle, Confirmation::Reordered);
        }

        prop_assert!(!rec.has_position_conflicts());
        assert_strict_order(rec.tasks())?;
        let mut ids: Vec<_> = rec.tasks().iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), rec.tasks().len());
    }

    /// Delivering each event twice is the same as delivering it once.
    #[test]
    fn remote_events_are_idempotent(
        events in prop::collection::vec(arb_event(&[ME]), 0..30),
    ) {
        let mut once = Reconciler::new(UserId::new(ME));
        let mut twice = Reconciler::new(UserId::new(ME));

        for event in events {
            once.on_remote_event(event.clone());
            twice.on_remote_event(event.clone());
            twice.on_remote_event(event);
        }
        prop_assert_eq!(once.tasks(), twice.tasks());
        prop_assert_eq!(once.stats(), twice.stats());
    }

    /// No event for another identity ever shows up in the list.
    #[test]
    fn foreign_rows_never_visible(
        events in prop::collection::vec(arb_event(&[ME, "other"]), 0..30),
    ) {
        let mut rec = Reconciler::new(UserId::new(ME));
        for event in events {
            rec.on_remote_event(event);
            prop_assert!(rec.tasks().iter().all(|t| t.user_id.as_str() == ME));
        }
        let mut ids: Vec<_> = rec.tasks().iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), rec.tasks().len());
    }

    /// Filters project the list without changing it.
    #[test]
    fn filters_are_pure(
        rows in arb_list(),
        filters in prop::collection::vec(arb_filter(), 1..10),
    ) {
        let mut rec = Reconciler::new(UserId::new(ME));
        rec.replace_all(rows);
        let before = rec.tasks().to_vec();

        for filter in filters {
            rec.set_filter(filter);
            prop_assert!(rec.visible().iter().all(|t| filter.matches(t)));
            prop_assert_eq!(rec.tasks(), before.as_slice());
        }
        rec.set_filter(Filter::All);
        prop_assert_eq!(rec.visible().len(), before.len());
    }
}
