//! Position assignment for drag-and-drop moves and appends.
//!
//! Every move is followed by dense re-indexing: each task's `position`
//! becomes its index in the new order (0, 1, 2, ...). This keeps the order
//! total and collision-free at the cost of rewriting every shifted row.
//! Fractional positions would write a single row per move but drift and
//! need periodic rebalancing; dense indices were chosen for simplicity.
//! Only rows whose position actually changed are reported for persisting.

use collabtodo_proto::task::{PositionUpdate, Task};
use thiserror::Error;

use super::Filter;

/// Errors computing a move.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    /// A move referenced an index outside the visible list.
    #[error("index {index} out of range for {len} visible tasks")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of visible tasks.
        len: usize,
    },
}

/// Result of a move: the new full order and the rows to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reorder {
    /// Full (unfiltered) list in its new order, positions already dense.
    pub tasks: Vec<Task>,
    /// Rows whose position changed.
    pub updates: Vec<PositionUpdate>,
}

/// Position for a newly created task: the tail of the unfiltered list.
///
/// This is the list length while positions are dense. Deletes leave gaps,
/// so the result is never below one past the last position.
#[must_use]
pub fn next_position(tasks: &[Task]) -> i64 {
    let after_last = tasks
        .iter()
        .map(|t| t.position.saturating_add(1))
        .max()
        .unwrap_or(0);
    to_position(tasks.len()).max(after_last)
}

/// Moves the task at `from` to `to` in the unfiltered list.
///
/// # Errors
///
/// Returns [`OrderingError::IndexOutOfRange`] if either index is past the
/// end of the list.
pub fn move_task(tasks: &[Task], from: usize, to: usize) -> Result<Option<Reorder>, OrderingError> {
    move_in_view(tasks, Filter::All, from, to)
}

/// Moves a task within a filtered view.
///
/// `from` and `to` are indices into the visible list; `to` is measured
/// after the moved task has been removed. Hidden tasks keep their slots in
/// the full list and only the visible slots are permuted, so switching the
/// filter back shows the hidden tasks exactly where they were.
///
/// Returns `Ok(None)` when `from == to`: nothing moves and nothing needs
/// writing.
///
/// # Errors
///
/// Returns [`OrderingError::IndexOutOfRange`] if either index is past the
/// end of the visible list.
pub fn move_in_view(
    tasks: &[Task],
    filter: Filter,
    from: usize,
    to: usize,
) -> Result<Option<Reorder>, OrderingError> {
    let slots: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| filter.matches(t))
        .map(|(i, _)| i)
        .collect();

    let len = slots.len();
    for index in [from, to] {
        if index >= len {
            return Err(OrderingError::IndexOutOfRange { index, len });
        }
    }
    if from == to {
        return Ok(None);
    }

    let mut permuted = slots.clone();
    let moved = permuted.remove(from);
    permuted.insert(to, moved);

    let mut order = tasks.to_vec();
    for (&slot, &source) in slots.iter().zip(&permuted) {
        order[slot] = tasks[source].clone();
    }

    let updates = reindex(&mut order);
    Ok(Some(Reorder {
        tasks: order,
        updates,
    }))
}

/// Assigns `position = index` to every task, returning the changed rows.
pub fn reindex(tasks: &mut [Task]) -> Vec<PositionUpdate> {
    let mut updates = Vec::new();
    for (index, task) in tasks.iter_mut().enumerate() {
        let position = to_position(index);
        if task.position != position {
            task.position = position;
            updates.push(PositionUpdate {
                id: task.id.clone(),
                position,
            });
        }
    }
    updates
}

fn to_position(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use collabtodo_proto::task::{Priority, TaskId, UserId};

    use super::*;

    fn make_tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task {
                id: TaskId::new(format!("old{i}")),
                user_id: UserId::new("alice"),
                text: format!("task {i}"),
                completed: false,
                priority: Priority::Medium,
                position: to_position(i),
                created_at: Utc::now(),
                updated_at: None,
            })
            .collect()
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    fn positions(tasks: &[Task]) -> Vec<i64> {
        tasks.iter().map(|t| t.position).collect()
    }

    #[test]
    fn move_last_to_front() {
        let tasks = make_tasks(5);
        let reorder = move_task(&tasks, 4, 0).unwrap().unwrap();
        assert_eq!(ids(&reorder.tasks), ["old4", "old0", "old1", "old2", "old3"]);
        assert_eq!(positions(&reorder.tasks), [0, 1, 2, 3, 4]);
        assert_eq!(reorder.updates.len(), 5);
    }

    #[test]
    fn move_fourth_to_front_leaves_tail_untouched() {
        let tasks = make_tasks(5);
        let reorder = move_task(&tasks, 3, 0).unwrap().unwrap();
        assert_eq!(ids(&reorder.tasks), ["old3", "old0", "old1", "old2", "old4"]);
        assert_eq!(positions(&reorder.tasks), [0, 1, 2, 3, 4]);
        // old4 keeps position 4, so it is not rewritten.
        assert_eq!(reorder.updates.len(), 4);
        assert!(reorder.updates.iter().all(|u| u.id.as_str() != "old4"));
    }

    #[test]
    fn move_down_uses_post_removal_index() {
        let tasks = make_tasks(4);
        let reorder = move_task(&tasks, 0, 2).unwrap().unwrap();
        assert_eq!(ids(&reorder.tasks), ["old1", "old2", "old0", "old3"]);
    }

    #[test]
    fn adjacent_swap_writes_two_rows() {
        let tasks = make_tasks(6);
        let reorder = move_task(&tasks, 2, 3).unwrap().unwrap();
        assert_eq!(reorder.updates.len(), 2);
    }

    #[test]
    fn moving_to_same_index_is_noop() {
        let tasks = make_tasks(3);
        assert_eq!(move_task(&tasks, 1, 1).unwrap(), None);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let tasks = make_tasks(3);
        assert_eq!(
            move_task(&tasks, 3, 0).unwrap_err(),
            OrderingError::IndexOutOfRange { index: 3, len: 3 }
        );
        assert_eq!(
            move_task(&tasks, 0, 7).unwrap_err(),
            OrderingError::IndexOutOfRange { index: 7, len: 3 }
        );
    }

    #[test]
    fn filtered_move_keeps_hidden_slots() {
        let mut tasks = make_tasks(5);
        // old1 and old3 are completed; the active view is [old0, old2, old4].
        tasks[1].completed = true;
        tasks[3].completed = true;

        let reorder = move_in_view(&tasks, Filter::Active, 2, 0).unwrap().unwrap();
        assert_eq!(ids(&reorder.tasks), ["old4", "old1", "old0", "old3", "old2"]);
        assert_eq!(positions(&reorder.tasks), [0, 1, 2, 3, 4]);
        // Hidden tasks did not move, so they are not rewritten.
        assert!(
            reorder
                .updates
                .iter()
                .all(|u| u.id.as_str() != "old1" && u.id.as_str() != "old3")
        );
    }

    #[test]
    fn filtered_move_checks_visible_length() {
        let mut tasks = make_tasks(4);
        tasks[0].completed = true;
        assert_eq!(
            move_in_view(&tasks, Filter::Completed, 0, 1).unwrap_err(),
            OrderingError::IndexOutOfRange { index: 1, len: 1 }
        );
    }

    #[test]
    fn next_position_on_dense_list_is_length() {
        assert_eq!(next_position(&[]), 0);
        assert_eq!(next_position(&make_tasks(3)), 3);
    }

    #[test]
    fn next_position_skips_past_gaps() {
        let mut tasks = make_tasks(3);
        tasks.remove(1);
        // old0 at 0, old2 at 2: the length would collide with the tail.
        assert_eq!(next_position(&tasks), 3);
    }

    #[test]
    fn reindex_repairs_ties_and_gaps() {
        let mut tasks = make_tasks(4);
        tasks[0].position = 0;
        tasks[1].position = 0;
        tasks[2].position = 7;
        tasks[3].position = 9;
        let updates = reindex(&mut tasks);
        assert_eq!(positions(&tasks), [0, 1, 2, 3]);
        assert_eq!(updates.len(), 3);
    }
}
