//! Optimistic local task list reconciled against store change events.
//!
//! The [`Reconciler`] owns the in-memory list for one signed-in identity.
//! Local mutations are applied immediately and recorded with an undo
//! record under a [`PendingOp`] handle; the caller issues the returned
//! [`RemoteRequest`] and later reports the outcome through
//! [`Reconciler::confirm`] or [`Reconciler::rollback`]. Change events from
//! the store are authoritative and are merged by [`Reconciler::on_remote_event`].
//!
//! Invariants maintained after every call:
//! - the list is sorted by `(position, created_at, id)`;
//! - no two entries share an id;
//! - every entry is owned by the reconciler's identity.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use collabtodo_proto::change::ChangeEvent;
use collabtodo_proto::task::{
    MAX_TASK_TEXT_LENGTH, NewTask, PositionUpdate, Priority, Task, TaskId, TaskPatch, UserId,
};

use super::ordering::{move_in_view, next_position, reindex};
use super::{Filter, TaskError, TaskStats};

/// A mutation requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOp {
    /// Add a task at the end of the list.
    Create {
        /// Task text; trimmed before validation.
        text: String,
        /// Task priority.
        priority: Priority,
    },
    /// Flip a task's completion flag.
    Toggle {
        /// Target task.
        id: TaskId,
    },
    /// Replace a task's text.
    Edit {
        /// Target task.
        id: TaskId,
        /// New text; trimmed before validation.
        text: String,
    },
    /// Remove a task.
    Delete {
        /// Target task.
        id: TaskId,
    },
    /// Move a task within the current view.
    Reorder {
        /// Visible index of the task to move.
        from: usize,
        /// Visible index to move it to, measured after removal.
        to: usize,
    },
}

impl LocalOp {
    /// Action name recorded in the task audit log.
    #[must_use]
    pub const fn audit_action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Toggle { .. } => "toggle",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::Reorder { .. } => "reorder",
        }
    }

    /// The task this op targets, if it names one.
    #[must_use]
    pub const fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Toggle { id } | Self::Edit { id, .. } | Self::Delete { id } => Some(id),
            Self::Create { .. } | Self::Reorder { .. } => None,
        }
    }
}

/// Handle identifying one in-flight optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingOp(u64);

impl std::fmt::Display for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// The store call that persists an optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    /// Insert a new row.
    Insert(NewTask),
    /// Patch an existing row.
    Update {
        /// Target row.
        id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Delete a row.
    Delete {
        /// Target row.
        id: TaskId,
    },
    /// Write new positions for several rows.
    UpsertPositions(Vec<PositionUpdate>),
}

/// An optimistic mutation ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Handle to report the outcome against.
    pub handle: PendingOp,
    /// What to send to the store.
    pub request: RemoteRequest,
}

/// Successful store response for a [`RemoteRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The inserted row, carrying the server-assigned id.
    Created(Task),
    /// The row after the update.
    Updated(Task),
    /// The row was deleted.
    Deleted,
    /// Positions were written.
    Reordered,
}

/// Outcome of [`Reconciler::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// The optimistic change was undone precisely.
    Reverted,
    /// The change could not be undone safely; reload from the store.
    ReloadRequired,
    /// No pending op had this handle (already resolved or cleared by a reload).
    Unknown,
}

#[derive(Debug, Clone)]
enum Undo {
    RemoveProvisional { id: TaskId },
    Restore { before: Task },
    Reinsert { task: Task },
    Positions { before: Vec<(TaskId, i64)> },
}

#[derive(Debug, Clone)]
struct Pending {
    undo: Undo,
    touched: HashSet<TaskId>,
    remotely_changed: bool,
    adopted: Option<TaskId>,
}

/// In-memory task list for one identity with optimistic reconciliation.
#[derive(Debug)]
pub struct Reconciler {
    identity: UserId,
    max_text_len: usize,
    tasks: Vec<Task>,
    filter: Filter,
    stats: TaskStats,
    pending: BTreeMap<PendingOp, Pending>,
    next_handle: u64,
    /// Last server stamp seen per row, for last-write-wins.
    stamps: HashMap<TaskId, DateTime<Utc>>,
    /// Rows deleted by the store; late events must not resurrect them.
    tombstones: HashSet<TaskId>,
    /// Rows seen belonging to other identities.
    foreign: HashSet<TaskId>,
    conflicts: bool,
}

impl Reconciler {
    /// Creates an empty list for `identity` with the default text limit.
    #[must_use]
    pub fn new(identity: UserId) -> Self {
        Self::with_max_text_len(identity, MAX_TASK_TEXT_LENGTH)
    }

    /// Creates an empty list with a custom text length limit.
    #[must_use]
    pub fn with_max_text_len(identity: UserId, max_text_len: usize) -> Self {
        Self {
            identity,
            max_text_len,
            tasks: Vec::new(),
            filter: Filter::All,
            stats: TaskStats::default(),
            pending: BTreeMap::new(),
            next_handle: 0,
            stamps: HashMap::new(),
            tombstones: HashSet::new(),
            foreign: HashSet::new(),
            conflicts: false,
        }
    }

    /// The identity whose tasks this list holds.
    #[must_use]
    pub const fn identity(&self) -> &UserId {
        &self.identity
    }

    /// All tasks in order, regardless of filter.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    /// Tasks shown under the current filter. Never mutates the list.
    #[must_use]
    pub fn visible(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| self.filter.matches(t))
            .collect()
    }

    /// The active filter.
    #[must_use]
    pub const fn filter(&self) -> Filter {
        self.filter
    }

    /// Changes the active filter.
    pub const fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    /// Counts over the full list.
    #[must_use]
    pub const fn stats(&self) -> TaskStats {
        self.stats
    }

    /// Number of optimistic mutations awaiting a store response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if two rows share a position.
    ///
    /// Ties come from the store (concurrent creates on two devices) or from
    /// a rolled-back delete whose old slot was taken by a later move. The
    /// list is still totally ordered (ties are broken by creation time and
    /// id), but the persisted positions should be repaired with
    /// [`repair_positions`](Self::repair_positions).
    #[must_use]
    pub const fn has_position_conflicts(&self) -> bool {
        self.conflicts
    }

    /// Applies a local mutation optimistically.
    ///
    /// Returns the request to send, or `None` when the op changes nothing
    /// (moving a task onto its own index).
    ///
    /// # Errors
    ///
    /// - [`TaskError::TextEmpty`] / [`TaskError::TextTooLong`] for bad text.
    /// - [`TaskError::TaskNotFound`] if the target is not in the list.
    /// - [`TaskError::AccessDenied`] if the target belongs to someone else.
    /// - [`TaskError::Unconfirmed`] if the target has not been saved yet.
    /// - [`TaskError::Ordering`] for out-of-range reorder indices.
    ///
    /// On error the list is unchanged.
    pub fn apply_local(&mut self, op: LocalOp) -> Result<Option<Dispatch>, TaskError> {
        let now = Utc::now();
        let dispatch = match op {
            LocalOp::Create { text, priority } => Some(self.local_create(&text, priority, now)?),
            LocalOp::Toggle { id } => {
                let before = self.owned(&id)?.clone();
                let patch = TaskPatch {
                    completed: Some(!before.completed),
                    updated_at: now,
                    ..TaskPatch::default()
                };
                Some(self.local_patch(before, patch))
            }
            LocalOp::Edit { id, text } => {
                let text = self.validate_text(&text)?;
                let before = self.owned(&id)?.clone();
                let patch = TaskPatch {
                    text: Some(text),
                    updated_at: now,
                    ..TaskPatch::default()
                };
                Some(self.local_patch(before, patch))
            }
            LocalOp::Delete { id } => {
                let task = self.owned(&id)?.clone();
                self.tasks.retain(|t| t.id != id);
                Some(self.register(
                    Undo::Reinsert { task },
                    [id.clone()].into(),
                    RemoteRequest::Delete { id },
                ))
            }
            LocalOp::Reorder { from, to } => self.local_reorder(from, to)?,
        };
        self.refresh();
        Ok(dispatch)
    }

    fn local_create(
        &mut self,
        text: &str,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, TaskError> {
        let text = self.validate_text(text)?;
        let position = next_position(&self.tasks);
        let id = TaskId::provisional();
        self.tasks.push(Task {
            id: id.clone(),
            user_id: self.identity.clone(),
            text: text.clone(),
            completed: false,
            priority,
            position,
            created_at: now,
            updated_at: None,
        });
        let new_task = NewTask {
            user_id: self.identity.clone(),
            text,
            completed: false,
            priority,
            position,
            created_at: now,
        };
        Ok(self.register(
            Undo::RemoveProvisional { id: id.clone() },
            [id].into(),
            RemoteRequest::Insert(new_task),
        ))
    }

    fn local_patch(&mut self, before: Task, patch: TaskPatch) -> Dispatch {
        let id = before.id.clone();
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            patch.apply_to(task);
        }
        self.register(
            Undo::Restore { before },
            [id.clone()].into(),
            RemoteRequest::Update { id, patch },
        )
    }

    fn local_reorder(&mut self, from: usize, to: usize) -> Result<Option<Dispatch>, TaskError> {
        if let Some(task) = self.tasks.iter().find(|t| t.id.is_provisional()) {
            return Err(TaskError::Unconfirmed(task.id.to_string()));
        }
        if self.tasks.iter().any(|t| t.user_id != self.identity) {
            return Err(TaskError::AccessDenied);
        }
        let Some(reorder) = move_in_view(&self.tasks, self.filter, from, to)? else {
            return Ok(None);
        };
        if reorder.updates.is_empty() {
            return Ok(None);
        }

        let before = self
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.position))
            .collect();
        let touched = reorder.updates.iter().map(|u| u.id.clone()).collect();
        self.tasks = reorder.tasks;
        Ok(Some(self.register(
            Undo::Positions { before },
            touched,
            RemoteRequest::UpsertPositions(reorder.updates),
        )))
    }

    /// Produces a dense re-index of the list if stored positions collide.
    ///
    /// Applied optimistically like any reorder; returns `None` when the
    /// positions are already a strict order.
    pub fn repair_positions(&mut self) -> Option<Dispatch> {
        if !self.conflicts || self.tasks.iter().any(|t| t.id.is_provisional()) {
            return None;
        }
        let before = self
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.position))
            .collect();
        let updates = reindex(&mut self.tasks);
        self.refresh();
        if updates.is_empty() {
            return None;
        }
        let touched = updates.iter().map(|u| u.id.clone()).collect();
        Some(self.register(
            Undo::Positions { before },
            touched,
            RemoteRequest::UpsertPositions(updates),
        ))
    }

    /// Merges one change event from the store.
    ///
    /// Idempotent: applying the same event twice leaves the same state as
    /// applying it once. Returns `true` if the list changed.
    pub fn on_remote_event(&mut self, event: ChangeEvent) -> bool {
        let changed = match event {
            ChangeEvent::Insert(task) => self.remote_insert(task),
            ChangeEvent::Update(task) => self.remote_update(task),
            ChangeEvent::Delete(id) => self.remote_delete(&id),
        };
        self.refresh();
        changed
    }

    fn accepts(&mut self, task: &Task) -> bool {
        if task.user_id != self.identity {
            tracing::debug!(task_id = %task.id, "ignoring change for another identity");
            self.foreign.insert(task.id.clone());
            return false;
        }
        if self.tombstones.contains(&task.id) {
            tracing::debug!(task_id = %task.id, "ignoring change for deleted task");
            return false;
        }
        true
    }

    fn remote_insert(&mut self, task: Task) -> bool {
        if !self.accepts(&task) {
            return false;
        }
        if self.get(&task.id).is_some() {
            return self.remote_update(task);
        }
        if let Some(handle) = self.matching_create(&task) {
            self.adopt(handle, task);
            return true;
        }
        self.stamps.insert(task.id.clone(), task.stamp());
        self.tasks.push(task);
        true
    }

    fn remote_update(&mut self, task: Task) -> bool {
        if !self.accepts(&task) {
            return false;
        }
        if let Some(last) = self.stamps.get(&task.id)
            && task.stamp() < *last
        {
            tracing::debug!(task_id = %task.id, "dropping stale update");
            return false;
        }
        let Some(index) = self.tasks.iter().position(|t| t.id == task.id) else {
            tracing::debug!(task_id = %task.id, "update for task not in list");
            return false;
        };
        let changed = self.tasks[index] != task;
        self.stamps.insert(task.id.clone(), task.stamp());
        self.mark_remotely_changed(&task.id, changed);
        if changed {
            self.tasks[index] = task;
        }
        changed
    }

    fn remote_delete(&mut self, id: &TaskId) -> bool {
        self.tombstones.insert(id.clone());
        self.stamps.remove(id);
        self.mark_remotely_changed(id, true);
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != *id);
        self.tasks.len() != before
    }

    fn mark_remotely_changed(&mut self, id: &TaskId, changed: bool) {
        if !changed {
            return;
        }
        for pending in self.pending.values_mut() {
            if pending.touched.contains(id) {
                pending.remotely_changed = true;
            }
        }
    }

    /// Finds the oldest unconfirmed create whose provisional row matches a
    /// realtime insert that arrived before the insert response.
    fn matching_create(&self, task: &Task) -> Option<PendingOp> {
        self.pending.iter().find_map(|(handle, pending)| {
            let Undo::RemoveProvisional { id } = &pending.undo else {
                return None;
            };
            if pending.adopted.is_some() {
                return None;
            }
            let local = self.get(id)?;
            let same = local.user_id == task.user_id
                && local.text == task.text
                && local.priority == task.priority
                && local.position == task.position;
            same.then_some(*handle)
        })
    }

    fn adopt(&mut self, handle: PendingOp, task: Task) {
        let Some(pending) = self.pending.get_mut(&handle) else {
            return;
        };
        let Undo::RemoveProvisional { id } = &pending.undo else {
            return;
        };
        let provisional = id.clone();
        pending.adopted = Some(task.id.clone());
        pending.touched.insert(task.id.clone());
        self.stamps.insert(task.id.clone(), task.stamp());
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == provisional) {
            tracing::debug!(provisional = %provisional, task_id = %task.id, "adopted realtime insert");
            *slot = task;
        }
    }

    /// Records a successful store response.
    pub fn confirm(&mut self, handle: PendingOp, confirmation: Confirmation) {
        let Some(pending) = self.pending.remove(&handle) else {
            if let Confirmation::Created(task) = confirmation {
                self.remote_insert(task);
                self.refresh();
            }
            return;
        };

        match (confirmation, pending.undo) {
            (Confirmation::Created(server), Undo::RemoveProvisional { id }) => {
                if pending.adopted.is_none() {
                    self.settle_create(&id, server);
                }
            }
            (Confirmation::Updated(server), _) => {
                self.remote_update(server);
            }
            (Confirmation::Deleted, Undo::Reinsert { task }) => {
                self.tombstones.insert(task.id);
            }
            _ => {}
        }
        self.refresh();
    }

    fn settle_create(&mut self, provisional: &TaskId, server: Task) {
        let already_present = self.get(&server.id).is_some();
        if already_present || self.tombstones.contains(&server.id) {
            self.tasks.retain(|t| t.id != *provisional);
            return;
        }
        self.stamps.insert(server.id.clone(), server.stamp());
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == *provisional) {
            *slot = server;
        } else {
            self.tasks.push(server);
        }
    }

    /// Undoes the optimistic change behind a failed request.
    ///
    /// The revert is precise unless it is ambiguous: another pending op
    /// touches the same rows, or the store changed those rows since the
    /// optimistic write. Then [`Rollback::ReloadRequired`] is returned and
    /// the caller should fetch the full list and pass it to
    /// [`replace_all`](Self::replace_all).
    pub fn rollback(&mut self, handle: PendingOp) -> Rollback {
        let Some(pending) = self.pending.remove(&handle) else {
            return Rollback::Unknown;
        };

        let overlaps = self
            .pending
            .values()
            .any(|other| !other.touched.is_disjoint(&pending.touched));
        if pending.remotely_changed || overlaps {
            tracing::info!(op = %handle, "rollback ambiguous, reload required");
            return Rollback::ReloadRequired;
        }

        match pending.undo {
            Undo::RemoveProvisional { id } => {
                // An adopted create was seen on the realtime stream, so the
                // row exists even though the response failed.
                if pending.adopted.is_none() {
                    self.tasks.retain(|t| t.id != id);
                }
            }
            Undo::Restore { before } => {
                if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == before.id) {
                    *slot = before;
                }
            }
            Undo::Reinsert { task } => {
                if !self.tombstones.contains(&task.id) && self.get(&task.id).is_none() {
                    self.tasks.push(task);
                }
            }
            Undo::Positions { before } => {
                let before: HashMap<TaskId, i64> = before.into_iter().collect();
                for task in &mut self.tasks {
                    if let Some(position) = before.get(&task.id) {
                        task.position = *position;
                    }
                }
            }
        }
        self.refresh();
        Rollback::Reverted
    }

    /// Replaces the list with an authoritative load from the store.
    ///
    /// Rows for other identities are dropped, duplicate ids collapse to the
    /// first occurrence, and all pending ops and tombstones are cleared.
    /// Responses for ops cleared here are handled as unknown handles.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(tasks.len());
        for task in tasks {
            if task.user_id != self.identity {
                self.foreign.insert(task.id.clone());
                continue;
            }
            if seen.insert(task.id.clone()) {
                kept.push(task);
            }
        }
        self.stamps = kept.iter().map(|t| (t.id.clone(), t.stamp())).collect();
        self.tasks = kept;
        self.pending.clear();
        self.tombstones.clear();
        self.refresh();
    }

    fn register(
        &mut self,
        undo: Undo,
        touched: HashSet<TaskId>,
        request: RemoteRequest,
    ) -> Dispatch {
        let handle = PendingOp(self.next_handle);
        self.next_handle += 1;
        self.pending.insert(
            handle,
            Pending {
                undo,
                touched,
                remotely_changed: false,
                adopted: None,
            },
        );
        Dispatch { handle, request }
    }

    fn owned(&self, id: &TaskId) -> Result<&Task, TaskError> {
        if self.foreign.contains(id) {
            return Err(TaskError::AccessDenied);
        }
        let task = self
            .get(id)
            .ok_or_else(|| TaskError::TaskNotFound(id.to_string()))?;
        if task.user_id != self.identity {
            return Err(TaskError::AccessDenied);
        }
        if task.id.is_provisional() {
            return Err(TaskError::Unconfirmed(id.to_string()));
        }
        Ok(task)
    }

    fn validate_text(&self, text: &str) -> Result<String, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::TextEmpty);
        }
        if text.chars().count() > self.max_text_len {
            return Err(TaskError::TextTooLong {
                max: self.max_text_len,
            });
        }
        Ok(text.to_string())
    }

    fn refresh(&mut self) {
        self.tasks.sort_by(|a, b| {
            (a.position, a.created_at, &a.id).cmp(&(b.position, b.created_at, &b.id))
        });
        self.conflicts = self
            .tasks
            .windows(2)
            .any(|pair| pair[0].position == pair[1].position);
        self.stats = TaskStats::of(&self.tasks);
    }
}
