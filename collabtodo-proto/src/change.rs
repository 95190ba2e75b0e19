//! Realtime change events emitted by the store for the `tasks` table.
//!
//! The store delivers `{ eventType, new, old }` payloads. [`ChangeEvent`]
//! is the typed form the reconciler consumes; [`RawChange`] is the payload
//! as it appears on the wire.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};

/// A typed row change for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A row was inserted.
    Insert(Task),
    /// A row was updated; carries the full new row.
    Update(Task),
    /// A row was deleted.
    Delete(TaskId),
}

impl ChangeEvent {
    /// The id of the row the event concerns.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Insert(task) | Self::Update(task) => &task.id,
            Self::Delete(id) => id,
        }
    }
}

/// Event type tag used by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

/// Old-row payload of a delete; the store sends at least the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldRow {
    /// Primary key of the deleted row.
    pub id: TaskId,
}

/// A change payload exactly as the store sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    /// Kind of change.
    pub event_type: EventType,
    /// New row for inserts and updates.
    #[serde(default)]
    pub new: Option<Task>,
    /// Old row (key only) for deletes.
    #[serde(default)]
    pub old: Option<OldRow>,
}

/// Errors converting a [`RawChange`] into a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChangeError {
    /// Insert or update arrived without a new row.
    #[error("{0:?} event without a new row")]
    MissingNew(EventType),
    /// Delete arrived without the old row key.
    #[error("delete event without an old row")]
    MissingOld,
    /// The payload was not valid JSON for a change.
    #[error("malformed change payload: {0}")]
    Malformed(String),
}

impl TryFrom<RawChange> for ChangeEvent {
    type Error = ChangeError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        match raw.event_type {
            EventType::Insert => raw
                .new
                .map(Self::Insert)
                .ok_or(ChangeError::MissingNew(EventType::Insert)),
            EventType::Update => raw
                .new
                .map(Self::Update)
                .ok_or(ChangeError::MissingNew(EventType::Update)),
            EventType::Delete => raw
                .old
                .map(|old| Self::Delete(old.id))
                .ok_or(ChangeError::MissingOld),
        }
    }
}

impl From<ChangeEvent> for RawChange {
    fn from(event: ChangeEvent) -> Self {
        match event {
            ChangeEvent::Insert(task) => Self {
                event_type: EventType::Insert,
                new: Some(task),
                old: None,
            },
            ChangeEvent::Update(task) => Self {
                event_type: EventType::Update,
                new: Some(task),
                old: None,
            },
            ChangeEvent::Delete(id) => Self {
                event_type: EventType::Delete,
                new: None,
                old: Some(OldRow { id }),
            },
        }
    }
}

/// Decodes a JSON change payload into a typed event.
///
/// # Errors
///
/// Returns [`ChangeError`] if the JSON is malformed or the payload lacks
/// the row required by its event type.
pub fn decode(json: &str) -> Result<ChangeEvent, ChangeError> {
    let raw: RawChange =
        serde_json::from_str(json).map_err(|e| ChangeError::Malformed(e.to_string()))?;
    ChangeEvent::try_from(raw)
}

/// Encodes a typed event into the store's JSON payload form.
///
/// # Errors
///
/// Returns [`ChangeError::Malformed`] if serialization fails.
pub fn encode(event: &ChangeEvent) -> Result<String, ChangeError> {
    serde_json::to_string(&RawChange::from(event.clone()))
        .map_err(|e| ChangeError::Malformed(e.to_string()))
}
