//! In-memory backend for the edge validator.
//!
//! Holds the bearer-token directory, the `tasks` table and the two audit
//! tables. It can be seeded from a JSON file so a standalone edge process
//! has something to validate against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use collabtodo_proto::audit::{AuthLogEntry, TaskLogEntry};
use collabtodo_proto::task::{Task, TaskId, UserId};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::validator::{Backend, BackendError};

/// Errors that can occur when loading a seed file.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// Failed to read the seed file.
    #[error("failed to read seed file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The seed file is not valid JSON of the expected shape.
    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shape of a seed file.
///
/// ```json
/// { "tokens": { "token-a": "user-a" }, "tasks": [ ... ] }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    tokens: HashMap<String, UserId>,
    tasks: Vec<Task>,
}

/// Token directory, task rows and audit tables behind [`tokio::sync::RwLock`]s.
#[derive(Default)]
pub struct MemoryBackend {
    tokens: RwLock<HashMap<String, UserId>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    auth_logs: RwLock<Vec<AuthLogEntry>>,
    task_logs: RwLock<Vec<TaskLogEntry>>,
    /// Number of upcoming task lookups that fail as if the database were down.
    failures: parking_lot::Mutex<u32>,
}

impl MemoryBackend {
    /// Creates an empty backend. Every token is rejected until one is added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads tokens and tasks from a JSON seed file.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`] if the file cannot be read or parsed.
    pub fn from_seed_file(path: &Path) -> Result<Self, SeedError> {
        let contents = std::fs::read_to_string(path).map_err(|e| SeedError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_seed_json(&contents)
    }

    /// Loads tokens and tasks from seed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::Parse`] for malformed input.
    pub fn from_seed_json(json: &str) -> Result<Self, SeedError> {
        let seed: SeedFile = serde_json::from_str(json)?;
        let tasks = seed
            .tasks
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        Ok(Self {
            tokens: RwLock::new(seed.tokens),
            tasks: RwLock::new(tasks),
            ..Self::default()
        })
    }

    /// Registers a bearer token for `user`.
    pub async fn add_token(&self, token: impl Into<String>, user: UserId) {
        self.tokens.write().await.insert(token.into(), user);
    }

    /// Inserts or replaces a task row.
    pub async fn put_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Makes the next `n` task lookups fail.
    pub fn fail_next_lookups(&self, n: u32) {
        *self.failures.lock() = n;
    }

    /// Number of registered tokens and task rows.
    pub async fn counts(&self) -> (usize, usize) {
        (
            self.tokens.read().await.len(),
            self.tasks.read().await.len(),
        )
    }

    /// Snapshot of the `auth_logs` table.
    pub async fn auth_logs(&self) -> Vec<AuthLogEntry> {
        self.auth_logs.read().await.clone()
    }

    /// Snapshot of the `task_logs` table.
    pub async fn task_logs(&self) -> Vec<TaskLogEntry> {
        self.task_logs.read().await.clone()
    }

    fn take_failure(&self) -> Result<(), BackendError> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(BackendError::Unavailable("injected lookup failure".into()));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    async fn user_for_token(&self, token: &str) -> Result<Option<UserId>, BackendError> {
        Ok(self.tokens.read().await.get(token).cloned())
    }

    async fn find_task(&self, id: &TaskId) -> Result<Option<Task>, BackendError> {
        self.take_failure()?;
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn insert_auth_log(&self, entry: AuthLogEntry) -> Result<(), BackendError> {
        self.auth_logs.write().await.push(entry);
        Ok(())
    }

    async fn insert_task_log(&self, entry: TaskLogEntry) -> Result<(), BackendError> {
        self.task_logs.write().await.push(entry);
        Ok(())
    }
}
