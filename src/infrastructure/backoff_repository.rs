use crate::domain::models::BackoffState;
use crate::infrastructure::error::InfraError;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence for the sync backoff counters.
///
/// The state lives in one versioned record; `store` only applies an update
/// whose `expected` version still matches, so two racing writers cannot
/// silently overwrite each other.
pub trait BackoffStateRepository: Send + Sync {
    fn load(&self) -> Result<BackoffState, InfraError>;
    fn store(&self, expected: &BackoffState, next: &BackoffState) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteBackoffStateRepository {
    db_path: PathBuf,
}

impl SqliteBackoffStateRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl BackoffStateRepository for SqliteBackoffStateRepository {
    fn load(&self) -> Result<BackoffState, InfraError> {
        let connection = self.connect()?;
        let state = connection.query_row(
            "SELECT failure_count, last_failure_at_ms, version FROM sync_backoff WHERE id = 1",
            [],
            |row| {
                Ok(BackoffState {
                    failure_count: row.get::<_, i64>(0)?.max(0) as u32,
                    last_failure_at_ms: row.get(1)?,
                    version: row.get(2)?,
                })
            },
        )?;
        Ok(state)
    }

    fn store(&self, expected: &BackoffState, next: &BackoffState) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let affected = connection.execute(
            "UPDATE sync_backoff
             SET failure_count = ?1, last_failure_at_ms = ?2, version = ?3
             WHERE id = 1 AND version = ?4",
            params![
                next.failure_count as i64,
                next.last_failure_at_ms,
                next.version,
                expected.version,
            ],
        )?;
        Ok(affected > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBackoffStateRepository {
    state: Mutex<BackoffState>,
}

impl BackoffStateRepository for InMemoryBackoffStateRepository {
    fn load(&self) -> Result<BackoffState, InfraError> {
        let state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("backoff lock poisoned: {error}")))?;
        Ok(*state)
    }

    fn store(&self, expected: &BackoffState, next: &BackoffState) -> Result<bool, InfraError> {
        let mut state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("backoff lock poisoned: {error}")))?;
        if state.version != expected.version {
            return Ok(false);
        }
        *state = *next;
        Ok(true)
    }
}
