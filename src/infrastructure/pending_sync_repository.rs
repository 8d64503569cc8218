use crate::domain::models::{CoachId, ExternalRef, SessionId};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{decode_datetime, encode_datetime, open_connection};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    CreateEvent,
    DeleteEvent,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateEvent => "create_event",
            Self::DeleteEvent => "delete_event",
        }
    }

    fn parse(value: &str) -> Result<Self, InfraError> {
        match value {
            "create_event" => Ok(Self::CreateEvent),
            "delete_event" => Ok(Self::DeleteEvent),
            other => Err(InfraError::InvalidConfig(format!(
                "unsupported pending_syncs.operation '{other}'"
            ))),
        }
    }
}

/// An external calendar side effect that failed and still has to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSync {
    pub id: String,
    pub session_id: SessionId,
    pub coach_id: CoachId,
    pub operation: SyncOperation,
    pub external_ref: Option<ExternalRef>,
    pub attempts: u32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub trait PendingSyncRepository: Send + Sync {
    /// Inserts the entry, or replaces the one already recorded for the same
    /// session and operation while keeping its id and creation time.
    fn record(&self, entry: &PendingSync) -> Result<(), InfraError>;
    fn list(&self) -> Result<Vec<PendingSync>, InfraError>;
    fn remove(&self, id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePendingSyncRepository {
    db_path: PathBuf,
}

impl SqlitePendingSyncRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

type PendingSyncRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    u32,
    String,
    String,
    String,
);

fn decode_row(row: PendingSyncRow) -> Result<PendingSync, InfraError> {
    let (id, session_id, coach_id, operation, external_ref, attempts, last_error, created_at, updated_at) =
        row;
    Ok(PendingSync {
        id,
        session_id: SessionId::new(session_id),
        coach_id: CoachId::new(coach_id),
        operation: SyncOperation::parse(&operation)?,
        external_ref: external_ref
            .as_deref()
            .map(str::parse::<ExternalRef>)
            .transpose()
            .map_err(InfraError::InvalidConfig)?,
        attempts,
        last_error,
        created_at: decode_datetime(&created_at, "pending_syncs.created_at")?,
        updated_at: decode_datetime(&updated_at, "pending_syncs.updated_at")?,
    })
}

impl PendingSyncRepository for SqlitePendingSyncRepository {
    fn record(&self, entry: &PendingSync) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "INSERT INTO pending_syncs
               (id, session_id, coach_id, operation, external_ref, attempts, last_error,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(session_id, operation) DO UPDATE SET
               external_ref = excluded.external_ref,
               attempts = excluded.attempts,
               last_error = excluded.last_error,
               updated_at = excluded.updated_at",
            params![
                entry.id,
                entry.session_id.as_str(),
                entry.coach_id.as_str(),
                entry.operation.as_str(),
                entry.external_ref.as_ref().map(ToString::to_string),
                entry.attempts,
                entry.last_error,
                encode_datetime(entry.created_at),
                encode_datetime(entry.updated_at),
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<PendingSync>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection.prepare(
            "SELECT id, session_id, coach_id, operation, external_ref, attempts, last_error,
                    created_at, updated_at
             FROM pending_syncs
             ORDER BY created_at, id",
        )?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<Vec<PendingSyncRow>, _>>()?;
        rows.into_iter().map(decode_row).collect()
    }

    fn remove(&self, id: &str) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute("DELETE FROM pending_syncs WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPendingSyncRepository {
    entries: Mutex<Vec<PendingSync>>,
}

fn lock_error(error: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("pending sync lock poisoned: {error}"))
}

impl PendingSyncRepository for InMemoryPendingSyncRepository {
    fn record(&self, entry: &PendingSync) -> Result<(), InfraError> {
        let mut entries = self.entries.lock().map_err(lock_error)?;
        match entries.iter_mut().find(|existing| {
            existing.session_id == entry.session_id && existing.operation == entry.operation
        }) {
            Some(existing) => {
                existing.external_ref = entry.external_ref.clone();
                existing.attempts = entry.attempts;
                existing.last_error = entry.last_error.clone();
                existing.updated_at = entry.updated_at;
            }
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<PendingSync>, InfraError> {
        let entries = self.entries.lock().map_err(lock_error)?;
        Ok(entries.clone())
    }

    fn remove(&self, id: &str) -> Result<(), InfraError> {
        let mut entries = self.entries.lock().map_err(lock_error)?;
        entries.retain(|entry| entry.id != id);
        Ok(())
    }
}
