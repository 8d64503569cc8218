use crate::domain::models::{CalendarProvider, CoachId, OAuthToken};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{encode_datetime, open_connection};
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait CredentialStore: Send + Sync {
    fn save_token(&self, coach_id: &CoachId, token: &OAuthToken) -> Result<(), InfraError>;
    fn load_token(&self, coach_id: &CoachId) -> Result<Option<OAuthToken>, InfraError>;
    fn delete_token(&self, coach_id: &CoachId) -> Result<(), InfraError>;
}

/// Per-coach OAuth tokens kept in the scheduling database.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    db_path: PathBuf,
    provider: CalendarProvider,
}

impl SqliteCredentialStore {
    pub fn new(db_path: impl AsRef<Path>, provider: CalendarProvider) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            provider,
        }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn save_token(&self, coach_id: &CoachId, token: &OAuthToken) -> Result<(), InfraError> {
        let payload =
            serde_json::to_string(token).map_err(|error| InfraError::Credential(error.to_string()))?;
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "INSERT INTO oauth_tokens (provider, coach_id, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider, coach_id) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![
                self.provider.as_str(),
                coach_id.as_str(),
                payload,
                encode_datetime(Utc::now())
            ],
        )?;
        Ok(())
    }

    fn load_token(&self, coach_id: &CoachId) -> Result<Option<OAuthToken>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let payload: Option<String> = connection
            .query_row(
                "SELECT payload FROM oauth_tokens WHERE provider = ?1 AND coach_id = ?2",
                params![self.provider.as_str(), coach_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let token = serde_json::from_str::<OAuthToken>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(token))
    }

    fn delete_token(&self, coach_id: &CoachId) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "DELETE FROM oauth_tokens WHERE provider = ?1 AND coach_id = ?2",
            params![self.provider.as_str(), coach_id.as_str()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tokens: Mutex<HashMap<CoachId, OAuthToken>>,
}

fn lock_error(error: impl std::fmt::Display) -> InfraError {
    InfraError::Credential(format!("in-memory lock poisoned: {error}"))
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, coach_id: &CoachId, token: &OAuthToken) -> Result<(), InfraError> {
        let mut guard = self.tokens.lock().map_err(lock_error)?;
        guard.insert(coach_id.clone(), token.clone());
        Ok(())
    }

    fn load_token(&self, coach_id: &CoachId) -> Result<Option<OAuthToken>, InfraError> {
        let guard = self.tokens.lock().map_err(lock_error)?;
        Ok(guard.get(coach_id).cloned())
    }

    fn delete_token(&self, coach_id: &CoachId) -> Result<(), InfraError> {
        let mut guard = self.tokens.lock().map_err(lock_error)?;
        guard.remove(coach_id);
        Ok(())
    }
}
