use crate::domain::models::{AvailabilityTemplate, BlockedDateSet, CoachId, DayAvailability};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{encode_datetime, open_connection};
use chrono::{NaiveDate, Utc};
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait AvailabilityRepository: Send + Sync {
    fn load_template(&self, coach_id: &CoachId) -> Result<Option<AvailabilityTemplate>, InfraError>;
    fn save_template(&self, template: &AvailabilityTemplate) -> Result<(), InfraError>;
    fn load_blocked_dates(&self, coach_id: &CoachId) -> Result<BlockedDateSet, InfraError>;
    fn save_blocked_dates(&self, blocked: &BlockedDateSet) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteAvailabilityRepository {
    db_path: PathBuf,
}

impl SqliteAvailabilityRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

impl AvailabilityRepository for SqliteAvailabilityRepository {
    fn load_template(&self, coach_id: &CoachId) -> Result<Option<AvailabilityTemplate>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let timezone: Option<String> = connection
            .query_row(
                "SELECT timezone FROM coach_settings WHERE coach_id = ?1",
                params![coach_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(timezone) = timezone else {
            return Ok(None);
        };

        let mut statement = connection.prepare(
            "SELECT day_of_week, is_available, start_time, end_time
             FROM availability_days
             WHERE coach_id = ?1
             ORDER BY day_of_week",
        )?;
        let days = statement
            .query_map(params![coach_id.as_str()], |row| {
                Ok(DayAvailability {
                    day_of_week: row.get(0)?,
                    is_available: row.get(1)?,
                    start_time: row.get(2)?,
                    end_time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(AvailabilityTemplate {
            coach_id: coach_id.clone(),
            timezone,
            days,
        }))
    }

    fn save_template(&self, template: &AvailabilityTemplate) -> Result<(), InfraError> {
        template.validate().map_err(InfraError::InvalidConfig)?;
        let mut connection = open_connection(&self.db_path)?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "INSERT INTO coach_settings (coach_id, timezone, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(coach_id) DO UPDATE SET
               timezone = excluded.timezone,
               updated_at = excluded.updated_at",
            params![
                template.coach_id.as_str(),
                template.timezone.trim(),
                encode_datetime(Utc::now())
            ],
        )?;
        transaction.execute(
            "DELETE FROM availability_days WHERE coach_id = ?1",
            params![template.coach_id.as_str()],
        )?;
        for day in &template.days {
            transaction.execute(
                "INSERT INTO availability_days
                   (coach_id, day_of_week, is_available, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    template.coach_id.as_str(),
                    day.day_of_week,
                    day.is_available,
                    day.start_time,
                    day.end_time
                ],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn load_blocked_dates(&self, coach_id: &CoachId) -> Result<BlockedDateSet, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection.prepare(
            "SELECT blocked_date FROM blocked_dates WHERE coach_id = ?1 ORDER BY blocked_date",
        )?;
        let raw_dates = statement
            .query_map(params![coach_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut blocked = BlockedDateSet::empty(coach_id.clone());
        for raw in raw_dates {
            let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|error| {
                InfraError::InvalidConfig(format!("invalid blocked_dates.blocked_date '{raw}': {error}"))
            })?;
            blocked.insert(date);
        }
        Ok(blocked)
    }

    fn save_blocked_dates(&self, blocked: &BlockedDateSet) -> Result<(), InfraError> {
        let mut connection = open_connection(&self.db_path)?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "DELETE FROM blocked_dates WHERE coach_id = ?1",
            params![blocked.coach_id.as_str()],
        )?;
        for date in &blocked.dates {
            transaction.execute(
                "INSERT INTO blocked_dates (coach_id, blocked_date) VALUES (?1, ?2)",
                params![blocked.coach_id.as_str(), date.format("%Y-%m-%d").to_string()],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAvailabilityRepository {
    templates: Mutex<HashMap<CoachId, AvailabilityTemplate>>,
    blocked: Mutex<HashMap<CoachId, BlockedDateSet>>,
}

fn lock_error(error: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("availability lock poisoned: {error}"))
}

impl AvailabilityRepository for InMemoryAvailabilityRepository {
    fn load_template(&self, coach_id: &CoachId) -> Result<Option<AvailabilityTemplate>, InfraError> {
        let templates = self.templates.lock().map_err(lock_error)?;
        Ok(templates.get(coach_id).cloned())
    }

    fn save_template(&self, template: &AvailabilityTemplate) -> Result<(), InfraError> {
        template.validate().map_err(InfraError::InvalidConfig)?;
        let mut templates = self.templates.lock().map_err(lock_error)?;
        templates.insert(template.coach_id.clone(), template.clone());
        Ok(())
    }

    fn load_blocked_dates(&self, coach_id: &CoachId) -> Result<BlockedDateSet, InfraError> {
        let blocked = self.blocked.lock().map_err(lock_error)?;
        Ok(blocked
            .get(coach_id)
            .cloned()
            .unwrap_or_else(|| BlockedDateSet::empty(coach_id.clone())))
    }

    fn save_blocked_dates(&self, blocked: &BlockedDateSet) -> Result<(), InfraError> {
        let mut guard = self.blocked.lock().map_err(lock_error)?;
        guard.insert(blocked.coach_id.clone(), blocked.clone());
        Ok(())
    }
}
