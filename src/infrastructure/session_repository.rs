use crate::domain::models::{CoachId, ExternalRef, MenteeId, Session, SessionId, SessionStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{decode_datetime, encode_datetime, open_connection};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The booking ledger. Overlap between active sessions of one coach is
/// prevented here and nowhere else.
pub trait SessionRepository: Send + Sync {
    /// Stores `session` unless an active session of the same coach overlaps it.
    /// Returns `false` when the slot was already taken.
    fn insert_if_no_overlap(&self, session: &Session) -> Result<bool, InfraError>;
    fn get(&self, session_id: &SessionId) -> Result<Option<Session>, InfraError>;
    /// Replaces the stored row only while its status still equals `expected`.
    fn update_if_status(&self, session: &Session, expected: SessionStatus) -> Result<bool, InfraError>;
    /// Sessions of any status whose span intersects `[start, end)`, ordered by start.
    fn list_for_coach(
        &self,
        coach_id: &CoachId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSessionRepository {
    db_path: PathBuf,
}

impl SqliteSessionRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

const SESSION_COLUMNS: &str = "id, coach_id, mentee_id, session_type, scheduled_start,
    duration_minutes, status, external_booking_ref, notes, created_at, updated_at,
    cancelled_at, rescheduled_from, rescheduled_to";

struct SessionRow {
    id: String,
    coach_id: String,
    mentee_id: String,
    session_type: String,
    scheduled_start: String,
    duration_minutes: u32,
    status: String,
    external_booking_ref: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
    cancelled_at: Option<String>,
    rescheduled_from: Option<String>,
    rescheduled_to: Option<String>,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            coach_id: row.get(1)?,
            mentee_id: row.get(2)?,
            session_type: row.get(3)?,
            scheduled_start: row.get(4)?,
            duration_minutes: row.get(5)?,
            status: row.get(6)?,
            external_booking_ref: row.get(7)?,
            notes: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            cancelled_at: row.get(11)?,
            rescheduled_from: row.get(12)?,
            rescheduled_to: row.get(13)?,
        })
    }

    fn into_session(self) -> Result<Session, InfraError> {
        let status = self.status.parse().map_err(InfraError::InvalidConfig)?;
        let external_booking_ref = self
            .external_booking_ref
            .as_deref()
            .map(str::parse::<ExternalRef>)
            .transpose()
            .map_err(InfraError::InvalidConfig)?;
        let cancelled_at = self
            .cancelled_at
            .as_deref()
            .map(|raw| decode_datetime(raw, "sessions.cancelled_at"))
            .transpose()?;
        Ok(Session {
            id: SessionId::new(self.id),
            coach_id: CoachId::new(self.coach_id),
            mentee_id: MenteeId::new(self.mentee_id),
            session_type: self.session_type,
            scheduled_start: decode_datetime(&self.scheduled_start, "sessions.scheduled_start")?,
            duration_minutes: self.duration_minutes,
            status,
            external_booking_ref,
            notes: self.notes,
            created_at: decode_datetime(&self.created_at, "sessions.created_at")?,
            updated_at: decode_datetime(&self.updated_at, "sessions.updated_at")?,
            cancelled_at,
            rescheduled_from: self.rescheduled_from.map(SessionId::new),
            rescheduled_to: self.rescheduled_to.map(SessionId::new),
        })
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn insert_if_no_overlap(&self, session: &Session) -> Result<bool, InfraError> {
        session.validate().map_err(InfraError::InvalidConfig)?;
        let mut connection = open_connection(&self.db_path)?;
        // IMMEDIATE takes the write lock before the overlap check so two
        // writers cannot both observe a free slot.
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let conflict: Option<String> = transaction
            .query_row(
                "SELECT id FROM sessions
                 WHERE coach_id = ?1
                   AND status IN ('pending', 'confirmed')
                   AND scheduled_start < ?3
                   AND scheduled_end > ?2
                 LIMIT 1",
                params![
                    session.coach_id.as_str(),
                    encode_datetime(session.scheduled_start),
                    encode_datetime(session.scheduled_end())
                ],
                |row| row.get(0),
            )
            .optional()?;
        if conflict.is_some() {
            return Ok(false);
        }

        transaction.execute(
            "INSERT INTO sessions (id, coach_id, mentee_id, session_type, scheduled_start,
                scheduled_end, duration_minutes, status, external_booking_ref, notes,
                created_at, updated_at, cancelled_at, rescheduled_from, rescheduled_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                session.id.as_str(),
                session.coach_id.as_str(),
                session.mentee_id.as_str(),
                session.session_type,
                encode_datetime(session.scheduled_start),
                encode_datetime(session.scheduled_end()),
                session.duration_minutes,
                session.status.as_str(),
                session.external_booking_ref.as_ref().map(ToString::to_string),
                session.notes,
                encode_datetime(session.created_at),
                encode_datetime(session.updated_at),
                session.cancelled_at.map(encode_datetime),
                session.rescheduled_from.as_ref().map(SessionId::as_str),
                session.rescheduled_to.as_ref().map(SessionId::as_str),
            ],
        )?;
        transaction.commit()?;
        Ok(true)
    }

    fn get(&self, session_id: &SessionId) -> Result<Option<Session>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let row = connection
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![session_id.as_str()],
                SessionRow::read,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn update_if_status(&self, session: &Session, expected: SessionStatus) -> Result<bool, InfraError> {
        session.validate().map_err(InfraError::InvalidConfig)?;
        let connection = open_connection(&self.db_path)?;
        let changed = connection.execute(
            "UPDATE sessions SET
               status = ?2,
               external_booking_ref = ?3,
               notes = ?4,
               updated_at = ?5,
               cancelled_at = ?6,
               rescheduled_from = ?7,
               rescheduled_to = ?8
             WHERE id = ?1 AND status = ?9",
            params![
                session.id.as_str(),
                session.status.as_str(),
                session.external_booking_ref.as_ref().map(ToString::to_string),
                session.notes,
                encode_datetime(session.updated_at),
                session.cancelled_at.map(encode_datetime),
                session.rescheduled_from.as_ref().map(SessionId::as_str),
                session.rescheduled_to.as_ref().map(SessionId::as_str),
                expected.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_for_coach(
        &self,
        coach_id: &CoachId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE coach_id = ?1 AND scheduled_start < ?3 AND scheduled_end > ?2
             ORDER BY scheduled_start, id"
        ))?;
        let rows = statement
            .query_map(
                params![coach_id.as_str(), encode_datetime(start), encode_datetime(end)],
                SessionRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

fn lock_error(error: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("session ledger lock poisoned: {error}"))
}

impl SessionRepository for InMemorySessionRepository {
    fn insert_if_no_overlap(&self, session: &Session) -> Result<bool, InfraError> {
        session.validate().map_err(InfraError::InvalidConfig)?;
        // One guard spans the check and the insert.
        let mut sessions = self.sessions.lock().map_err(lock_error)?;
        let (start, end) = (session.scheduled_start, session.scheduled_end());
        let taken = sessions
            .values()
            .any(|existing| existing.coach_id == session.coach_id && existing.conflicts_with(start, end));
        if taken || sessions.contains_key(&session.id) {
            return Ok(false);
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(true)
    }

    fn get(&self, session_id: &SessionId) -> Result<Option<Session>, InfraError> {
        let sessions = self.sessions.lock().map_err(lock_error)?;
        Ok(sessions.get(session_id).cloned())
    }

    fn update_if_status(&self, session: &Session, expected: SessionStatus) -> Result<bool, InfraError> {
        session.validate().map_err(InfraError::InvalidConfig)?;
        let mut sessions = self.sessions.lock().map_err(lock_error)?;
        match sessions.get_mut(&session.id) {
            Some(stored) if stored.status == expected => {
                *stored = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_for_coach(
        &self,
        coach_id: &CoachId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, InfraError> {
        let sessions = self.sessions.lock().map_err(lock_error)?;
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|session| &session.coach_id == coach_id && session.span().overlaps(start, end))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            left.scheduled_start
                .cmp(&right.scheduled_start)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CalendarProvider;
    use crate::infrastructure::storage::initialize_database;
    use chrono::Duration;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_DB: AtomicU64 = AtomicU64::new(0);

    struct TempDatabase {
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "coachsched-sessions-{}-{}.sqlite",
                std::process::id(),
                NEXT_DB.fetch_add(1, Ordering::Relaxed)
            ));
            initialize_database(&path).expect("initialize database");
            Self { path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn session(id: &str, coach: &str, start: &str, minutes: u32) -> Session {
        let created = utc("2026-02-01T00:00:00Z");
        Session {
            id: SessionId::from(id),
            coach_id: CoachId::from(coach),
            mentee_id: MenteeId::from("mentee-1"),
            session_type: "mock_interview".to_string(),
            scheduled_start: utc(start),
            duration_minutes: minutes,
            status: SessionStatus::Pending,
            external_booking_ref: None,
            notes: Some("bring resume".to_string()),
            created_at: created,
            updated_at: created,
            cancelled_at: None,
            rescheduled_from: None,
            rescheduled_to: None,
        }
    }

    fn exercise_ledger(ledger: &dyn SessionRepository) {
        let first = session("ses-1", "coach-1", "2026-02-16T10:00:00Z", 60);
        assert!(ledger.insert_if_no_overlap(&first).expect("insert first"));

        let overlapping = session("ses-2", "coach-1", "2026-02-16T10:30:00Z", 60);
        assert!(!ledger.insert_if_no_overlap(&overlapping).expect("insert overlap"));

        let adjacent = session("ses-3", "coach-1", "2026-02-16T11:00:00Z", 60);
        assert!(ledger.insert_if_no_overlap(&adjacent).expect("insert adjacent"));

        let other_coach = session("ses-4", "coach-2", "2026-02-16T10:00:00Z", 60);
        assert!(ledger.insert_if_no_overlap(&other_coach).expect("insert other coach"));

        assert_eq!(ledger.get(&first.id).expect("get"), Some(first.clone()));
        assert_eq!(ledger.get(&SessionId::from("missing")).expect("get"), None);

        let listed = ledger
            .list_for_coach(
                &CoachId::from("coach-1"),
                utc("2026-02-16T00:00:00Z"),
                utc("2026-02-17T00:00:00Z"),
            )
            .expect("list");
        let ids: Vec<&str> = listed.iter().map(|session| session.id.as_str()).collect();
        assert_eq!(ids, vec!["ses-1", "ses-3"]);

        let mut cancelled = first.clone();
        cancelled.status = SessionStatus::Cancelled;
        cancelled.cancelled_at = Some(utc("2026-02-10T00:00:00Z"));
        cancelled.updated_at = utc("2026-02-10T00:00:00Z");
        assert!(!ledger
            .update_if_status(&cancelled, SessionStatus::Confirmed)
            .expect("stale update"));
        assert!(ledger
            .update_if_status(&cancelled, SessionStatus::Pending)
            .expect("update"));
        assert_eq!(ledger.get(&first.id).expect("get"), Some(cancelled));

        // A cancelled session frees its range.
        assert!(ledger.insert_if_no_overlap(&overlapping).expect("insert after cancel"));

        let mut confirmed = adjacent.clone();
        confirmed.status = SessionStatus::Confirmed;
        confirmed.external_booking_ref = Some(ExternalRef::new(CalendarProvider::Google, "evt-9"));
        assert!(ledger
            .update_if_status(&confirmed, SessionStatus::Pending)
            .expect("confirm"));
        assert_eq!(
            ledger
                .get(&adjacent.id)
                .expect("get")
                .and_then(|session| session.external_booking_ref),
            Some(ExternalRef::new(CalendarProvider::Google, "evt-9"))
        );
    }

    #[test]
    fn in_memory_ledger_rejects_overlaps() {
        exercise_ledger(&InMemorySessionRepository::default());
    }

    #[test]
    fn sqlite_ledger_rejects_overlaps() {
        let database = TempDatabase::new();
        exercise_ledger(&SqliteSessionRepository::new(&database.path));
    }

    #[test]
    fn concurrent_inserts_for_one_slot_admit_exactly_one() {
        let database = TempDatabase::new();
        let ledger = Arc::new(SqliteSessionRepository::new(&database.path));
        let handles: Vec<_> = (0..8)
            .map(|index| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let candidate = session(
                        &format!("race-{index}"),
                        "coach-1",
                        "2026-02-16T09:00:00Z",
                        60,
                    );
                    ledger.insert_if_no_overlap(&candidate).expect("insert")
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn list_includes_sessions_straddling_range_start() {
        let ledger = InMemorySessionRepository::default();
        let late = session("ses-late", "coach-1", "2026-02-15T23:30:00Z", 60);
        assert!(ledger.insert_if_no_overlap(&late).expect("insert"));
        let start = utc("2026-02-16T00:00:00Z");
        let listed = ledger
            .list_for_coach(&CoachId::from("coach-1"), start, start + Duration::days(1))
            .expect("list");
        assert_eq!(listed.len(), 1);
    }
}
