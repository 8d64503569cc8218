use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub(crate) fn open_connection(path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(std::time::Duration::from_secs(5))?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(connection)
}

pub(crate) fn encode_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub(crate) fn decode_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {column} '{raw}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let path = std::env::temp_dir().join(format!(
            "coachsched-storage-{}.sqlite",
            std::process::id()
        ));
        initialize_database(&path).expect("first init");
        initialize_database(&path).expect("second init");

        let connection = Connection::open(&path).expect("open database");
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('coach_settings','availability_days','blocked_dates','sessions','pending_syncs','oauth_tokens')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(count, 6);
        drop(connection);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn datetimes_are_stored_as_utc_rfc3339() {
        let value = DateTime::parse_from_rfc3339("2026-02-16T10:00:00+09:00")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let encoded = encode_datetime(value);
        assert_eq!(encoded, "2026-02-16T01:00:00Z");
        assert_eq!(decode_datetime(&encoded, "scheduled_start").expect("decode"), value);
        assert!(decode_datetime("yesterday", "scheduled_start").is_err());
    }
}
