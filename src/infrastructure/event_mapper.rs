use crate::domain::models::{BusyInterval, Session, SessionId};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const KEY_SESSION_ID: &str = "cs_session_id";
const KEY_COACH_ID: &str = "cs_coach_id";
const KEY_MENTEE_ID: &str = "cs_mentee_id";
const KEY_SESSION_TYPE: &str = "cs_session_type";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

/// Builds the calendar event for a session, tagging it with the session ids so
/// the event can be traced back to the ledger.
pub fn encode_session_event(session: &Session, time_zone: Option<&str>) -> GoogleCalendarEvent {
    let mut private = HashMap::new();
    private.insert(KEY_SESSION_ID.to_string(), session.id.to_string());
    private.insert(KEY_COACH_ID.to_string(), session.coach_id.to_string());
    private.insert(KEY_MENTEE_ID.to_string(), session.mentee_id.to_string());
    private.insert(KEY_SESSION_TYPE.to_string(), session.session_type.clone());

    let time_zone = time_zone
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    GoogleCalendarEvent {
        id: None,
        summary: Some(format!("Coaching session: {}", session.session_type)),
        description: session
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(ToOwned::to_owned),
        status: Some("confirmed".to_string()),
        start: CalendarEventDateTime {
            date_time: session.scheduled_start.to_rfc3339(),
            time_zone: time_zone.clone(),
        },
        end: CalendarEventDateTime {
            date_time: session.scheduled_end().to_rfc3339(),
            time_zone,
        },
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    }
}

/// Session id carried by an event this crate created, if any.
#[cfg(test)]
pub fn decode_session_id(event: &GoogleCalendarEvent) -> Option<SessionId> {
    event
        .extended_properties
        .as_ref()?
        .private
        .get(KEY_SESSION_ID)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(SessionId::from)
}

pub fn parse_busy_interval(start: &str, end: &str) -> Result<Option<BusyInterval>, InfraError> {
    let start = parse_rfc3339_utc(start, "busy.start")?;
    let end = parse_rfc3339_utc(end, "busy.end")?;
    Ok(BusyInterval::new(start, end))
}

fn parse_rfc3339_utc(value: &str, field: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::Http(format!("invalid {field} '{value}': {error}")))
}
