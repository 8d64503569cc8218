use crate::domain::models::{CalendarProvider, CoachId, ConflictPolicy, parse_timezone};
use crate::infrastructure::error::InfraError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const CALENDARS_JSON: &str = "calendars.json";
const SCHEDULING_JSON: &str = "scheduling.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub timezone: String,
    #[serde(default = "default_slot_minutes")]
    pub slot_granularity_minutes: u32,
    #[serde(default = "default_slot_minutes")]
    pub default_session_minutes: u32,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCalendarsConfig {
    #[serde(default = "default_calendar_id")]
    pub default_calendar_id: String,
    #[serde(default)]
    pub calendar_ids: BTreeMap<String, String>,
}

impl GoogleCalendarsConfig {
    pub fn calendar_id_for(&self, coach_id: &CoachId) -> &str {
        self.calendar_ids
            .get(coach_id.as_str())
            .map(String::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.default_calendar_id.as_str())
    }
}

impl Default for GoogleCalendarsConfig {
    fn default() -> Self {
        Self {
            default_calendar_id: default_calendar_id(),
            calendar_ids: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalcomConnection {
    pub event_type_id: u64,
    pub attendee_email: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalcomConfig {
    #[serde(default = "default_calcom_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub connections: BTreeMap<String, CalcomConnection>,
}

impl Default for CalcomConfig {
    fn default() -> Self {
        Self {
            base_url: default_calcom_base_url(),
            connections: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarsConfig {
    #[serde(default)]
    pub providers: Vec<CalendarProvider>,
    #[serde(default)]
    pub google: GoogleCalendarsConfig,
    #[serde(default)]
    pub calcom: CalcomConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConfig {
    pub retry: RetryConfig,
    pub adapter_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub calendars: CalendarsConfig,
    pub scheduling: SchedulingConfig,
}

fn default_slot_minutes() -> u32 {
    60
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_calcom_base_url() -> String {
    "https://api.cal.com".to_string()
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "UTC",
                "slotGranularityMinutes": 60,
                "defaultSessionMinutes": 60,
                "conflictPolicy": "internal_only"
            }),
        ),
        (
            CALENDARS_JSON,
            serde_json::json!({
                "schema": 1,
                "providers": ["google", "calcom"],
                "google": {
                    "defaultCalendarId": "primary",
                    "calendarIds": {}
                },
                "calcom": {
                    "baseUrl": "https://api.cal.com",
                    "connections": {}
                }
            }),
        ),
        (
            SCHEDULING_JSON,
            serde_json::json!({
                "schema": 1,
                "retry": {
                    "maxAttempts": 3,
                    "baseDelayMs": 200
                },
                "adapterTimeoutMs": 5000
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_json(&path, &value)?;
        }
    }
    Ok(())
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T: DeserializeOwned>(path: &Path) -> Result<T, InfraError> {
    let value = read_config(path)?;
    serde_json::from_value(value)
        .map_err(|error| InfraError::InvalidConfig(format!("{}: {error}", path.display())))
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let bundle = ConfigBundle {
        app: read_typed(&config_dir.join(APP_JSON))?,
        calendars: read_typed(&config_dir.join(CALENDARS_JSON))?,
        scheduling: read_typed(&config_dir.join(SCHEDULING_JSON))?,
    };
    bundle.validate()?;
    Ok(bundle)
}

impl ConfigBundle {
    pub fn validate(&self) -> Result<(), InfraError> {
        parse_timezone(&self.app.timezone).map_err(InfraError::InvalidConfig)?;
        if self.app.slot_granularity_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "slotGranularityMinutes must be > 0".to_string(),
            ));
        }
        if self.app.default_session_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "defaultSessionMinutes must be > 0".to_string(),
            ));
        }
        if self.scheduling.retry.max_attempts == 0 {
            return Err(InfraError::InvalidConfig(
                "retry.maxAttempts must be > 0".to_string(),
            ));
        }
        if self.scheduling.adapter_timeout_ms == 0 {
            return Err(InfraError::InvalidConfig(
                "adapterTimeoutMs must be > 0".to_string(),
            ));
        }
        for (coach_id, connection) in &self.calendars.calcom.connections {
            if connection.attendee_email.trim().is_empty() {
                return Err(InfraError::InvalidConfig(format!(
                    "calcom connection for {coach_id} needs attendeeEmail"
                )));
            }
        }
        Ok(())
    }
}

/// Records which Google calendar receives a coach's session events.
pub fn save_google_calendar_id(
    config_dir: &Path,
    coach_id: &CoachId,
    calendar_id: &str,
) -> Result<(), InfraError> {
    let calendar_id = calendar_id.trim();
    if calendar_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "google calendar id must not be empty".to_string(),
        ));
    }

    let path = config_dir.join(CALENDARS_JSON);
    let mut calendars = read_config(&path)?;
    let object = calendars.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    let google = object
        .entry("google")
        .or_insert_with(|| serde_json::json!({ "defaultCalendarId": "primary" }));
    let calendar_ids = google
        .as_object_mut()
        .ok_or_else(|| {
            InfraError::InvalidConfig(format!("invalid google object in {}", path.display()))
        })?
        .entry("calendarIds")
        .or_insert_with(|| serde_json::json!({}));
    let ids_object = calendar_ids.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "invalid calendarIds object structure in {}",
            path.display()
        ))
    })?;
    ids_object.insert(
        coach_id.to_string(),
        serde_json::Value::String(calendar_id.to_string()),
    );

    write_json(&path, &calendars)
}
