use crate::domain::models::BusyInterval;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{GoogleCalendarEvent, parse_busy_interval};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

#[async_trait]
pub trait GoogleCalendarClient: Send + Sync {
    async fn free_busy(
        &self,
        access_token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, InfraError>;

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError>;

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError>;

    /// Deleting an event that is already gone succeeds.
    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    api_base: Url,
}

#[derive(Debug, serde::Serialize)]
struct FreeBusyRequest<'a> {
    #[serde(rename = "timeMin")]
    time_min: String,
    #[serde(rename = "timeMax")]
    time_max: String,
    items: [FreeBusyItem<'a>; 1],
}

#[derive(Debug, serde::Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, serde::Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<FreeBusyPeriod>,
    #[serde(default)]
    errors: Vec<FreeBusyError>,
}

#[derive(Debug, serde::Deserialize)]
struct FreeBusyPeriod {
    start: String,
    end: String,
}

#[derive(Debug, serde::Deserialize)]
struct FreeBusyError {
    reason: Option<String>,
}

impl ReqwestGoogleCalendarClient {
    pub fn new(request_timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| InfraError::Http(format!("failed to build http client: {error}")))?;
        let api_base = Url::parse(CALENDAR_API_BASE)
            .map_err(|error| InfraError::Http(format!("invalid calendar api base url: {error}")))?;
        Ok(Self { client, api_base })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Http(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.api_base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::Http("calendar api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn events_endpoint(&self, calendar_id: &str) -> Result<Url, InfraError> {
        self.endpoint(&["calendars", calendar_id, "events"])
    }

    fn event_endpoint(&self, calendar_id: &str, event_id: &str) -> Result<Url, InfraError> {
        self.endpoint(&["calendars", calendar_id, "events", event_id])
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<(StatusCode, String), InfraError> {
        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                InfraError::Http(format!("timed out while {action}: {error}"))
            } else {
                InfraError::Http(format!("network error while {action}: {error}"))
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading response while {action}: {error}")))?;
        Ok((status, body))
    }
}

fn api_http_error(status: StatusCode, body: &str) -> InfraError {
    let message = if body.trim().is_empty() {
        format!("google calendar api error: http {}", status.as_u16())
    } else {
        format!("google calendar api error: http {}; body={body}", status.as_u16())
    };
    InfraError::Http(message)
}

fn parse_free_busy(calendar_id: &str, body: &str) -> Result<Vec<BusyInterval>, InfraError> {
    let parsed: FreeBusyResponse = serde_json::from_str(body)
        .map_err(|error| InfraError::Http(format!("invalid freeBusy payload: {error}")))?;
    let Some(calendar) = parsed.calendars.get(calendar_id) else {
        return Ok(Vec::new());
    };
    if let Some(error) = calendar.errors.first() {
        return Err(InfraError::Http(format!(
            "freeBusy failed for {calendar_id}: {}",
            error.reason.as_deref().unwrap_or("unknown")
        )));
    }
    let mut intervals = Vec::with_capacity(calendar.busy.len());
    for period in &calendar.busy {
        if let Some(interval) = parse_busy_interval(&period.start, &period.end)? {
            intervals.push(interval);
        }
    }
    Ok(intervals)
}

#[async_trait]
impl GoogleCalendarClient for ReqwestGoogleCalendarClient {
    async fn free_busy(
        &self,
        access_token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.endpoint(&["freeBusy"])?;
        let request = FreeBusyRequest {
            time_min: time_min.to_rfc3339(),
            time_max: time_max.to_rfc3339(),
            items: [FreeBusyItem { id: calendar_id }],
        };
        let (status, body) = self
            .send(
                self.client.post(endpoint).bearer_auth(access_token).json(&request),
                "querying free/busy",
            )
            .await?;
        if !status.is_success() {
            return Err(api_http_error(status, &body));
        }
        parse_free_busy(calendar_id, &body)
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.events_endpoint(calendar_id)?;
        let (status, body) = self
            .send(
                self.client.post(endpoint).bearer_auth(access_token).json(event),
                "creating event",
            )
            .await?;
        if !status.is_success() {
            return Err(api_http_error(status, &body));
        }

        let parsed: GoogleCalendarEvent = serde_json::from_str(&body)
            .map_err(|error| InfraError::Http(format!("invalid event create payload: {error}")))?;
        parsed
            .id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::Http("event create response did not include id".to_string()))
    }

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = self.event_endpoint(calendar_id, event_id)?;
        let (status, body) = self
            .send(
                self.client.patch(endpoint).bearer_auth(access_token).json(event),
                "updating event",
            )
            .await?;
        if !status.is_success() {
            return Err(api_http_error(status, &body));
        }
        Ok(())
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = self.event_endpoint(calendar_id, event_id)?;
        let (status, body) = self
            .send(
                self.client.delete(endpoint).bearer_auth(access_token),
                "deleting event",
            )
            .await?;
        if status.is_success() || status == StatusCode::GONE || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(api_http_error(status, &body))
    }
}
