use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalcomBookingRequest {
    pub event_type_id: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_name: String,
    pub attendee_email: String,
    pub title: String,
    pub session_id: String,
}

#[async_trait]
pub trait CalcomClient: Send + Sync {
    async fn create_booking(&self, api_key: &str, request: &CalcomBookingRequest) -> Result<u64, InfraError>;

    async fn reschedule_booking(
        &self,
        api_key: &str,
        booking_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// Cancelling a booking that no longer exists succeeds.
    async fn cancel_booking(&self, api_key: &str, booking_id: u64) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestCalcomClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingBody<'a> {
    event_type_id: u64,
    start: String,
    end: String,
    time_zone: &'a str,
    language: &'a str,
    title: &'a str,
    responses: BookingResponses<'a>,
    metadata: BookingMetadata<'a>,
}

#[derive(Debug, serde::Serialize)]
struct BookingResponses<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingMetadata<'a> {
    session_id: &'a str,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RescheduleBody {
    start_time: String,
    end_time: String,
}

#[derive(Debug, serde::Deserialize)]
struct BookingPayload {
    id: Option<u64>,
}

impl ReqwestCalcomClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| InfraError::Http(format!("failed to build http client: {error}")))?;
        let base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid cal.com base url: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str], api_key: &str) -> Result<Url, InfraError> {
        if api_key.trim().is_empty() {
            return Err(InfraError::Credential("cal.com api key must not be empty".to_string()));
        }
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("cal.com base URL cannot be a base".to_string()))?;
            path.pop_if_empty();
            path.push("v1");
            for segment in segments {
                path.push(segment);
            }
        }
        url.query_pairs_mut().append_pair("apiKey", api_key.trim());
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<(StatusCode, String), InfraError> {
        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                InfraError::Http(format!("timed out while {action}"))
            } else {
                InfraError::Http(format!("network error while {action}: {}", error.without_url()))
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading response while {action}: {}", error.without_url())))?;
        Ok((status, body))
    }
}

fn calcom_http_error(status: StatusCode, body: &str) -> InfraError {
    if body.trim().is_empty() {
        InfraError::Http(format!("cal.com api error: http {}", status.as_u16()))
    } else {
        InfraError::Http(format!("cal.com api error: http {}; body={body}", status.as_u16()))
    }
}

fn parse_booking_id(body: &str) -> Result<u64, InfraError> {
    let parsed: BookingPayload = serde_json::from_str(body)
        .map_err(|error| InfraError::Http(format!("invalid cal.com booking payload: {error}")))?;
    parsed
        .id
        .ok_or_else(|| InfraError::Http("cal.com booking response did not include id".to_string()))
}

#[async_trait]
impl CalcomClient for ReqwestCalcomClient {
    async fn create_booking(&self, api_key: &str, request: &CalcomBookingRequest) -> Result<u64, InfraError> {
        let endpoint = self.endpoint(&["bookings"], api_key)?;
        let body = CreateBookingBody {
            event_type_id: request.event_type_id,
            start: request.start.to_rfc3339(),
            end: request.end.to_rfc3339(),
            time_zone: "UTC",
            language: "en",
            title: &request.title,
            responses: BookingResponses {
                name: &request.attendee_name,
                email: &request.attendee_email,
            },
            metadata: BookingMetadata {
                session_id: &request.session_id,
            },
        };
        let (status, text) = self
            .send(self.client.post(endpoint).json(&body), "creating cal.com booking")
            .await?;
        if !status.is_success() {
            return Err(calcom_http_error(status, &text));
        }
        parse_booking_id(&text)
    }

    async fn reschedule_booking(
        &self,
        api_key: &str,
        booking_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let booking_id = booking_id.to_string();
        let endpoint = self.endpoint(&["bookings", &booking_id], api_key)?;
        let body = RescheduleBody {
            start_time: start.to_rfc3339(),
            end_time: end.to_rfc3339(),
        };
        let (status, text) = self
            .send(self.client.patch(endpoint).json(&body), "rescheduling cal.com booking")
            .await?;
        if !status.is_success() {
            return Err(calcom_http_error(status, &text));
        }
        Ok(())
    }

    async fn cancel_booking(&self, api_key: &str, booking_id: u64) -> Result<(), InfraError> {
        let booking_id = booking_id.to_string();
        let endpoint = self.endpoint(&["bookings", &booking_id, "cancel"], api_key)?;
        let (status, text) = self
            .send(self.client.delete(endpoint), "cancelling cal.com booking")
            .await?;
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(());
        }
        Err(calcom_http_error(status, &text))
    }
}
