use crate::domain::models::{BusyInterval, CalendarProvider, CoachId, ExternalRef, Session};
use crate::infrastructure::calcom_client::{CalcomBookingRequest, CalcomClient};
use crate::infrastructure::calendar_adapter::{ExternalCalendarAdapter, ensure_ref_provider};
use crate::infrastructure::config::{CalcomConfig, CalcomConnection};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Cal.com publishes availability from a static weekday/hour pattern, so it
/// never contributes busy time. Bookings are mirrored as Cal.com bookings.
pub struct CalcomAdapter<C>
where
    C: CalcomClient,
{
    client: Arc<C>,
    config: CalcomConfig,
    default_api_key: Option<String>,
}

impl<C> CalcomAdapter<C>
where
    C: CalcomClient,
{
    pub fn new(client: Arc<C>, config: CalcomConfig, default_api_key: Option<String>) -> Self {
        Self {
            client,
            config,
            default_api_key: default_api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    fn connection(&self, coach_id: &CoachId) -> Option<(&CalcomConnection, &str)> {
        let connection = self.config.connections.get(coach_id.as_str())?;
        let api_key = connection
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or(self.default_api_key.as_deref())?;
        Some((connection, api_key))
    }

    fn require_connection(&self, coach_id: &CoachId) -> Result<(&CalcomConnection, &str), InfraError> {
        self.connection(coach_id)
            .ok_or_else(|| InfraError::NotConnected(coach_id.to_string()))
    }
}

fn booking_id(external_ref: &ExternalRef) -> Result<u64, InfraError> {
    ensure_ref_provider(CalendarProvider::Calcom, external_ref)?;
    external_ref
        .id
        .parse()
        .map_err(|_| InfraError::InvalidConfig(format!("invalid cal.com booking id '{}'", external_ref.id)))
}

#[async_trait]
impl<C> ExternalCalendarAdapter for CalcomAdapter<C>
where
    C: CalcomClient,
{
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Calcom
    }

    async fn is_connected(&self, coach_id: &CoachId) -> Result<bool, InfraError> {
        Ok(self.connection(coach_id).is_some())
    }

    async fn get_busy_intervals(
        &self,
        _coach_id: &CoachId,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, InfraError> {
        Ok(Vec::new())
    }

    async fn create_event(&self, coach_id: &CoachId, session: &Session) -> Result<ExternalRef, InfraError> {
        let (connection, api_key) = self.require_connection(coach_id)?;
        let request = CalcomBookingRequest {
            event_type_id: connection.event_type_id,
            start: session.scheduled_start,
            end: session.scheduled_end(),
            attendee_name: session.mentee_id.to_string(),
            attendee_email: connection.attendee_email.clone(),
            title: format!("Coaching session: {}", session.session_type),
            session_id: session.id.to_string(),
        };
        let booking_id = self.client.create_booking(api_key, &request).await?;
        Ok(ExternalRef::new(CalendarProvider::Calcom, booking_id.to_string()))
    }

    async fn update_event(
        &self,
        coach_id: &CoachId,
        external_ref: &ExternalRef,
        session: &Session,
    ) -> Result<(), InfraError> {
        let booking_id = booking_id(external_ref)?;
        let (_, api_key) = self.require_connection(coach_id)?;
        self.client
            .reschedule_booking(api_key, booking_id, session.scheduled_start, session.scheduled_end())
            .await
    }

    async fn delete_event(&self, coach_id: &CoachId, external_ref: &ExternalRef) -> Result<(), InfraError> {
        let booking_id = booking_id(external_ref)?;
        let (_, api_key) = self.require_connection(coach_id)?;
        self.client.cancel_booking(api_key, booking_id).await
    }
}
